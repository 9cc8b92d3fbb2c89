//! Bot configuration
//!
//! Identity comes from the environment (each deployed instance gets its ids
//! injected); trading behaviour comes from a YAML profile that operators
//! edit. Every profile field has a default so a partial file stays valid.

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::retry::RetryPolicy;

/// Default profile location under the home directory
const DEFAULT_PROFILE_DIR: &str = ".bot-core";
const DEFAULT_PROFILE_FILE: &str = "profile.yaml";

/// Process identity loaded from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Bot id; accepts the legacy wide space (101-109) as well as 1-9
    pub bot_id: u16,
    /// AI configuration slot, 0-9
    pub config_id: u8,
    pub profile_path: PathBuf,
}

/// Load process identity from the environment
///
/// `BOT_ID` is required; `IA_CONFIG_ID` defaults to 0; `BOT_PROFILE`
/// overrides the profile location.
pub fn load_config() -> anyhow::Result<Config> {
    let bot_id = std::env::var("BOT_ID")
        .context("BOT_ID environment variable required")?
        .parse::<u16>()
        .context("BOT_ID must be a small integer")?;

    let config_id = match std::env::var("IA_CONFIG_ID") {
        Ok(raw) => raw.parse::<u8>().context("IA_CONFIG_ID must be 0-9")?,
        Err(_) => 0,
    };

    let profile_path = std::env::var("BOT_PROFILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/root"))
                .join(DEFAULT_PROFILE_DIR)
                .join(DEFAULT_PROFILE_FILE)
        });

    Ok(Config {
        bot_id,
        config_id,
        profile_path,
    })
}

/// Paper or live execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

/// Retry block of the profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            backoff_factor: default_backoff_factor(),
            jitter: default_jitter(),
        }
    }
}

impl RetrySettings {
    /// Build the immutable policy the executors run with
    pub fn policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::new(self.max_attempts)
            .with_initial_delay(Duration::from_secs_f64(self.initial_delay_secs))
            .with_max_delay(Duration::from_secs_f64(self.max_delay_secs))
            .with_backoff_factor(self.backoff_factor);
        if !self.jitter {
            policy = policy.without_jitter();
        }
        policy
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_secs() -> f64 {
    1.0
}
fn default_max_delay_secs() -> f64 {
    30.0
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}

/// Operator-editable trading profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotProfile {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_risk_percent")]
    pub risk_percent: Decimal,
    #[serde(default)]
    pub trading_mode: TradingMode,
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for BotProfile {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            risk_percent: default_risk_percent(),
            trading_mode: TradingMode::default(),
            cycle_interval_secs: default_cycle_interval_secs(),
            min_confidence: default_min_confidence(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_symbols() -> Vec<String> {
    vec!["EURUSD".to_string(), "GBPUSD".to_string()]
}
fn default_risk_percent() -> Decimal {
    Decimal::ONE
}
fn default_cycle_interval_secs() -> u64 {
    60
}
fn default_min_confidence() -> f64 {
    0.6
}

impl BotProfile {
    /// Read a profile from disk
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        let profile: BotProfile = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse profile {}", path.display()))?;
        Ok(profile)
    }

    /// Read a profile, falling back to defaults when the file is absent
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No profile at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_profile_fills_defaults() {
        let profile: BotProfile = serde_yaml::from_str("symbols: [USDJPY]\n").unwrap();

        assert_eq!(profile.symbols, vec!["USDJPY".to_string()]);
        assert_eq!(profile.risk_percent, Decimal::ONE);
        assert_eq!(profile.trading_mode, TradingMode::Paper);
        assert_eq!(profile.retry.max_attempts, 3);
    }

    #[test]
    fn test_profile_roundtrip_through_file() {
        let mut profile = BotProfile::default();
        profile.risk_percent = "2.5".parse().unwrap();
        profile.trading_mode = TradingMode::Live;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(serde_yaml::to_string(&profile).unwrap().as_bytes())
            .unwrap();

        let loaded = BotProfile::load(&path).unwrap();
        assert_eq!(loaded, profile);
    }

    #[test]
    fn test_missing_profile_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        let loaded = BotProfile::load_or_default(&path).unwrap();
        assert_eq!(loaded, BotProfile::default());
    }

    #[test]
    fn test_retry_settings_build_policy() {
        let settings = RetrySettings {
            max_attempts: 5,
            initial_delay_secs: 0.5,
            max_delay_secs: 10.0,
            backoff_factor: 3.0,
            jitter: false,
        };
        let policy = settings.policy();

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert!(!policy.jitter);
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(1500));
    }
}
