//! Trading cycle orchestration
//!
//! One pass per cycle over the profile's symbols: build the identity, check
//! the shared account for an existing operation, ask the decision service,
//! size the position, submit. Collaborator calls go through the retry
//! executor; a failure on one symbol never stops the rest of the pass.
//!
//! Identities are stable across cycles: the sequence block is the symbol's
//! slot in the profile, so the same bot asking about the same symbol always
//! verifies against the same magic number.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broker::{
    OrderGateway, OrderReceipt, OrderRequest, PositionQuery, SymbolSpecProvider,
};
use crate::config::BotProfile;
use crate::decision::{DecisionAction, DecisionContext, DecisionProvider};
use crate::magic::{MagicNumber, OrderKind};
use crate::retry::RetryExecutor;
use crate::sizing::{calculate_lot_size, RiskParameters, SizingError};
use crate::verify::OperationVerifier;

/// What happened to one symbol during a pass
#[derive(Debug)]
pub enum SymbolOutcome {
    /// New operation opened
    Opened(OrderReceipt),
    /// Existing operations found; count of matches
    Reevaluated(usize),
    /// Decision was hold, or confidence below threshold
    Held,
    /// Operation refused without being an error (e.g. lot too small)
    Skipped(String),
}

/// Counters for one full pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub opened: u32,
    pub reevaluated: u32,
    pub held: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// Drives the evaluate/reevaluate cycle for one bot instance
pub struct BotRunner {
    bot_id: u16,
    config_id: u8,
    profile: BotProfile,
    balance: Decimal,
    verifier: OperationVerifier,
    specs: Arc<dyn SymbolSpecProvider>,
    gateway: Arc<dyn OrderGateway>,
    decisions: Arc<dyn DecisionProvider>,
    retry: RetryExecutor,
}

impl BotRunner {
    pub fn new(
        bot_id: u16,
        config_id: u8,
        profile: BotProfile,
        positions: Arc<dyn PositionQuery>,
        specs: Arc<dyn SymbolSpecProvider>,
        gateway: Arc<dyn OrderGateway>,
        decisions: Arc<dyn DecisionProvider>,
    ) -> Self {
        let retry = RetryExecutor::new(profile.retry.policy());
        Self {
            bot_id,
            config_id,
            profile,
            balance: Decimal::from(10_000),
            verifier: OperationVerifier::new(positions),
            specs,
            gateway,
            decisions,
            retry,
        }
    }

    /// Set the account balance used for risk sizing
    pub fn with_balance(mut self, balance: Decimal) -> Self {
        self.balance = balance;
        self
    }

    /// Run one pass over every configured symbol
    pub async fn run_cycle(&self) -> CycleStats {
        let mut stats = CycleStats::default();

        for (slot, symbol) in self.profile.symbols.iter().enumerate() {
            match self.evaluate_symbol(symbol, slot as u16).await {
                Ok(SymbolOutcome::Opened(receipt)) => {
                    stats.opened += 1;
                    info!(
                        "opened {} lot {} ticket {} magic {}",
                        symbol, receipt.lot, receipt.ticket, receipt.magic
                    );
                }
                Ok(SymbolOutcome::Reevaluated(count)) => {
                    stats.reevaluated += 1;
                    debug!("{} has {} open operation(s), reevaluating", symbol, count);
                }
                Ok(SymbolOutcome::Held) => {
                    stats.held += 1;
                }
                Ok(SymbolOutcome::Skipped(reason)) => {
                    stats.skipped += 1;
                    info!("skipped {}: {}", symbol, reason);
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!("cycle failed for {}: {:#}", symbol, e);
                }
            }
        }

        info!(
            "cycle done: {} opened, {} reevaluated, {} held, {} skipped, {} failed",
            stats.opened, stats.reevaluated, stats.held, stats.skipped, stats.failed
        );
        stats
    }

    /// Evaluate one symbol slot
    async fn evaluate_symbol(&self, symbol: &str, slot: u16) -> anyhow::Result<SymbolOutcome> {
        let magic = MagicNumber::encode(self.bot_id, self.config_id, OrderKind::Market, slot)?;
        let components = magic.decode()?;

        let verifier = &self.verifier;
        let verification = self
            .retry
            .execute_retryable("verify", move || verifier.verify(symbol, magic))
            .await?
            .value;
        if verification.should_reevaluate {
            return Ok(SymbolOutcome::Reevaluated(verification.operation_count));
        }

        let context = DecisionContext::new(
            symbol,
            components.bot_id,
            components.config_id,
            self.balance,
        );
        let decisions = self.decisions.as_ref();
        let context_ref = &context;
        let decision = self
            .retry
            .execute_retryable("decision", move || decisions.decide(context_ref))
            .await?
            .value;
        debug!(
            "decision for {} ({}): {}",
            symbol,
            context.request_id,
            serde_json::to_string(&decision).unwrap_or_default()
        );

        let (direction, entry, stop_loss) = match decision.action {
            DecisionAction::Hold => return Ok(SymbolOutcome::Held),
            DecisionAction::Open {
                direction,
                entry,
                stop_loss,
            } => {
                if decision.confidence < self.profile.min_confidence {
                    debug!(
                        "decision confidence {:.2} below threshold {:.2} for {}",
                        decision.confidence, self.profile.min_confidence, symbol
                    );
                    return Ok(SymbolOutcome::Held);
                }
                (direction, entry, stop_loss)
            }
        };

        let specs = self.specs.as_ref();
        let spec = self
            .retry
            .execute_retryable("symbol_spec", move || specs.symbol_spec(symbol))
            .await?
            .value;

        let params = RiskParameters {
            account_balance: self.balance,
            risk_percent: self.profile.risk_percent,
            entry_price: entry,
            stop_loss,
        };
        let sizing = match calculate_lot_size(&params, &spec) {
            Ok(sizing) => sizing,
            Err(SizingError::AmountTooSmall {
                computed,
                volume_min,
            }) => {
                return Ok(SymbolOutcome::Skipped(format!(
                    "computed lot {} below minimum volume {}",
                    computed, volume_min
                )));
            }
            Err(e) => return Err(e.into()),
        };
        for note in &sizing.notes {
            debug!("sizing {}: {}", symbol, note);
        }

        let request = OrderRequest {
            symbol: symbol.to_string(),
            magic,
            kind: OrderKind::Market,
            direction,
            lot: sizing.lot,
            entry_price: entry,
            stop_loss,
            comment: context.request_id.to_string(),
        };
        let gateway = self.gateway.as_ref();
        let request_ref = &request;
        let receipt = self
            .retry
            .execute_retryable("submit_order", move || gateway.submit_order(request_ref))
            .await?
            .value;

        info!(
            "{} {} {}: risking {} of {} requested ({} pips to stop)",
            symbol, direction, sizing.lot, sizing.realized_risk, sizing.requested_risk,
            sizing.pip_distance
        );
        Ok(SymbolOutcome::Opened(receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySettings;
    use crate::decision::Decision;
    use crate::paper::PaperBroker;

    fn quiet_profile() -> BotProfile {
        BotProfile {
            retry: RetrySettings {
                jitter: false,
                ..RetrySettings::default()
            },
            ..BotProfile::default()
        }
    }

    fn runner_with(broker: Arc<PaperBroker>, profile: BotProfile) -> BotRunner {
        BotRunner::new(
            2,
            3,
            profile,
            broker.clone(),
            broker.clone(),
            broker.clone(),
            broker,
        )
    }

    #[tokio::test]
    async fn test_hold_everywhere_opens_nothing() {
        let broker = Arc::new(PaperBroker::new());
        let runner = runner_with(broker.clone(), quiet_profile());

        let stats = runner.run_cycle().await;

        assert_eq!(stats.held, 2);
        assert_eq!(stats.opened, 0);
        assert_eq!(broker.open_operation_count(), 0);
    }

    #[tokio::test]
    async fn test_low_confidence_decision_is_held() {
        let broker = Arc::new(PaperBroker::new());
        broker.script_decision(
            "EURUSD",
            Decision {
                action: DecisionAction::Open {
                    direction: crate::broker::Direction::Buy,
                    entry: "1.1000".parse().unwrap(),
                    stop_loss: "1.0950".parse().unwrap(),
                },
                confidence: 0.2,
                rationale: "weak signal".to_string(),
            },
        );
        let runner = runner_with(broker.clone(), quiet_profile());

        let stats = runner.run_cycle().await;

        assert_eq!(stats.opened, 0);
        assert_eq!(stats.held, 2);
        assert_eq!(broker.open_operation_count(), 0);
    }
}
