//! Magic number identity codec
//!
//! Every broker operation a bot opens is tagged with a compact 6-digit
//! "magic number" packing {bot id, AI config slot, order kind, sequence}.
//! The magic number is the only correlation key between a bot's intent and
//! the broker's flat position list, so several independently started bot
//! processes can share one account without claiming each other's positions.
//!
//! Layout (decimal positions): `B C K SSS`
//! - `B`   bot id, 1-9
//! - `C`   AI config slot, 0-9
//! - `K`   order kind code (market=0, limit=1, stop=2)
//! - `SSS` sequence, 000-999

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Lowest encodable magic number (bot 1, config 0, market, sequence 0)
pub const MAGIC_MIN: u32 = 100_000;

/// Highest encodable magic number
pub const MAGIC_MAX: u32 = 999_999;

/// Highest sequence value that fits the three low-order digits
pub const SEQUENCE_MAX: u16 = 999;

/// Offset of the historical wide bot-id space (101-109)
const LEGACY_BOT_ID_BASE: u16 = 100;

/// Errors from encoding, decoding or auditing magic numbers
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MagicError {
    #[error("bot_id {0} out of range (expected 1-9 or legacy 101-109)")]
    BotIdOutOfRange(u16),

    #[error("config_id {0} out of range (expected 0-9)")]
    ConfigIdOutOfRange(u8),

    #[error("sequence {0} out of range (expected 0-{SEQUENCE_MAX})")]
    SequenceOutOfRange(u16),

    #[error("magic number {0} outside valid range {MAGIC_MIN}-{MAGIC_MAX}")]
    MagicOutOfRange(u32),

    #[error("magic number {magic} carries unknown order kind digit {digit}")]
    UnknownOrderKind { magic: u32, digit: u8 },

    #[error("batch entry {index} ({magic}) is invalid: {reason}")]
    InvalidBatchEntry {
        index: usize,
        magic: u32,
        reason: String,
    },
}

/// Order kinds that can be encoded into a magic number
///
/// This enumeration is closed: a magic number whose kind digit is not one of
/// these codes is invalid, not "some future kind".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    #[default]
    Market,
    Limit,
    Stop,
}

impl OrderKind {
    /// Digit this kind occupies in the encoded magic number
    pub fn code(self) -> u32 {
        match self {
            OrderKind::Market => 0,
            OrderKind::Limit => 1,
            OrderKind::Stop => 2,
        }
    }

    /// Reverse of [`OrderKind::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OrderKind::Market),
            1 => Some(OrderKind::Limit),
            2 => Some(OrderKind::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Market => write!(f, "market"),
            OrderKind::Limit => write!(f, "limit"),
            OrderKind::Stop => write!(f, "stop"),
        }
    }
}

/// Decoded view of a magic number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MagicComponents {
    /// Bot id after legacy folding, always 1-9
    pub bot_id: u8,
    /// AI configuration slot, 0-9
    pub config_id: u8,
    /// Order kind
    pub kind: OrderKind,
    /// Per-operation sequence, 0-999
    pub sequence: u16,
}

/// A compact operation identity as carried on broker orders
///
/// Construction via [`MagicNumber::from_raw`] is unchecked so historical data
/// can be loaded as-is; [`MagicNumber::decode`] and [`MagicNumber::is_valid`]
/// do the validation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MagicNumber(u32);

impl MagicNumber {
    /// Wrap a raw broker-side value without validating it
    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Raw encoded value
    pub fn value(self) -> u32 {
        self.0
    }

    /// Encode components into a magic number
    ///
    /// `bot_id` accepts both the one-digit space (1-9) and the historical
    /// wide space (101-109); the latter is folded via
    /// [`fold_legacy_bot_id`] before packing. Every component is validated
    /// and an out-of-range component fails with the offending value named.
    pub fn encode(
        bot_id: u16,
        config_id: u8,
        kind: OrderKind,
        sequence: u16,
    ) -> Result<Self, MagicError> {
        let bot = fold_legacy_bot_id(bot_id)?;
        if config_id > 9 {
            return Err(MagicError::ConfigIdOutOfRange(config_id));
        }
        if sequence > SEQUENCE_MAX {
            return Err(MagicError::SequenceOutOfRange(sequence));
        }

        let value = u32::from(bot) * 100_000
            + u32::from(config_id) * 10_000
            + kind.code() * 1_000
            + u32::from(sequence);
        Ok(Self(value))
    }

    /// Decode a magic number back into its components
    ///
    /// Only ever reproduces the already-folded bot digit; an original wide
    /// bot id cannot be recovered from an encoded value.
    pub fn decode(self) -> Result<MagicComponents, MagicError> {
        if !(MAGIC_MIN..=MAGIC_MAX).contains(&self.0) {
            return Err(MagicError::MagicOutOfRange(self.0));
        }

        let bot_id = (self.0 / 100_000) as u8;
        let config_id = (self.0 / 10_000 % 10) as u8;
        let kind_digit = (self.0 / 1_000 % 10) as u8;
        let sequence = (self.0 % 1_000) as u16;

        let kind = OrderKind::from_code(kind_digit).ok_or(MagicError::UnknownOrderKind {
            magic: self.0,
            digit: kind_digit,
        })?;

        Ok(MagicComponents {
            bot_id,
            config_id,
            kind,
            sequence,
        })
    }

    /// Whether this value decodes cleanly
    pub fn is_valid(self) -> bool {
        self.decode().is_ok()
    }
}

impl From<u32> for MagicNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<MagicNumber> for u32 {
    fn from(magic: MagicNumber) -> Self {
        magic.0
    }
}

impl fmt::Display for MagicNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fold a historical wide bot id (101-109) into the one-digit space
///
/// The fold is lossy: bot 6 and bot 106 are indistinguishable once encoded.
/// Callers that still carry wide ids must fold them exactly once, at this
/// boundary, and must not expect to recover the wide id from a decoded
/// value.
pub fn fold_legacy_bot_id(bot_id: u16) -> Result<u8, MagicError> {
    match bot_id {
        1..=9 => Ok(bot_id as u8),
        101..=109 => Ok((bot_id - LEGACY_BOT_ID_BASE) as u8),
        other => Err(MagicError::BotIdOutOfRange(other)),
    }
}

/// Decode a batch, preserving input order
///
/// Strict: the first invalid entry fails the whole call, naming its index.
pub fn decode_batch(magics: &[MagicNumber]) -> Result<Vec<MagicComponents>, MagicError> {
    let mut decoded = Vec::with_capacity(magics.len());
    for (index, magic) in magics.iter().enumerate() {
        let components = magic.decode().map_err(|e| MagicError::InvalidBatchEntry {
            index,
            magic: magic.value(),
            reason: e.to_string(),
        })?;
        decoded.push(components);
    }
    Ok(decoded)
}

/// An entry rejected by [`decode_batch_lenient`]
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidMagic {
    pub index: usize,
    pub magic: MagicNumber,
    pub error: MagicError,
}

/// Decode a batch without failing on bad entries
///
/// Valid entries come back in input order; invalid ones are reported
/// separately with their original index. Nothing is dropped.
pub fn decode_batch_lenient(magics: &[MagicNumber]) -> (Vec<MagicComponents>, Vec<InvalidMagic>) {
    let mut decoded = Vec::with_capacity(magics.len());
    let mut invalid = Vec::new();
    for (index, magic) in magics.iter().enumerate() {
        match magic.decode() {
            Ok(components) => decoded.push(components),
            Err(error) => invalid.push(InvalidMagic {
                index,
                magic: *magic,
                error,
            }),
        }
    }
    (decoded, invalid)
}

/// Split a collection into (valid, invalid) without decoding twice
pub fn partition_valid(magics: &[MagicNumber]) -> (Vec<MagicNumber>, Vec<MagicNumber>) {
    magics.iter().copied().partition(|m| m.is_valid())
}

/// Grouped counts over a set of decoded magic numbers
///
/// Each grouping covers every input entry, so the counts of any one grouping
/// sum to the input length.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MagicAudit {
    pub total: usize,
    pub by_bot: BTreeMap<u8, usize>,
    pub by_config: BTreeMap<u8, usize>,
    pub by_kind: BTreeMap<OrderKind, usize>,
}

/// Audit a batch of magic numbers
///
/// Strict over its input: an invalid entry fails the audit rather than
/// silently skewing the counts.
pub fn audit(magics: &[MagicNumber]) -> Result<MagicAudit, MagicError> {
    let decoded = decode_batch(magics)?;

    let mut by_bot: BTreeMap<u8, usize> = BTreeMap::new();
    let mut by_config: BTreeMap<u8, usize> = BTreeMap::new();
    let mut by_kind: BTreeMap<OrderKind, usize> = BTreeMap::new();

    for c in &decoded {
        *by_bot.entry(c.bot_id).or_default() += 1;
        *by_config.entry(c.config_id).or_default() += 1;
        *by_kind.entry(c.kind).or_default() += 1;
    }

    Ok(MagicAudit {
        total: decoded.len(),
        by_bot,
        by_config,
        by_kind,
    })
}

/// Dimension to group a [`distribution`] by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Bot,
    Config,
    Kind,
}

/// Count and percentage share of one distribution key
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Share {
    pub count: usize,
    pub percentage: f64,
}

/// Distribution of a batch along one grouping dimension
///
/// Percentages sum to 100 within floating tolerance. Empty input yields an
/// empty map.
pub fn distribution(
    magics: &[MagicNumber],
    by: GroupBy,
) -> Result<BTreeMap<String, Share>, MagicError> {
    let decoded = decode_batch(magics)?;
    let total = decoded.len();

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for c in &decoded {
        let key = match by {
            GroupBy::Bot => format!("bot-{}", c.bot_id),
            GroupBy::Config => format!("config-{}", c.config_id),
            GroupBy::Kind => c.kind.to_string(),
        };
        *counts.entry(key).or_default() += 1;
    }

    Ok(counts
        .into_iter()
        .map(|(key, count)| {
            let percentage = count as f64 / total as f64 * 100.0;
            (key, Share { count, percentage })
        })
        .collect())
}

/// Composable AND filter over decoded components
///
/// Unset dimensions match everything. Entries that do not decode never
/// match; the input is left untouched either way.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MagicFilter {
    pub bot_id: Option<u8>,
    pub config_id: Option<u8>,
    pub kind: Option<OrderKind>,
}

impl MagicFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bot(mut self, bot_id: u8) -> Self {
        self.bot_id = Some(bot_id);
        self
    }

    pub fn config(mut self, config_id: u8) -> Self {
        self.config_id = Some(config_id);
        self
    }

    pub fn kind(mut self, kind: OrderKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Whether decoded components satisfy every set dimension
    pub fn matches(&self, c: &MagicComponents) -> bool {
        self.bot_id.map_or(true, |b| b == c.bot_id)
            && self.config_id.map_or(true, |cfg| cfg == c.config_id)
            && self.kind.map_or(true, |k| k == c.kind)
    }

    /// Apply the filter to a batch, returning the matching subset
    pub fn apply(&self, magics: &[MagicNumber]) -> Vec<MagicNumber> {
        magics
            .iter()
            .copied()
            .filter(|m| m.decode().map_or(false, |c| self.matches(&c)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn magics(values: &[u32]) -> Vec<MagicNumber> {
        values.iter().copied().map(MagicNumber::from_raw).collect()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for bot in 1..=9u16 {
            for config in (0..=9u8).step_by(3) {
                for kind in [OrderKind::Market, OrderKind::Limit, OrderKind::Stop] {
                    for sequence in [0u16, 1, 499, SEQUENCE_MAX] {
                        let magic = MagicNumber::encode(bot, config, kind, sequence).unwrap();
                        assert!((MAGIC_MIN..=MAGIC_MAX).contains(&magic.value()));

                        let c = magic.decode().unwrap();
                        assert_eq!(c.bot_id, bot as u8);
                        assert_eq!(c.config_id, config);
                        assert_eq!(c.kind, kind);
                        assert_eq!(c.sequence, sequence);
                    }
                }
            }
        }
    }

    #[test]
    fn test_encode_known_value() {
        let magic = MagicNumber::encode(2, 3, OrderKind::Limit, 456).unwrap();
        assert_eq!(magic.value(), 231_456);

        let c = MagicNumber::from_raw(231_456).decode().unwrap();
        assert_eq!(c.bot_id, 2);
        assert_eq!(c.config_id, 3);
        assert_eq!(c.kind, OrderKind::Limit);
        assert_eq!(c.sequence, 456);
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        assert_eq!(
            MagicNumber::encode(0, 0, OrderKind::Market, 0),
            Err(MagicError::BotIdOutOfRange(0))
        );
        assert_eq!(
            MagicNumber::encode(10, 0, OrderKind::Market, 0),
            Err(MagicError::BotIdOutOfRange(10))
        );
        assert_eq!(
            MagicNumber::encode(1, 10, OrderKind::Market, 0),
            Err(MagicError::ConfigIdOutOfRange(10))
        );
        assert_eq!(
            MagicNumber::encode(1, 0, OrderKind::Market, 1000),
            Err(MagicError::SequenceOutOfRange(1000))
        );
    }

    #[test]
    fn test_legacy_bot_id_fold() {
        assert_eq!(fold_legacy_bot_id(6).unwrap(), 6);
        assert_eq!(fold_legacy_bot_id(101).unwrap(), 1);
        assert_eq!(fold_legacy_bot_id(109).unwrap(), 9);
        assert_eq!(fold_legacy_bot_id(100), Err(MagicError::BotIdOutOfRange(100)));
        assert_eq!(fold_legacy_bot_id(110), Err(MagicError::BotIdOutOfRange(110)));

        // The fold is lossy: 6 and 106 collide once encoded.
        let narrow = MagicNumber::encode(6, 0, OrderKind::Market, 1).unwrap();
        let wide = MagicNumber::encode(106, 0, OrderKind::Market, 1).unwrap();
        assert_eq!(narrow, wide);
    }

    #[test]
    fn test_decode_rejects_out_of_range() {
        assert_eq!(
            MagicNumber::from_raw(99_999).decode(),
            Err(MagicError::MagicOutOfRange(99_999))
        );
        assert_eq!(
            MagicNumber::from_raw(1_000_000).decode(),
            Err(MagicError::MagicOutOfRange(1_000_000))
        );
    }

    #[test]
    fn test_decode_rejects_unknown_kind_digit() {
        // Kind digit 7 is not a known order kind.
        let err = MagicNumber::from_raw(237_456).decode().unwrap_err();
        assert_eq!(
            err,
            MagicError::UnknownOrderKind {
                magic: 237_456,
                digit: 7
            }
        );
        assert!(!MagicNumber::from_raw(237_456).is_valid());
    }

    #[test]
    fn test_decode_batch_strict_preserves_order() {
        let batch = magics(&[231_456, 110_000, 920_999]);
        let decoded = decode_batch(&batch).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].sequence, 456);
        assert_eq!(decoded[1].bot_id, 1);
        assert_eq!(decoded[2].bot_id, 9);
    }

    #[test]
    fn test_decode_batch_strict_fails_on_first_invalid() {
        let batch = magics(&[231_456, 99_999, 237_000]);
        let err = decode_batch(&batch).unwrap_err();
        match err {
            MagicError::InvalidBatchEntry { index, magic, .. } => {
                assert_eq!(index, 1);
                assert_eq!(magic, 99_999);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_batch_lenient_reports_invalid_separately() {
        let batch = magics(&[231_456, 99_999, 110_001, 237_000]);
        let (decoded, invalid) = decode_batch_lenient(&batch);

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].sequence, 456);
        assert_eq!(decoded[1].sequence, 1);

        assert_eq!(invalid.len(), 2);
        assert_eq!(invalid[0].index, 1);
        assert_eq!(invalid[1].index, 3);
        assert_eq!(decoded.len() + invalid.len(), batch.len());
    }

    #[test]
    fn test_partition_valid() {
        let batch = magics(&[231_456, 99_999, 110_001]);
        let (valid, invalid) = partition_valid(&batch);
        assert_eq!(valid, magics(&[231_456, 110_001]));
        assert_eq!(invalid, magics(&[99_999]));
    }

    #[test]
    fn test_audit_groupings_sum_to_total() {
        let batch = magics(&[111_001, 111_002, 120_003, 231_456, 902_000]);
        let report = audit(&batch).unwrap();

        assert_eq!(report.total, 5);
        assert_eq!(report.by_bot.values().sum::<usize>(), 5);
        assert_eq!(report.by_config.values().sum::<usize>(), 5);
        assert_eq!(report.by_kind.values().sum::<usize>(), 5);

        assert_eq!(report.by_bot[&1], 3);
        assert_eq!(report.by_bot[&2], 1);
        assert_eq!(report.by_bot[&9], 1);
        assert_eq!(report.by_kind[&OrderKind::Limit], 3);
        assert_eq!(report.by_kind[&OrderKind::Market], 1);
        assert_eq!(report.by_kind[&OrderKind::Stop], 1);
    }

    #[test]
    fn test_audit_rejects_invalid_entry() {
        let batch = magics(&[111_001, 50]);
        assert!(audit(&batch).is_err());
    }

    #[test]
    fn test_distribution_percentages_sum_to_100() {
        let batch = magics(&[111_001, 111_002, 120_003, 231_456]);
        for by in [GroupBy::Bot, GroupBy::Config, GroupBy::Kind] {
            let dist = distribution(&batch, by).unwrap();
            let total_pct: f64 = dist.values().map(|s| s.percentage).sum();
            assert!((total_pct - 100.0).abs() < 1e-9, "sum was {total_pct}");
        }

        let by_bot = distribution(&batch, GroupBy::Bot).unwrap();
        assert_eq!(by_bot["bot-1"].count, 3);
        assert!((by_bot["bot-1"].percentage - 75.0).abs() < 1e-9);
        assert_eq!(by_bot["bot-2"].count, 1);
    }

    #[test]
    fn test_distribution_empty_input() {
        let dist = distribution(&[], GroupBy::Bot).unwrap();
        assert!(dist.is_empty());
    }

    #[test]
    fn test_filter_and_semantics() {
        let batch = magics(&[111_001, 111_002, 121_003, 231_456, 110_000]);

        let bot1 = MagicFilter::new().bot(1).apply(&batch);
        assert_eq!(bot1.len(), 4);

        let bot1_limit = MagicFilter::new().bot(1).kind(OrderKind::Limit).apply(&batch);
        assert_eq!(bot1_limit, magics(&[111_001, 111_002, 121_003]));

        let bot1_cfg1_limit = MagicFilter::new()
            .bot(1)
            .config(1)
            .kind(OrderKind::Limit)
            .apply(&batch);
        assert_eq!(bot1_cfg1_limit, magics(&[111_001, 111_002]));

        // Invalid entries never match, and the input is untouched.
        let with_junk = magics(&[111_001, 42]);
        let filtered = MagicFilter::new().bot(1).apply(&with_junk);
        assert_eq!(filtered, magics(&[111_001]));
        assert_eq!(with_junk.len(), 2);
    }
}
