//! Bot Core Library
//!
//! Shared identity, verification, sizing and resilience core for the
//! trading bot fleet. Every bot instance on the shared account goes through
//! these pieces so operations are never duplicated and risk is never
//! oversized, even when broker and AI calls fail or are retried.

pub mod broker;
pub mod config;
pub mod decision;
pub mod magic;
pub mod paper;
pub mod retry;
pub mod runner;
pub mod sizing;
pub mod verify;

// Re-export main types for convenience
pub use broker::{
    BrokerError, BrokerResult, Direction, OperationRecord, OperationStatus, OrderGateway,
    OrderReceipt, OrderRequest, PositionQuery, SymbolSpecProvider,
};
pub use config::{load_config, BotProfile, Config, RetrySettings, TradingMode};
pub use decision::{Decision, DecisionAction, DecisionContext, DecisionProvider};
pub use magic::{
    audit, decode_batch, decode_batch_lenient, distribution, fold_legacy_bot_id, partition_valid,
    GroupBy, MagicAudit, MagicComponents, MagicError, MagicFilter, MagicNumber, OrderKind,
};
pub use paper::PaperBroker;
pub use retry::{
    retry_with_backoff, AttemptRecord, RetryError, RetryExecutor, RetryOutcome, RetryPolicy,
    RetryableError,
};
pub use runner::{BotRunner, CycleStats, SymbolOutcome};
pub use sizing::{calculate_lot_size, RiskParameters, SizingError, SizingResult, SymbolSpec};
pub use verify::{OperationVerifier, Verification, VerifyError};
