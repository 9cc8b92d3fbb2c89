//! Broker collaborator contracts
//!
//! The core never talks to a broker directly; it consumes these traits.
//! Implementations must fail loudly: an error is signalled by returning an
//! error, never by an empty position list or a defaulted value.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::magic::{MagicNumber, OrderKind};
use crate::retry::RetryableError;
use crate::sizing::SymbolSpec;

/// Errors surfaced by broker collaborators
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    ConnectionFailed(String),

    #[error("broker request timed out after {0}s")]
    Timeout(u64),

    #[error("rate limited by broker: {0}")]
    RateLimited(String),

    #[error("malformed broker response: {0}")]
    InvalidResponse(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),
}

impl BrokerError {
    /// Whether this failure is worth retrying
    ///
    /// Rejections and unknown symbols are answers, not outages.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionFailed(_)
                | BrokerError::Timeout(_)
                | BrokerError::RateLimited(_)
        )
    }
}

impl RetryableError for BrokerError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Result type for broker collaborator calls
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Direction of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "buy"),
            Direction::Sell => write!(f, "sell"),
        }
    }
}

/// Lifecycle state of a broker-side operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Open,
    Closed,
    Cancelled,
}

/// Read-only view of one broker-side operation
///
/// Owned by the broker/persistence side; the core only reads and classifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub symbol: String,
    pub magic: MagicNumber,
    pub direction: Direction,
    pub status: OperationStatus,
    pub lot: Decimal,
    pub profit: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// New order handed to the gateway for submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub magic: MagicNumber,
    pub kind: OrderKind,
    pub direction: Direction,
    pub lot: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub comment: String,
}

/// Broker acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub ticket: u64,
    pub symbol: String,
    pub magic: MagicNumber,
    pub fill_price: Decimal,
    pub lot: Decimal,
    pub submitted_at: DateTime<Utc>,
}

/// Live query over the broker's open position list
///
/// Every call must hit the position store fresh; another process may have
/// opened or closed a matching operation since the last call, so no
/// implementation may serve a cached answer.
#[async_trait]
pub trait PositionQuery: Send + Sync {
    /// Open positions matching both `symbol` and the exact `magic`
    async fn open_positions(
        &self,
        symbol: &str,
        magic: MagicNumber,
    ) -> BrokerResult<Vec<OperationRecord>>;
}

/// Source of per-instrument pricing and volume contracts
#[async_trait]
pub trait SymbolSpecProvider: Send + Sync {
    async fn symbol_spec(&self, symbol: &str) -> BrokerResult<SymbolSpec>;
}

/// Order submission endpoint
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit_order(&self, request: &OrderRequest) -> BrokerResult<OrderReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BrokerError::ConnectionFailed("reset".into()).is_transient());
        assert!(BrokerError::Timeout(30).is_transient());
        assert!(BrokerError::RateLimited("429".into()).is_transient());

        assert!(!BrokerError::InvalidResponse("bad json".into()).is_transient());
        assert!(!BrokerError::SymbolNotFound("XAUUSD".into()).is_transient());
        assert!(!BrokerError::OrderRejected("margin".into()).is_transient());
    }
}
