//! Operation verification - one open operation per identity
//!
//! Before a bot opens anything it asks the verifier whether an operation
//! with the same (symbol, magic) pair is already live on the shared account.
//! A match routes the cycle to reevaluation of the existing operation; no
//! match clears the way for a new one. Because distinct order kinds encode
//! to distinct magics, a market and a limit attempt on the same symbol never
//! collide.
//!
//! The safety-critical rule lives here: if the position query fails, that
//! failure propagates. "I could not find out" must never look like "there is
//! no operation", or every bot sharing the account starts doubling up.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::broker::{BrokerError, OperationRecord, PositionQuery};
use crate::magic::{MagicError, MagicNumber};
use crate::retry::RetryableError;

/// Errors from a verification request
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("invalid identity: {0}")]
    InvalidMagic(#[from] MagicError),

    #[error("position query failed: {0}")]
    QueryFailed(#[from] BrokerError),
}

impl RetryableError for VerifyError {
    /// Only transient query failures are worth retrying; validation errors
    /// will fail the same way every time
    fn is_retryable(&self) -> bool {
        matches!(self, VerifyError::QueryFailed(e) if e.is_transient())
    }
}

/// Outcome of one verification
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub has_operation: bool,
    /// True iff a matching operation exists and should be managed instead of
    /// opening a new one
    pub should_reevaluate: bool,
    pub operation_count: usize,
    pub operations: Vec<OperationRecord>,
}

/// Decides evaluate-vs-reevaluate per (symbol, magic)
///
/// Holds no state between calls: every verification is a fresh read of the
/// shared position store.
pub struct OperationVerifier {
    positions: Arc<dyn PositionQuery>,
}

impl OperationVerifier {
    pub fn new(positions: Arc<dyn PositionQuery>) -> Self {
        Self { positions }
    }

    /// Check the live position store for operations matching `symbol` and
    /// the exact `magic`
    ///
    /// Fails on an empty symbol, an invalid magic, or any query failure.
    /// A query failure is never resolved to "no operation".
    pub async fn verify(
        &self,
        symbol: &str,
        magic: MagicNumber,
    ) -> Result<Verification, VerifyError> {
        if symbol.trim().is_empty() {
            return Err(VerifyError::EmptySymbol);
        }
        let components = magic.decode()?;

        let operations = match self.positions.open_positions(symbol, magic).await {
            Ok(operations) => operations,
            Err(e) => {
                warn!(
                    "position query for {} magic {} failed: {}",
                    symbol, magic, e
                );
                return Err(e.into());
            }
        };

        let operation_count = operations.len();
        let has_operation = operation_count > 0;

        debug!(
            "verify {} magic {} (bot {} config {} {}): {} open",
            symbol,
            magic,
            components.bot_id,
            components.config_id,
            components.kind,
            operation_count
        );

        Ok(Verification {
            has_operation,
            should_reevaluate: has_operation,
            operation_count,
            operations,
        })
    }

    /// Convenience wrapper over [`OperationVerifier::verify`]
    pub async fn has_open(&self, symbol: &str, magic: MagicNumber) -> Result<bool, VerifyError> {
        Ok(self.verify(symbol, magic).await?.has_operation)
    }
}
