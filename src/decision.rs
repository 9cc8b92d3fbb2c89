//! AI decision payload
//!
//! The decision service (prompting, parsing, model choice) lives outside
//! this crate; here it is only a collaborator that turns a market snapshot
//! into a structured decision.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broker::{BrokerResult, Direction};

/// Snapshot handed to the decision service for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionContext {
    /// Correlation id for this request, carried through cycle logs
    pub request_id: Uuid,
    pub symbol: String,
    pub bot_id: u8,
    pub config_id: u8,
    pub account_balance: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl DecisionContext {
    pub fn new(symbol: &str, bot_id: u8, config_id: u8, account_balance: Decimal) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            bot_id,
            config_id,
            account_balance,
            timestamp: Utc::now(),
        }
    }
}

/// What the decision service wants done for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum DecisionAction {
    /// Open a new operation at `entry` protected by `stop_loss`
    Open {
        direction: Direction,
        entry: Decimal,
        stop_loss: Decimal,
    },
    /// Leave the symbol alone this cycle
    Hold,
}

/// Structured decision payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    pub rationale: String,
}

impl Decision {
    pub fn hold(rationale: &str) -> Self {
        Self {
            action: DecisionAction::Hold,
            confidence: 0.0,
            rationale: rationale.to_string(),
        }
    }
}

/// Collaborator producing decisions
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(&self, context: &DecisionContext) -> BrokerResult<Decision>;
}
