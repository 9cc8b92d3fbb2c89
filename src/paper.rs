//! In-memory paper broker
//!
//! Implements every collaborator contract against a local position book so
//! the full cycle can run with no external services: paper mode in the
//! binary, and the integration harnesses in `tests/`. Failures can be
//! injected to exercise the degraded paths.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::broker::{
    BrokerError, BrokerResult, Direction, OperationRecord, OperationStatus, OrderGateway,
    OrderReceipt, OrderRequest, PositionQuery, SymbolSpecProvider,
};
use crate::decision::{Decision, DecisionContext, DecisionProvider};
use crate::magic::MagicNumber;
use crate::sizing::SymbolSpec;

/// Paper broker with a mutex-guarded position book
pub struct PaperBroker {
    specs: HashMap<String, SymbolSpec>,
    prices: HashMap<String, Decimal>,
    book: Mutex<Vec<OperationRecord>>,
    next_ticket: AtomicU64,
    /// When set, every position query fails with a clone of this error
    query_failure: Mutex<Option<BrokerError>>,
    /// Scripted decisions per symbol; unscripted symbols hold
    decisions: Mutex<HashMap<String, Decision>>,
}

fn fx_spec(symbol: &str) -> SymbolSpec {
    SymbolSpec {
        symbol: symbol.to_string(),
        point: Decimal::new(1, 5),
        tick_size: Decimal::new(1, 5),
        tick_value: Decimal::ONE,
        volume_min: Decimal::new(1, 2),
        volume_max: Decimal::from(100),
        volume_step: Decimal::new(1, 2),
        contract_size: Decimal::from(100_000),
    }
}

impl PaperBroker {
    /// Broker preloaded with a pair of FX majors
    pub fn new() -> Self {
        let mut broker = Self {
            specs: HashMap::new(),
            prices: HashMap::new(),
            book: Mutex::new(Vec::new()),
            next_ticket: AtomicU64::new(1),
            query_failure: Mutex::new(None),
            decisions: Mutex::new(HashMap::new()),
        };
        broker = broker.with_symbol("EURUSD", Decimal::new(11_000, 4));
        broker.with_symbol("GBPUSD", Decimal::new(12_700, 4))
    }

    /// Register a symbol with the default FX contract at `price`
    pub fn with_symbol(mut self, symbol: &str, price: Decimal) -> Self {
        self.specs.insert(symbol.to_string(), fx_spec(symbol));
        self.prices.insert(symbol.to_string(), price);
        self
    }

    /// Replace the contract for an already-registered symbol
    pub fn with_spec(mut self, spec: SymbolSpec) -> Self {
        self.specs.insert(spec.symbol.clone(), spec);
        self
    }

    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }

    /// Script the decision returned for `symbol`
    pub fn script_decision(&self, symbol: &str, decision: Decision) {
        self.decisions
            .lock()
            .unwrap()
            .insert(symbol.to_string(), decision);
    }

    /// Make every subsequent position query fail until cleared
    pub fn set_query_failure(&self, error: Option<BrokerError>) {
        *self.query_failure.lock().unwrap() = error;
    }

    pub fn open_operation_count(&self) -> usize {
        self.book
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == OperationStatus::Open)
            .count()
    }

    pub fn operations(&self) -> Vec<OperationRecord> {
        self.book.lock().unwrap().clone()
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PositionQuery for PaperBroker {
    async fn open_positions(
        &self,
        symbol: &str,
        magic: MagicNumber,
    ) -> BrokerResult<Vec<OperationRecord>> {
        if let Some(error) = self.query_failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .book
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.symbol == symbol && r.magic == magic && r.status == OperationStatus::Open
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SymbolSpecProvider for PaperBroker {
    async fn symbol_spec(&self, symbol: &str) -> BrokerResult<SymbolSpec> {
        self.specs
            .get(symbol)
            .cloned()
            .ok_or_else(|| BrokerError::SymbolNotFound(symbol.to_string()))
    }
}

#[async_trait]
impl OrderGateway for PaperBroker {
    async fn submit_order(&self, request: &OrderRequest) -> BrokerResult<OrderReceipt> {
        let spec = self
            .specs
            .get(&request.symbol)
            .ok_or_else(|| BrokerError::SymbolNotFound(request.symbol.clone()))?;

        // Fill within a couple of ticks of the requested entry.
        let slip_ticks = rand::thread_rng().gen_range(-2i64..=2);
        let fill_price = request.entry_price + spec.tick_size * Decimal::from(slip_ticks);

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let record = OperationRecord {
            symbol: request.symbol.clone(),
            magic: request.magic,
            direction: request.direction,
            status: OperationStatus::Open,
            lot: request.lot,
            profit: Decimal::ZERO,
            entry_price: fill_price,
            current_price: fill_price,
            opened_at: Utc::now(),
        };
        self.book.lock().unwrap().push(record);

        info!(
            "paper fill: ticket {} {} {} {} lot {} at {}",
            ticket, request.symbol, request.direction, request.magic, request.lot, fill_price
        );

        Ok(OrderReceipt {
            ticket,
            symbol: request.symbol.clone(),
            magic: request.magic,
            fill_price,
            lot: request.lot,
            submitted_at: Utc::now(),
        })
    }
}

#[async_trait]
impl DecisionProvider for PaperBroker {
    async fn decide(&self, context: &DecisionContext) -> BrokerResult<Decision> {
        let decision = self
            .decisions
            .lock()
            .unwrap()
            .get(&context.symbol)
            .cloned()
            .unwrap_or_else(|| Decision::hold("no scripted decision"));
        debug!(
            "paper decision for {} ({}): {:?}",
            context.symbol, context.request_id, decision.action
        );
        Ok(decision)
    }
}
