//! Risk-based position sizing
//!
//! Converts "risk X% of the account between entry and stop" into a lot size
//! the broker will actually accept. Sizing only ever rounds down: a lot that
//! would overshoot the requested risk, or that falls below the instrument's
//! minimum volume, is refused rather than adjusted upward.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from validating sizing inputs or computing a lot
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("symbol spec field {field} must be strictly positive, got {value}")]
    NonPositiveSpecField { field: &'static str, value: Decimal },

    #[error("{field} must be strictly positive, got {value}")]
    NonPositiveParameter { field: &'static str, value: Decimal },

    #[error("risk_percent must be within (0, 100], got {0}")]
    RiskPercentOutOfRange(Decimal),

    #[error("stop loss distance is zero (entry {entry}, stop {stop})")]
    ZeroStopDistance { entry: Decimal, stop: Decimal },

    #[error("computed lot {computed} is below minimum volume {volume_min}")]
    AmountTooSmall {
        computed: Decimal,
        volume_min: Decimal,
    },
}

/// Broker-supplied pricing and volume contract for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub symbol: String,
    /// Smallest quoted price increment
    pub point: Decimal,
    /// Price increment used for tick valuation
    pub tick_size: Decimal,
    /// Account-currency value of one tick per lot
    pub tick_value: Decimal,
    pub volume_min: Decimal,
    pub volume_max: Decimal,
    pub volume_step: Decimal,
    pub contract_size: Decimal,
}

impl SymbolSpec {
    /// Check every numeric field is strictly positive
    ///
    /// A non-positive field is broker data corruption; it fails here, named,
    /// before any arithmetic runs on it.
    pub fn validate(&self) -> Result<(), SizingError> {
        let fields = [
            ("point", self.point),
            ("tick_size", self.tick_size),
            ("tick_value", self.tick_value),
            ("volume_min", self.volume_min),
            ("volume_max", self.volume_max),
            ("volume_step", self.volume_step),
            ("contract_size", self.contract_size),
        ];
        for (field, value) in fields {
            if value <= Decimal::ZERO {
                return Err(SizingError::NonPositiveSpecField { field, value });
            }
        }
        Ok(())
    }
}

/// Inputs for one sizing request, built fresh per request
#[derive(Debug, Clone, PartialEq)]
pub struct RiskParameters {
    pub account_balance: Decimal,
    /// Percent of balance to risk between entry and stop, in (0, 100]
    pub risk_percent: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
}

impl RiskParameters {
    fn validate(&self) -> Result<(), SizingError> {
        if self.account_balance <= Decimal::ZERO {
            return Err(SizingError::NonPositiveParameter {
                field: "account_balance",
                value: self.account_balance,
            });
        }
        if self.risk_percent <= Decimal::ZERO || self.risk_percent > Decimal::from(100) {
            return Err(SizingError::RiskPercentOutOfRange(self.risk_percent));
        }
        if self.entry_price <= Decimal::ZERO {
            return Err(SizingError::NonPositiveParameter {
                field: "entry_price",
                value: self.entry_price,
            });
        }
        if self.stop_loss <= Decimal::ZERO {
            return Err(SizingError::NonPositiveParameter {
                field: "stop_loss",
                value: self.stop_loss,
            });
        }
        Ok(())
    }
}

/// A broker-legal lot plus the numbers it was derived from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizingResult {
    /// Final lot, a multiple of `volume_step` within `[volume_min, volume_max]`
    pub lot: Decimal,
    pub requested_risk: Decimal,
    /// Risk actually taken at the final lot; never above `requested_risk`
    pub realized_risk: Decimal,
    pub price_distance: Decimal,
    pub distance_ticks: Decimal,
    /// Distance between entry and stop in points
    pub pip_distance: Decimal,
    /// Adjustments applied on the way to the final lot
    pub notes: Vec<String>,
}

/// Compute a broker-legal lot for the given risk parameters
///
/// The raw lot is capped at `volume_max` and rounded down to the nearest
/// `volume_step` multiple. A result that lands below `volume_min` fails with
/// [`SizingError::AmountTooSmall`] instead of being forced up to a
/// minimum-size trade.
pub fn calculate_lot_size(
    params: &RiskParameters,
    spec: &SymbolSpec,
) -> Result<SizingResult, SizingError> {
    spec.validate()?;
    params.validate()?;

    let price_distance = (params.entry_price - params.stop_loss).abs();
    if price_distance <= Decimal::ZERO {
        return Err(SizingError::ZeroStopDistance {
            entry: params.entry_price,
            stop: params.stop_loss,
        });
    }

    let requested_risk = params.account_balance * params.risk_percent / Decimal::from(100);
    let distance_ticks = price_distance / spec.tick_size;
    let risk_per_lot = distance_ticks * spec.tick_value;
    let raw_lot = requested_risk / risk_per_lot;

    let mut notes = Vec::new();

    let capped = if raw_lot > spec.volume_max {
        notes.push(format!(
            "raw lot {} capped at maximum volume {}",
            raw_lot, spec.volume_max
        ));
        spec.volume_max
    } else {
        raw_lot
    };

    let lot = (capped / spec.volume_step).floor() * spec.volume_step;
    if lot != capped {
        notes.push(format!(
            "lot {} rounded down to step multiple {}",
            capped, lot
        ));
    }

    if lot < spec.volume_min {
        return Err(SizingError::AmountTooSmall {
            computed: lot,
            volume_min: spec.volume_min,
        });
    }

    let realized_risk = lot * risk_per_lot;
    let pip_distance = price_distance / spec.point;

    Ok(SizingResult {
        lot,
        requested_risk,
        realized_risk,
        price_distance,
        distance_ticks,
        pip_distance,
        notes,
    })
}
