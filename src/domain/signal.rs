use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction/intent of a signal. `CloseLong`/`CloseShort` unwind an existing
/// position rather than open a new one and carry no quantity of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
    Hold,
    CloseLong,
    CloseShort,
}

impl Side {
    pub fn requires_quantity(&self) -> bool {
        matches!(self, Side::Buy | Side::Sell)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Normal,
    High,
    Critical,
}

/// What produced and executed this signal have seen it do so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Received,
    Validated,
    Rejected,
    Executing,
    Executed,
    Failed,
    TimedOut,
}

impl SignalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignalStatus::Rejected
                | SignalStatus::Executed
                | SignalStatus::Failed
                | SignalStatus::TimedOut
        )
    }
}

/// A tradable instrument identifier, kept distinct from a plain `String` so
/// call sites can't accidentally swap it with a strategy name or order id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument(pub String);

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Instrument {
    fn from(s: &str) -> Self {
        Instrument(s.to_string())
    }
}

/// A signal emitted by the producing model, as received at the ingress
/// boundary of the midplane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub instrument: Instrument,
    pub side: Side,
    pub quantity: Decimal,
    pub confidence: f64,
    pub urgency: Urgency,
    pub model_version: String,
    pub strategy_name: String,
    pub predicted_price: Option<Decimal>,
    pub emitted_at: DateTime<Utc>,
    /// Wall-clock budget for this signal's full execution; the monitoring
    /// loop times it out past this regardless of a global default.
    #[serde(with = "duration_secs_f64", default = "default_max_exec")]
    pub max_exec: Duration,
}

fn default_max_exec() -> Duration {
    Duration::from_secs(60)
}

mod duration_secs_f64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs_f64(f64::deserialize(d)?))
    }
}

#[derive(Debug, Error)]
pub enum SignalConstructionError {
    #[error("confidence {0} out of range [0, 1]")]
    ConfidenceOutOfRange(f64),
    #[error("side {side:?} requires a non-zero quantity")]
    MissingQuantity { side: Side },
}

use thiserror::Error;

impl Signal {
    /// Validates shape invariants: confidence in `[0, 1]`, non-zero
    /// quantity unless hold/close.
    pub fn validate_shape(&self) -> Result<(), SignalConstructionError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(SignalConstructionError::ConfidenceOutOfRange(self.confidence));
        }
        if self.side.requires_quantity() && self.quantity <= Decimal::ZERO {
            return Err(SignalConstructionError::MissingQuantity { side: self.side });
        }
        Ok(())
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.emitted_at
    }
}
