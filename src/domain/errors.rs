use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// How badly a fault degrades the system: whether it's worth paging,
/// logging, or ignoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Which subsystem a fault originated in. Used to bucket `ErrorLog` counters
/// and to decide retryability at the service runtime layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    Connection,
    Validation,
    Risk,
    Execution,
    Configuration,
    System,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Connection => "connection",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Risk => "risk",
            ErrorCategory::Execution => "execution",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::System => "system",
        };
        write!(f, "{s}")
    }
}

/// Error taxonomy for the midplane. One variant per failure domain, each
/// carrying enough context to retry, alert, or explain itself without a
/// debugger. `category`/`severity` give callers (retry engine, circuit
/// breaker, error log) a cheap classification without matching on variants.
#[derive(Debug, Error)]
pub enum MidplaneError {
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("broker request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("signal rejected: {reason}")]
    SignalRejected { reason: String },

    #[error("invalid signal {signal_id}: {reason}")]
    InvalidSignal { signal_id: String, reason: String },

    #[error("risk limit breached: {limit} ({current} > {max})")]
    RiskLimitBreached {
        limit: String,
        current: String,
        max: String,
    },

    #[error("order {order_id} rejected by broker: {reason}")]
    OrderRejected { order_id: String, reason: String },

    #[error("order {order_id} not found")]
    OrderNotFound { order_id: String },

    #[error("position not found for {instrument}")]
    PositionNotFound { instrument: String },

    #[error("configuration invalid: {reason}")]
    InvalidConfig { reason: String },

    #[error("connection pool exhausted: all {capacity} slots busy")]
    PoolExhausted { capacity: usize },

    #[error("circuit breaker [{name}] is open, retry after {retry_after:?}")]
    CircuitOpen {
        name: String,
        retry_after: std::time::Duration,
    },

    #[error("internal error: {reason}")]
    Internal { reason: String },

    #[error("unknown service: {name}")]
    UnknownService { name: String },
}

impl MidplaneError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            MidplaneError::ConnectionLost { .. }
            | MidplaneError::Timeout { .. }
            | MidplaneError::RateLimited { .. }
            | MidplaneError::PoolExhausted { .. }
            | MidplaneError::CircuitOpen { .. } => ErrorCategory::Connection,
            MidplaneError::SignalRejected { .. } | MidplaneError::InvalidSignal { .. } => {
                ErrorCategory::Validation
            }
            MidplaneError::RiskLimitBreached { .. } => ErrorCategory::Risk,
            MidplaneError::OrderRejected { .. }
            | MidplaneError::OrderNotFound { .. }
            | MidplaneError::PositionNotFound { .. } => ErrorCategory::Execution,
            MidplaneError::InvalidConfig { .. } | MidplaneError::UnknownService { .. } => {
                ErrorCategory::Configuration
            }
            MidplaneError::Internal { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MidplaneError::ConnectionLost { .. } => ErrorSeverity::High,
            MidplaneError::Timeout { .. } => ErrorSeverity::Medium,
            MidplaneError::RateLimited { .. } => ErrorSeverity::Low,
            MidplaneError::SignalRejected { .. } | MidplaneError::InvalidSignal { .. } => {
                ErrorSeverity::Low
            }
            MidplaneError::RiskLimitBreached { .. } => ErrorSeverity::High,
            MidplaneError::OrderRejected { .. } => ErrorSeverity::Medium,
            MidplaneError::OrderNotFound { .. } | MidplaneError::PositionNotFound { .. } => {
                ErrorSeverity::Medium
            }
            MidplaneError::InvalidConfig { .. } => ErrorSeverity::Critical,
            MidplaneError::PoolExhausted { .. } => ErrorSeverity::High,
            MidplaneError::CircuitOpen { .. } => ErrorSeverity::High,
            MidplaneError::Internal { .. } => ErrorSeverity::Critical,
            MidplaneError::UnknownService { .. } => ErrorSeverity::Low,
        }
    }

    /// Whether this kind of fault is worth retrying at all. The retry engine
    /// still consults its own allow/deny lists on top of this.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MidplaneError::ConnectionLost { .. }
                | MidplaneError::Timeout { .. }
                | MidplaneError::RateLimited { .. }
                | MidplaneError::PoolExhausted { .. }
        )
    }
}

/// A single recorded fault, as kept by [`crate::infrastructure::error_log::ErrorLog`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorReport {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub context: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn from_error(err: &MidplaneError, context: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            category: err.category(),
            severity: err.severity(),
            message: err.to_string(),
            context: context.into(),
            occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_lost_is_retryable_and_high_severity() {
        let err = MidplaneError::ConnectionLost {
            reason: "reset".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn invalid_config_is_not_retryable() {
        let err = MidplaneError::InvalidConfig {
            reason: "missing field".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn risk_limit_breach_message_contains_fields() {
        let err = MidplaneError::RiskLimitBreached {
            limit: "max_position_size".into(),
            current: "1200".into(),
            max: "1000".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("max_position_size"));
        assert!(msg.contains("1200"));
        assert!(msg.contains("1000"));
    }
}
