use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::domain::errors::{ErrorCategory, ErrorReport, ErrorSeverity, MidplaneError};

const HISTORY_CAPACITY: usize = 100;

/// Bounded rolling history of faults plus per-category/per-severity
/// counters. Exposed to the `status` CLI and to tests asserting a fault
/// was recorded.
pub struct ErrorLog {
    clock: std::sync::Arc<dyn Clock>,
    history: RwLock<VecDeque<ErrorReport>>,
    by_category: RwLock<HashMap<ErrorCategory, u64>>,
    by_severity: RwLock<HashMap<ErrorSeverity, u64>>,
}

impl ErrorLog {
    pub fn new(clock: std::sync::Arc<dyn Clock>) -> Self {
        Self {
            clock,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            by_category: RwLock::new(HashMap::new()),
            by_severity: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record(&self, err: &MidplaneError, context: impl Into<String>) {
        let report = ErrorReport::from_error(err, context, self.clock.now_utc());

        let mut history = self.history.write().await;
        if history.len() >= HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(report.clone());
        drop(history);

        *self.by_category.write().await.entry(report.category).or_insert(0) += 1;
        *self.by_severity.write().await.entry(report.severity).or_insert(0) += 1;
    }

    pub async fn recent(&self, n: usize) -> Vec<ErrorReport> {
        let history = self.history.read().await;
        history.iter().rev().take(n).cloned().collect()
    }

    pub async fn count_by_category(&self, category: ErrorCategory) -> u64 {
        *self.by_category.read().await.get(&category).unwrap_or(&0)
    }

    pub async fn count_by_severity(&self, severity: ErrorSeverity) -> u64 {
        *self.by_severity.read().await.get(&severity).unwrap_or(&0)
    }

    pub async fn clear(&self) {
        self.history.write().await.clear();
        self.by_category.write().await.clear();
        self.by_severity.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[tokio::test]
    async fn records_and_counts_by_category() {
        let log = ErrorLog::new(std::sync::Arc::new(SystemClock));
        log.record(&MidplaneError::ConnectionLost { reason: "x".into() }, "broker call")
            .await;
        log.record(&MidplaneError::Timeout { duration_ms: 10 }, "broker call")
            .await;
        assert_eq!(log.count_by_category(ErrorCategory::Connection).await, 2);
        assert_eq!(log.recent(10).await.len(), 2);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let log = ErrorLog::new(std::sync::Arc::new(SystemClock));
        for _ in 0..150 {
            log.record(&MidplaneError::Internal { reason: "x".into() }, "loop")
                .await;
        }
        assert_eq!(log.recent(1000).await.len(), HISTORY_CAPACITY);
    }
}
