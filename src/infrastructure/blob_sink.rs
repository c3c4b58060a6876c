use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::errors::MidplaneError;

/// One audit row per execution/fill event, written to whatever
/// [`BlobSink`] implementation is wired in.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRow {
    pub signal_id: String,
    pub instrument: String,
    pub status: String,
    pub received_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Decimal,
    pub commission: Decimal,
    pub error_message: Option<String>,
}

/// Durable sink for audit rows and error reports. A real deployment would
/// back this with object storage or a database; the crate ships only an
/// in-memory implementation plus a no-op one for tests and dry runs.
#[async_trait]
pub trait BlobSink: Send + Sync {
    async fn write_audit_row(&self, row: AuditRow) -> Result<(), MidplaneError>;
}

#[derive(Default)]
pub struct InMemoryBlobSink {
    rows: tokio::sync::RwLock<Vec<AuditRow>>,
}

impl InMemoryBlobSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rows(&self) -> Vec<AuditRow> {
        self.rows.read().await.clone()
    }
}

#[async_trait]
impl BlobSink for InMemoryBlobSink {
    async fn write_audit_row(&self, row: AuditRow) -> Result<(), MidplaneError> {
        self.rows.write().await.push(row);
        Ok(())
    }
}

/// Appends one line-delimited JSON audit row to a file per write, for
/// deployments that need a durable sink without a database.
pub struct JsonFileBlobSink {
    path: PathBuf,
    file_lock: Mutex<()>,
}

impl JsonFileBlobSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl BlobSink for JsonFileBlobSink {
    async fn write_audit_row(&self, row: AuditRow) -> Result<(), MidplaneError> {
        let line = serde_json::to_string(&row).map_err(|e| MidplaneError::Internal {
            reason: format!("failed to serialize audit row: {e}"),
        })?;

        let _guard = self.file_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| MidplaneError::Internal {
                reason: format!("failed to open audit log {}: {e}", self.path.display()),
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| MidplaneError::Internal {
                reason: format!("failed to write audit row: {e}"),
            })?;
        file.write_all(b"\n").await.map_err(|e| MidplaneError::Internal {
            reason: format!("failed to write audit row: {e}"),
        })?;
        Ok(())
    }
}

pub struct NoopBlobSink;

#[async_trait]
impl BlobSink for NoopBlobSink {
    async fn write_audit_row(&self, _row: AuditRow) -> Result<(), MidplaneError> {
        Ok(())
    }
}
