use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub entity_type: &'static str,
    pub entity_id: u64,
    pub action: &'static str,
    pub field: Option<&'static str>,
    pub old: Option<String>,
    pub new: Option<String>,
    pub actor_id: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Write-only sink; the engine never reads audit records back.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

#[derive(Clone)]
pub struct SqlAuditSink {
    pool: MySqlPool,
}

impl SqlAuditSink {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqlAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (entity_type, entity_id, action, field, old_value, new_value, actor_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.entity_type)
        .bind(entry.entity_id)
        .bind(entry.action)
        .bind(entry.field)
        .bind(&entry.old)
        .bind(&entry.new)
        .bind(entry.actor_id)
        .bind(entry.at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
