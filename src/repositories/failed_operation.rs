//! `FailedOperationRepo`: best-effort audit log of operations that exhausted
//! retry or hit a permanent error (§4.G.6). Never read by the engine —
//! purely operational visibility, so a write failure here is logged and
//! swallowed rather than propagated on top of whatever already failed.

use chrono::Utc;
use sqlx::PgExecutor;

#[derive(Debug, Clone)]
pub struct NewFailedOperation {
    pub operation: &'static str,
    pub group_id: Option<i64>,
    pub error_kind: &'static str,
    pub error_detail: String,
}

pub async fn record<'e>(db: impl PgExecutor<'e>, entry: NewFailedOperation) {
    let result = sqlx::query(
        r#"
        INSERT INTO failed_operations (operation, group_id, error_kind, error_detail, occurred_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(entry.operation)
    .bind(entry.group_id)
    .bind(entry.error_kind)
    .bind(&entry.error_detail)
    .bind(Utc::now())
    .execute(db)
    .await;

    if let Err(err) = result {
        tracing::warn!(operation = entry.operation, error = %err, "failed to record failed_operations audit row");
    }
}
