//! `PlayerVerificationRepo`: one row per `/id` resolution attempt (§3's
//! PlayerVerification entity). Purely a historical log for operators; never
//! read by the engine or the façade.

use chrono::Utc;
use sqlx::PgExecutor;

use crate::error::{classify_sqlx_error, AppError};

use super::require_positive;

#[derive(Debug, Clone)]
pub struct NewPlayerVerification {
    pub player_id: i64,
    pub nickname: String,
    pub status: &'static str,
}

pub async fn record<'e>(db: impl PgExecutor<'e>, entry: NewPlayerVerification) -> Result<(), AppError> {
    require_positive(entry.player_id, "player_id")?;
    sqlx::query(
        r#"
        INSERT INTO player_verifications (player_id, nickname, status, checked_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(entry.player_id)
    .bind(&entry.nickname)
    .bind(entry.status)
    .bind(Utc::now())
    .execute(db)
    .await
    .map(|_| ())
    .map_err(classify_sqlx_error)
}
