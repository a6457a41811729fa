//! `EloHistoryRepo`: append-only rating ledger. No update, no delete.

use chrono::Utc;
use sqlx::PgExecutor;

use crate::error::{classify_sqlx_error, AppError};
use crate::models::EloHistoryEntry;

use super::require_positive;

#[derive(Debug, Clone)]
pub struct NewEloHistoryEntry {
    pub match_id: Option<i64>,
    pub group_id: i64,
    pub player_id: i64,
    pub rating_before: i32,
    pub rating_after: i32,
    pub is_undone: bool,
}

/// Insert-only. The caller (the match engine) is responsible for always
/// appending exactly two rows per match and two per undo, inside the same
/// transaction as the triggering write.
pub async fn append<'e>(
    db: impl PgExecutor<'e>,
    entry: NewEloHistoryEntry,
) -> Result<EloHistoryEntry, AppError> {
    require_positive(entry.group_id, "group_id")?;
    require_positive(entry.player_id, "player_id")?;
    if let Some(match_id) = entry.match_id {
        require_positive(match_id, "match_id")?;
    }

    let rating_change = entry.rating_after - entry.rating_before;

    sqlx::query_as::<_, EloHistoryEntry>(
        r#"
        INSERT INTO elo_history
            (match_id, group_id, player_id, rating_before, rating_after, rating_change, created_at, is_undone)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, match_id, group_id, player_id, rating_before, rating_after, rating_change, created_at, is_undone
        "#,
    )
    .bind(entry.match_id)
    .bind(entry.group_id)
    .bind(entry.player_id)
    .bind(entry.rating_before)
    .bind(entry.rating_after)
    .bind(rating_change)
    .bind(Utc::now())
    .bind(entry.is_undone)
    .fetch_one(db)
    .await
    .map_err(classify_sqlx_error)
}

/// Every history row for a player, ordered by created_at — the chain
/// described in §3: each row's `after` equals the next row's `before`.
pub async fn get_for_player<'e>(
    db: impl PgExecutor<'e>,
    group_id: i64,
    player_id: i64,
) -> Result<Vec<EloHistoryEntry>, AppError> {
    require_positive(group_id, "group_id")?;
    require_positive(player_id, "player_id")?;
    sqlx::query_as::<_, EloHistoryEntry>(
        r#"
        SELECT id, match_id, group_id, player_id, rating_before, rating_after, rating_change, created_at, is_undone
        FROM elo_history
        WHERE group_id = $1 AND player_id = $2
        ORDER BY created_at ASC
        "#,
    )
    .bind(group_id)
    .bind(player_id)
    .fetch_all(db)
    .await
    .map_err(classify_sqlx_error)
}
