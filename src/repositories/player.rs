//! `PlayerRepo`: player identity rows, independent of any group.

use chrono::Utc;
use sqlx::PgExecutor;

use crate::error::{classify_sqlx_error, AppError};
use crate::models::Player;

use super::{require_bounded, require_positive, MAX_NICKNAME_LEN, MAX_PLATFORM_ID_LEN};

/// Inserts a fresh row the first time `platform_user_id` appears among
/// non-deleted rows, otherwise returns the existing one. A player who left
/// every group and was soft-deleted gets a brand-new row on their next
/// `create_or_get` — the old row is never resurrected.
pub async fn create_or_get<'e>(
    db: impl PgExecutor<'e>,
    platform_user_id: &str,
) -> Result<Player, AppError> {
    require_bounded(platform_user_id, "platform_user_id", MAX_PLATFORM_ID_LEN)?;
    let now = Utc::now();

    sqlx::query_as::<_, Player>(
        r#"
        INSERT INTO players
            (platform_user_id, verified_nickname, verified_student, allowed_non_student, created_at, updated_at, deleted_at)
        VALUES ($1, NULL, FALSE, FALSE, $2, $2, NULL)
        ON CONFLICT (platform_user_id) WHERE deleted_at IS NULL DO UPDATE SET platform_user_id = EXCLUDED.platform_user_id
        RETURNING id, platform_user_id, verified_nickname, verified_student, allowed_non_student, created_at, updated_at, deleted_at
        "#,
    )
    .bind(platform_user_id)
    .bind(now)
    .fetch_one(db)
    .await
    .map_err(classify_sqlx_error)
}

pub async fn get_by_id<'e>(db: impl PgExecutor<'e>, id: i64) -> Result<Option<Player>, AppError> {
    require_positive(id, "player_id")?;
    sqlx::query_as::<_, Player>(
        r#"
        SELECT id, platform_user_id, verified_nickname, verified_student, allowed_non_student, created_at, updated_at, deleted_at
        FROM players
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .map_err(classify_sqlx_error)
}

/// Updated fields a command may legally change. Every other field (ids,
/// timestamps) is repository-managed.
#[derive(Debug, Clone, Default)]
pub struct PlayerUpdate {
    pub verified_nickname: Option<Option<String>>,
    pub verified_student: Option<bool>,
    pub allowed_non_student: Option<bool>,
}

/// Updates mutable fields by internal id. Fails with `NotFound` if the row
/// doesn't exist (or is already soft-deleted — a deleted row is never
/// mutated again).
pub async fn update<'e>(
    db: impl PgExecutor<'e>,
    id: i64,
    changes: PlayerUpdate,
) -> Result<Player, AppError> {
    require_positive(id, "player_id")?;
    if let Some(Some(nick)) = &changes.verified_nickname {
        require_bounded(nick, "verified_nickname", MAX_NICKNAME_LEN)?;
    }

    let result = sqlx::query_as::<_, Player>(
        r#"
        UPDATE players
        SET verified_nickname = COALESCE($2, verified_nickname),
            verified_student = COALESCE($3, verified_student),
            allowed_non_student = COALESCE($4, allowed_non_student),
            updated_at = $5
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING id, platform_user_id, verified_nickname, verified_student, allowed_non_student, created_at, updated_at, deleted_at
        "#,
    )
    .bind(id)
    .bind(changes.verified_nickname.flatten())
    .bind(changes.verified_student)
    .bind(changes.allowed_non_student)
    .bind(Utc::now())
    .fetch_optional(db)
    .await
    .map_err(classify_sqlx_error)?;

    result.ok_or_else(|| AppError::not_found(format!("player {id} not found")))
}

/// Clears the nickname and verified-student flag explicitly (used by
/// `/id_guest`, which must wipe any prior verification rather than merely
/// leaving it untouched).
pub async fn clear_verification<'e>(db: impl PgExecutor<'e>, id: i64) -> Result<Player, AppError> {
    require_positive(id, "player_id")?;
    let result = sqlx::query_as::<_, Player>(
        r#"
        UPDATE players
        SET verified_nickname = NULL,
            verified_student = FALSE,
            allowed_non_student = TRUE,
            updated_at = $2
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING id, platform_user_id, verified_nickname, verified_student, allowed_non_student, created_at, updated_at, deleted_at
        "#,
    )
    .bind(id)
    .bind(Utc::now())
    .fetch_optional(db)
    .await
    .map_err(classify_sqlx_error)?;

    result.ok_or_else(|| AppError::not_found(format!("player {id} not found")))
}

/// Idempotent: soft-deleting an already-deleted row is a no-op success.
pub async fn soft_delete<'e>(db: impl PgExecutor<'e>, id: i64) -> Result<(), AppError> {
    require_positive(id, "player_id")?;
    sqlx::query("UPDATE players SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .bind(Utc::now())
        .execute(db)
        .await
        .map_err(classify_sqlx_error)?;
    Ok(())
}
