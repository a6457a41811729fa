//! `MatchRepo`: the immutable match ledger.

use chrono::Utc;
use sqlx::PgExecutor;

use crate::error::{classify_sqlx_error, is_unique_violation_on, AppError};
use crate::models::Match;

use super::{require_bounded, require_positive, MAX_PLATFORM_ID_LEN};

const IDEMPOTENCY_KEY_MAX_LEN: usize = 256;

/// Fields needed to insert a new match. Rating snapshots are filled in by
/// the engine right before the insert, inside the same transaction that
/// locked the `GroupPlayer` rows.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub group_id: i64,
    pub player1_id: i64,
    pub player2_id: i64,
    pub player1_score: i32,
    pub player2_score: i32,
    pub player1_rating_before: i32,
    pub player1_rating_after: i32,
    pub player2_rating_before: i32,
    pub player2_rating_after: i32,
    pub idempotency_key: String,
    pub creator_platform_user_id: String,
}

fn validate_new_match(m: &NewMatch) -> Result<(), AppError> {
    require_positive(m.group_id, "group_id")?;
    require_positive(m.player1_id, "player1_id")?;
    require_positive(m.player2_id, "player2_id")?;
    require_bounded(&m.idempotency_key, "idempotency_key", IDEMPOTENCY_KEY_MAX_LEN)?;
    require_bounded(
        &m.creator_platform_user_id,
        "creator_platform_user_id",
        MAX_PLATFORM_ID_LEN,
    )?;
    if m.player1_id == m.player2_id {
        return Err(AppError::invalid_argument("player1_id must differ from player2_id"));
    }
    if m.player1_score < 0 || m.player2_score < 0 {
        return Err(AppError::invalid_argument("scores must be non-negative"));
    }
    if m.player1_score == 0 && m.player2_score == 0 {
        return Err(AppError::invalid_argument("at least one score must be positive"));
    }
    for rating in [
        m.player1_rating_before,
        m.player1_rating_after,
        m.player2_rating_before,
        m.player2_rating_after,
    ] {
        if !(0..=10_000).contains(&rating) {
            return Err(AppError::invalid_argument("rating snapshot out of bounds"));
        }
    }
    Ok(())
}

/// Inserts a match row. On a unique-constraint collision on
/// `idempotency_key`, returns `AppError::DuplicateIdempotency` rather than
/// the generic classification, so the engine can cheaply distinguish "some
/// other unique constraint fired" (which would be a bug) from the expected
/// idempotent-retry race.
pub async fn create(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    m: NewMatch,
) -> Result<Match, AppError> {
    validate_new_match(&m)?;
    let now = Utc::now();

    sqlx::query_as::<_, Match>(
        r#"
        INSERT INTO matches
            (group_id, player1_id, player2_id, player1_score, player2_score,
             player1_rating_before, player1_rating_after, player2_rating_before, player2_rating_after,
             idempotency_key, creator_platform_user_id, created_at, is_undone, undone_at, undoer_platform_user_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, FALSE, NULL, NULL)
        RETURNING id, group_id, player1_id, player2_id, player1_score, player2_score,
                  player1_rating_before, player1_rating_after, player2_rating_before, player2_rating_after,
                  idempotency_key, creator_platform_user_id, created_at, is_undone, undone_at, undoer_platform_user_id
        "#,
    )
    .bind(m.group_id)
    .bind(m.player1_id)
    .bind(m.player2_id)
    .bind(m.player1_score)
    .bind(m.player2_score)
    .bind(m.player1_rating_before)
    .bind(m.player1_rating_after)
    .bind(m.player2_rating_before)
    .bind(m.player2_rating_after)
    .bind(&m.idempotency_key)
    .bind(&m.creator_platform_user_id)
    .bind(now)
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| {
        if is_unique_violation_on(&err, "matches_idempotency_key_key") {
            AppError::DuplicateIdempotency
        } else {
            classify_sqlx_error(err)
        }
    })
}

pub async fn get_by_idempotency_key<'e>(
    db: impl PgExecutor<'e>,
    key: &str,
) -> Result<Option<Match>, AppError> {
    require_bounded(key, "idempotency_key", IDEMPOTENCY_KEY_MAX_LEN)?;
    sqlx::query_as::<_, Match>(
        r#"
        SELECT id, group_id, player1_id, player2_id, player1_score, player2_score,
               player1_rating_before, player1_rating_after, player2_rating_before, player2_rating_after,
               idempotency_key, creator_platform_user_id, created_at, is_undone, undone_at, undoer_platform_user_id
        FROM matches
        WHERE idempotency_key = $1
        "#,
    )
    .bind(key)
    .fetch_optional(db)
    .await
    .map_err(classify_sqlx_error)
}

pub async fn get_by_id<'e>(db: impl PgExecutor<'e>, id: i64) -> Result<Option<Match>, AppError> {
    require_positive(id, "match_id")?;
    sqlx::query_as::<_, Match>(
        r#"
        SELECT id, group_id, player1_id, player2_id, player1_score, player2_score,
               player1_rating_before, player1_rating_after, player2_rating_before, player2_rating_after,
               idempotency_key, creator_platform_user_id, created_at, is_undone, undone_at, undoer_platform_user_id
        FROM matches
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .map_err(classify_sqlx_error)
}

/// The group's most recent non-undone match — used by `/undo` with no
/// reply-context.
pub async fn get_latest_undoable<'e>(
    db: impl PgExecutor<'e>,
    group_id: i64,
) -> Result<Option<Match>, AppError> {
    require_positive(group_id, "group_id")?;
    sqlx::query_as::<_, Match>(
        r#"
        SELECT id, group_id, player1_id, player2_id, player1_score, player2_score,
               player1_rating_before, player1_rating_after, player2_rating_before, player2_rating_after,
               idempotency_key, creator_platform_user_id, created_at, is_undone, undone_at, undoer_platform_user_id
        FROM matches
        WHERE group_id = $1 AND is_undone = FALSE
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(group_id)
    .fetch_optional(db)
    .await
    .map_err(classify_sqlx_error)
}

pub async fn get_by_group_id<'e>(
    db: impl PgExecutor<'e>,
    group_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<Match>, AppError> {
    require_positive(group_id, "group_id")?;
    if limit <= 0 || offset < 0 {
        return Err(AppError::invalid_argument("limit must be positive and offset non-negative"));
    }
    sqlx::query_as::<_, Match>(
        r#"
        SELECT id, group_id, player1_id, player2_id, player1_score, player2_score,
               player1_rating_before, player1_rating_after, player2_rating_before, player2_rating_after,
               idempotency_key, creator_platform_user_id, created_at, is_undone, undone_at, undoer_platform_user_id
        FROM matches
        WHERE group_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(group_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
    .map_err(classify_sqlx_error)
}

/// `SELECT ... FOR UPDATE` on a single match row, for the first step of the
/// undo state machine. Must run inside an open transaction.
pub async fn lock_match(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: i64,
) -> Result<Option<Match>, AppError> {
    require_positive(id, "match_id")?;
    sqlx::query_as::<_, Match>(
        r#"
        SELECT id, group_id, player1_id, player2_id, player1_score, player2_score,
               player1_rating_before, player1_rating_after, player2_rating_before, player2_rating_after,
               idempotency_key, creator_platform_user_id, created_at, is_undone, undone_at, undoer_platform_user_id
        FROM matches
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(classify_sqlx_error)
}

/// Transitions `is_undone` false→true and stamps `undone_at`/`undoer`. A
/// no-op (still `Ok`) if the match is already undone — callers that need to
/// reject a double-undo check `is_undone` themselves before calling this.
pub async fn undo_match(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: i64,
    undoer_platform_user_id: &str,
) -> Result<(), AppError> {
    require_positive(id, "match_id")?;
    require_bounded(undoer_platform_user_id, "undoer_platform_user_id", MAX_PLATFORM_ID_LEN)?;
    sqlx::query(
        r#"
        UPDATE matches
        SET is_undone = TRUE, undone_at = $2, undoer_platform_user_id = $3
        WHERE id = $1 AND is_undone = FALSE
        "#,
    )
    .bind(id)
    .bind(Utc::now())
    .bind(undoer_platform_user_id)
    .execute(&mut **tx)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(())
}

