//! `GroupRepo`: groups, per-group player ratings, rankings, and topic
//! configuration.

use chrono::Utc;
use sqlx::PgExecutor;

use crate::error::{classify_sqlx_error, AppError};
use crate::models::{Group, GroupPlayer, GroupTopic, TopicType};

use super::{require_bounded, require_positive, MAX_NAME_LEN, MAX_PLATFORM_ID_LEN};

/// Upserts by platform chat id: updates `name` and `updated_at` on every
/// call, inserts a fresh active row the first time the chat is seen.
pub async fn create_or_get_group<'e>(
    db: impl PgExecutor<'e>,
    platform_chat_id: &str,
    name: Option<&str>,
) -> Result<Group, AppError> {
    require_bounded(platform_chat_id, "platform_chat_id", MAX_PLATFORM_ID_LEN)?;
    if let Some(n) = name {
        require_bounded(n, "name", MAX_NAME_LEN)?;
    }

    let now = Utc::now();
    sqlx::query_as::<_, Group>(
        r#"
        INSERT INTO groups (platform_chat_id, name, active, created_at, updated_at)
        VALUES ($1, $2, TRUE, $3, $3)
        ON CONFLICT (platform_chat_id) DO UPDATE SET
            name = COALESCE(EXCLUDED.name, groups.name),
            active = TRUE,
            updated_at = EXCLUDED.updated_at
        RETURNING id, platform_chat_id, name, active, created_at, updated_at
        "#,
    )
    .bind(platform_chat_id)
    .bind(name)
    .bind(now)
    .fetch_one(db)
    .await
    .map_err(classify_sqlx_error)
}

/// Marks a group inactive (bot removed from chat). Never a hard delete.
pub async fn mark_inactive<'e>(
    db: impl PgExecutor<'e>,
    platform_chat_id: &str,
) -> Result<(), AppError> {
    require_bounded(platform_chat_id, "platform_chat_id", MAX_PLATFORM_ID_LEN)?;
    sqlx::query("UPDATE groups SET active = FALSE, updated_at = $2 WHERE platform_chat_id = $1")
        .bind(platform_chat_id)
        .bind(Utc::now())
        .execute(db)
        .await
        .map_err(classify_sqlx_error)?;
    Ok(())
}

/// Migrates a group to a new platform chat id (the platform reassigns chat
/// ids e.g. on a group→supergroup upgrade). Reactivates the row if it had
/// gone inactive.
pub async fn migrate_platform_chat_id<'e>(
    db: impl PgExecutor<'e>,
    old_platform_chat_id: &str,
    new_platform_chat_id: &str,
) -> Result<(), AppError> {
    require_bounded(old_platform_chat_id, "old_platform_chat_id", MAX_PLATFORM_ID_LEN)?;
    require_bounded(new_platform_chat_id, "new_platform_chat_id", MAX_PLATFORM_ID_LEN)?;
    sqlx::query(
        "UPDATE groups SET platform_chat_id = $2, active = TRUE, updated_at = $3 WHERE platform_chat_id = $1",
    )
    .bind(old_platform_chat_id)
    .bind(new_platform_chat_id)
    .bind(Utc::now())
    .execute(db)
    .await
    .map_err(classify_sqlx_error)?;
    Ok(())
}

/// Inserts a default `GroupPlayer` row (rating 1500, version 0) the first
/// time a player appears in this group, otherwise returns the existing row.
pub async fn get_or_create_group_player<'e>(
    db: impl PgExecutor<'e>,
    group_id: i64,
    player_id: i64,
    initial_rating: i32,
) -> Result<GroupPlayer, AppError> {
    require_positive(group_id, "group_id")?;
    require_positive(player_id, "player_id")?;

    sqlx::query_as::<_, GroupPlayer>(
        r#"
        INSERT INTO group_players
            (group_id, player_id, current_rating, matches_played, matches_won, matches_lost, version, created_at, updated_at)
        VALUES ($1, $2, $3, 0, 0, 0, 0, $4, $4)
        ON CONFLICT (group_id, player_id) DO UPDATE SET group_id = EXCLUDED.group_id
        RETURNING id, group_id, player_id, current_rating, matches_played, matches_won, matches_lost, version, created_at, updated_at
        "#,
    )
    .bind(group_id)
    .bind(player_id)
    .bind(initial_rating)
    .bind(Utc::now())
    .fetch_one(db)
    .await
    .map_err(classify_sqlx_error)
}

/// Re-reads a `GroupPlayer` row with `FOR UPDATE`, for use inside the match
/// engine's locked read step. Must run inside an open transaction.
pub async fn lock_group_player(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: i64,
) -> Result<GroupPlayer, AppError> {
    require_positive(id, "group_player_id")?;
    sqlx::query_as::<_, GroupPlayer>(
        r#"
        SELECT id, group_id, player_id, current_rating, matches_played, matches_won, matches_lost, version, created_at, updated_at
        FROM group_players
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(classify_sqlx_error)
}

/// Conditional update predicated on an unchanged `version`. Returns `true`
/// iff exactly one row matched — zero rows means another writer won the
/// optimistic-lock race and the caller must treat this as
/// `AppError::OptimisticConflict`.
#[allow(clippy::too_many_arguments)]
pub async fn update_group_player(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: i64,
    expected_version: i64,
    new_rating: i32,
    matches_played_delta: i32,
    matches_won_delta: i32,
    matches_lost_delta: i32,
) -> Result<bool, AppError> {
    require_positive(id, "group_player_id")?;
    let result = sqlx::query(
        r#"
        UPDATE group_players
        SET current_rating = $3,
            matches_played = matches_played + $4,
            matches_won = GREATEST(matches_won + $5, 0),
            matches_lost = GREATEST(matches_lost + $6, 0),
            version = version + 1,
            updated_at = $7
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(id)
    .bind(expected_version)
    .bind(new_rating)
    .bind(matches_played_delta)
    .bind(matches_won_delta)
    .bind(matches_lost_delta)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await
    .map_err(classify_sqlx_error)?;

    Ok(result.rows_affected() == 1)
}

/// Top-N `GroupPlayer` rows by current rating, ties broken by ascending
/// internal id. Does not require a transaction.
pub async fn get_rankings<'e>(
    db: impl PgExecutor<'e>,
    group_id: i64,
    limit: i64,
) -> Result<Vec<GroupPlayer>, AppError> {
    require_positive(group_id, "group_id")?;
    if limit <= 0 {
        return Err(AppError::invalid_argument("limit must be positive"));
    }

    sqlx::query_as::<_, GroupPlayer>(
        r#"
        SELECT id, group_id, player_id, current_rating, matches_played, matches_won, matches_lost, version, created_at, updated_at
        FROM group_players
        WHERE group_id = $1
        ORDER BY current_rating DESC, id ASC
        LIMIT $2
        "#,
    )
    .bind(group_id)
    .bind(limit)
    .fetch_all(db)
    .await
    .map_err(classify_sqlx_error)
}

/// Creates or overwrites the (group, platform_topic_id, topic_type) mapping.
pub async fn configure_topic<'e>(
    db: impl PgExecutor<'e>,
    group_id: i64,
    platform_topic_id: &str,
    topic_type: TopicType,
) -> Result<GroupTopic, AppError> {
    require_positive(group_id, "group_id")?;
    require_bounded(platform_topic_id, "platform_topic_id", MAX_PLATFORM_ID_LEN)?;

    sqlx::query_as::<_, GroupTopic>(
        r#"
        INSERT INTO group_topics (group_id, platform_topic_id, topic_type, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (group_id, platform_topic_id, topic_type) DO UPDATE SET created_at = EXCLUDED.created_at
        RETURNING id, group_id, platform_topic_id, topic_type, created_at
        "#,
    )
    .bind(group_id)
    .bind(platform_topic_id)
    .bind(topic_type)
    .bind(Utc::now())
    .fetch_one(db)
    .await
    .map_err(classify_sqlx_error)
}

/// Whether the group has *any* topic configured with the given type,
/// and if so which platform topic id — used by the router's topic-scoping
/// check.
pub async fn get_topic_by_type<'e>(
    db: impl PgExecutor<'e>,
    group_id: i64,
    topic_type: TopicType,
) -> Result<Option<GroupTopic>, AppError> {
    require_positive(group_id, "group_id")?;
    sqlx::query_as::<_, GroupTopic>(
        r#"
        SELECT id, group_id, platform_topic_id, topic_type, created_at
        FROM group_topics
        WHERE group_id = $1 AND topic_type = $2
        "#,
    )
    .bind(group_id)
    .bind(topic_type)
    .fetch_optional(db)
    .await
    .map_err(classify_sqlx_error)
}

pub async fn get_topic<'e>(
    db: impl PgExecutor<'e>,
    group_id: i64,
    platform_topic_id: &str,
    topic_type: TopicType,
) -> Result<Option<GroupTopic>, AppError> {
    require_positive(group_id, "group_id")?;
    require_bounded(platform_topic_id, "platform_topic_id", MAX_PLATFORM_ID_LEN)?;
    sqlx::query_as::<_, GroupTopic>(
        r#"
        SELECT id, group_id, platform_topic_id, topic_type, created_at
        FROM group_topics
        WHERE group_id = $1 AND platform_topic_id = $2 AND topic_type = $3
        "#,
    )
    .bind(group_id)
    .bind(platform_topic_id)
    .bind(topic_type)
    .fetch_optional(db)
    .await
    .map_err(classify_sqlx_error)
}
