//! Database row types for every entity in the data model. These are plain
//! value types — repositories are the only code that turns them into SQL
//! and back.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct Group {
    pub id: i64,
    pub platform_chat_id: String,
    pub name: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Player {
    pub id: i64,
    pub platform_user_id: String,
    pub verified_nickname: Option<String>,
    pub verified_student: bool,
    pub allowed_non_student: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Player {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct GroupPlayer {
    pub id: i64,
    pub group_id: i64,
    pub player_id: i64,
    pub current_rating: i32,
    pub matches_played: i32,
    pub matches_won: i32,
    pub matches_lost: i32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Match {
    pub id: i64,
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
    pub created_at: DateTime<Utc>,
    pub is_undone: bool,
    pub undone_at: Option<DateTime<Utc>>,
    pub undoer_platform_user_id: Option<String>,
}

impl Match {
    pub fn winner_player_id(&self) -> Option<i64> {
        use std::cmp::Ordering::*;
        match self.player1_score.cmp(&self.player2_score) {
            Greater => Some(self.player1_id),
            Less => Some(self.player2_id),
            Equal => None,
        }
    }

    pub fn loser_player_id(&self) -> Option<i64> {
        use std::cmp::Ordering::*;
        match self.player1_score.cmp(&self.player2_score) {
            Greater => Some(self.player2_id),
            Less => Some(self.player1_id),
            Equal => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EloHistoryEntry {
    pub id: i64,
    pub match_id: Option<i64>,
    pub group_id: i64,
    pub player_id: i64,
    pub rating_before: i32,
    pub rating_after: i32,
    pub rating_change: i32,
    pub created_at: DateTime<Utc>,
    pub is_undone: bool,
}

/// Closed set of topic kinds a `GroupTopic` row may bind to. Stored as
/// plain `TEXT` in Postgres (the migration adds a `CHECK` constraint
/// mirroring this set); any value outside it is an `InvalidArgument` at the
/// repository boundary — see `TopicType::parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicType {
    Id,
    Ranking,
    Matches,
    Logs,
}

impl TopicType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "id" => Some(TopicType::Id),
            "ranking" => Some(TopicType::Ranking),
            "matches" => Some(TopicType::Matches),
            "logs" => Some(TopicType::Logs),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TopicType::Id => "id",
            TopicType::Ranking => "ranking",
            TopicType::Matches => "matches",
            TopicType::Logs => "logs",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for TopicType {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <&str as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TopicType {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TopicType {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let raw = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        TopicType::parse(raw).ok_or_else(|| format!("unknown topic_type {raw:?}").into())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct GroupTopic {
    pub id: i64,
    pub group_id: i64,
    pub platform_topic_id: String,
    pub topic_type: TopicType,
    pub created_at: DateTime<Utc>,
}
