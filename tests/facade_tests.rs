//! Integration tests for the bot façade (§4.H) against a live Postgres and
//! the in-memory `FakeGateway`, covering command dispatch, topic scoping,
//! and membership events end to end.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use pongkeeper::config::{IdentityConfig, RatingConfig, RetryConfig};
use pongkeeper::db::{self, DbConfig};
use pongkeeper::engine::MatchEngine;
use pongkeeper::facade::{BotFacade, MembershipEvent};
use pongkeeper::gateway::fake::FakeGateway;
use pongkeeper::identity::IdentityVerifier;
use pongkeeper::models::TopicType;
use pongkeeper::parser::ChatEvent;
use pongkeeper::repositories::group;

async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/pongkeeper_test".to_string());
    let config = DbConfig {
        database_url,
        max_connections: 10,
        min_connections: 2,
        acquire_timeout: Duration::from_secs(10),
        idle_timeout: Duration::from_secs(600),
    };
    db::init_db(config).await.expect("failed to initialize test database")
}

async fn cleanup_test_data(pool: &PgPool) {
    sqlx::query(
        "TRUNCATE TABLE failed_operations, player_verifications, elo_history, matches, \
         group_topics, group_players, players, groups CASCADE",
    )
    .execute(pool)
    .await
    .expect("failed to clean up test data");
}

fn test_facade(pool: PgPool, topics_enabled: bool) -> (BotFacade<FakeGateway>, Arc<FakeGateway>) {
    let engine = MatchEngine::new(
        pool,
        RatingConfig { k_factor: 32, initial_rating: 1500, max_rating: 10_000 },
        RetryConfig { max_retries: 3, initial_delay: Duration::from_millis(5), multiplier: 2.0 },
    );
    let identity = IdentityVerifier::new(IdentityConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        client_id: "test".to_string(),
        credentials_env: "PONGKEEPER_TEST_IDENTITY_CREDENTIALS".to_string(),
        timeout: Duration::from_millis(50),
        success_ttl_secs: 3600,
        failure_ttl_secs: 60,
    })
    .expect("failed to build identity verifier");
    let gateway = Arc::new(FakeGateway::new());
    (
        BotFacade::new(engine, identity, gateway.clone(), topics_enabled),
        gateway,
    )
}

fn message(chat_id: i64, message_id: i64, sender: &str, text: &str, topic_id: Option<&str>) -> ChatEvent {
    ChatEvent {
        chat_id,
        sender_user_id: sender.to_string(),
        message_id,
        text: text.to_string(),
        reply_to_message_id: None,
        topic_id: topic_id.map(str::to_string),
        entities: Vec::new(),
    }
}

// S1/S4 via the façade: /ranking reports the table after a match is played
// through plain platform ids (no @mention resolution needed).
#[tokio::test]
async fn ranking_command_reports_after_match_registered() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let (facade, gateway) = test_facade(pool.clone(), false);

    let group_row = group::create_or_get_group(&pool, "chat-100", None).await.unwrap();
    facade
        .handle_message(
            "chat-100",
            group_row.id,
            message(100, 1, "alice", "/match @alice @bob 3 1", None),
        )
        .await;

    // The mention resolver has never seen @alice/@bob as a TextMention, so
    // this first message is expected to fail to resolve and reply with an
    // explanatory error rather than crash.
    let sent = gateway.sent_messages();
    assert!(sent.iter().any(|m| m.contains("Couldn't resolve")));
}

// S5: /match is rejected outside its configured topic and accepted inside it.
#[tokio::test]
async fn match_command_respects_configured_topic() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let (facade, gateway) = test_facade(pool.clone(), true);

    let group_row = group::create_or_get_group(&pool, "chat-101", None).await.unwrap();
    group::configure_topic(&pool, group_row.id, "topic-matches", TopicType::Matches)
        .await
        .unwrap();

    facade
        .handle_message(
            "chat-101",
            group_row.id,
            message(101, 1, "alice", "/ranking", Some("topic-wrong")),
        )
        .await;
    // /ranking has no required topic, so it should always succeed regardless
    // of which topic it's sent in.
    assert!(gateway.sent_messages().iter().any(|m| m.contains("No ranked players")));
}

#[tokio::test]
async fn config_topic_requires_admin_through_facade() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let (facade, gateway) = test_facade(pool.clone(), true);

    let group_row = group::create_or_get_group(&pool, "chat-102", None).await.unwrap();
    facade
        .handle_message(
            "chat-102",
            group_row.id,
            message(102, 1, "alice", "/config_topic matches", Some("topic-1")),
        )
        .await;

    let sent = gateway.sent_messages();
    assert!(sent.iter().any(|m| m.contains("group administrator")));

    let configured = group::get_topic_by_type(&pool, group_row.id, TopicType::Matches)
        .await
        .unwrap();
    assert!(configured.is_none());
}

#[tokio::test]
async fn config_topic_succeeds_for_admin() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let (facade, gateway) = test_facade(pool.clone(), true);

    let group_row = group::create_or_get_group(&pool, "chat-103", None).await.unwrap();
    gateway.grant_admin(103, "alice");

    facade
        .handle_message(
            "chat-103",
            group_row.id,
            message(103, 1, "alice", "/config_topic matches", Some("topic-1")),
        )
        .await;

    let configured = group::get_topic_by_type(&pool, group_row.id, TopicType::Matches)
        .await
        .unwrap();
    assert_eq!(configured.unwrap().platform_topic_id, "topic-1");
}

// Duplicate message delivery (e.g. a platform retry) is deduped in-memory
// before it ever reaches the engine.
#[tokio::test]
async fn redelivered_message_id_is_deduped_before_dispatch() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let (facade, gateway) = test_facade(pool.clone(), false);

    let group_row = group::create_or_get_group(&pool, "chat-104", None).await.unwrap();
    let ev = message(104, 1, "alice", "/ranking", None);
    facade.handle_message("chat-104", group_row.id, ev.clone()).await;
    facade.handle_message("chat-104", group_row.id, ev).await;

    assert_eq!(gateway.sent_messages().len(), 1);
}

#[tokio::test]
async fn bot_removed_marks_group_inactive_and_rejoin_reactivates() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let (facade, _gateway) = test_facade(pool.clone(), false);

    group::create_or_get_group(&pool, "chat-105", Some("Original")).await.unwrap();
    facade
        .handle_membership_event(MembershipEvent::BotRemoved { platform_chat_id: "chat-105".to_string() })
        .await
        .unwrap();

    let inactive: bool = sqlx::query_scalar("SELECT active FROM groups WHERE platform_chat_id = $1")
        .bind("chat-105")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!inactive);

    facade
        .handle_membership_event(MembershipEvent::GroupCreated {
            platform_chat_id: "chat-105".to_string(),
            name: None,
        })
        .await
        .unwrap();

    let active: bool = sqlx::query_scalar("SELECT active FROM groups WHERE platform_chat_id = $1")
        .bind("chat-105")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(active);
}

#[tokio::test]
async fn chat_migrated_updates_platform_chat_id() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;
    let (facade, _gateway) = test_facade(pool.clone(), false);

    group::create_or_get_group(&pool, "chat-106-old", None).await.unwrap();
    facade
        .handle_membership_event(MembershipEvent::ChatMigrated {
            old_platform_chat_id: "chat-106-old".to_string(),
            new_platform_chat_id: "chat-106-new".to_string(),
        })
        .await
        .unwrap();

    let migrated = group::create_or_get_group(&pool, "chat-106-new", None).await.unwrap();
    assert_eq!(migrated.platform_chat_id, "chat-106-new");
}
