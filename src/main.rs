use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pongkeeper::config::{BotMode, Config};
use pongkeeper::engine::MatchEngine;
use pongkeeper::facade::{BotFacade, MembershipEvent};
use pongkeeper::identity::IdentityVerifier;
use pongkeeper::webhook::{HttpGateway, IncomingUpdate};
use pongkeeper::{db, health, metrics};

#[derive(Clone)]
struct AppState {
    db_pool: db::DbPool,
    metrics_handle: PrometheusHandle,
    facade: Arc<BotFacade<HttpGateway>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version") {
        println!("pongkeeper {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .cloned();

    dotenvy::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            "debug".to_string()
        }
        #[cfg(not(debug_assertions))]
        {
            "info".to_string()
        }
    });
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting pongkeeper");

    let config = Config::load(config_path.as_deref())?;

    let metrics_recorder = metrics::MetricsRecorder::new();
    let metrics_handle = metrics_recorder.handle().clone();
    tracing::info!("Metrics initialized");

    let db_pool = db::init_db((&config.database).into()).await?;
    tracing::info!("Database initialized");

    let engine = MatchEngine::new(db_pool.clone(), config.rating.clone(), config.retry);
    let identity = IdentityVerifier::new(config.identity.clone())?;

    let gateway_base_url = std::env::var("CHAT_GATEWAY_BASE_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string());
    let gateway = Arc::new(HttpGateway::new(gateway_base_url)?);

    let facade = Arc::new(BotFacade::new(engine, identity, gateway.clone(), config.topics.enabled));

    if config.bot.mode == BotMode::Polling {
        let poll_facade = facade.clone();
        let poll_gateway = gateway.clone();
        let poll_pool = db_pool.clone();
        tokio::spawn(async move {
            run_polling_loop(poll_gateway, poll_facade, poll_pool).await;
        });
        tracing::info!("Polling loop started");
    }

    let app_state = AppState { db_pool: db_pool.clone(), metrics_handle, facade };

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health_ready))
        .route("/metrics", get(metrics_handler));

    if config.bot.mode == BotMode::Webhook {
        router = router.route(&config.bot.webhook_path, post(webhook_handler));
    }

    let app = router.layer(TraceLayer::new_for_http()).with_state(app_state);

    let port = config.bot.webhook_port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn metrics_handler(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    (StatusCode::OK, state.metrics_handle.render())
}

async fn health_check(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    health::health(State(state.db_pool)).await
}

async fn health_ready(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    health::readiness(State(state.db_pool)).await
}

async fn webhook_handler(
    State(state): State<AppState>,
    Json(update): Json<IncomingUpdate>,
) -> StatusCode {
    if let Err(err) = dispatch_update(&state.db_pool, &state.facade, update).await {
        tracing::error!(error = %err, "failed to dispatch incoming update");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn run_polling_loop(gateway: Arc<HttpGateway>, facade: Arc<BotFacade<HttpGateway>>, db_pool: db::DbPool) {
    let mut offset: i64 = 0;
    loop {
        match gateway.poll_updates(offset).await {
            Ok(updates) => {
                for update in updates {
                    if let Err(err) = dispatch_update(&db_pool, &facade, update).await {
                        tracing::error!(error = %err, "failed to dispatch polled update");
                    }
                    offset += 1;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "polling request failed, backing off");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

async fn dispatch_update(
    db_pool: &db::DbPool,
    facade: &BotFacade<HttpGateway>,
    update: IncomingUpdate,
) -> anyhow::Result<()> {
    match update {
        IncomingUpdate::Message(message) => {
            let platform_chat_id = message.chat_id.to_string();
            let group = pongkeeper::repositories::group::create_or_get_group(
                db_pool,
                &platform_chat_id,
                None,
            )
            .await?;
            facade
                .handle_message(&platform_chat_id, group.id, message.into_chat_event())
                .await;
        }
        IncomingUpdate::MemberJoinedGroup { platform_chat_id, name } => {
            facade
                .handle_membership_event(MembershipEvent::GroupCreated { platform_chat_id, name })
                .await?;
        }
        IncomingUpdate::BotRemoved { platform_chat_id } => {
            facade
                .handle_membership_event(MembershipEvent::BotRemoved { platform_chat_id })
                .await?;
        }
        IncomingUpdate::MemberLeft { platform_chat_id, platform_user_id } => {
            facade
                .handle_membership_event(MembershipEvent::PlayerLeft { platform_chat_id, platform_user_id })
                .await?;
        }
        IncomingUpdate::ChatMigrated { old_platform_chat_id, new_platform_chat_id } => {
            facade
                .handle_membership_event(MembershipEvent::ChatMigrated {
                    old_platform_chat_id,
                    new_platform_chat_id,
                })
                .await?;
        }
    }
    Ok(())
}
