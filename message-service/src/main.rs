use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use axum::routing::{get, patch, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use message_service::{consumer, handlers, state::ServiceContext, store::MessageStore};
use parley_auth::AuthManager;
use parley_broker::{Broker, ExchangeKind};
use parley_config::{Config, DEFAULT_MESSAGE_SERVICE_PORT};
use parley_db::Database;
use parley_types::routing;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env(DEFAULT_MESSAGE_SERVICE_PORT)?);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Message Service Starting ===");

    let db = Database::connect(&config.mongodb_uri, &config.mongodb_database)
        .await
        .context("failed to connect to MongoDB")?;
    db.ensure_indexes()
        .await
        .context("failed to ensure database indexes")?;
    info!("connected to MongoDB");

    let broker = Broker::connect(&config.rabbitmq_url)
        .await
        .context("failed to connect to RabbitMQ")?;
    declare_topology(&broker)
        .await
        .context("failed to declare broker topology")?;

    let auth = Arc::new(AuthManager::new(
        &config.jwt_secret,
        config.jwt_expiration_hours,
    ));
    let ctx = ServiceContext {
        config: config.clone(),
        auth,
        store: Arc::new(MessageStore::new(&db)),
        broker: broker.clone(),
    };

    consumer::start(&ctx)
        .await
        .context("failed to start broker consumer")?;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(parley_metrics::metrics_handler))
        .route("/messages", post(handlers::send_message))
        .route("/messages/search", get(handlers::search_messages))
        .route("/messages/:id", get(handlers::get_messages))
        .route("/messages/:id/status", patch(handlers::update_status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(ctx);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .context("failed to bind listener")?;
    info!("Message Service listening on {}", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    broker.close().await;
    Ok(())
}

async fn declare_topology(broker: &Broker) -> Result<()> {
    broker
        .declare_exchange(routing::MESSAGES_EXCHANGE, ExchangeKind::Topic)
        .await?;
    broker
        .declare_exchange(routing::DEAD_LETTER_EXCHANGE, ExchangeKind::Fanout)
        .await?;
    broker
        .declare_queue_with_dlx(routing::MESSAGE_QUEUE, routing::DEAD_LETTER_EXCHANGE)
        .await?;
    broker.declare_queue(routing::DEAD_LETTER_QUEUE).await?;
    broker
        .bind_queue(
            routing::MESSAGE_QUEUE,
            routing::MESSAGE_PATTERN,
            routing::MESSAGES_EXCHANGE,
        )
        .await?;
    broker
        .bind_queue(
            routing::DEAD_LETTER_QUEUE,
            routing::MATCH_ALL,
            routing::DEAD_LETTER_EXCHANGE,
        )
        .await?;
    Ok(())
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
