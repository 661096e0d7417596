use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use gateway::{connections::ConnectionTable, consumer, proxy, state::GatewayContext, ws};
use parley_auth::AuthManager;
use parley_broker::Broker;
use parley_config::{Config, DEFAULT_GATEWAY_PORT};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env(DEFAULT_GATEWAY_PORT)?);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Edge Gateway Starting ===");

    let broker = Broker::connect(&config.rabbitmq_url)
        .await
        .context("failed to connect to RabbitMQ")?;

    let auth = Arc::new(AuthManager::new(
        &config.jwt_secret,
        config.jwt_expiration_hours,
    ));
    let connections = Arc::new(ConnectionTable::new());
    let ctx = GatewayContext::new(config.clone(), auth, broker.clone(), connections.clone());

    consumer::start(&ctx)
        .await
        .context("failed to start broker consumer")?;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(parley_metrics::metrics_handler))
        .route("/ws", get(ws::ws_handler))
        .fallback(proxy::route_request)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(ctx);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .context("failed to bind listener")?;
    info!("Edge Gateway listening on {}", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Each session task publishes its own offline presence on teardown;
    // give them a moment to flush before the broker goes away.
    connections.close_all().await;
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    broker.close().await;
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
