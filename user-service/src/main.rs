use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use parley_auth::AuthManager;
use parley_config::{Config, DEFAULT_USER_SERVICE_PORT};
use parley_db::Database;
use user_service::{handlers, state::ServiceContext, store::UserStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env(DEFAULT_USER_SERVICE_PORT)?);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== User Service Starting ===");

    let db = Database::connect(&config.mongodb_uri, &config.mongodb_database)
        .await
        .context("failed to connect to MongoDB")?;
    db.ensure_indexes()
        .await
        .context("failed to ensure database indexes")?;
    info!("connected to MongoDB");

    let auth = Arc::new(AuthManager::new(
        &config.jwt_secret,
        config.jwt_expiration_hours,
    ));
    let ctx = ServiceContext {
        config: config.clone(),
        auth,
        store: Arc::new(UserStore::new(&db)),
    };

    let app = Router::new()
        // Public
        .route("/health", get(health_check))
        .route("/metrics", get(parley_metrics::metrics_handler))
        .route("/users/register", post(handlers::register))
        .route("/users/login", post(handlers::login))
        // Protected (the extractor rejects missing/invalid tokens)
        .route("/users/search", get(handlers::search_users))
        .route(
            "/users/contacts",
            get(handlers::get_contacts).post(handlers::add_contact),
        )
        .route("/users/contacts/:id", delete(handlers::delete_contact))
        .route("/users/:id", get(handlers::get_user).put(handlers::update_profile))
        .route("/users/:id/status", patch(handlers::update_status))
        .route("/groups", post(handlers::create_group).get(handlers::list_groups))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(ctx);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .context("failed to bind listener")?;
    info!("User Service listening on {}", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

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
