//! Campaign analytics backend.
//!
//! Ingests behavioral events and registrations from promotional game
//! banners, stores them in SQLite, and serves daily-bucketed funnel stats
//! and a registration lookup to the admin dashboard.

mod api;
mod error;
mod ingest;
mod middleware;
mod models;
mod query;
mod stats;
mod store;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    response::Redirect,
    routing::{get, post},
    Router,
};
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{models::Config, store::EventStore};

/// Maximum accepted JSON request body, matching the dashboard clients.
const MAX_BODY_BYTES: usize = 512 * 1024;

/// Application state shared across all requests.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EventStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = Config::from_env();

    let db_path = resolve_data_path(
        Some(config.db_path.clone()).filter(|p| !p.trim().is_empty()),
        "data.sqlite",
    );
    let store = Arc::new(EventStore::new(&db_path)?);

    let app_state = AppState { store };

    let mut app = Router::new()
        .route("/healthz", get(api::healthz))
        .route("/api/sessions/start", post(api::start_session))
        .route("/api/events", post(api::post_events))
        .route(
            "/api/registrations",
            post(api::post_registration).get(api::get_registrations),
        )
        .route("/api/stats", get(api::get_stats))
        .route("/api/meta", get(api::get_meta))
        .with_state(app_state)
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(build_cors(&config.allowed_origins));

    // Serve the dashboard assets when a static directory is configured.
    if let Some(dir) = &config.static_dir {
        info!("Serving dashboard assets from {}", dir.display());
        app = app
            .route("/", get(|| async { Redirect::temporary("/admin.html") }))
            .fallback_service(ServeDir::new(dir));
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// CORS policy from the ALLOWED_ORIGINS config. A "*" entry allows any
/// origin (server-to-server calls carry no Origin header and always pass).
fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_analytics_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn default_data_path(filename: &str) -> String {
    // Anchor defaults to the crate directory so running from elsewhere
    // doesn't create a new empty DB in a different working directory.
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    base.join(filename).to_string_lossy().to_string()
}

fn resolve_data_path(env_value: Option<String>, default_filename: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) else {
        return default_data_path(default_filename);
    };

    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }

    // Treat relative paths as relative to the crate dir, not the caller's cwd.
    base.join(p).to_string_lossy().to_string()
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate dir explicitly
    // for when the binary runs with --manifest-path from elsewhere.
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
