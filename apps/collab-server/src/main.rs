//! Collaborative project server
//! REST API over the collaboration core plus a WebSocket change feed

mod api;
mod config;
mod ws;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use collaboration::{CollaborationService, ProjectDb};
use config::ServerConfig;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "collab_server=debug,collaboration=debug,project=info";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CollaborationService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        // Project endpoints
        .route("/projects", get(api::list_projects).post(api::create_project))
        .route("/projects/search", get(api::search_projects))
        .route(
            "/projects/:id",
            get(api::get_project)
                .put(api::update_project)
                .delete(api::delete_project),
        )
        // Track endpoints
        .route(
            "/projects/:id/tracks",
            get(api::list_tracks).post(api::create_track),
        )
        .route(
            "/projects/:id/tracks/:track_id",
            get(api::get_track)
                .put(api::update_track)
                .delete(api::delete_track),
        )
        // Collaborator endpoints
        .route(
            "/projects/:id/collaborators",
            get(api::list_collaborators).post(api::add_collaborator),
        )
        .route(
            "/projects/:id/collaborators/:user_id",
            get(api::get_collaborator).delete(api::remove_collaborator),
        )
        // Version endpoints
        .route(
            "/projects/:id/versions",
            get(api::list_versions).post(api::save_version),
        )
        .route(
            "/projects/:id/revert/:version_id",
            post(api::revert_to_version),
        )
        // Change feed
        .route("/ws", get(ws::ws_handler))
        // CORS for local development
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!("Starting collaboration server...");

    let db = ProjectDb::open_with_pool_size(&config.database_path, config.database_pool_size)
        .with_context(|| {
            format!(
                "failed to open project database at {}",
                config.database_path.display()
            )
        })?;
    let service = Arc::new(CollaborationService::new(
        Arc::new(db),
        config.collaboration.clone(),
    ));

    let app = router(AppState { service });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Collaboration server listening on http://{}", config.bind_addr);
    info!("  /projects[/:id[/tracks|/collaborators|/versions|/revert/:version_id]]");
    info!("  /ws?project_id=|track_id=   - change feed");

    axum::serve(listener, app).await?;

    Ok(())
}
