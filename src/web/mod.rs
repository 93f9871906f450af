//! Web server module.

mod handlers;

pub use handlers::*;

use crate::auth::Authenticator;
use crate::catalog::{Catalog, ConfigManager};
use crate::config::ServerConfig;
use crate::db::SqliteStore;
use crate::outage::OutageController;
use crate::status::StatusReader;

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub auth: Arc<Authenticator>,
    pub catalog: Arc<ConfigManager<Catalog>>,
    pub controller: Arc<OutageController<SqliteStore>>,
    pub status: Arc<StatusReader<SqliteStore>>,
}

/// Web server for the status board.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Arc<SqliteStore>, catalog: Arc<ConfigManager<Catalog>>) -> Self {
        let auth = Arc::new(Authenticator::new(&config));
        let controller = Arc::new(OutageController::new(store.clone(), catalog.clone()));
        let status = Arc::new(StatusReader::new(store, catalog.clone(), config.absent_threshold));
        Self {
            state: AppState {
                config,
                auth,
                catalog,
                controller,
                status,
            },
        }
    }

    /// True when some credential form is configured.
    pub fn authenticates(&self) -> bool {
        self.state.auth.is_enabled()
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
        let authenticated = || from_fn_with_state(self.state.clone(), handlers::require_auth);

        Router::new()
            // Probe ingestion
            .route("/api/reports", post(handlers::handle_report).route_layer(authenticated()))
            // Derived status
            .route("/api/status", get(handlers::handle_get_status))
            .route("/api/status/{component}", get(handlers::handle_get_component_status))
            .route(
                "/api/status/{component}/{sub_component}",
                get(handlers::handle_get_sub_component_status),
            )
            // Catalog
            .route("/api/components", get(handlers::handle_get_components))
            // Outages
            .route(
                "/api/components/{component}/{sub_component}/outages",
                get(handlers::handle_list_outages)
                    .merge(post(handlers::handle_create_outage).route_layer(authenticated())),
            )
            .route(
                "/api/components/{component}/{sub_component}/outages/{id}",
                get(handlers::handle_get_outage).merge(
                    axum::routing::patch(handlers::handle_update_outage)
                        .delete(handlers::handle_delete_outage)
                        .route_layer(authenticated()),
                ),
            )
            .route(
                "/api/components/{component}/{sub_component}/outages/{id}/confirm",
                post(handlers::handle_confirm_outage).route_layer(authenticated()),
            )
            .route(
                "/api/components/{component}/{sub_component}/outages/{id}/resolve",
                post(handlers::handle_resolve_outage).route_layer(authenticated()),
            )
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
