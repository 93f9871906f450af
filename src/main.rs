//! Status board server.

use status_board::catalog::{Catalog, ConfigManager};
use status_board::config::ServerConfig;
use status_board::db::SqliteStore;
use status_board::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("status_board=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting status board on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Load the catalog and follow changes to it
    let catalog = Arc::new(ConfigManager::new(&cfg.catalog_path, |bytes: &[u8]| {
        Ok(Catalog::from_yaml(bytes)?)
    })?);
    catalog.on_update(|catalog: Arc<Catalog>| {
        tracing::info!("Catalog now lists {} components", catalog.components.len());
    });
    let _watcher = catalog.watch(cfg.reload_debounce)?;
    tracing::info!(
        "Watching {} with {} components",
        cfg.catalog_path.display(),
        catalog.get().components.len()
    );

    // Initialize database
    let store = Arc::new(SqliteStore::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let server = Server::new(cfg, store, catalog);
    if !server.authenticates() {
        tracing::warn!("No ingest token or HMAC secret configured; every write will be rejected");
    }

    // Start web server
    server.start().await?;

    Ok(())
}
