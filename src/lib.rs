pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

pub use error::{CubeError, Result};

use std::sync::Arc;

/// Build the registry and serve the HTTP surface; used by the binary and by
/// integration tests.
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    env_logger::init();

    let config = crate::config::AppConfig::load()?;

    let persister = Arc::new(crate::store::MemoryPersister::new());
    let registry = Arc::new(crate::store::Registry::with_default_evaluator(persister));

    let app = crate::api::routes::create_router().with_state(registry);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}
