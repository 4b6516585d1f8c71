use axum::serve;
use cube_db_rust::api::routes::create_router;
use cube_db_rust::config::AppConfig;
use cube_db_rust::store::{MemoryPersister, Registry};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Default to Info, quiet the HTTP stack's debug chatter
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("hyper", LevelFilter::Warn)
        .init();

    println!("CUBE-DB: Decision Table Server");

    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );

    let persister = Arc::new(MemoryPersister::new());
    let registry = Arc::new(Registry::with_default_evaluator(persister));

    let app = create_router().with_state(registry);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    println!("Server listening on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
