use hookdeploy::db::{SqlJobStore, init_db};
use hookdeploy::error::HookError;
use hookdeploy::logging::setup_logging;
use hookdeploy::{AppState, api, load_config};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "hookdeploy.toml";

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), HookError> {
    dotenv::dotenv().ok();

    let config_path =
        std::env::var("HOOKDEPLOY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = load_config(&config_path)?;
    if let Ok(bind_address) = std::env::var("BIND_ADDRESS") {
        config.server.bind_address = bind_address;
    }

    // Held until shutdown so buffered file logs are flushed
    let _log_guard = setup_logging(&config.logging)?;

    let bind_address = config.server.bind_address.clone();
    let project_count = config.project.len();
    let archive = match &config.storage.database {
        Some(path) => Some(SqlJobStore::new(init_db(path).await?)),
        None => None,
    };
    let state = Arc::new(AppState::with_archive(config, archive));
    let restored = state.restore_history().await?;
    if restored > 0 {
        info!("Restored {} job(s) from the archive", restored);
    }
    let app = api::router(state);

    info!("Using config at {:?}", config_path);
    info!("Loaded {} project(s)", project_count);
    info!("Listening on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(bind_address.as_str()).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
