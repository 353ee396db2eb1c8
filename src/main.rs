//! Oracle Chat server
//!
//! Entry point for the conversational service.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::info;

use oracle_chat::config::AppConfig;
use oracle_chat::server::start_server;
use oracle_chat::service::OracleService;
use oracle_chat::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present) before anything reads the environment
    let _ = dotenv();

    telemetry::init();

    let config = Arc::new(AppConfig::load().context("failed to load configuration")?);

    info!(
        name: "backend.config.loaded",
        interface = %config.backend.interface,
        model = %config.backend.model,
        endpoint = ?config.backend.endpoint,
        test_mode = config.backend.test_mode,
        "Backend configuration loaded"
    );

    let service = Arc::new(
        OracleService::from_config(&config)
            .await
            .context("failed to build conversation service")?,
    );

    start_server(config, service).await
}
