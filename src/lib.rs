pub mod agent_engine;
pub mod config;
pub mod desktop;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod pool;
pub mod server;

use crate::config::{apply_env_overrides, AppConfig};
use crate::errors::DeskPilotResult;

pub async fn run() -> DeskPilotResult<()> {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load config; starting with defaults");
            let mut cfg = AppConfig::default();
            apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
            cfg
        }
    };

    tracing::info!(
        bind = %config.server.bind,
        template = %config.desktop.template_id,
        pool_enabled = config.pool.enabled,
        pool_size = config.pool.size,
        "starting deskpilot"
    );
    server::serve(config).await
}
