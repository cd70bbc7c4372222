use std::sync::Arc;

use anyhow::{Context, Result};
use studyquest::{
    cli::config_path_from_args,
    config::Config,
    logging::init_tracing,
    progression::{InMemoryStore, ProgressionEngine, ProgressionPersistence},
    server,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path_from_args()?;
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let tracing_guard = init_tracing(&config.logging).context("failed to initialize logging")?;
    tracing::info!(
        target: "server",
        run_id = tracing_guard.run_id(),
        config = %config_path.display(),
        "studyquest_starting"
    );

    let store = match &config.store.state_path {
        Some(state_path) => {
            let store = InMemoryStore::open(ProgressionPersistence::new(state_path.clone()))
                .with_context(|| format!("failed to open state {}", state_path.display()))?;
            tracing::info!(
                target: "progression",
                state_path = %state_path.display(),
                "progression_state_opened"
            );
            store
        }
        None => {
            tracing::warn!(target: "progression", "progression_state_memory_only");
            InMemoryStore::new()
        }
    };

    let engine = Arc::new(
        ProgressionEngine::new(Arc::new(store))
            .with_display_names(config.users.display_names.clone())
            .with_tiers(config.wealth_tier_table()),
    );

    let result = server::run(&config.server, engine).await;
    if let Err(err) = &result {
        tracing::error!(target: "server", error = %format!("{err:#}"), "server_failed");
    }
    drop(tracing_guard);
    result
}
