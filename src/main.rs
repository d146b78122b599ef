use std::sync::Arc;

use anyhow::Context;
use pdv_locator::{init_tracing, serve, AppConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = AppConfig::from_env();
    let bind_addr = config.bind_addr.clone();
    let state = AppState::initialize(config).context("failed to initialize pdv locator")?;
    serve(&bind_addr, Arc::new(state))
        .await
        .with_context(|| format!("server on {bind_addr} stopped"))?;
    Ok(())
}
