use tracing::{error, info, Level};
use tracing_subscriber::prelude::*;

use fundarb_core::application::bootstrap::Engine;
use fundarb_core::config::Config;
use fundarb_core::infrastructure::logging::RollingFileWriter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let file_writer = RollingFileWriter::new("logs", "fundarb")?;
    let file_layer = tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false).with_target(false);
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("loading configuration");
    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "failed to load configuration");
        anyhow::Error::new(e)
    })?;

    info!("building funding arbitrage engine");
    let engine = Engine::build(config).await?;

    info!("engine running");
    engine.run().await
}
