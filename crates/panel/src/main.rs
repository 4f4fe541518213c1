//! EngineLink Panel - headless composition root.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use enginelink_panel::application::services::PanelCommandService;
use enginelink_panel::infrastructure::console::ConsoleClient;
use enginelink_panel::infrastructure::websocket::CommandClient;
use enginelink_panel::infrastructure::PanelConfig;
use enginelink_panel::ports::outbound::{CommandPort, ConsolePort};
use enginelink_panel::runner::{self, RunnerDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries engine output; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "enginelink_panel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting EngineLink Panel");

    let config = PanelConfig::from_env()?;
    match &config.console {
        Some(console) => tracing::info!("  Console: {}", console.target()),
        None => tracing::info!("  Console: not configured"),
    }
    tracing::info!("  Command: {}", config.command.url());

    let console = config
        .console
        .clone()
        .map(|c| Arc::new(ConsoleClient::new(c)) as Arc<dyn ConsolePort>);
    let command: Arc<dyn CommandPort> = Arc::new(CommandClient::new(config.command.clone()));

    let service = Arc::new(PanelCommandService::new(console, command));

    runner::run(RunnerDeps {
        service,
        reconnect: config.reconnect.then_some(config.reconnect_policy),
    })
    .await
}
