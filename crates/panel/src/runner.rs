//! Headless panel runner: wires operator input on stdin to the engine
//! connections and prints what comes back.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::services::PanelCommandService;
use crate::infrastructure::messaging::{BackoffState, ClientEvent, ReconnectPolicy};

pub struct RunnerDeps {
    pub service: Arc<PanelCommandService>,
    /// `Some` enables the command-connection reconnect supervisor.
    pub reconnect: Option<ReconnectPolicy>,
}

pub async fn run(deps: RunnerDeps) -> Result<()> {
    let RunnerDeps { service, reconnect } = deps;

    let cancel = CancellationToken::new();
    setup_shutdown_signal(cancel.clone());

    let mut tasks = Vec::new();
    if let Some(console) = service.console() {
        tasks.push(spawn_printer("console", console.subscribe(), cancel.clone()));
    }
    tasks.push(spawn_printer(
        "command",
        service.command().subscribe(),
        cancel.clone(),
    ));
    if let Some(policy) = reconnect {
        tasks.push(spawn_reconnect_supervisor(
            Arc::clone(&service),
            policy,
            cancel.clone(),
        ));
    }

    let reply = service.connect_all().await;
    tracing::info!("{}", reply);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => match service.handle(&line).await {
                Ok(reply) => tracing::info!("{}", reply),
                Err(e) => tracing::warn!("{:#}", e),
            },
            Ok(None) => {
                tracing::info!("Input closed, shutting down");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read input");
                break;
            }
        }
    }

    cancel.cancel();
    service.shutdown().await;
    for task in tasks {
        task.abort();
    }
    tracing::info!("Panel stopped");
    Ok(())
}

fn setup_shutdown_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, shutting down..."),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                return;
            }
        }
        cancel.cancel();
    });
}

/// Print inbound traffic of one connection to stdout.
fn spawn_printer(
    label: &'static str,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };
            match event {
                ClientEvent::MessageReceived(text) => {
                    // Console chunks are not line-aligned; command frames are.
                    let out = if label == "console" {
                        text
                    } else {
                        format!("{text}\n")
                    };
                    if stdout.write_all(out.as_bytes()).await.is_err() {
                        break;
                    }
                    let _ = stdout.flush().await;
                }
                ClientEvent::Connected => tracing::info!(client = label, "connected"),
                ClientEvent::Disconnected => tracing::info!(client = label, "disconnected"),
                ClientEvent::Error(e) => tracing::warn!(client = label, error = %e, "error"),
            }
        }
    })
}

/// Reconnect the command connection after disconnects the operator did not
/// ask for, spacing attempts with [`BackoffState`].
pub fn spawn_reconnect_supervisor(
    service: Arc<PanelCommandService>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut events = service.command().subscribe();
    tokio::spawn(async move {
        let mut backoff = BackoffState::new(policy);
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                None => break,
                Some(ClientEvent::Connected) => backoff.reset(),
                Some(ClientEvent::Disconnected) if !service.is_held_down() => {
                    if !reconnect(&service, &mut backoff, &cancel).await {
                        break;
                    }
                }
                Some(_) => {}
            }
        }
        tracing::debug!("Reconnect supervisor stopped");
    })
}

/// Returns false when the supervisor should stop.
async fn reconnect(
    service: &PanelCommandService,
    backoff: &mut BackoffState,
    cancel: &CancellationToken,
) -> bool {
    loop {
        let Some(delay) = backoff.next_delay() else {
            tracing::warn!(
                attempts = backoff.attempts(),
                "Giving up on reconnecting the command connection"
            );
            return true;
        };
        tracing::info!(
            attempt = backoff.attempts(),
            max = backoff.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting command connection"
        );
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }
        if service.is_held_down() {
            return true;
        }
        if service.command().connect().await {
            backoff.reset();
            return true;
        }
    }
}
