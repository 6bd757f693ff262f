//! Connect command: attach the local terminal to a remote process

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use tb_core::config::BridgeConfig;
use tb_session::{SessionController, SessionSummary};

use crate::output::{format_summary, print_info};
use crate::surface::{spawn_event_reader, CrosstermSurface};

/// Capacity of the keyboard and resize event channel
const SURFACE_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Run an interactive session until it ends.
///
/// Returns when the user detaches (Ctrl+]), the remote process exits, or
/// reconnection gives up.
pub async fn connect_command(config: BridgeConfig) -> Result<SessionSummary> {
    // Fail on bad settings before touching the terminal
    config.validate()?;
    let endpoint = config.require_endpoint()?.clone();

    print_info(&format!("Connecting to {} (Ctrl+] to detach)", endpoint));

    let surface = CrosstermSurface::new().with_context(|| "Failed to enter raw mode")?;
    let controller = SessionController::new(config, surface)?;
    tracing::debug!(session = %controller.id(), %endpoint, "Starting session");

    let (event_tx, event_rx) = mpsc::channel(SURFACE_EVENT_CHANNEL_CAPACITY);
    let reader = spawn_event_reader(event_tx);

    let result = controller.run(event_rx).await;

    // Dropping the receiver inside `run` stops the reader at its next poll
    if let Err(e) = reader.await {
        tracing::debug!(error = %e, "Terminal event reader failed");
    }

    let summary = result?;
    print_info(&format_summary(&summary));
    Ok(summary)
}
