//! Serve command: host a process for sessions to attach to

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tb_core::config::HostConfig;
use tb_host::{Host, LocalTerminal};

use crate::output::{print_info, print_success, print_warning};
use crate::surface::{spawn_event_reader, CrosstermSurface};

/// Capacity of the local keyboard and resize event channel
const LOCAL_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Run the host until the process exits or Ctrl+C is pressed.
///
/// With `attach`, the process also runs on this terminal: keys go to it,
/// its output is shown here and the PTY follows this terminal's size.
/// `Ctrl+]` gives the terminal back without stopping the process.
///
/// Returns the process's exit status.
pub async fn serve_command(config: HostConfig, attach: bool) -> Result<Option<i32>> {
    let host = Host::bind(config).await?;
    print_success(&format!("Serving on {}", host.endpoint()?));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, stopping");
            signal_token.cancel();
        }
    });

    let exit_code = if attach {
        print_info("Attaching this terminal (Ctrl+] to detach)");
        let surface = CrosstermSurface::new().with_context(|| "Failed to enter raw mode")?;
        let (event_tx, event_rx) = mpsc::channel(LOCAL_EVENT_CHANNEL_CAPACITY);
        let reader = spawn_event_reader(event_tx);

        let result = host
            .run_attached(shutdown, LocalTerminal::new(surface, event_rx))
            .await;
        // The host released the terminal and its receiver by now
        if let Err(e) = reader.await {
            tracing::debug!(error = %e, "Terminal event reader failed");
        }
        result?
    } else {
        host.run(shutdown).await?
    };

    match exit_code {
        Some(0) => print_success("Process exited"),
        Some(code) => print_warning(&format!("Process exited with status {}", code)),
        None => print_info("Process ended"),
    }
    Ok(exit_code)
}
