//! Resize coalescing
//!
//! Window managers report sizes in bursts while the user drags a border.
//! [`ResizeCoordinator`] turns a burst into one resize: the last reported
//! size, once no new report has arrived for the debounce window.

use std::time::Duration;

use tokio::time::Instant;

use tb_protocol::TerminalSize;

/// Trailing-edge debouncer for terminal size reports
#[derive(Debug)]
pub struct ResizeCoordinator {
    debounce: Duration,
    /// Latest unsent report
    pending: Option<TerminalSize>,
    /// When `pending` becomes due
    deadline: Option<Instant>,
    /// Size the remote last accepted
    last_emitted: Option<TerminalSize>,
}

impl ResizeCoordinator {
    /// Create a coordinator with the given quiet period
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: None,
            deadline: None,
            last_emitted: None,
        }
    }

    /// Record a size report. Restarts the quiet period.
    pub fn observe(&mut self, size: TerminalSize) {
        self.pending = Some(size);
        self.deadline = Some(Instant::now() + self.debounce);
    }

    /// Record a size the remote now knows about.
    ///
    /// Called after every successful send, debounced or not. A settled size
    /// equal to it is not handed out again.
    pub fn mark_emitted(&mut self, size: TerminalSize) {
        self.last_emitted = Some(size);
    }

    /// Hand a size back after its send failed.
    ///
    /// It becomes due again after another quiet period, unless a newer
    /// report has arrived in the meantime.
    pub fn retry(&mut self, size: TerminalSize) {
        if self.pending.is_none() {
            self.pending = Some(size);
            self.deadline = Some(Instant::now() + self.debounce);
        }
    }

    /// Wait for the next size to send.
    ///
    /// Never completes while no report is pending, and skips a settled size
    /// equal to the last one emitted. The caller reports the outcome with
    /// [`mark_emitted`](Self::mark_emitted) or [`retry`](Self::retry).
    /// Cancel-safe.
    pub async fn next_resize(&mut self) -> TerminalSize {
        loop {
            let (Some(size), Some(deadline)) = (self.pending, self.deadline) else {
                return std::future::pending().await;
            };
            tokio::time::sleep_until(deadline).await;

            self.pending = None;
            self.deadline = None;
            if self.last_emitted == Some(size) {
                tracing::trace!(%size, "Size unchanged, skipping resize");
                continue;
            }
            return size;
        }
    }
}
