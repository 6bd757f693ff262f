//! Session controller
//!
//! Ties a [`TerminalSurface`] to a [`SessionTransport`]: user input goes out
//! as data frames, remote output is written to the surface, size changes are
//! debounced and sent as resizes. All of it runs in one `select!` loop, so
//! handlers never overlap.

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use tb_core::config::BridgeConfig;
use tb_core::{
    ConfigError, Endpoint, SendError, SessionError, SessionId, SessionState, TransportState,
};
use tb_protocol::{ControlCode, Frame, TerminalSize};

use crate::resize::ResizeCoordinator;
use crate::surface::{SurfaceEvent, TerminalSurface};
use crate::transport::{SessionTransport, TransportEvent, TransportHandle};

/// Outcome of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session identifier
    pub id: SessionId,
    /// State the session ended in
    pub final_state: SessionState,
    /// Exit status reported by the remote process, if it exited
    pub exit_code: Option<i32>,
    /// Successful reconnections after the first connect
    pub reconnects: u32,
    /// Input frames dropped because the transport could not take them
    pub dropped_input: u64,
    /// Resize frames sent
    pub resizes_sent: u64,
}

/// Drives one terminal session from connect to close
pub struct SessionController<S> {
    id: SessionId,
    endpoint: Endpoint,
    config: BridgeConfig,
    surface: S,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    ever_connected: bool,
    closing: bool,
    failure: Option<SessionError>,
    summary: SessionSummary,
}

impl<S: TerminalSurface> SessionController<S> {
    /// Create a controller. The configuration must name an endpoint.
    pub fn new(config: BridgeConfig, surface: S) -> Result<Self, ConfigError> {
        config.validate()?;
        let endpoint = config.require_endpoint()?.clone();
        let id = SessionId::generate();
        let (state_tx, _) = watch::channel(SessionState::Idle);

        Ok(Self {
            id,
            endpoint,
            config,
            surface,
            state: SessionState::Idle,
            state_tx,
            ever_connected: false,
            closing: false,
            failure: None,
            summary: SessionSummary {
                id,
                final_state: SessionState::Idle,
                exit_code: None,
                reconnects: 0,
                dropped_input: 0,
                resizes_sent: 0,
            },
        })
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Follow the lifecycle state while the session runs.
    ///
    /// The last value seen is the state the session ended in, on success
    /// and on error.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Run the session until it closes.
    ///
    /// Ends when the remote process exits, the peer closes the session, the
    /// surface detaches, or reconnection gives up. The surface is disposed
    /// on every path.
    pub async fn run(
        mut self,
        surface_events: mpsc::Receiver<SurfaceEvent>,
    ) -> Result<SessionSummary, SessionError> {
        let result = self.drive(surface_events).await;
        self.surface.dispose();
        self.set_state(SessionState::Closed);

        match result {
            Ok(()) => match self.failure.take() {
                Some(error) => Err(error),
                None => {
                    self.summary.final_state = self.state;
                    tracing::info!(
                        session = %self.id,
                        exit_code = ?self.summary.exit_code,
                        reconnects = self.summary.reconnects,
                        "Session finished"
                    );
                    Ok(self.summary)
                }
            },
            Err(error) => Err(error),
        }
    }

    async fn drive(
        &mut self,
        mut surface_events: mpsc::Receiver<SurfaceEvent>,
    ) -> Result<(), SessionError> {
        self.set_state(SessionState::Connecting);
        let (transport, mut transport_events) =
            SessionTransport::connect(self.id, self.endpoint.clone(), &self.config);
        let mut resize = ResizeCoordinator::new(self.config.resize.debounce);
        let mut surface_open = true;

        loop {
            tokio::select! {
                event = transport_events.recv() => match event {
                    Some(event) => self.on_transport_event(event, &transport, &mut resize)?,
                    // The transport task has finished
                    None => return Ok(()),
                },

                event = surface_events.recv(), if surface_open => match event {
                    Some(SurfaceEvent::Input(data)) => self.forward_input(&transport, data),
                    Some(SurfaceEvent::Resize(size)) => resize.observe(size),
                    Some(SurfaceEvent::Detach) | None => {
                        tracing::info!(session = %self.id, "Surface detached");
                        surface_open = false;
                        self.begin_close(&transport);
                    }
                },

                // Reports wait while disconnected; the resync on connect covers them
                size = resize.next_resize(), if self.state == SessionState::Active => {
                    self.send_resize(&transport, &mut resize, size);
                }
            }
        }
    }

    fn on_transport_event(
        &mut self,
        event: TransportEvent,
        transport: &TransportHandle,
        resize: &mut ResizeCoordinator,
    ) -> Result<(), SessionError> {
        match event {
            TransportEvent::StateChanged(state) => {
                self.set_state(self.state.on_transport(state));
                match state {
                    TransportState::Connected => self.on_connected(transport, resize),
                    TransportState::Reconnecting if !self.closing => {
                        self.surface.status("connection lost, reconnecting");
                    }
                    _ => {}
                }
            }
            TransportEvent::Frame(frame) => self.on_frame(frame, transport)?,
            TransportEvent::ConnectFailed { attempt, error } => {
                tracing::warn!(session = %self.id, attempt, %error, "Connect attempt failed");
            }
            TransportEvent::Reconnecting { attempt, delay } => {
                tracing::debug!(session = %self.id, attempt, ?delay, "Retry scheduled");
            }
            TransportEvent::ConnectionLost { reason } => {
                tracing::debug!(session = %self.id, %reason, "Transport lost its connection");
            }
            TransportEvent::FramesDropped(count) => {
                tracing::warn!(session = %self.id, count, "Queued frames were dropped");
            }
            TransportEvent::Unrecoverable(error) => {
                self.surface.status(&error.to_string());
                self.failure = Some(error);
            }
        }
        Ok(())
    }

    /// Resend the current size once per established connection
    fn on_connected(&mut self, transport: &TransportHandle, resize: &mut ResizeCoordinator) {
        if self.ever_connected {
            self.summary.reconnects += 1;
            self.surface.status("reconnected");
        }
        self.ever_connected = true;

        let Some(size) = self.surface.size() else {
            tracing::debug!(session = %self.id, "Surface size unknown, not sending resize");
            return;
        };
        match transport.send(Frame::Resize(size)) {
            Ok(()) => {
                resize.mark_emitted(size);
                self.summary.resizes_sent += 1;
            }
            Err(e) => tracing::warn!(session = %self.id, error = %e, "Failed to send initial size"),
        }
    }

    fn on_frame(&mut self, frame: Frame, transport: &TransportHandle) -> Result<(), SessionError> {
        match frame {
            Frame::Data(data) => self.surface.write(&data)?,
            Frame::Resize(size) => {
                tracing::debug!(session = %self.id, %size, "Ignoring resize from peer");
            }
            Frame::Control { code, .. } if code == ControlCode::EXIT => {
                let status = frame.as_exit().flatten();
                let message = match status {
                    Some(code) => format!("process exited with status {}", code),
                    None => "process exited".to_string(),
                };
                self.surface.status(&message);
                self.summary.exit_code = status;
                self.begin_close(transport);
            }
            Frame::Control { code, .. } if code == ControlCode::CLOSE => {
                tracing::info!(session = %self.id, "Peer closed the session");
                self.begin_close(transport);
            }
            Frame::Control { code, payload } if code == ControlCode::ERROR => {
                let message = String::from_utf8_lossy(&payload);
                tracing::warn!(session = %self.id, %message, "Peer reported an error");
                self.surface.status(&format!("remote error: {}", message));
            }
            Frame::Control { code, .. } => {
                tracing::debug!(session = %self.id, %code, "Ignoring unknown control frame");
            }
        }
        Ok(())
    }

    fn send_resize(
        &mut self,
        transport: &TransportHandle,
        resize: &mut ResizeCoordinator,
        size: TerminalSize,
    ) {
        match transport.send(Frame::Resize(size)) {
            Ok(()) => {
                tracing::debug!(session = %self.id, %size, "Sent resize");
                resize.mark_emitted(size);
                self.summary.resizes_sent += 1;
            }
            Err(SendError::Closed) => {
                tracing::debug!(session = %self.id, %size, "Transport closed, resize dropped");
            }
            Err(e) => {
                tracing::debug!(session = %self.id, %size, error = %e, "Resize not sent, retrying");
                resize.retry(size);
            }
        }
    }

    fn forward_input(&mut self, transport: &TransportHandle, data: Bytes) {
        if self.state != SessionState::Active {
            tracing::debug!(session = %self.id, state = %self.state, len = data.len(), "Dropping input while not active");
            self.summary.dropped_input += 1;
            return;
        }

        for frame in Frame::data_chunks(data, transport.max_payload()) {
            match transport.send(frame) {
                Ok(()) => {}
                Err(SendError::QueueFull) => {
                    tracing::warn!(session = %self.id, "Outbound queue full, dropping input");
                    self.summary.dropped_input += 1;
                    // Later chunks would arrive without this one
                    break;
                }
                Err(e) => {
                    tracing::debug!(session = %self.id, error = %e, "Input not sent");
                    self.summary.dropped_input += 1;
                    break;
                }
            }
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if next != self.state {
            tracing::debug!(session = %self.id, from = %self.state, to = %next, "Session state changed");
            self.state = next;
        }
        self.state_tx.send_replace(next);
    }

    fn begin_close(&mut self, transport: &TransportHandle) {
        self.closing = true;
        transport.close();
    }
}
