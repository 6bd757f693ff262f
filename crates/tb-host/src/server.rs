//! Frame protocol server for the hosted process
//!
//! Every connected client shares the one PTY: output is broadcast to all of
//! them, input from any of them reaches the process, and the most recent
//! resize wins. A client that detaches leaves the process running.
//!
//! The host's own terminal can take part too (see [`LocalTerminal`]): it
//! sees the output, types into the process, and its size drives the PTY.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;

use tb_core::config::HostConfig;
use tb_core::{Endpoint, Scheme};
use tb_protocol::{ControlCode, Frame, MIN_FRAME_SIZE_LIMIT};
use tb_session::{Link, SurfaceEvent, TerminalSurface};

use crate::pty::{PtyEvent, PtyInput, PtyProcess};

/// Output frames buffered per client before it is considered lagging
const OUTPUT_BROADCAST_CAPACITY: usize = 1024;

/// How long clients get to flush the final frames after the process exits
const CLIENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The terminal the host was started from, attached to the process
pub struct LocalTerminal {
    surface: Box<dyn TerminalSurface>,
    events: mpsc::Receiver<SurfaceEvent>,
}

impl LocalTerminal {
    /// Attach `surface`; its input and resizes arrive on `events`
    pub fn new(surface: impl TerminalSurface + 'static, events: mpsc::Receiver<SurfaceEvent>) -> Self {
        Self {
            surface: Box::new(surface),
            events,
        }
    }

    async fn next_event(local: &mut Option<LocalTerminal>) -> Option<SurfaceEvent> {
        match local {
            Some(local) => local.events.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Give the terminal back, leaving a last status line
    fn release(local: &mut Option<LocalTerminal>, message: &str) {
        if let Some(mut local) = local.take() {
            local.surface.status(message);
            local.surface.dispose();
        }
    }
}

/// A bound, not yet running host
pub struct Host {
    config: HostConfig,
    endpoint: Endpoint,
    listener: TcpListener,
}

impl Host {
    /// Validate the configuration and bind the listen address
    pub async fn bind(config: HostConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.require_listen()?.clone();
        let listener = TcpListener::bind(endpoint.authority())
            .await
            .with_context(|| format!("Failed to bind {}", endpoint))?;

        tracing::info!(%endpoint, addr = ?listener.local_addr().ok(), "Host listening");
        Ok(Self {
            config,
            endpoint,
            listener,
        })
    }

    /// Address actually bound, useful when listening on port 0
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Endpoint clients should connect to
    pub fn endpoint(&self) -> Result<Endpoint> {
        let addr = self.local_addr()?;
        let url = match self.endpoint.scheme() {
            Scheme::Tcp => format!("tcp://{}", addr),
            Scheme::WebSocket => format!("ws://{}{}", addr, self.endpoint.path()),
        };
        Ok(Endpoint::parse(&url)?)
    }

    /// Spawn the process and serve clients until it exits or `shutdown` fires.
    ///
    /// Returns the process's exit status.
    pub async fn run(self, shutdown: CancellationToken) -> Result<Option<i32>> {
        self.serve(shutdown, None).await
    }

    /// Like [`run`](Self::run), with the process also shown on `local`.
    ///
    /// The PTY starts at the local terminal's size and follows its resizes.
    /// A detach gives the terminal back while remote clients keep going.
    pub async fn run_attached(
        mut self,
        shutdown: CancellationToken,
        local: LocalTerminal,
    ) -> Result<Option<i32>> {
        if let Some(size) = local.surface.size() {
            self.config.initial_size = size;
        }
        self.serve(shutdown, Some(local)).await
    }

    async fn serve(
        self,
        shutdown: CancellationToken,
        mut local: Option<LocalTerminal>,
    ) -> Result<Option<i32>> {
        let (mut process, mut pty_events) = match PtyProcess::spawn(&self.config) {
            Ok(spawned) => spawned,
            Err(e) => {
                LocalTerminal::release(&mut local, "failed to start process");
                return Err(e);
            }
        };
        let local_input = process.input();
        tracing::info!(
            program = process.program(),
            pid = ?process.pid(),
            endpoint = %self.endpoint,
            "Serving process"
        );
        let (output_tx, _) = broadcast::channel::<Frame>(OUTPUT_BROADCAST_CAPACITY);
        let client_cancel = CancellationToken::new();
        let mut clients = JoinSet::new();
        let mut stopping = false;
        let max_payload = self.config.max_frame_size;

        let exit_code = loop {
            tokio::select! {
                _ = shutdown.cancelled(), if !stopping => {
                    tracing::info!("Shutdown requested");
                    stopping = true;
                    process.kill();
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    tracing::info!(%peer, "Client connected");
                    let client = Client {
                        peer,
                        input: process.input(),
                        output: output_tx.subscribe(),
                        local_max: max_payload,
                        // Raised once the client's HELLO arrives
                        max_payload: MIN_FRAME_SIZE_LIMIT.min(max_payload),
                        cancel: client_cancel.child_token(),
                    };
                    let endpoint = self.endpoint.clone();
                    clients.spawn(async move {
                        if let Err(e) = client.serve(stream, &endpoint).await {
                            tracing::warn!(%peer, error = %e, "Client connection failed");
                        }
                        tracing::info!(%peer, "Client disconnected");
                    });
                }

                event = LocalTerminal::next_event(&mut local) => match event {
                    Some(SurfaceEvent::Input(data)) => {
                        if let Err(e) = local_input.write(data).await {
                            tracing::warn!(error = %e, "Failed to forward local input");
                        }
                    }
                    Some(SurfaceEvent::Resize(size)) => {
                        tracing::debug!(%size, "Local terminal resized");
                        if let Err(e) = local_input.resize(size).await {
                            tracing::warn!(error = %e, "Failed to resize PTY");
                        }
                    }
                    Some(SurfaceEvent::Detach) | None => {
                        tracing::info!("Local terminal detached");
                        LocalTerminal::release(&mut local, "detached, process keeps running");
                    }
                },

                event = pty_events.recv() => match event {
                    Some(PtyEvent::Output(data)) => {
                        if let Some(terminal) = local.as_mut() {
                            if let Err(e) = terminal.surface.write(&data) {
                                tracing::warn!(error = %e, "Local terminal write failed, detaching");
                                LocalTerminal::release(&mut local, "local output failed");
                            }
                        }
                        for frame in Frame::data_chunks(data, max_payload) {
                            // No subscribers just means nobody is watching
                            let _ = output_tx.send(frame);
                        }
                    }
                    Some(PtyEvent::Exited(code)) => {
                        let _ = output_tx.send(Frame::exit(code));
                        break code;
                    }
                    None => break None,
                },

                Some(joined) = clients.join_next() => {
                    if let Err(e) = joined {
                        tracing::warn!(error = %e, "Client task failed");
                    }
                }
            }
        };

        tracing::info!(exit_code = ?exit_code, "Process finished, closing clients");
        let message = match exit_code {
            Some(code) => format!("process exited with status {}", code),
            None => "process ended".to_string(),
        };
        LocalTerminal::release(&mut local, &message);
        drop(output_tx);
        let drained = tokio::time::timeout(CLIENT_DRAIN_TIMEOUT, async {
            while clients.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::debug!("Clients did not finish in time, cancelling");
            client_cancel.cancel();
            clients.shutdown().await;
        }

        Ok(exit_code)
    }
}

/// One connected client
struct Client {
    peer: SocketAddr,
    input: PtyInput,
    output: broadcast::Receiver<Frame>,
    /// Our own frame size limit
    local_max: usize,
    /// Largest payload this client accepts
    max_payload: usize,
    cancel: CancellationToken,
}

impl Client {
    async fn serve(mut self, stream: TcpStream, endpoint: &Endpoint) -> Result<()> {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let mut link = match endpoint.scheme() {
            Scheme::Tcp => Link::tcp(stream, self.local_max),
            Scheme::WebSocket => {
                let ws = accept_websocket(stream, endpoint.path()).await?;
                Link::websocket(ws, self.local_max)
            }
        };

        link.send(Frame::hello(self.local_max)).await?;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    link.close().await;
                    return Ok(());
                }

                output = self.output.recv() => match output {
                    Ok(frame) => {
                        let last = frame.as_exit().is_some();
                        self.forward(&mut link, frame).await?;
                        if last {
                            link.close().await;
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(peer = %self.peer, skipped, "Client fell behind, output skipped");
                        link.send(Frame::error(&format!("{} output frames skipped", skipped)))
                            .await?;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        link.close().await;
                        return Ok(());
                    }
                },

                inbound = link.next_frame() => match inbound {
                    None => return Ok(()),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(frame)) => {
                        if !self.on_frame(&mut link, frame).await? {
                            link.close().await;
                            return Ok(());
                        }
                    }
                },
            }
        }
    }

    /// Send an output frame, re-chunking data for clients with a smaller limit
    async fn forward(&self, link: &mut Link, frame: Frame) -> Result<()> {
        match frame {
            Frame::Data(data) if data.len() > self.max_payload => {
                for chunk in Frame::data_chunks(data, self.max_payload) {
                    link.send(chunk).await?;
                }
            }
            frame => link.send(frame).await?,
        }
        Ok(())
    }

    /// Handle one client frame. Returns `false` when the client is done.
    async fn on_frame(&mut self, link: &mut Link, frame: Frame) -> Result<bool> {
        match frame {
            Frame::Data(data) => self.input.write(data).await?,
            Frame::Resize(size) => {
                tracing::debug!(peer = %self.peer, %size, "Client resized terminal");
                self.input.resize(size).await?;
            }
            Frame::Control { code, payload } if code == ControlCode::PING => {
                link.send(Frame::pong(payload)).await?;
            }
            Frame::Control { code, .. } if code == ControlCode::CLOSE => {
                tracing::info!(peer = %self.peer, "Client detached");
                return Ok(false);
            }
            frame @ Frame::Control { .. } => match frame.as_hello() {
                Some(hello) => {
                    let peer_max = usize::try_from(hello.max_frame_size).unwrap_or(usize::MAX);
                    self.max_payload = self.local_max.min(peer_max);
                    tracing::debug!(
                        peer = %self.peer,
                        version = hello.version,
                        max_payload = self.max_payload,
                        "Client hello"
                    );
                }
                None => tracing::trace!(peer = %self.peer, ?frame, "Ignoring control frame"),
            },
        }
        Ok(true)
    }
}

/// Complete the WebSocket upgrade, rejecting requests for other paths
async fn accept_websocket(
    stream: TcpStream,
    path: &str,
) -> Result<tokio_tungstenite::WebSocketStream<TcpStream>> {
    let expected = path.to_string();
    let callback = move |request: &Request, response: Response| {
        if request.uri().path() == expected {
            Ok(response)
        } else {
            tracing::debug!(path = %request.uri().path(), "Rejecting upgrade for unknown path");
            let mut rejection = ErrorResponse::new(Some("not found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .with_context(|| "WebSocket handshake failed")
}
