//! Session transport
//!
//! A [`SessionTransport`] task exclusively owns the connection to the remote
//! endpoint. Callers talk to it through a [`TransportHandle`] (outbound
//! frames, close) and an event channel (inbound frames, state changes,
//! failures). When the connection drops the task reconnects with
//! exponential backoff until it succeeds or runs out of attempts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tb_core::config::BridgeConfig;
use tb_core::{ConnectError, Endpoint, SendError, SessionError, SessionId, TransportState};
use tb_protocol::{ControlCode, Frame, MIN_FRAME_SIZE_LIMIT, PROTOCOL_VERSION};

use crate::backoff::ExponentialBackoff;
use crate::link::{connect_once, Link};

/// Channel capacity for events delivered to the session.
///
/// Events are small; 256 absorbs bursts of output frames while the
/// controller is busy writing to the surface.
const TRANSPORT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long a closing transport waits to deliver `CLOSE` to the peer
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Events reported by the transport task
#[derive(Debug)]
pub enum TransportEvent {
    /// The transport moved to a new state
    StateChanged(TransportState),
    /// A frame arrived from the peer
    Frame(Frame),
    /// A connection attempt failed. `attempt` is 0 for the first connect
    /// and counts retries after that.
    ConnectFailed { attempt: u32, error: ConnectError },
    /// A retry is scheduled after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// An established connection was lost
    ConnectionLost { reason: String },
    /// Queued outbound frames discarded because the connection went away
    FramesDropped(usize),
    /// Retries are exhausted; the transport is closing
    Unrecoverable(SessionError),
}

/// Caller side of a running transport
///
/// Dropping the handle closes the transport.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::Sender<Frame>,
    state: watch::Receiver<TransportState>,
    max_payload: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl TransportHandle {
    /// Queue a frame for sending. Never blocks.
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            return Err(SendError::Closed);
        }
        match *self.state.borrow() {
            TransportState::Connected => {}
            TransportState::Closed => return Err(SendError::Closed),
            _ => return Err(SendError::NotConnected),
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Current transport state
    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Largest payload the peer currently accepts.
    ///
    /// Until the peer's `HELLO` arrives this is the protocol minimum, which
    /// every peer accepts.
    pub fn max_payload(&self) -> usize {
        self.max_payload.load(Ordering::Acquire)
    }

    /// Close the transport. Safe to call more than once.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!("Closing transport");
            self.cancel.cancel();
        }
    }

    /// Wait until the transport has fully closed
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // An error means the task is gone, which only happens after Closed
        let _ = state.wait_for(|s| *s == TransportState::Closed).await;
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Why a connection stopped pumping frames
enum PumpExit {
    /// Close was requested
    Closed,
    /// The connection failed
    Lost(String),
}

/// The task that owns the connection
pub struct SessionTransport {
    id: SessionId,
    endpoint: Endpoint,
    config: BridgeConfig,
    outbound: mpsc::Receiver<Frame>,
    events: mpsc::Sender<TransportEvent>,
    state: watch::Sender<TransportState>,
    max_payload: Arc<AtomicUsize>,
    cancel: CancellationToken,
    backoff: ExponentialBackoff,
    ping_seq: u64,
}

impl SessionTransport {
    /// Start a transport task connecting to `endpoint`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        id: SessionId,
        endpoint: Endpoint,
        config: &BridgeConfig,
    ) -> (TransportHandle, mpsc::Receiver<TransportEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.send_queue_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(TRANSPORT_EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(TransportState::Connecting);
        let max_payload = Arc::new(AtomicUsize::new(MIN_FRAME_SIZE_LIMIT));
        let cancel = CancellationToken::new();

        let task = SessionTransport {
            id,
            endpoint,
            config: config.clone(),
            outbound: outbound_rx,
            events: event_tx,
            state: state_tx,
            max_payload: Arc::clone(&max_payload),
            cancel: cancel.clone(),
            backoff: ExponentialBackoff::from_config(&config.backoff),
            ping_seq: 0,
        };
        tokio::spawn(task.run());

        let handle = TransportHandle {
            outbound: outbound_tx,
            state: state_rx,
            max_payload,
            cancel,
        };
        (handle, event_rx)
    }

    async fn run(mut self) {
        let max_attempts = self.config.backoff.max_attempts;
        let mut attempt: u32 = 0;
        let mut last_error = String::new();

        tracing::info!(session = %self.id, endpoint = %self.endpoint, "Connecting");
        self.emit(TransportEvent::StateChanged(TransportState::Connecting))
            .await;

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = connect_once(
                    &self.endpoint,
                    self.config.connect_timeout,
                    self.config.max_frame_size,
                ) => result,
            };

            match result {
                Ok(link) => {
                    tracing::info!(
                        session = %self.id,
                        endpoint = %self.endpoint,
                        link = link.kind(),
                        "Connected"
                    );
                    attempt = 0;
                    self.backoff.reset();

                    match self.pump(link).await {
                        PumpExit::Closed => break,
                        PumpExit::Lost(reason) => {
                            tracing::warn!(session = %self.id, %reason, "Connection lost");
                            self.set_state(TransportState::Reconnecting).await;
                            self.emit(TransportEvent::ConnectionLost {
                                reason: reason.clone(),
                            })
                            .await;
                            self.drop_queued().await;
                            last_error = reason;
                        }
                    }
                }
                Err(error) => {
                    tracing::debug!(session = %self.id, attempt, %error, "Connection attempt failed");
                    last_error = error.to_string();
                    let retryable = error.is_retryable();
                    self.emit(TransportEvent::ConnectFailed { attempt, error })
                        .await;
                    if !retryable {
                        self.give_up(attempt, last_error).await;
                        return;
                    }
                }
            }

            if attempt >= max_attempts {
                self.give_up(attempt, last_error).await;
                return;
            }
            attempt += 1;

            let delay = self.backoff.next_delay();
            tracing::info!(session = %self.id, attempt, ?delay, "Reconnecting");
            self.emit(TransportEvent::Reconnecting { attempt, delay })
                .await;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(session = %self.id, "Transport closed");
        self.set_state(TransportState::Closed).await;
    }

    /// Exchange frames over one connection until it fails or close is requested
    async fn pump(&mut self, mut link: Link) -> PumpExit {
        let local_max = self.config.max_frame_size;
        // The peer's limit is unknown until its HELLO
        self.max_payload
            .store(MIN_FRAME_SIZE_LIMIT.min(local_max), Ordering::Release);

        if let Err(e) = link.send(Frame::hello(local_max)).await {
            return PumpExit::Lost(format!("failed to send hello: {}", e));
        }
        // Anything queued before this connection belongs to a previous one
        self.drop_queued().await;
        self.set_state(TransportState::Connected).await;

        let mut heartbeat = self.config.heartbeat().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let idle_timeout = self.config.idle_timeout();
        let mut last_seen = Instant::now();

        loop {
            let idle_deadline = idle_timeout.map(|timeout| last_seen + timeout);

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    if tokio::time::timeout(CLOSE_GRACE, link.send(Frame::close())).await.is_err() {
                        tracing::debug!(session = %self.id, "Peer did not accept CLOSE in time");
                    }
                    link.close().await;
                    return PumpExit::Closed;
                }

                frame = self.outbound.recv() => {
                    // The handle owns the only sender, and dropping it cancels
                    let Some(frame) = frame else {
                        link.close().await;
                        return PumpExit::Closed;
                    };
                    if let Err(e) = link.send(frame).await {
                        return PumpExit::Lost(e.to_string());
                    }
                }

                inbound = link.next_frame() => {
                    match inbound {
                        None => return PumpExit::Lost("connection closed by peer".to_string()),
                        Some(Err(e)) => return PumpExit::Lost(e.to_string()),
                        Some(Ok(frame)) => {
                            last_seen = Instant::now();
                            if let Err(reason) = self.on_inbound(&mut link, frame).await {
                                return PumpExit::Lost(reason);
                            }
                        }
                    }
                }

                _ = next_tick(&mut heartbeat) => {
                    self.ping_seq += 1;
                    tracing::trace!(session = %self.id, seq = self.ping_seq, "Sending ping");
                    if let Err(e) = link.send(Frame::ping(self.ping_seq)).await {
                        return PumpExit::Lost(e.to_string());
                    }
                }

                _ = sleep_until(idle_deadline) => {
                    return PumpExit::Lost(format!(
                        "nothing received for {:?}",
                        idle_timeout.unwrap_or_default()
                    ));
                }
            }
        }
    }

    /// Handle protocol-level control frames; pass everything else on
    async fn on_inbound(&mut self, link: &mut Link, frame: Frame) -> Result<(), String> {
        match &frame {
            Frame::Control { code, payload } if *code == ControlCode::PING => {
                link.send(Frame::pong(payload.clone()))
                    .await
                    .map_err(|e| e.to_string())?;
            }
            Frame::Control { code, .. } if *code == ControlCode::PONG => {
                tracing::trace!(session = %self.id, "Received pong");
            }
            Frame::Control { code, .. } if *code == ControlCode::HELLO => match frame.as_hello() {
                Some(hello) => {
                    if hello.version != PROTOCOL_VERSION {
                        tracing::warn!(
                            session = %self.id,
                            peer_version = hello.version,
                            "Peer speaks a different protocol version"
                        );
                    }
                    let peer_max = usize::try_from(hello.max_frame_size).unwrap_or(usize::MAX);
                    let effective = self.config.max_frame_size.min(peer_max);
                    self.max_payload.store(effective, Ordering::Release);
                    tracing::debug!(session = %self.id, max_payload = effective, "Negotiated frame size");
                }
                None => tracing::warn!(session = %self.id, "Ignoring malformed hello"),
            },
            _ => self.emit(TransportEvent::Frame(frame)).await,
        }
        Ok(())
    }

    /// Discard frames queued for a connection that no longer exists
    async fn drop_queued(&mut self) {
        let mut dropped = 0;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(session = %self.id, dropped, "Dropped queued frames");
            self.emit(TransportEvent::FramesDropped(dropped)).await;
        }
    }

    async fn give_up(&mut self, attempts: u32, last_error: String) {
        tracing::error!(session = %self.id, attempts, %last_error, "Giving up on connection");
        self.emit(TransportEvent::Unrecoverable(SessionError::Unrecoverable {
            attempts,
            last_error,
        }))
        .await;
        self.set_state(TransportState::Closed).await;
    }

    async fn set_state(&mut self, state: TransportState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(session = %self.id, from = %previous, to = %state, "Transport state changed");
            self.emit(TransportEvent::StateChanged(state)).await;
        }
    }

    async fn emit(&self, event: TransportEvent) {
        if self.events.send(event).await.is_err() {
            tracing::trace!(session = %self.id, "Event receiver dropped");
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
