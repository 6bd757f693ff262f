//! Framed links over TCP and WebSocket
//!
//! A [`Link`] carries protocol frames over one established connection. Raw
//! TCP links use the codec directly; WebSocket links put the same byte
//! stream into binary messages, which need not line up with frame
//! boundaries.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::{Encoder, Framed};

use tb_core::{ConnectError, Endpoint, Scheme};
use tb_protocol::{CodecError, Frame, FrameBuffer, FrameCodec};

/// Errors on an established link
#[derive(Debug, Error)]
pub enum LinkError {
    /// Undecodable or unencodable frame
    #[error("{0}")]
    Codec(#[from] CodecError),

    /// WebSocket protocol or socket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// One established, framed connection
pub enum Link {
    /// Frames written directly to a TCP stream
    Tcp(Framed<TcpStream, FrameCodec>),
    /// Frames carried in WebSocket binary messages
    WebSocket(WsLink),
}

/// WebSocket side of a [`Link`]
pub struct WsLink {
    stream: WebSocketStream<TcpStream>,
    encoder: FrameCodec,
    buffer: FrameBuffer,
    /// Frames decoded from a message but not yet handed out
    ready: VecDeque<Frame>,
    /// Error found after the frames in `ready`
    failed: Option<CodecError>,
}

impl Link {
    /// Wrap a connected TCP stream
    pub fn tcp(stream: TcpStream, max_payload: usize) -> Self {
        Link::Tcp(Framed::new(stream, FrameCodec::with_max_payload(max_payload)))
    }

    /// Wrap an upgraded WebSocket stream
    pub fn websocket(stream: WebSocketStream<TcpStream>, max_payload: usize) -> Self {
        Link::WebSocket(WsLink {
            stream,
            encoder: FrameCodec::with_max_payload(max_payload),
            buffer: FrameBuffer::new(FrameCodec::with_max_payload(max_payload)),
            ready: VecDeque::new(),
            failed: None,
        })
    }

    /// Short name of the link type, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Link::Tcp(_) => "tcp",
            Link::WebSocket(_) => "websocket",
        }
    }

    /// Write one frame and flush it
    pub async fn send(&mut self, frame: Frame) -> Result<(), LinkError> {
        match self {
            Link::Tcp(framed) => framed.send(frame).await?,
            Link::WebSocket(ws) => {
                let mut buf = BytesMut::with_capacity(frame.encoded_len());
                ws.encoder.encode(frame, &mut buf)?;
                ws.stream.send(Message::binary(buf.freeze())).await?;
            }
        }
        Ok(())
    }

    /// Receive the next frame.
    ///
    /// Returns `None` once the peer has closed the connection. Cancel-safe.
    pub async fn next_frame(&mut self) -> Option<Result<Frame, LinkError>> {
        match self {
            Link::Tcp(framed) => framed.next().await.map(|r| r.map_err(LinkError::from)),
            Link::WebSocket(ws) => ws.next_frame().await,
        }
    }

    /// Close the connection, ignoring errors from a peer that is already gone
    pub async fn close(&mut self) {
        let result = match self {
            Link::Tcp(framed) => SinkExt::<Frame>::close(framed).await.map_err(LinkError::from),
            Link::WebSocket(ws) => ws.stream.close(None).await.map_err(LinkError::from),
        };
        if let Err(e) = result {
            tracing::trace!(error = %e, "Error while closing link");
        }
    }
}

impl WsLink {
    async fn next_frame(&mut self) -> Option<Result<Frame, LinkError>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Some(Ok(frame));
            }
            if let Some(e) = self.failed.take() {
                return Some(Err(e.into()));
            }

            match self.stream.next().await? {
                Ok(Message::Binary(data)) => {
                    self.buffer.extend(&data);
                    for result in self.buffer.frames() {
                        match result {
                            Ok(frame) => self.ready.push_back(frame),
                            Err(e) => self.failed = Some(e),
                        }
                    }
                }
                Ok(Message::Text(_)) => {
                    tracing::warn!("Ignoring text message on a binary frame link");
                }
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite itself
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Open a connection to `endpoint`.
///
/// Resolves the host, connects over TCP and, for `ws://` endpoints, performs
/// the WebSocket upgrade. The whole attempt is bounded by `timeout`.
pub async fn connect_once(
    endpoint: &Endpoint,
    timeout: Duration,
    max_payload: usize,
) -> Result<Link, ConnectError> {
    let address = endpoint.authority();
    let attempt = async {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| ConnectError::Dns {
                host: endpoint.host().to_string(),
                reason: e.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectError::Dns {
                host: endpoint.host().to_string(),
                reason: "no addresses found".to_string(),
            });
        }

        let stream = TcpStream::connect(&addrs[..]).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::ConnectionRefused => ConnectError::Refused(address.clone()),
            _ => ConnectError::Io {
                address: address.clone(),
                reason: e.to_string(),
            },
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        match endpoint.scheme() {
            Scheme::Tcp => Ok(Link::tcp(stream, max_payload)),
            Scheme::WebSocket => {
                let url = endpoint.to_string();
                let (ws, response) = tokio_tungstenite::client_async(url.as_str(), stream)
                    .await
                    .map_err(|e| ConnectError::Handshake {
                        address: address.clone(),
                        reason: e.to_string(),
                    })?;
                tracing::debug!(status = %response.status(), "WebSocket upgrade complete");
                Ok(Link::websocket(ws, max_payload))
            }
        }
    };

    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| ConnectError::Timeout {
            address: address.clone(),
            timeout,
        })?
}
