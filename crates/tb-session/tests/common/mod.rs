//! Shared helpers for session integration tests

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;

use tb_core::config::BridgeConfig;
use tb_core::Endpoint;
use tb_protocol::{ControlCode, Frame, FrameCodec, TerminalSize};
use tb_session::TerminalSurface;

/// Longest any single step of a test may take
pub const STEP: Duration = Duration::from_secs(5);

/// Client settings with fast, deterministic retries and no heartbeat
pub fn test_config(endpoint: Endpoint) -> BridgeConfig {
    let mut config = BridgeConfig::for_endpoint(endpoint);
    config.connect_timeout = Duration::from_secs(2);
    config.heartbeat_interval = Duration::ZERO;
    config.heartbeat_timeout = Duration::ZERO;
    config.backoff.base = Duration::from_millis(10);
    config.backoff.cap = Duration::from_millis(100);
    config.backoff.jitter = 0.0;
    config.backoff.max_attempts = 5;
    config.resize.debounce = Duration::from_millis(20);
    config
}

pub fn tcp_endpoint(addr: SocketAddr) -> Endpoint {
    Endpoint::parse(&format!("tcp://{}", addr)).unwrap()
}

/// A loopback listener and its endpoint
pub async fn listen() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = tcp_endpoint(listener.local_addr().unwrap());
    (listener, endpoint)
}

/// An endpoint nothing listens on
pub async fn refused_endpoint() -> Endpoint {
    let (listener, endpoint) = listen().await;
    drop(listener);
    endpoint
}

pub type ServerConn = Framed<TcpStream, FrameCodec>;

/// Accept one client and consume its HELLO
pub async fn accept(listener: &TcpListener) -> ServerConn {
    let (stream, _) = timeout(STEP, listener.accept()).await.unwrap().unwrap();
    let mut conn = Framed::new(stream, FrameCodec::new());
    let hello = next_frame(&mut conn).await;
    assert!(hello.as_hello().is_some(), "expected hello, got {:?}", hello);
    conn
}

/// Next frame from the client, skipping keepalive traffic
pub async fn next_frame(conn: &mut ServerConn) -> Frame {
    loop {
        let frame = timeout(STEP, conn.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("client closed the connection")
            .unwrap();
        match &frame {
            Frame::Control { code, .. } if *code == ControlCode::PING => continue,
            _ => return frame,
        }
    }
}

pub async fn send(conn: &mut ServerConn, frame: Frame) {
    conn.send(frame).await.unwrap();
}

/// Everything a [`RecordingSurface`] was asked to do
#[derive(Debug, Default)]
pub struct SurfaceLog {
    pub written: Vec<u8>,
    pub statuses: Vec<String>,
    pub disposed: usize,
}

/// Surface that records output in memory
#[derive(Clone)]
pub struct RecordingSurface {
    pub log: Arc<Mutex<SurfaceLog>>,
    pub size: Option<TerminalSize>,
}

impl RecordingSurface {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            log: Arc::default(),
            size: TerminalSize::new(cols, rows),
        }
    }
}

impl TerminalSurface for RecordingSurface {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.log.lock().unwrap().written.extend_from_slice(data);
        Ok(())
    }

    fn size(&self) -> Option<TerminalSize> {
        self.size
    }

    fn status(&mut self, message: &str) {
        self.log.lock().unwrap().statuses.push(message.to_string());
    }

    fn dispose(&mut self) {
        self.log.lock().unwrap().disposed += 1;
    }
}
