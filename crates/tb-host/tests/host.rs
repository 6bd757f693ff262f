//! Host integration tests against a real PTY process
#![cfg(unix)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use tb_core::config::HostConfig;
use tb_core::{ConnectError, Endpoint};
use tb_host::{Host, LocalTerminal};
use tb_protocol::{Frame, FrameCodec, TerminalSize};
use tb_session::{connect_once, SurfaceEvent, TerminalSurface};

const STEP: Duration = Duration::from_secs(10);

fn host_config(listen: &str, script: &str) -> HostConfig {
    HostConfig {
        listen: Some(Endpoint::parse(listen).unwrap()),
        command: vec!["/bin/sh".into(), "-c".into(), script.into()],
        ..HostConfig::default()
    }
}

/// Read frames until the output contains `needle` or the process exits
async fn read_until(
    conn: &mut Framed<TcpStream, FrameCodec>,
    output: &mut Vec<u8>,
    needle: &str,
) -> Option<Option<i32>> {
    loop {
        let frame = timeout(STEP, conn.next())
            .await
            .expect("timed out waiting for host output")?
            .unwrap();
        match frame {
            Frame::Data(data) => {
                output.extend_from_slice(&data);
                if String::from_utf8_lossy(output).contains(needle) {
                    return None;
                }
            }
            other => {
                if let Some(code) = other.as_exit() {
                    return Some(code);
                }
            }
        }
    }
}

#[tokio::test]
async fn test_input_reaches_process_and_exit_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("session.log");
    let mut config = host_config("tcp://127.0.0.1:0", "read line; echo got:$line; exit 3");
    config.record = Some(record.clone());

    let host = Host::bind(config).await.unwrap();
    let addr = host.local_addr().unwrap();
    let running = tokio::spawn(host.run(CancellationToken::new()));

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut conn = Framed::new(stream, FrameCodec::new());

    let hello = timeout(STEP, conn.next()).await.unwrap().unwrap().unwrap();
    assert!(hello.as_hello().is_some());

    conn.send(Frame::hello(4096)).await.unwrap();
    conn.send(Frame::Resize(TerminalSize::new(120, 40).unwrap()))
        .await
        .unwrap();
    conn.send(Frame::Data(Bytes::from_static(b"hello\n")))
        .await
        .unwrap();

    let mut output = Vec::new();
    assert_eq!(read_until(&mut conn, &mut output, "got:hello").await, None);
    let exit = read_until(&mut conn, &mut output, "never printed").await;
    assert_eq!(exit, Some(Some(3)));

    let code = timeout(STEP, running).await.unwrap().unwrap().unwrap();
    assert_eq!(code, Some(3));

    let recorded = std::fs::read_to_string(&record).unwrap();
    assert!(recorded.contains("got:hello"), "{:?}", recorded);
}

#[tokio::test]
async fn test_pty_reports_resized_terminal() {
    let config = host_config("tcp://127.0.0.1:0", "read line; stty size");
    let host = Host::bind(config).await.unwrap();
    let addr = host.local_addr().unwrap();
    let running = tokio::spawn(host.run(CancellationToken::new()));

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut conn = Framed::new(stream, FrameCodec::new());
    conn.send(Frame::Resize(TerminalSize::new(132, 43).unwrap()))
        .await
        .unwrap();
    conn.send(Frame::Data(Bytes::from_static(b"\n"))).await.unwrap();

    let mut output = Vec::new();
    assert_eq!(read_until(&mut conn, &mut output, "43 132").await, None);
    timeout(STEP, running).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_kills_process() {
    let config = host_config("tcp://127.0.0.1:0", "sleep 60");
    let host = Host::bind(config).await.unwrap();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(host.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();
    let result = timeout(STEP, running).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_websocket_path_is_checked() {
    let config = host_config("ws://127.0.0.1:0/term", "sleep 60");
    let host = Host::bind(config).await.unwrap();
    let endpoint = host.endpoint().unwrap();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(host.run(shutdown.clone()));

    let wrong = Endpoint::parse(&format!("ws://{}/other", endpoint.authority())).unwrap();
    let rejected = connect_once(&wrong, STEP, 4096).await;
    assert!(matches!(rejected, Err(ConnectError::Handshake { .. })));

    let mut link = connect_once(&endpoint, STEP, 4096).await.unwrap();
    let hello = timeout(STEP, link.next_frame()).await.unwrap().unwrap().unwrap();
    assert!(hello.as_hello().is_some());

    shutdown.cancel();
    timeout(STEP, running).await.unwrap().unwrap().unwrap();
}

#[derive(Default)]
struct LocalLog {
    output: Vec<u8>,
    statuses: Vec<String>,
    disposed: usize,
}

/// Stand-in for the host's own terminal
struct FakeTerminal {
    log: Arc<Mutex<LocalLog>>,
    size: TerminalSize,
}

impl TerminalSurface for FakeTerminal {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.log.lock().unwrap().output.extend_from_slice(data);
        Ok(())
    }

    fn size(&self) -> Option<TerminalSize> {
        Some(self.size)
    }

    fn status(&mut self, message: &str) {
        self.log.lock().unwrap().statuses.push(message.to_string());
    }

    fn dispose(&mut self) {
        self.log.lock().unwrap().disposed += 1;
    }
}

async fn wait_for_output(log: &Arc<Mutex<LocalLog>>, needle: &str) {
    let found = timeout(STEP, async {
        loop {
            if String::from_utf8_lossy(&log.lock().unwrap().output).contains(needle) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(found.is_ok(), "local terminal never showed {:?}", needle);
}

#[tokio::test]
async fn test_attached_terminal_drives_process() {
    let config = host_config(
        "tcp://127.0.0.1:0",
        "stty size; read line; stty size; echo got-$line",
    );
    let host = Host::bind(config).await.unwrap();

    let log = Arc::new(Mutex::new(LocalLog::default()));
    let terminal = FakeTerminal {
        log: log.clone(),
        size: TerminalSize::new(100, 30).unwrap(),
    };
    let (events_tx, events_rx) = mpsc::channel(16);
    let running = tokio::spawn(
        host.run_attached(CancellationToken::new(), LocalTerminal::new(terminal, events_rx)),
    );

    // The PTY starts at the local terminal's size
    wait_for_output(&log, "30 100").await;

    events_tx
        .send(SurfaceEvent::Resize(TerminalSize::new(132, 43).unwrap()))
        .await
        .unwrap();
    events_tx
        .send(SurfaceEvent::Input(Bytes::from_static(b"hi\n")))
        .await
        .unwrap();

    wait_for_output(&log, "43 132").await;
    wait_for_output(&log, "got-hi").await;

    let code = timeout(STEP, running).await.unwrap().unwrap().unwrap();
    assert_eq!(code, Some(0));

    let log = log.lock().unwrap();
    assert_eq!(log.disposed, 1);
    assert!(log.statuses.iter().any(|s| s.contains("status 0")));
}

#[tokio::test]
async fn test_local_detach_keeps_serving_clients() {
    let config = host_config("tcp://127.0.0.1:0", "read line; echo remote-$line");
    let host = Host::bind(config).await.unwrap();
    let addr = host.local_addr().unwrap();

    let log = Arc::new(Mutex::new(LocalLog::default()));
    let terminal = FakeTerminal {
        log: log.clone(),
        size: TerminalSize::new(80, 24).unwrap(),
    };
    let (events_tx, events_rx) = mpsc::channel(16);
    let running = tokio::spawn(
        host.run_attached(CancellationToken::new(), LocalTerminal::new(terminal, events_rx)),
    );

    events_tx.send(SurfaceEvent::Detach).await.unwrap();
    let released = timeout(STEP, async {
        while log.lock().unwrap().disposed == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "local terminal was not released");

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut conn = Framed::new(stream, FrameCodec::new());
    conn.send(Frame::Data(Bytes::from_static(b"ok\n"))).await.unwrap();

    let mut output = Vec::new();
    assert_eq!(read_until(&mut conn, &mut output, "remote-ok").await, None);
    timeout(STEP, running).await.unwrap().unwrap().unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.disposed, 1);
    assert!(!String::from_utf8_lossy(&log.output).contains("remote-ok"));
}
