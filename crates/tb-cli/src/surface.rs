//! Local terminal surface
//!
//! Puts the controlling terminal into raw mode on the alternate screen,
//! renders remote output to stdout and turns key presses into the bytes a
//! remote terminal expects.

use std::io::{self, Stdout, Write};
use std::time::Duration;

use bytes::Bytes;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tb_protocol::TerminalSize;
use tb_session::{SurfaceEvent, TerminalSurface};

/// How often the event reader checks whether the session is gone
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The local terminal, in raw mode for the lifetime of the value
pub struct CrosstermSurface {
    stdout: Stdout,
    active: bool,
}

impl CrosstermSurface {
    /// Enter raw mode and the alternate screen
    pub fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(e) = stdout.execute(EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(e);
        }
        Ok(Self {
            stdout,
            active: true,
        })
    }
}

impl TerminalSurface for CrosstermSurface {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.stdout.write_all(data)?;
        self.stdout.flush()
    }

    fn size(&self) -> Option<TerminalSize> {
        let (cols, rows) = crossterm::terminal::size().ok()?;
        TerminalSize::new(cols, rows)
    }

    fn status(&mut self, message: &str) {
        let _ = crossterm::execute!(
            self.stdout,
            Print("\r\n"),
            SetForegroundColor(Color::Cyan),
            Print("[termbridge] "),
            ResetColor,
            Print(message),
            Print("\r\n")
        );
    }

    fn dispose(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.stdout.execute(LeaveAlternateScreen) {
            tracing::debug!(error = %e, "Failed to leave alternate screen");
        }
        if let Err(e) = disable_raw_mode() {
            tracing::debug!(error = %e, "Failed to disable raw mode");
        }
    }
}

impl Drop for CrosstermSurface {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Read terminal events on a blocking thread and forward them as
/// [`SurfaceEvent`]s. `Ctrl+]` detaches.
///
/// The reader stops after a detach or once the receiver is dropped.
pub fn spawn_event_reader(tx: mpsc::Sender<SurfaceEvent>) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || loop {
        if tx.is_closed() {
            break;
        }
        match event::poll(EVENT_POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to poll terminal events");
                break;
            }
        }
        let event = match event::read() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read terminal event");
                break;
            }
        };

        let surface_event = match event {
            Event::Key(key) if is_detach(&key) => {
                let _ = tx.blocking_send(SurfaceEvent::Detach);
                break;
            }
            Event::Key(KeyEvent {
                code,
                modifiers,
                kind: KeyEventKind::Press | KeyEventKind::Repeat,
                ..
            }) => match key_to_bytes(code, modifiers) {
                Some(bytes) => SurfaceEvent::Input(bytes),
                None => continue,
            },
            Event::Paste(text) => SurfaceEvent::Input(Bytes::from(text)),
            Event::Resize(cols, rows) => match TerminalSize::new(cols, rows) {
                Some(size) => SurfaceEvent::Resize(size),
                None => continue,
            },
            _ => continue,
        };
        if tx.blocking_send(surface_event).is_err() {
            break;
        }
    })
}

fn is_detach(key: &KeyEvent) -> bool {
    key.kind == KeyEventKind::Press
        && key.modifiers.contains(KeyModifiers::CONTROL)
        && key.code == KeyCode::Char(']')
}

/// Convert a key press to the bytes an xterm-compatible terminal sends
pub fn key_to_bytes(code: KeyCode, modifiers: KeyModifiers) -> Option<Bytes> {
    let bytes: &[u8] = match code {
        KeyCode::Char(c) if modifiers.contains(KeyModifiers::CONTROL) => {
            // Ctrl+A = 0x01 .. Ctrl+Z = 0x1a; also Ctrl+@ [ \ ^ _
            let ctrl = match c.to_ascii_uppercase() {
                c @ '@'..='_' => c as u8 - b'@',
                ' ' => 0,
                _ => return None,
            };
            return Some(Bytes::copy_from_slice(&[ctrl]));
        }
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            let encoded = c.encode_utf8(&mut buf).as_bytes();
            let mut out = Vec::with_capacity(encoded.len() + 1);
            if modifiers.contains(KeyModifiers::ALT) {
                // Alt sends ESC before the key
                out.push(0x1b);
            }
            out.extend_from_slice(encoded);
            return Some(Bytes::from(out));
        }
        KeyCode::Enter => b"\r",
        KeyCode::Tab => b"\t",
        KeyCode::BackTab => b"\x1b[Z",
        KeyCode::Backspace => b"\x7f",
        KeyCode::Esc => b"\x1b",
        KeyCode::Up => b"\x1b[A",
        KeyCode::Down => b"\x1b[B",
        KeyCode::Right => b"\x1b[C",
        KeyCode::Left => b"\x1b[D",
        KeyCode::Home => b"\x1b[H",
        KeyCode::End => b"\x1b[F",
        KeyCode::PageUp => b"\x1b[5~",
        KeyCode::PageDown => b"\x1b[6~",
        KeyCode::Delete => b"\x1b[3~",
        KeyCode::Insert => b"\x1b[2~",
        KeyCode::F(n) => match n {
            1 => b"\x1bOP",
            2 => b"\x1bOQ",
            3 => b"\x1bOR",
            4 => b"\x1bOS",
            5 => b"\x1b[15~",
            6 => b"\x1b[17~",
            7 => b"\x1b[18~",
            8 => b"\x1b[19~",
            9 => b"\x1b[20~",
            10 => b"\x1b[21~",
            11 => b"\x1b[23~",
            12 => b"\x1b[24~",
            _ => return None,
        },
        _ => return None,
    };
    Some(Bytes::from_static(bytes))
}
