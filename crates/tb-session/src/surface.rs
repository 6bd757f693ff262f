//! Terminal surface abstraction
//!
//! The surface is whatever renders the remote output and produces user
//! input: a local terminal in raw mode, a test double, an embedding UI.

use std::io;

use bytes::Bytes;

use tb_protocol::TerminalSize;

/// Notifications from the surface to the session controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// Bytes typed or pasted by the user, already encoded for the remote
    Input(Bytes),
    /// The visible area changed size
    Resize(TerminalSize),
    /// The user asked to leave the session
    Detach,
}

/// Output side of a terminal surface
pub trait TerminalSurface: Send {
    /// Render bytes received from the remote process
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Current size in character cells, if known
    fn size(&self) -> Option<TerminalSize>;

    /// Show a one-line status message outside the remote output
    fn status(&mut self, message: &str);

    /// Release the surface. Called exactly once when the session ends.
    fn dispose(&mut self);
}
