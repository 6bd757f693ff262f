//! tb-session: Client side of a termbridge session
//!
//! This crate connects a local terminal surface to a remote process:
//!
//! - [`SessionTransport`]: owns the connection, reconnects with backoff
//! - [`ResizeCoordinator`]: coalesces bursts of size changes
//! - [`SessionController`]: routes input, output and resizes between the two

pub mod backoff;
pub mod controller;
pub mod link;
pub mod resize;
pub mod surface;
pub mod transport;

pub use backoff::ExponentialBackoff;
pub use controller::{SessionController, SessionSummary};
pub use link::{connect_once, Link, LinkError};
pub use resize::ResizeCoordinator;
pub use surface::{SurfaceEvent, TerminalSurface};
pub use transport::{SessionTransport, TransportEvent, TransportHandle};
