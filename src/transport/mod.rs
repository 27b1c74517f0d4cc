//! Transport layer for link I/O abstraction
//!
//! A [`LinkStream`] is one physical duplex byte stream to the peer device.
//! Everything above this layer works in terms of the trait, so the same
//! session and connection-manager code runs over TCP (development and
//! testing), a serial radio modem, or the in-memory pair used by tests.

use crate::error::Result;
use std::io::{Read, Write};

mod memory;
mod serial;
mod session;
mod tcp;

pub use memory::MemoryLinkStream;
pub use serial::SerialLinkStream;
pub use session::{LineReader, Session};
pub use tcp::{TcpAcceptor, TcpLinkStream};

/// One duplex byte stream to a peer.
///
/// Reads block. Writers obtain their own handle via `try_clone` so one
/// thread can sit in a blocking read while others send.
pub trait LinkStream: Read + Write + Send {
    /// Clone a handle to the same underlying stream (used for the writer half)
    fn try_clone(&self) -> Result<Box<dyn LinkStream>>;

    /// Best-effort shutdown of the underlying stream so a blocked read
    /// returns end-of-stream. Safe to call more than once.
    fn shutdown(&self);

    /// Human-readable peer label for logging
    fn peer(&self) -> String;
}
