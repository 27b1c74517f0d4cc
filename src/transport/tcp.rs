//! TCP transport implementation
//!
//! Stands in for the short-range radio socket of the target hardware: the
//! link presents the same blocking line-stream semantics either way.

use super::LinkStream;
use crate::error::Result;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

/// Connect timeout for outbound attempts
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP-backed link stream
pub struct TcpLinkStream {
    stream: TcpStream,
    label: String,
}

impl TcpLinkStream {
    /// Dial a peer
    pub fn connect(addr: &str) -> Result<Self> {
        let sock_addr: SocketAddr = addr
            .parse()
            .map_err(|e| crate::error::Error::InvalidParameter(format!("{}: {}", addr, e)))?;
        let stream = TcpStream::connect_timeout(&sock_addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            label: addr.to_string(),
        })
    }

    fn wrap(stream: TcpStream) -> Self {
        let label = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self { stream, label }
    }
}

impl Read for TcpLinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpLinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl LinkStream for TcpLinkStream {
    fn try_clone(&self) -> Result<Box<dyn LinkStream>> {
        Ok(Box::new(Self {
            stream: self.stream.try_clone()?,
            label: self.label.clone(),
        }))
    }

    fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn peer(&self) -> String {
        self.label.clone()
    }
}

/// Non-blocking TCP acceptor for the server side.
///
/// The accept loop polls this at a short interval so it can also observe
/// the shutdown flag; accepted streams are switched back to blocking mode
/// for reliable line framing.
pub struct TcpAcceptor {
    listener: TcpListener,
    label: String,
}

impl TcpAcceptor {
    /// Bind a listening endpoint. Failure here is fatal to this acceptor
    /// (the caller decides whether the server can run without it).
    pub fn bind(label: &str, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        log::info!("{} acceptor listening on {}", label, addr);
        Ok(Self {
            listener,
            label: label.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.label
    }

    /// Try to accept one pending connection; `Ok(None)` when there is none.
    pub fn poll_accept(&mut self) -> Result<Option<Box<dyn LinkStream>>> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                log::info!("{} acceptor: peer connected: {}", self.label, addr);
                Ok(Some(Box::new(TcpLinkStream::wrap(stream))))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
