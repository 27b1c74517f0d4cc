//! One live connection: locked writer plus blocking line reader.
//!
//! Telemetry, tile responses and package chunks are produced by independent
//! threads but share one outbound stream; interleaved partial writes would
//! corrupt line framing, so every send goes through the per-session write
//! lock and flushes before releasing it.

use super::LinkStream;
use crate::error::{Error, Result};
use crate::protocol::{self, Message};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Read chunk size for the line reader
const READ_CHUNK: usize = 4096;

/// One live duplex connection to a peer.
///
/// Any send error marks the session dead; the owning connection manager is
/// responsible for teardown and reconnect, callers must not retry in place.
pub struct Session {
    peer: String,
    writer: Mutex<Box<dyn LinkStream>>,
    alive: Arc<AtomicBool>,
}

impl Session {
    /// Take ownership of a stream, returning the session (writer half)
    /// and the line reader (reader half).
    pub fn open(stream: Box<dyn LinkStream>) -> Result<(Arc<Session>, LineReader)> {
        let writer = stream.try_clone()?;
        let alive = Arc::new(AtomicBool::new(true));
        let session = Arc::new(Session {
            peer: stream.peer(),
            writer: Mutex::new(writer),
            alive: Arc::clone(&alive),
        });
        let reader = LineReader {
            stream,
            alive,
            pending: Vec::new(),
            chunk: vec![0u8; READ_CHUNK],
        };
        Ok((session, reader))
    }

    /// Write one line plus terminator and flush.
    pub fn send_line(&self, line: &str) -> Result<()> {
        if !self.alive.load(Ordering::Relaxed) {
            return Err(Error::LinkClosed);
        }
        let mut writer = self.writer.lock();
        let result = writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                // Dead session: unblock the reader as well
                self.alive.store(false, Ordering::Relaxed);
                writer.shutdown();
                Err(e.into())
            }
        }
    }

    /// Encode and send one message.
    pub fn send(&self, msg: &Message) -> Result<()> {
        self.send_line(&protocol::encode(msg))
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Close the underlying stream. Idempotent, callable from any thread;
    /// a blocked read on the reader half unblocks.
    pub fn close(&self) {
        if self.alive.swap(false, Ordering::Relaxed) {
            self.writer.lock().shutdown();
            log::debug!("Session {} closed", self.peer);
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Blocking iterator over protocol lines from the reader half.
///
/// Ends cleanly (yields `None`) on end-of-stream, on a hard read error, or
/// once the session is closed; ordinary closure is not an error. Transient
/// read timeouts (serial transports) are retried while the session lives.
pub struct LineReader {
    stream: Box<dyn LinkStream>,
    alive: Arc<AtomicBool>,
    pending: Vec<u8>,
    chunk: Vec<u8>,
}

impl LineReader {
    fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop(); // terminator
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Some(String::from_utf8_lossy(&line).into_owned());
            }

            if !self.alive.load(Ordering::Relaxed) {
                return None;
            }

            match self.stream.read(&mut self.chunk) {
                Ok(0) => {
                    // EOF; an unterminated trailing fragment is not a message
                    if !self.pending.is_empty() {
                        log::debug!("Discarding {} unterminated bytes at EOF", self.pending.len());
                    }
                    return None;
                }
                Ok(n) => self.pending.extend_from_slice(&self.chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    log::debug!("Read loop ended: {}", e);
                    return None;
                }
            }
        }
    }
}

impl Iterator for LineReader {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.next_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryLinkStream;
    use std::io::Read as _;

    #[test]
    fn send_line_appends_terminator_and_flushes() {
        let (a, mut b) = MemoryLinkStream::pair();
        let (session, _reader) = Session::open(Box::new(a)).unwrap();
        session.send_line(r#"{"t":"pkg_end"}"#).unwrap();
        session.close();

        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match b.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
        assert_eq!(received, b"{\"t\":\"pkg_end\"}\n");
    }

    #[test]
    fn line_reader_splits_and_ends_on_close() {
        let (a, b) = MemoryLinkStream::pair();
        let (_session, reader) = Session::open(Box::new(a)).unwrap();

        let mut remote = b.clone();
        remote.write_all(b"one\ntwo\r\npartial").unwrap();
        b.shutdown();

        let lines: Vec<String> = reader.collect();
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn close_is_idempotent_and_kills_send() {
        let (a, _b) = MemoryLinkStream::pair();
        let (session, _reader) = Session::open(Box::new(a)).unwrap();
        assert!(session.is_alive());
        session.close();
        session.close();
        assert!(!session.is_alive());
        assert!(matches!(
            session.send_line("x"),
            Err(crate::error::Error::LinkClosed)
        ));
    }

    #[test]
    fn send_error_marks_session_dead() {
        let (a, b) = MemoryLinkStream::pair();
        let (session, _reader) = Session::open(Box::new(a)).unwrap();
        b.shutdown();
        assert!(session.send_line("x").is_err());
        assert!(!session.is_alive());
    }
}
