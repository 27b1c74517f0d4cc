//! In-memory duplex pair for testing
//!
//! Two connected endpoints with blocking reads, so session and
//! connection-manager code can be exercised without sockets or hardware.

use super::LinkStream;
use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;

struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
}

/// One direction of the pair
struct Pipe {
    state: Mutex<PipeState>,
    cond: Condvar,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Pipe {
            state: Mutex::new(PipeState {
                buf: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        })
    }

    fn read(&self, out: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock();
        loop {
            if !state.buf.is_empty() {
                let n = state.buf.len().min(out.len());
                for slot in out.iter_mut().take(n) {
                    *slot = state.buf.pop_front().unwrap();
                }
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            self.cond.wait(&mut state);
        }
    }

    fn write(&self, data: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "memory link closed",
            ));
        }
        state.buf.extend(data);
        self.cond.notify_all();
        Ok(data.len())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }
}

/// One endpoint of an in-memory duplex link
#[derive(Clone)]
pub struct MemoryLinkStream {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
    label: String,
}

impl MemoryLinkStream {
    /// Create a connected pair of endpoints
    pub fn pair() -> (MemoryLinkStream, MemoryLinkStream) {
        let a_to_b = Pipe::new();
        let b_to_a = Pipe::new();
        (
            MemoryLinkStream {
                incoming: Arc::clone(&b_to_a),
                outgoing: Arc::clone(&a_to_b),
                label: "memory-a".to_string(),
            },
            MemoryLinkStream {
                incoming: a_to_b,
                outgoing: b_to_a,
                label: "memory-b".to_string(),
            },
        )
    }
}

impl Read for MemoryLinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.incoming.read(buf)
    }
}

impl Write for MemoryLinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.outgoing.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LinkStream for MemoryLinkStream {
    fn try_clone(&self) -> Result<Box<dyn LinkStream>> {
        Ok(Box::new(self.clone()))
    }

    fn shutdown(&self) {
        self.incoming.close();
        self.outgoing.close();
    }

    fn peer(&self) -> String {
        self.label.clone()
    }
}
