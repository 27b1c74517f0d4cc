//! Bulk package transfer over the line protocol.
//!
//! A payload is framed as one `PackageStart`, `totalChunks` base64 chunks
//! in strictly increasing index order, and one `PackageEnd`. Transfers are
//! not resumable; the receiver discards a partial payload when a new start
//! arrives or the link drops.

use crate::error::{Error, Result};
use crate::protocol::{Message, PackageChunk, PackageStart};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::io::Read;

/// Raw bytes per chunk; comfortably under the link MTU after base64
/// expansion (3072 raw bytes encode to 4096 characters).
pub const CHUNK_SIZE: usize = 3072;

/// Report progress every this many chunks (plus always on the last one)
pub const PROGRESS_INTERVAL: u32 = 20;

/// Stream a payload of known size as a chunked package transfer.
///
/// `send` is called once per protocol message; any send or read error
/// aborts the transfer. `progress` receives (chunks sent, total chunks) at
/// a coarse interval and always for the final chunk.
pub fn send_package<R, S, P>(
    mut source: R,
    total_size: u64,
    mut send: S,
    mut progress: P,
) -> Result<()>
where
    R: Read,
    S: FnMut(&Message) -> Result<()>,
    P: FnMut(u32, u32),
{
    let total_chunks = total_size.div_ceil(CHUNK_SIZE as u64) as u32;
    send(&Message::PackageStart(PackageStart {
        total_size,
        total_chunks,
    }))?;

    let mut remaining = total_size;
    let mut buf = vec![0u8; CHUNK_SIZE];
    for index in 0..total_chunks {
        let want = (remaining as usize).min(CHUNK_SIZE);
        source
            .read_exact(&mut buf[..want])
            .map_err(|e| Error::Other(format!("package source ended early: {}", e)))?;
        remaining -= want as u64;

        send(&Message::PackageChunk(PackageChunk {
            index,
            data: BASE64.encode(&buf[..want]),
        }))?;

        let sent = index + 1;
        if sent % PROGRESS_INTERVAL == 0 || sent == total_chunks {
            progress(sent, total_chunks);
        }
    }

    send(&Message::PackageEnd)
}

/// Reassembles a chunked package transfer on the receiving side.
///
/// Feed every inbound message through [`handle`](Self::handle); it returns
/// the complete payload once a consistent `PackageEnd` arrives. Anything
/// inconsistent (out-of-order index, bad base64, size mismatch) discards
/// the partial payload; the sender may simply start over.
#[derive(Default)]
pub struct PackageReceiver {
    active: bool,
    expected_size: u64,
    expected_chunks: u32,
    next_index: u32,
    buffer: Vec<u8>,
}

impl PackageReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a transfer is partially received.
    pub fn in_progress(&self) -> bool {
        self.active
    }

    /// Discard any partial payload (call on link loss).
    pub fn reset(&mut self) {
        if self.active {
            log::warn!(
                "Discarding partial package ({} of {} bytes)",
                self.buffer.len(),
                self.expected_size
            );
        }
        self.active = false;
        self.buffer = Vec::new();
        self.next_index = 0;
        self.expected_size = 0;
        self.expected_chunks = 0;
    }

    /// Process one inbound message. Non-package messages are ignored.
    pub fn handle(&mut self, msg: &Message) -> Option<Vec<u8>> {
        match msg {
            Message::PackageStart(start) => {
                self.reset();
                self.active = true;
                self.expected_size = start.total_size;
                self.expected_chunks = start.total_chunks;
                self.buffer = Vec::with_capacity(start.total_size as usize);
                log::info!(
                    "Package transfer started: {} bytes in {} chunks",
                    start.total_size,
                    start.total_chunks
                );
                None
            }
            Message::PackageChunk(chunk) => {
                if !self.active {
                    log::warn!("Package chunk {} without a start, ignored", chunk.index);
                    return None;
                }
                if chunk.index != self.next_index {
                    log::warn!(
                        "Package chunk out of order: got {}, expected {}",
                        chunk.index,
                        self.next_index
                    );
                    self.reset();
                    return None;
                }
                match BASE64.decode(&chunk.data) {
                    Ok(bytes) => {
                        self.buffer.extend_from_slice(&bytes);
                        self.next_index += 1;
                    }
                    Err(e) => {
                        log::warn!("Package chunk {} decode failed: {}", chunk.index, e);
                        self.reset();
                    }
                }
                None
            }
            Message::PackageEnd => {
                if !self.active {
                    return None;
                }
                let complete = self.next_index == self.expected_chunks
                    && self.buffer.len() as u64 == self.expected_size;
                if !complete {
                    log::warn!(
                        "Package end with {} of {} chunks, {} of {} bytes",
                        self.next_index,
                        self.expected_chunks,
                        self.buffer.len(),
                        self.expected_size
                    );
                    self.reset();
                    return None;
                }
                self.active = false;
                let payload = std::mem::take(&mut self.buffer);
                self.next_index = 0;
                log::info!("Package transfer complete: {} bytes", payload.len());
                Some(payload)
            }
            _ => None,
        }
    }
}
