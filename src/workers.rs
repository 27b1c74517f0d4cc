//! Bounded worker pool for tile fetches and other background jobs.
//!
//! Fixed thread count so fetch bursts never spawn unbounded threads or
//! block a session's read loop.

use crate::error::Result;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send>;

/// Fixed-size pool of named worker threads fed by a channel.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers named `<name>-<index>`.
    pub fn new(name: &str, size: usize) -> Result<Self> {
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = unbounded();
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })?;
            workers.push(handle);
        }
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queue a job. Silently dropped if the pool is already shut down.
    pub fn execute<F: FnOnce() + Send + 'static>(&self, job: F) {
        if let Some(sender) = &self.sender {
            if sender.send(Box::new(job)).is_err() {
                log::warn!("Worker pool closed, job dropped");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain outstanding jobs and exit
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
