//! DrishtiLink - Navigation streaming link between a handheld and a
//! head-worn display
//!
//! This library provides the core components for streaming live navigation
//! state (position, route, turn-by-turn steps), display settings and map
//! tiles over an unreliable short-range link, plus bulk package transfer.
//!
//! ## Architecture
//!
//! - **Wire protocol** (`protocol`): newline-delimited JSON, one message
//!   per line, tolerant decoder
//! - **Transport** (`transport`): blocking line streams over TCP, serial
//!   or in-memory pipes, with a per-session write lock
//! - **Connection managers** (`link`): reconnecting client for the display
//!   side, multi-acceptor broadcasting server for the handheld side
//! - **Tiles** (`tiles`): bounded LRU cache with direct HTTP fetch or
//!   proxied fetch over the link
//! - **Navigation** (`nav`): turn-by-turn state machine with an OSRM
//!   router backend
//! - **Bulk transfer** (`bulk`): chunked package push

pub mod app;
pub mod bulk;
pub mod config;
pub mod error;
pub mod link;
pub mod nav;
pub mod protocol;
pub mod tiles;
pub mod transport;
pub mod workers;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
