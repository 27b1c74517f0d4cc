//! Connection managers for both ends of the link.
//!
//! [`client`] keeps exactly one outbound session alive to the counterpart
//! device, reconnecting forever. [`server`] accepts any number of inbound
//! sessions on parallel acceptors and broadcasts application traffic to all
//! of them.

pub mod client;
pub mod server;

pub use client::{
    ClientHandler, ConnectStrategy, LinkClient, PeerAddr, PeerDirectory, SerialStrategy,
    TcpStrategy,
};
pub use server::{Acceptor, LinkServer, ServerHandler};
