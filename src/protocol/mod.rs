//! Line-delimited message protocol shared by both ends of the link.
//!
//! One message per line of UTF-8 text, one JSON object per message, field
//! `t` selecting the type. The decoder is forward-tolerant: unknown tags,
//! unknown fields and malformed lines never fail, they come back as
//! [`Message::Unknown`] so the caller can log and move on.

mod codec;
mod messages;

pub use codec::{decode, encode};
pub use messages::{
    DisplaySettings, Message, NotificationInfo, PackageChunk, PackageStart, RouteSummary,
    StateUpdate, StepInfo, TileRequest, TileResponse, Waypoint, WifiCredentials,
};
