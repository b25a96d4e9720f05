//! Alert feed: a reconnecting stream client framing raw CAP messages.
//!
//! - [`FeedConnection`] connects to the streaming hosts and queues parsed alerts
//! - [`FrameBuffer`] extracts `<?xml ... </alert>` frames from the byte stream
//! - [`FeedLink`] lets the heartbeat watchdog force a reconnection

mod connection;
mod framer;
mod link;

pub use connection::{Backoff, FeedConnection, FeedError, socket_address};
pub use framer::FrameBuffer;
pub use link::FeedLink;
