//! The broadcast relay: connection registry, fan-out and the HTTP/WebSocket
//! front door.

pub mod broadcast;
pub mod registry;
pub mod server;
pub mod static_files;

pub use broadcast::BroadcastRelay;
pub use registry::{ConnectionId, ConnectionRegistry, Outbound, Peer};
pub use server::{RelayServer, SHUTDOWN_REASON};
pub use static_files::NOT_FOUND_BODY;
