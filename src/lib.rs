//! # wsrelay - WebSocket broadcast chat relay and load-test harness
//!
//! `wsrelay` accepts WebSocket connections on one path, serves a static chat
//! page on every other GET, and forwards each chat message to every other
//! connected participant. A companion harness drives many simulated clients
//! through the relay and records per-message latency.
//!
//! ## Features
//!
//! - **RFC 6455 transport** with strict frame validation and resource limits
//! - **Broadcast relay** with join and leave notices
//! - **Static file serving** for the bundled chat page
//! - **Graceful shutdown** closing every connection with 1001
//! - **Load-test harness** writing per-client latency results as JSON
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsrelay::{RelayConfig, RelayContext, RelayServer};
//!
//! let context = RelayContext::new(RelayConfig::default().with_port(9000));
//! let server = RelayServer::bind(context).await?;
//! server.run().await?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod harness;
pub mod logging;
pub mod message;
pub mod relay;
pub mod transport;

pub use config::{Limits, RelayConfig, Timeouts};
pub use context::RelayContext;
pub use error::{Error, Result};
pub use harness::{HarnessConfig, LoadTestCoordinator, RunReport};
pub use message::{Message, MessageKind};
pub use relay::{BroadcastRelay, ConnectionId, ConnectionRegistry, RelayServer};
pub use transport::{CloseCode, CloseFrame, OpCode, Role, WebSocket, WsMessage};
