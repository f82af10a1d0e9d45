//! Load-test harness: many simulated participants connect to a relay,
//! start together, exchange messages and record how long broadcasts take
//! to arrive.

pub mod barrier;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod metrics;

pub use barrier::CountdownBarrier;
pub use client::{ClientState, LoadTestClient, client_id};
pub use config::{HarnessArgs, HarnessConfig};
pub use coordinator::LoadTestCoordinator;
pub use metrics::{ClientMetrics, RunReport, RunSummary, Timing, results_file_name};
