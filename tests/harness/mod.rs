//! Shared helpers for relay integration tests.
//!
//! `TestRelay` runs a real relay on an ephemeral port with a temporary
//! static root; `TestClient` speaks WebSocket to it.

#![allow(dead_code)]

mod client;
mod server;

pub use client::{TestClient, http_request};
pub use server::{INDEX_BODY, TestRelay};
