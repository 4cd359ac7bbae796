//! pollcast library
//!
//! Real-time polls served over HTTP and WebSocket. Each poll is owned by a
//! single actor task that applies vote toggles, persists them before
//! acknowledging, and fans the result out to live viewers.

pub mod cli;
pub mod config;
pub mod identity;
pub mod polls;
pub mod server;
pub mod tracing;
