//! tether daemon library
//!
//! Keeps a single long-lived worker process alive and bridges
//! request/response calls onto its line-delimited streaming-JSON stdio
//! protocol:
//! - Supervisor: worker lifecycle, crash recovery with capped exponential
//!   backoff
//! - Bridge: `send(prompt) -> reply` with FIFO serialization and
//!   per-request timeouts

pub mod bridge;
pub mod supervisor;
