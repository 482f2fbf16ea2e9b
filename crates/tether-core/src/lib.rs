//! Core library for tether.
//!
//! Shared pieces used by the daemon:
//! - Wire protocol for the supervised worker (newline-delimited JSON)
//! - Configuration resolution
//! - Error types
//! - Tracing initialization

pub mod config;
pub mod error;
pub mod tracing_init;
pub mod wire;

pub use error::{Error, Result};
