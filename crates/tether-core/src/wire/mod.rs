//! Wire protocol for the supervised worker process.
//!
//! The worker speaks newline-delimited JSON on both stdio streams: the
//! bridge writes one framed user message per request to stdin, and the
//! worker emits a sequence of event objects on stdout, terminated by a
//! `result` event. Parsing follows a tolerant reader pattern: non-JSON
//! lines and unknown event types are discarded, never errors.

mod frame;
mod parser;
mod types;

pub use frame::frame_user_message;
pub use parser::parse_line;
pub use types::*;
