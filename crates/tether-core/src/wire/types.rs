//! Event types observed on the worker's stdout.

/// Canonical events parsed from one stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Assistant output; text blocks contribute to the reply being assembled.
    Assistant(AssistantEvent),
    /// Terminal event for the current exchange.
    Result(ResultEvent),
    /// Well-formed JSON with a `type` the bridge does not act on.
    Ignored { msg_type: String },
}

/// An `assistant` event: zero or more text blocks, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantEvent {
    pub text_blocks: Vec<String>,
}

/// A `result` event terminating one request/response exchange.
///
/// `result` carries the worker's own summary text, used as the reply when
/// no assistant text blocks were streamed. `is_error` is a best-effort
/// flag; the bridge surfaces it without interpreting the worker's error
/// semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultEvent {
    pub result: Option<String>,
    pub is_error: bool,
}
