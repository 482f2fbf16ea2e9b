//! Tolerant parser for worker stdout lines.

use serde_json::Value;

use super::types::{AssistantEvent, ResultEvent, WorkerEvent};

/// Parse a single stdout line from the worker.
///
/// Returns `None` when the line is not JSON or has no `type` discriminator;
/// the worker's protocol may interleave plain diagnostic output on stdout,
/// so this is not an error condition.
pub fn parse_line(line: &str) -> Option<WorkerEvent> {
    let raw: Value = serde_json::from_str(line.trim()).ok()?;
    let msg_type = raw.get("type")?.as_str()?;

    match msg_type {
        "assistant" => Some(parse_assistant(&raw)),
        "result" => Some(parse_result(&raw)),
        other => Some(WorkerEvent::Ignored {
            msg_type: other.to_string(),
        }),
    }
}

fn parse_assistant(raw: &Value) -> WorkerEvent {
    let msg = raw.get("message").unwrap_or(raw);

    let text_blocks = msg
        .get("content")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|block| {
                    if block.get("type")?.as_str()? != "text" {
                        return None;
                    }
                    Some(block.get("text")?.as_str()?.to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    WorkerEvent::Assistant(AssistantEvent { text_blocks })
}

fn parse_result(raw: &Value) -> WorkerEvent {
    let result = raw.get("result").and_then(Value::as_str).map(String::from);

    let subtype = raw.get("subtype").and_then(Value::as_str).unwrap_or("success");
    let is_error = raw
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || subtype.starts_with("error");

    WorkerEvent::Result(ResultEvent { result, is_error })
}
