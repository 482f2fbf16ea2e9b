//! Stdin framing for prompts sent to the worker.

/// Frame a prompt as one user message for the worker's stdin.
///
/// The caller appends the newline delimiter when writing the frame.
pub fn frame_user_message(prompt: &str) -> String {
    serde_json::json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": prompt,
        }
    })
    .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn frame_shape_matches_protocol() {
        let frame = frame_user_message("hello");
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "user");
        assert_eq!(value["message"]["role"], "user");
        assert_eq!(value["message"]["content"], "hello");
    }

    #[test]
    fn frame_is_a_single_line() {
        let frame = frame_user_message("line one\nline two");
        assert!(!frame.contains('\n'));
    }

    #[test]
    fn frame_escapes_quotes() {
        let frame = frame_user_message(r#"say "hi""#);
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["message"]["content"], r#"say "hi""#);
    }
}
