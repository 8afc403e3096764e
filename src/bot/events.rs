//! OneBot-V11 event decoding.
//!
//! Events arrive as JSON frames carrying `post_type`. Message events carry
//! `message` either as a plain string or as a segment array where segments
//! with `type == "text"` contribute their `data.text`.

use crate::store::SourceKind;

/// A chat message event, reduced to what the dispatcher needs.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub user_id: i64,
    pub source_kind: SourceKind,
    pub group_id: Option<i64>,
    pub text: String,
}

impl MessageEvent {
    /// Where replies go: the group for group messages, the user otherwise.
    pub fn source_id(&self) -> i64 {
        match self.source_kind {
            SourceKind::Group => self.group_id.unwrap_or(self.user_id),
            SourceKind::Private => self.user_id,
        }
    }
}

/// Extracts the plain text out of a OneBot `message` value.
fn extract_text(message: &serde_json::Value) -> String {
    match message {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(segments) => segments
            .iter()
            .filter(|seg| seg.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|seg| seg.pointer("/data/text").and_then(|t| t.as_str()))
            .collect(),
        _ => String::new(),
    }
}

/// Parses a OneBot event into a `MessageEvent`, returning None for anything
/// that is not a message event.
pub fn parse_message_event(event: &serde_json::Value) -> Option<MessageEvent> {
    if event.get("post_type").and_then(|v| v.as_str()) != Some("message") {
        return None;
    }

    let user_id = event.get("user_id").and_then(|v| v.as_i64())?;
    let source_kind = match event.get("message_type").and_then(|v| v.as_str())? {
        "group" => SourceKind::Group,
        "private" => SourceKind::Private,
        _ => return None,
    };
    let group_id = event.get("group_id").and_then(|v| v.as_i64());
    let text = event
        .get("message")
        .map(extract_text)
        .unwrap_or_default()
        .trim()
        .to_string();

    Some(MessageEvent {
        user_id,
        source_kind,
        group_id,
        text,
    })
}

/// The platform's at-mention prefix for group replies.
pub fn at_mention(user_id: i64, text: &str) -> String {
    format!("[CQ:at,qq={}] {}", user_id, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_private_message_string() {
        let event = serde_json::json!({
            "post_type": "message",
            "message_type": "private",
            "user_id": 10001,
            "message": " /sso help ",
        });
        let msg = parse_message_event(&event).unwrap();
        assert_eq!(msg.user_id, 10001);
        assert_eq!(msg.source_kind, SourceKind::Private);
        assert_eq!(msg.text, "/sso help");
        assert_eq!(msg.source_id(), 10001);
    }

    #[test]
    fn test_parse_group_message_segments() {
        let event = serde_json::json!({
            "post_type": "message",
            "message_type": "group",
            "user_id": 10001,
            "group_id": 12345,
            "message": [
                {"type": "at", "data": {"qq": "999"}},
                {"type": "text", "data": {"text": "/sso auth "}},
                {"type": "text", "data": {"text": "K7M3Q2"}},
            ],
        });
        let msg = parse_message_event(&event).unwrap();
        assert_eq!(msg.source_kind, SourceKind::Group);
        assert_eq!(msg.group_id, Some(12345));
        assert_eq!(msg.text, "/sso auth K7M3Q2");
        assert_eq!(msg.source_id(), 12345);
    }

    #[test]
    fn test_non_message_events_skipped() {
        let event = serde_json::json!({"post_type": "notice", "user_id": 1});
        assert!(parse_message_event(&event).is_none());

        let event = serde_json::json!({"status": "ok", "echo": "x"});
        assert!(parse_message_event(&event).is_none());
    }

    #[test]
    fn test_unknown_message_type_skipped() {
        let event = serde_json::json!({
            "post_type": "message",
            "message_type": "channel",
            "user_id": 10001,
            "message": "hi",
        });
        assert!(parse_message_event(&event).is_none());
    }

    #[test]
    fn test_at_mention_format() {
        assert_eq!(at_mention(10001, "done"), "[CQ:at,qq=10001] done");
    }
}
