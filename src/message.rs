//! Messages passed to handlers and the replies they produce.

use crate::error::ReplyDecodeError;
use serde_json::Value;

/// Named output fields returned by a handler.
pub type Fields = serde_json::Map<String, Value>;

/// Field carrying the frame payload.
pub const DATA_FIELD: &str = "data";
/// Field a handler sets to answer the peer.
pub const REPLY_FIELD: &str = "reply";

/// One frame read from a connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Frame payload with the delimiter stripped.
    pub data: String,
}

impl Message {
    pub fn new(data: impl Into<String>) -> Self {
        Message { data: data.into() }
    }

    /// Build a message from raw frame bytes. Invalid UTF-8 is replaced with
    /// U+FFFD rather than rejected.
    pub fn from_frame(frame: &[u8]) -> Self {
        Message {
            data: String::from_utf8_lossy(frame).into_owned(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(DATA_FIELD.to_string(), Value::String(self.data.clone()));
        fields
    }
}

/// Reply decoded from a handler's output fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    pub reply: String,
}

impl Reply {
    /// Read the `reply` field. A missing or null field is an empty reply;
    /// numbers and booleans are taken in their textual form.
    pub fn from_fields(fields: &Fields) -> Result<Self, ReplyDecodeError> {
        let reply = match fields.get(REPLY_FIELD) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Array(_)) => return Err(ReplyDecodeError { kind: "array" }),
            Some(Value::Object(_)) => return Err(ReplyDecodeError { kind: "object" }),
        };
        Ok(Reply { reply })
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(REPLY_FIELD.to_string(), Value::String(self.reply.clone()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_message_from_frame() {
        assert_eq!(Message::from_frame(b"hello").data, "hello");
        assert_eq!(Message::from_frame(b"a\xffb").data, "a\u{fffd}b");
        assert!(Message::from_frame(b"").is_empty());
    }

    #[test]
    fn test_message_to_fields() {
        let msg = Message::new("payload");
        assert_eq!(msg.to_fields(), fields(json!({"data": "payload"})));
    }

    #[test]
    fn test_reply_from_fields() {
        let reply = Reply::from_fields(&fields(json!({"reply": "A"}))).unwrap();
        assert_eq!(reply.reply, "A");

        let reply = Reply::from_fields(&fields(json!({"other": 1}))).unwrap();
        assert_eq!(reply.reply, "");

        let reply = Reply::from_fields(&fields(json!({"reply": null}))).unwrap();
        assert_eq!(reply.reply, "");
    }

    #[test]
    fn test_reply_coerces_scalars() {
        let reply = Reply::from_fields(&fields(json!({"reply": 42}))).unwrap();
        assert_eq!(reply.reply, "42");
        let reply = Reply::from_fields(&fields(json!({"reply": true}))).unwrap();
        assert_eq!(reply.reply, "true");
    }

    #[test]
    fn test_reply_rejects_composites() {
        let err = Reply::from_fields(&fields(json!({"reply": [1, 2]}))).unwrap_err();
        assert_eq!(err.kind, "array");
        let err = Reply::from_fields(&fields(json!({"reply": {"a": 1}}))).unwrap_err();
        assert_eq!(err.kind, "object");
    }

    #[test]
    fn test_reply_to_fields() {
        let reply = Reply { reply: "ok".into() };
        assert_eq!(Reply::from_fields(&reply.to_fields()).unwrap(), reply);
    }
}
