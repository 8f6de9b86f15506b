//! Messages the foreground page posts into the worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message type tag for the personalization message.
pub const USER_DATA: &str = "USER_DATA";

/// A message the worker understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    /// Display name used to personalize notifications.
    #[serde(rename = "USER_DATA")]
    UserData { name: String },
}

impl WorkerMessage {
    pub fn user_data(name: impl Into<String>) -> Self {
        Self::UserData { name: name.into() }
    }

    /// Parse a posted message. Anything that is not exactly a known shape
    /// yields `None`.
    pub fn parse(data: &Value) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        match self {
            WorkerMessage::UserData { name } => {
                serde_json::json!({ "type": USER_DATA, "name": name })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_user_data() {
        let msg = WorkerMessage::parse(&json!({ "type": "USER_DATA", "name": "Alice" }));
        assert_eq!(msg, Some(WorkerMessage::user_data("Alice")));
    }

    #[test]
    fn test_parse_ignores_other_shapes() {
        let ignored = [
            json!(null),
            json!("USER_DATA"),
            json!({ "type": "SKIP_WAITING" }),
            json!({ "type": "USER_DATA" }),
            json!({ "type": "USER_DATA", "name": 42 }),
            json!({ "name": "Alice" }),
        ];
        for value in ignored {
            assert_eq!(WorkerMessage::parse(&value), None, "{value}");
        }
    }

    #[test]
    fn test_to_value_parses_back() {
        let msg = WorkerMessage::user_data("Bo");
        assert_eq!(msg.to_value(), json!({ "type": "USER_DATA", "name": "Bo" }));
        assert_eq!(WorkerMessage::parse(&msg.to_value()), Some(msg));
    }
}
