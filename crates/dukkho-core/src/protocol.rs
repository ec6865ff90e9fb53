// Wire types shared by the relay endpoint and the chat client.

use serde::{Deserialize, Serialize};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }

    /// Parse the stored/serialized form. Returns `None` for anything other
    /// than `user` or `model`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "model" => Some(Role::Model),
            _ => None,
        }
    }
}

/// One message of a conversation, in chronological order. Alternation of
/// roles is not enforced anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<Turn>,
}

/// JSON body returned by the relay when a request fails before streaming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Turn::model("hi")).unwrap();
        assert_eq!(json, r#"{"role":"model","text":"hi"}"#);
    }

    #[test]
    fn chat_request_history_defaults_to_empty() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"hello"}"#).unwrap();
        assert_eq!(req.message, "hello");
        assert!(req.history.is_empty());
    }

    #[test]
    fn chat_request_with_history() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"message":"again","history":[{"role":"user","text":"a"},{"role":"model","text":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(req.history, vec![Turn::user("a"), Turn::model("b")]);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let res: Result<ChatRequest, _> = serde_json::from_str(
            r#"{"message":"x","history":[{"role":"system","text":"a"}]}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn error_body_omits_missing_details() {
        let body = ErrorBody {
            error: "API Key not configured".into(),
            details: None,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"error":"API Key not configured"}"#
        );
    }

    #[test]
    fn role_parse_round_trips_known_values() {
        assert_eq!(Role::parse(Role::User.as_str()), Some(Role::User));
        assert_eq!(Role::parse(Role::Model.as_str()), Some(Role::Model));
        assert_eq!(Role::parse("assistant"), None);
    }
}
