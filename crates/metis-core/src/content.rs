//! Message content types
//!
//! A [`Content`] is one message body in a conversation: a role plus an
//! ordered list of [`Part`]s. Parts are a discriminated union, so a part
//! always carries exactly one kind of payload.

use serde::{Deserialize, Serialize};

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user input
    User,
    /// Model output
    Model,
    /// System instructions
    System,
}

impl Role {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
            Self::System => "system",
        }
    }
}

/// One unit of content within a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Plain text
    Text {
        /// The text payload
        text: String,
    },
    /// Inline binary data (images etc.)
    InlineData {
        /// MIME type, e.g. `image/png`
        mime_type: String,
        /// Raw bytes, base64 on the wire
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// A model-initiated function call
    FunctionCall {
        /// Caller-generated call id, echoed back in the response
        id: String,
        /// Function name
        name: String,
        /// JSON-object arguments
        args: serde_json::Map<String, serde_json::Value>,
    },
    /// The result of a function call
    FunctionResponse {
        /// The call id this result answers
        id: String,
        /// Arbitrary JSON result value
        response: serde_json::Value,
    },
}

impl Part {
    /// Create a text part
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create an inline-data part
    #[must_use]
    pub fn inline_data(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self::InlineData {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Create a function-call part
    #[must_use]
    pub fn function_call(
        id: impl Into<String>,
        name: impl Into<String>,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self::FunctionCall {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    /// Create a function-response part
    #[must_use]
    pub fn function_response(id: impl Into<String>, response: serde_json::Value) -> Self {
        Self::FunctionResponse {
            id: id.into(),
            response,
        }
    }
}

/// A message body: a role plus ordered parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Author role
    pub role: Role,
    /// Ordered content parts
    pub parts: Vec<Part>,
}

impl Content {
    /// Create a content with the given role and parts
    #[must_use]
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// Create a single-text user content
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Create a single-text model content
    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    /// Create a single-text system content
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(text)])
    }

    /// All non-empty text parts joined with newlines
    #[must_use]
    pub fn flattened_text(&self) -> String {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } if !text.is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();
        texts.join("\n")
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_as_str() {
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Model.as_str(), "model");
        assert_eq!(Role::System.as_str(), "system");
    }

    #[test]
    fn test_flattened_text_joins_with_newlines() {
        let content = Content::new(
            Role::System,
            vec![
                Part::text("first"),
                Part::text(""),
                Part::inline_data("image/png", vec![1, 2, 3]),
                Part::text("second"),
            ],
        );
        assert_eq!(content.flattened_text(), "first\nsecond");
    }

    #[test]
    fn test_part_serde_round_trip() {
        let mut args = serde_json::Map::new();
        args.insert("city".to_string(), serde_json::json!("Paris"));

        let parts = vec![
            Part::text("hello"),
            Part::inline_data("image/png", vec![0xde, 0xad]),
            Part::function_call("call_1", "get_weather", args),
            Part::function_response("call_1", serde_json::json!({"temp": 21})),
        ];

        for part in parts {
            let json = serde_json::to_string(&part).unwrap();
            let back: Part = serde_json::from_str(&json).unwrap();
            assert_eq!(part, back);
        }
    }

    #[test]
    fn test_inline_data_is_base64_on_the_wire() {
        let part = Part::inline_data("image/png", vec![1, 2, 3]);
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["data"], "AQID");
    }
}
