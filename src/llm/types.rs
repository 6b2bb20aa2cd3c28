use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent_engine::state::ComputerAction;
use crate::desktop::Resolution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One caller-owned conversation message, passed in verbatim each request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Provider selector carried on the wire as `"openai"` / `"anthropic"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ComputerModel {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl ComputerModel {
    /// The variant tried when this one cannot be constructed.
    pub fn fallback(self) -> Self {
        match self {
            ComputerModel::OpenAi => ComputerModel::Anthropic,
            ComputerModel::Anthropic => ComputerModel::OpenAi,
        }
    }

    /// Largest display the provider is told about.
    pub fn max_display(self) -> Resolution {
        match self {
            ComputerModel::OpenAi => Resolution::new(1024, 768),
            ComputerModel::Anthropic => Resolution::new(1280, 800),
        }
    }
}

impl fmt::Display for ComputerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputerModel::OpenAi => f.write_str("openai"),
            ComputerModel::Anthropic => f.write_str("anthropic"),
        }
    }
}

/// One tool call from a provider turn, already normalised to `ComputerAction`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub action: ComputerAction,
}

/// Everything the loop needs from one provider round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderTurn {
    /// Reasoning/explanatory text in the order the provider produced it.
    pub reasoning: Vec<String>,
    pub calls: Vec<ToolCallRequest>,
}

/// Per-call inputs that do not change between turns.
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub system_prompt: &'a str,
    pub display: Resolution,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_tags_round_trip() {
        let m: ComputerModel = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(m, ComputerModel::Anthropic);
        assert_eq!(serde_json::to_string(&ComputerModel::OpenAi).unwrap(), "\"openai\"");
        assert_eq!(m.fallback(), ComputerModel::OpenAi);
    }

    #[test]
    fn message_shape() {
        let m: ChatMessage = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(m, ChatMessage::user("hi"));
        assert!(serde_json::from_str::<ChatMessage>(r#"{"role":"system","content":"x"}"#).is_err());
    }
}
