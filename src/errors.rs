use thiserror::Error;

/// Text shown to the operator when the OpenAI account runs out of quota.
pub const QUOTA_EXCEEDED_MESSAGE: &str = "Our usage quota ran out for this month. \
Please visit GitHub, self host the repository and use your own API keys to continue.";

/// Generic text for any other provider failure.
pub const PROVIDER_FAILURE_MESSAGE: &str = "An error occurred with the AI service. Please try again.";

#[derive(Debug, Error)]
pub enum DeskPilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to connect to sandbox: {0}")]
    ResourceConnect(String),

    #[error("LLM provider error ({}): {message}", status.map(|s| s.to_string()).unwrap_or_else(|| "no status".into()))]
    Provider {
        status: Option<u16>,
        message: String,
        /// Set only by adapters whose vendor reports quota exhaustion as HTTP 429.
        quota_exceeded: bool,
    },

    #[error("Desktop error: {0}")]
    Desktop(String),

    #[error("Token script error: {0}")]
    TokenScript(String),

    #[error("Event stream parsing error: {0}")]
    SseParsing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Task cancelled")]
    Cancelled,
}

impl DeskPilotError {
    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Provider {
            status,
            message: message.into(),
            quota_exceeded: false,
        }
    }

    /// Message delivered to the client in an `error` event.
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider {
                quota_exceeded: true,
                ..
            } => QUOTA_EXCEEDED_MESSAGE.to_string(),
            Self::Config(msg) => msg.clone(),
            _ => PROVIDER_FAILURE_MESSAGE.to_string(),
        }
    }
}

impl serde::Serialize for DeskPilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type DeskPilotResult<T> = Result<T, DeskPilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_flag_selects_quota_message() {
        let err = DeskPilotError::Provider {
            status: Some(429),
            message: "rate limited".into(),
            quota_exceeded: true,
        };
        assert_eq!(err.user_message(), QUOTA_EXCEEDED_MESSAGE);
    }

    #[test]
    fn plain_429_stays_generic() {
        let err = DeskPilotError::provider(Some(429), "overloaded");
        assert_eq!(err.user_message(), PROVIDER_FAILURE_MESSAGE);
        assert!(err.to_string().contains("429"));
    }
}
