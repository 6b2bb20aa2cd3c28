use std::sync::Arc;

use crate::agent_engine::engine::ComputerStreamer;
use crate::config::ProvidersConfig;
use crate::desktop::{RemoteDesktop, Resolution};
use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::executor::coordinator::ResolutionScaler;
use crate::llm::provider::ComputerProtocol;
use crate::llm::providers::anthropic::AnthropicComputer;
use crate::llm::providers::openai::OpenAiComputer;
use crate::llm::types::ComputerModel;

/// Builds the streamer for a requested provider, substituting the other
/// provider once when construction fails.
pub struct StreamerFactory {
    providers: ProvidersConfig,
    client: reqwest::Client,
}

impl StreamerFactory {
    pub fn from_config(providers: &ProvidersConfig) -> Self {
        Self {
            providers: providers.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Construct exactly the requested variant; no fallback.
    pub async fn build(
        &self,
        model: ComputerModel,
        desktop: Arc<dyn RemoteDesktop>,
        resolution: Resolution,
    ) -> DeskPilotResult<ComputerStreamer> {
        let protocol: Box<dyn ComputerProtocol> = match model {
            ComputerModel::OpenAi => Box::new(OpenAiComputer::new(
                &self.providers.openai,
                self.client.clone(),
            )?),
            ComputerModel::Anthropic => Box::new(AnthropicComputer::new(
                &self.providers.anthropic,
                self.client.clone(),
            )?),
        };
        let scaler = ResolutionScaler::new(desktop.clone(), resolution, model.max_display()).await?;
        Ok(ComputerStreamer::new(model, protocol, desktop, scaler))
    }

    /// Construct `preferred`, or the other provider if `preferred` reports a
    /// configuration error. Only construction-time `Config` errors trigger the
    /// fallback.
    pub async fn get_streamer(
        &self,
        preferred: ComputerModel,
        desktop: Arc<dyn RemoteDesktop>,
        resolution: Resolution,
    ) -> DeskPilotResult<ComputerStreamer> {
        let first = match self.build(preferred, desktop.clone(), resolution).await {
            Ok(streamer) => return Ok(streamer),
            Err(DeskPilotError::Config(msg)) => msg,
            Err(other) => return Err(other),
        };

        let fallback = preferred.fallback();
        tracing::warn!(
            requested = %preferred,
            fallback = %fallback,
            reason = %first,
            "provider unavailable, trying fallback"
        );

        match self.build(fallback, desktop, resolution).await {
            Ok(streamer) => Ok(streamer),
            Err(DeskPilotError::Config(second)) => Err(DeskPilotError::Config(format!(
                "no AI provider available: {preferred}: {first}; {fallback}: {second}"
            ))),
            Err(other) => Err(other),
        }
    }
}
