//! Per-request pipeline: obtain a sandbox, pick a streamer, relay its events.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::event_bus::EventSink;
use crate::agent_engine::state::StreamEvent;
use crate::config::DesktopConfig;
use crate::desktop::{CreateOptions, RemoteDesktop, Resolution};
use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::llm::registry::StreamerFactory;
use crate::llm::types::{ChatMessage, ComputerModel};
use crate::pool::SandboxPool;

pub const DEFAULT_RESOLUTION: [u32; 2] = [1024, 768];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub sandbox_id: Option<String>,
    #[serde(default = "default_resolution")]
    pub resolution: [u32; 2],
    #[serde(default)]
    pub model: ComputerModel,
}

fn default_resolution() -> [u32; 2] {
    DEFAULT_RESOLUTION
}

#[derive(Clone)]
pub struct ChatOrchestrator {
    pool: Arc<SandboxPool>,
    factory: Arc<StreamerFactory>,
    desktop: DesktopConfig,
}

impl ChatOrchestrator {
    pub fn new(pool: Arc<SandboxPool>, factory: Arc<StreamerFactory>, desktop: DesktopConfig) -> Self {
        Self {
            pool,
            factory,
            desktop,
        }
    }

    /// Runs setup and returns the event receiver. Any `Err` means nothing has
    /// been streamed yet.
    ///
    /// The sandbox goes back to the pool here only if `cancel` fired before
    /// streaming began. Once handed to the streamer it is left to its idle
    /// timeout.
    pub async fn start(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> DeskPilotResult<mpsc::Receiver<StreamEvent>> {
        let resolution = Resolution::from(request.resolution);
        let template_id = self.desktop.template_id.as_str();

        let existing = request.sandbox_id.as_deref().filter(|id| !id.is_empty());
        let (desktop, created) = match existing {
            None => {
                let (desktop, vnc_url) = self.create_sandbox(template_id, resolution).await?;
                let event = StreamEvent::SandboxCreated {
                    sandbox_id: desktop.sandbox_id().to_string(),
                    vnc_url,
                };
                (desktop, Some(event))
            }
            Some(id) => {
                let desktop = self.pool.backend().connect(id).await.map_err(|e| match e {
                    DeskPilotError::ResourceConnect(_) => e,
                    other => DeskPilotError::ResourceConnect(other.to_string()),
                })?;
                tracing::info!(sandbox_id = id, "connected to existing sandbox");
                (desktop, None)
            }
        };

        let timeout = Duration::from_millis(self.desktop.timeout_ms);
        if let Err(e) = desktop.set_timeout(timeout).await {
            tracing::warn!(sandbox_id = %desktop.sandbox_id(), error = %e, "failed to refresh sandbox timeout");
        }

        if cancel.is_cancelled() {
            tracing::info!(sandbox_id = %desktop.sandbox_id(), "request cancelled during setup");
            if created.is_some() {
                self.pool.release(template_id, desktop).await;
            }
            return Err(DeskPilotError::Cancelled);
        }

        let (sink, rx) = EventSink::channel();

        if request.messages.is_empty() {
            if let Some(event) = created {
                sink.emit(event).await;
            }
            sink.emit(StreamEvent::done()).await;
            return Ok(rx);
        }

        let streamer = self
            .factory
            .get_streamer(request.model, desktop.clone(), resolution)
            .await?;

        // Streamer construction queries the desktop; the client may be gone by now.
        if cancel.is_cancelled() {
            tracing::info!(sandbox_id = %desktop.sandbox_id(), "request cancelled while selecting streamer");
            if created.is_some() {
                self.pool.release(template_id, desktop).await;
            }
            return Err(DeskPilotError::Cancelled);
        }

        tracing::info!(
            requested = %request.model,
            selected = %streamer.model(),
            messages = request.messages.len(),
            "streamer selected"
        );

        tokio::spawn(async move {
            if let Some(event) = created {
                if !sink.emit(event).await {
                    return;
                }
            }
            streamer.run(request.messages, cancel, sink).await;
        });

        Ok(rx)
    }

    async fn create_sandbox(
        &self,
        template_id: &str,
        resolution: Resolution,
    ) -> DeskPilotResult<(Arc<dyn RemoteDesktop>, String)> {
        let options = CreateOptions {
            resolution,
            dpi: self.desktop.dpi,
            timeout_ms: self.desktop.timeout_ms,
        };
        let desktop = self.pool.acquire(template_id, &options).await.map_err(|e| match e {
            DeskPilotError::ResourceConnect(_) | DeskPilotError::Config(_) => e,
            other => DeskPilotError::ResourceConnect(other.to_string()),
        })?;

        match desktop.start_stream().await {
            Ok(url) => {
                tracing::info!(sandbox_id = %desktop.sandbox_id(), vnc_url = %url, "sandbox stream started");
                Ok((desktop, url))
            }
            Err(e) => {
                // Nothing streamed yet; hand it back rather than leak it.
                self.pool.release(template_id, desktop).await;
                Err(DeskPilotError::ResourceConnect(format!("failed to start stream: {e}")))
            }
        }
    }
}
