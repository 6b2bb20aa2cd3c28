use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DesktopConfig;
use crate::desktop::{
    CreateOptions, DesktopBackend, Point, RemoteDesktop, Resolution, ScrollDirection,
};
use crate::errors::{DeskPilotError, DeskPilotResult};

/// Sandbox gateway client. One instance per process; cloning shares the
/// underlying connection pool.
#[derive(Clone)]
pub struct HttpDesktopBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpDesktopBackend {
    pub fn from_config(cfg: &DesktopConfig) -> DeskPilotResult<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| DeskPilotError::Config("E2B API key not found".into()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn desktop(&self, sandbox_id: String) -> HttpDesktop {
        HttpDesktop {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            sandbox_id,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
    #[serde(rename = "templateID")]
    template_id: &'a str,
    timeout_ms: u64,
    resolution: [u32; 2],
    dpi: u32,
}

#[derive(Deserialize)]
struct CreateResponse {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
}

#[async_trait]
impl DesktopBackend for HttpDesktopBackend {
    async fn create(
        &self,
        template_id: &str,
        options: &CreateOptions,
    ) -> DeskPilotResult<Arc<dyn RemoteDesktop>> {
        let body = CreateRequest {
            template_id,
            timeout_ms: options.timeout_ms,
            resolution: [options.resolution.width, options.resolution.height],
            dpi: options.dpi,
        };
        let response = self
            .client
            .post(format!("{}/sandboxes", self.base_url))
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeskPilotError::ResourceConnect(e.to_string()))?;
        let response = check_status(response)
            .await
            .map_err(|e| DeskPilotError::ResourceConnect(e.to_string()))?;
        let created: CreateResponse = response
            .json()
            .await
            .map_err(|e| DeskPilotError::ResourceConnect(e.to_string()))?;

        tracing::info!(sandbox_id = %created.sandbox_id, template = template_id, "sandbox created");
        Ok(Arc::new(self.desktop(created.sandbox_id)))
    }

    async fn connect(&self, sandbox_id: &str) -> DeskPilotResult<Arc<dyn RemoteDesktop>> {
        let response = self
            .client
            .get(format!("{}/sandboxes/{}", self.base_url, sandbox_id))
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| DeskPilotError::ResourceConnect(e.to_string()))?;
        check_status(response)
            .await
            .map_err(|e| DeskPilotError::ResourceConnect(e.to_string()))?;

        tracing::info!(sandbox_id, "connected to existing sandbox");
        Ok(Arc::new(self.desktop(sandbox_id.to_string())))
    }
}

pub struct HttpDesktop {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    sandbox_id: String,
}

/// Body of `POST /sandboxes/{id}/input`.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum InputOp<'a> {
    MoveMouse { x: i32, y: i32 },
    LeftClick {
        #[serde(skip_serializing_if = "Option::is_none")]
        x: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        y: Option<i32>,
    },
    RightClick { x: i32, y: i32 },
    MiddleClick { x: i32, y: i32 },
    DoubleClick { x: i32, y: i32 },
    Drag { from: [i32; 2], to: [i32; 2] },
    Write { text: &'a str },
    Press { keys: &'a [String] },
    Scroll { direction: ScrollDirection, amount: u32 },
}

#[derive(Deserialize)]
struct StreamResponse {
    url: String,
}

impl HttpDesktop {
    fn url(&self, suffix: &str) -> String {
        format!("{}/sandboxes/{}{}", self.base_url, self.sandbox_id, suffix)
    }

    async fn input(&self, op: InputOp<'_>) -> DeskPilotResult<()> {
        tracing::debug!(sandbox_id = %self.sandbox_id, ?op, "desktop input");
        let response = self
            .client
            .post(self.url("/input"))
            .header("X-API-Key", &self.api_key)
            .json(&op)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteDesktop for HttpDesktop {
    fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    async fn set_timeout(&self, timeout: Duration) -> DeskPilotResult<()> {
        let response = self
            .client
            .post(self.url("/timeout"))
            .header("X-API-Key", &self.api_key)
            .json(&serde_json::json!({ "timeoutMs": timeout.as_millis() as u64 }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn kill(&self) -> DeskPilotResult<()> {
        let response = self
            .client
            .delete(self.url(""))
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;
        check_status(response).await?;
        tracing::info!(sandbox_id = %self.sandbox_id, "sandbox killed");
        Ok(())
    }

    async fn screen_size(&self) -> DeskPilotResult<Resolution> {
        let response = self
            .client
            .get(self.url("/screen"))
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json::<Resolution>().await?)
    }

    async fn move_mouse(&self, at: Point) -> DeskPilotResult<()> {
        self.input(InputOp::MoveMouse { x: at.x, y: at.y }).await
    }

    async fn left_click(&self, at: Option<Point>) -> DeskPilotResult<()> {
        self.input(InputOp::LeftClick {
            x: at.map(|p| p.x),
            y: at.map(|p| p.y),
        })
        .await
    }

    async fn right_click(&self, at: Point) -> DeskPilotResult<()> {
        self.input(InputOp::RightClick { x: at.x, y: at.y }).await
    }

    async fn middle_click(&self, at: Point) -> DeskPilotResult<()> {
        self.input(InputOp::MiddleClick { x: at.x, y: at.y }).await
    }

    async fn double_click(&self, at: Point) -> DeskPilotResult<()> {
        self.input(InputOp::DoubleClick { x: at.x, y: at.y }).await
    }

    async fn drag(&self, from: Point, to: Point) -> DeskPilotResult<()> {
        self.input(InputOp::Drag {
            from: [from.x, from.y],
            to: [to.x, to.y],
        })
        .await
    }

    async fn write(&self, text: &str) -> DeskPilotResult<()> {
        self.input(InputOp::Write { text }).await
    }

    async fn press(&self, keys: &[String]) -> DeskPilotResult<()> {
        self.input(InputOp::Press { keys }).await
    }

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> DeskPilotResult<()> {
        self.input(InputOp::Scroll { direction, amount }).await
    }

    async fn screenshot(&self) -> DeskPilotResult<Vec<u8>> {
        let response = self
            .client
            .get(self.url("/screenshot"))
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn start_stream(&self) -> DeskPilotResult<String> {
        let response = self
            .client
            .post(self.url("/stream"))
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;
        let response = check_status(response).await?;
        let stream: StreamResponse = response.json().await?;
        Ok(stream.url)
    }
}

async fn check_status(response: reqwest::Response) -> DeskPilotResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(DeskPilotError::Desktop(format!("{status}: {body}")))
}
