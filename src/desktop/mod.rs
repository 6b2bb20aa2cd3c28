//! Remote desktop capability: the control surface the agent drives and the
//! backend that creates or reconnects sandboxes.

pub mod http_backend;
#[cfg(test)]
pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DeskPilotResult;

/// Pixel coordinate. Signed because providers occasionally emit slightly
/// negative positions near the screen edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<[u32; 2]> for Resolution {
    fn from([width, height]: [u32; 2]) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Parameters for creating a fresh sandbox.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOptions {
    pub resolution: Resolution,
    pub dpi: u32,
    pub timeout_ms: u64,
}

/// One live remote desktop. All input coordinates are in device space.
#[async_trait]
pub trait RemoteDesktop: Send + Sync {
    fn sandbox_id(&self) -> &str;

    async fn set_timeout(&self, timeout: Duration) -> DeskPilotResult<()>;
    async fn kill(&self) -> DeskPilotResult<()>;
    async fn screen_size(&self) -> DeskPilotResult<Resolution>;

    async fn move_mouse(&self, at: Point) -> DeskPilotResult<()>;
    /// Clicks at the current cursor position when `at` is `None`.
    async fn left_click(&self, at: Option<Point>) -> DeskPilotResult<()>;
    async fn right_click(&self, at: Point) -> DeskPilotResult<()>;
    async fn middle_click(&self, at: Point) -> DeskPilotResult<()>;
    async fn double_click(&self, at: Point) -> DeskPilotResult<()>;
    async fn drag(&self, from: Point, to: Point) -> DeskPilotResult<()>;
    async fn write(&self, text: &str) -> DeskPilotResult<()>;
    /// Presses the keys together as one chord.
    async fn press(&self, keys: &[String]) -> DeskPilotResult<()>;
    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> DeskPilotResult<()>;

    /// PNG bytes at the device's native resolution.
    async fn screenshot(&self) -> DeskPilotResult<Vec<u8>>;

    /// Starts the viewer stream and returns its URL.
    async fn start_stream(&self) -> DeskPilotResult<String>;
}

/// Creates or reconnects to sandboxes.
#[async_trait]
pub trait DesktopBackend: Send + Sync {
    async fn create(
        &self,
        template_id: &str,
        options: &CreateOptions,
    ) -> DeskPilotResult<Arc<dyn RemoteDesktop>>;

    async fn connect(&self, sandbox_id: &str) -> DeskPilotResult<Arc<dyn RemoteDesktop>>;
}
