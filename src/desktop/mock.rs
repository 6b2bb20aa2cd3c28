//! Recording test doubles for the desktop capability.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::desktop::{
    CreateOptions, DesktopBackend, Point, RemoteDesktop, Resolution, ScrollDirection,
};
use crate::errors::{DeskPilotError, DeskPilotResult};

pub const FAKE_PNG: &[u8] = b"\x89PNG fake";

pub struct MockDesktop {
    id: String,
    screen: Option<Resolution>,
    calls: Mutex<Vec<String>>,
    kills: AtomicUsize,
    timeouts: Mutex<Vec<Duration>>,
    /// Control calls whose name starts with this prefix fail.
    fail_prefix: Option<String>,
    /// Fired when the screen size is queried.
    cancel_on_screen: Option<CancellationToken>,
}

impl MockDesktop {
    fn build(
        id: &str,
        screen: Option<Resolution>,
        fail_prefix: Option<&str>,
        cancel_on_screen: Option<CancellationToken>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            screen,
            calls: Mutex::new(Vec::new()),
            kills: AtomicUsize::new(0),
            timeouts: Mutex::new(Vec::new()),
            fail_prefix: fail_prefix.map(str::to_string),
            cancel_on_screen,
        })
    }

    pub fn new(id: &str, screen: Resolution) -> Arc<Self> {
        Self::build(id, Some(screen), None, None)
    }

    /// A desktop whose screen size cannot be queried.
    pub fn without_screen(id: &str) -> Arc<Self> {
        Self::build(id, None, None, None)
    }

    /// Control calls named `prefix...` return a desktop error.
    pub fn failing(id: &str, screen: Resolution, prefix: &str) -> Arc<Self> {
        Self::build(id, Some(screen), Some(prefix), None)
    }

    /// Control-surface calls only; screenshots and lifecycle calls are not recorded.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> DeskPilotResult<()> {
        if let Some(prefix) = &self.fail_prefix {
            if call.starts_with(prefix.as_str()) {
                return Err(DeskPilotError::Desktop(format!("{call} failed")));
            }
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl RemoteDesktop for MockDesktop {
    fn sandbox_id(&self) -> &str {
        &self.id
    }

    async fn set_timeout(&self, timeout: Duration) -> DeskPilotResult<()> {
        self.timeouts.lock().unwrap().push(timeout);
        Ok(())
    }

    async fn kill(&self) -> DeskPilotResult<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn screen_size(&self) -> DeskPilotResult<Resolution> {
        if let Some(cancel) = &self.cancel_on_screen {
            cancel.cancel();
        }
        self.screen
            .ok_or_else(|| DeskPilotError::Desktop("screen size unavailable".into()))
    }

    async fn move_mouse(&self, at: Point) -> DeskPilotResult<()> {
        self.record(format!("move {},{}", at.x, at.y))
    }

    async fn left_click(&self, at: Option<Point>) -> DeskPilotResult<()> {
        match at {
            Some(p) => self.record(format!("left_click {},{}", p.x, p.y)),
            None => self.record("left_click".into()),
        }
    }

    async fn right_click(&self, at: Point) -> DeskPilotResult<()> {
        self.record(format!("right_click {},{}", at.x, at.y))
    }

    async fn middle_click(&self, at: Point) -> DeskPilotResult<()> {
        self.record(format!("middle_click {},{}", at.x, at.y))
    }

    async fn double_click(&self, at: Point) -> DeskPilotResult<()> {
        self.record(format!("double_click {},{}", at.x, at.y))
    }

    async fn drag(&self, from: Point, to: Point) -> DeskPilotResult<()> {
        self.record(format!("drag {},{} -> {},{}", from.x, from.y, to.x, to.y))
    }

    async fn write(&self, text: &str) -> DeskPilotResult<()> {
        self.record(format!("write {text}"))
    }

    async fn press(&self, keys: &[String]) -> DeskPilotResult<()> {
        self.record(format!("press {}", keys.join("+")))
    }

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> DeskPilotResult<()> {
        self.record(format!("scroll {direction:?} {amount}"))
    }

    async fn screenshot(&self) -> DeskPilotResult<Vec<u8>> {
        Ok(FAKE_PNG.to_vec())
    }

    async fn start_stream(&self) -> DeskPilotResult<String> {
        Ok(format!("https://view.test/{}", self.id))
    }
}

/// Hands out fresh `MockDesktop`s and keeps them for inspection.
pub struct MockBackend {
    screen: Resolution,
    created: Mutex<Vec<Arc<MockDesktop>>>,
    fail_connect: bool,
    cancel_on_screen: Option<CancellationToken>,
}

impl MockBackend {
    fn build(screen: Resolution, fail_connect: bool, cancel_on_screen: Option<CancellationToken>) -> Arc<Self> {
        Arc::new(Self {
            screen,
            created: Mutex::new(Vec::new()),
            fail_connect,
            cancel_on_screen,
        })
    }

    pub fn new(screen: Resolution) -> Arc<Self> {
        Self::build(screen, false, None)
    }

    pub fn failing_connect(screen: Resolution) -> Arc<Self> {
        Self::build(screen, true, None)
    }

    /// Desktops it hands out fire `cancel` when their screen size is queried.
    pub fn cancelling_on_screen(screen: Resolution, cancel: CancellationToken) -> Arc<Self> {
        Self::build(screen, false, Some(cancel))
    }

    fn desktop(&self, id: &str) -> Arc<MockDesktop> {
        MockDesktop::build(id, Some(self.screen), None, self.cancel_on_screen.clone())
    }

    pub fn created(&self) -> Vec<Arc<MockDesktop>> {
        self.created.lock().unwrap().clone()
    }

    pub fn create_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl DesktopBackend for MockBackend {
    async fn create(
        &self,
        _template_id: &str,
        _options: &CreateOptions,
    ) -> DeskPilotResult<Arc<dyn RemoteDesktop>> {
        let mut created = self.created.lock().unwrap();
        let desktop = self.desktop(&format!("sbx-{}", created.len() + 1));
        created.push(desktop.clone());
        Ok(desktop as Arc<dyn RemoteDesktop>)
    }

    async fn connect(&self, sandbox_id: &str) -> DeskPilotResult<Arc<dyn RemoteDesktop>> {
        if self.fail_connect {
            return Err(DeskPilotError::ResourceConnect(format!(
                "sandbox {sandbox_id} not found"
            )));
        }
        let desktop = self.desktop(sandbox_id);
        self.created.lock().unwrap().push(desktop.clone());
        Ok(desktop as Arc<dyn RemoteDesktop>)
    }
}
