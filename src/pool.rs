//! Bounded cache of idle sandboxes, one slot per template.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::PoolConfig;
use crate::desktop::{CreateOptions, DesktopBackend, RemoteDesktop};
use crate::errors::DeskPilotResult;

struct PooledSandbox {
    desktop: Arc<dyn RemoteDesktop>,
    last_used: DateTime<Utc>,
    /// Insertion order; breaks ties between equal timestamps.
    seq: u64,
    template_id: String,
}

#[derive(Default)]
struct PoolInner {
    entries: HashMap<String, PooledSandbox>,
    next_seq: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub size: usize,
    pub max_size: usize,
    pub enabled: bool,
    pub sandboxes: Vec<PooledSandboxInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PooledSandboxInfo {
    pub sandbox_id: String,
    pub template_id: String,
    pub last_used: DateTime<Utc>,
}

/// Owned by the server for the whole process lifetime and shared by
/// reference with every request. A single lock serialises acquire/release.
pub struct SandboxPool {
    backend: Arc<dyn DesktopBackend>,
    inner: Mutex<PoolInner>,
    max_size: usize,
    enabled: bool,
}

impl SandboxPool {
    pub fn new(backend: Arc<dyn DesktopBackend>, config: &PoolConfig) -> Self {
        if config.enabled {
            tracing::info!(max_size = config.size, "sandbox pool initialized");
        }
        Self {
            backend,
            inner: Mutex::new(PoolInner::default()),
            max_size: config.size,
            enabled: config.enabled,
        }
    }

    pub fn backend(&self) -> &Arc<dyn DesktopBackend> {
        &self.backend
    }

    /// Take the idle sandbox for `template_id` or create a new one.
    pub async fn acquire(
        &self,
        template_id: &str,
        options: &CreateOptions,
    ) -> DeskPilotResult<Arc<dyn RemoteDesktop>> {
        if !self.enabled {
            tracing::info!(template = template_id, "pool disabled, creating new sandbox");
            return self.backend.create(template_id, options).await;
        }

        let pooled = self.inner.lock().await.entries.remove(template_id);
        if let Some(pooled) = pooled {
            tracing::info!(sandbox_id = %pooled.desktop.sandbox_id(), "reusing pooled sandbox");
            let timeout = Duration::from_millis(options.timeout_ms);
            if let Err(e) = pooled.desktop.set_timeout(timeout).await {
                tracing::warn!(sandbox_id = %pooled.desktop.sandbox_id(), error = %e, "failed to reset pooled sandbox timeout");
            }
            return Ok(pooled.desktop);
        }

        tracing::info!(template = template_id, "no pooled sandbox available, creating new one");
        self.backend.create(template_id, options).await
    }

    /// Return a sandbox to the pool, evicting the least recently used entry
    /// when full. With pooling disabled the sandbox is destroyed.
    ///
    /// Displaced sandboxes are killed on a background task; this returns once
    /// the pool itself is updated.
    pub async fn release(&self, template_id: &str, desktop: Arc<dyn RemoteDesktop>) {
        if !self.enabled {
            tracing::info!(sandbox_id = %desktop.sandbox_id(), "pool disabled, closing sandbox");
            retire(vec![desktop]);
            return;
        }

        let mut doomed: Vec<Arc<dyn RemoteDesktop>> = Vec::new();
        let size = {
            let mut inner = self.inner.lock().await;

            // One slot per template: an occupant of the same slot is displaced.
            if let Some(previous) = inner.entries.remove(template_id) {
                if !Arc::ptr_eq(&previous.desktop, &desktop) {
                    doomed.push(previous.desktop);
                }
            }

            if inner.entries.len() >= self.max_size {
                if let Some(oldest) = oldest_key(&inner.entries) {
                    if let Some(evicted) = inner.entries.remove(&oldest) {
                        tracing::info!(sandbox_id = %evicted.desktop.sandbox_id(), "pool full, closing oldest sandbox");
                        doomed.push(evicted.desktop);
                    }
                }
            }

            if inner.entries.len() < self.max_size {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.entries.insert(
                    template_id.to_string(),
                    PooledSandbox {
                        desktop: desktop.clone(),
                        last_used: Utc::now(),
                        seq,
                        template_id: template_id.to_string(),
                    },
                );
            } else {
                // Zero capacity.
                doomed.push(desktop.clone());
            }
            inner.entries.len()
        };

        if !doomed.is_empty() {
            retire(doomed);
        }

        tracing::info!(
            sandbox_id = %desktop.sandbox_id(),
            size,
            max_size = self.max_size,
            "sandbox returned to pool"
        );
    }

    /// Destroy every pooled sandbox concurrently and empty the pool.
    pub async fn close_all(&self) {
        let entries: Vec<PooledSandbox> = {
            let mut inner = self.inner.lock().await;
            inner.entries.drain().map(|(_, v)| v).collect()
        };
        tracing::info!(count = entries.len(), "closing all pooled sandboxes");
        join_all(entries.iter().map(|p| kill_quietly(p.desktop.as_ref()))).await;
        tracing::info!("all pooled sandboxes closed");
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        let mut sandboxes: Vec<PooledSandboxInfo> = inner
            .entries
            .values()
            .map(|p| PooledSandboxInfo {
                sandbox_id: p.desktop.sandbox_id().to_string(),
                template_id: p.template_id.clone(),
                last_used: p.last_used,
            })
            .collect();
        sandboxes.sort_by_key(|s| s.last_used);
        PoolStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            enabled: self.enabled,
            sandboxes,
        }
    }
}

fn oldest_key(entries: &HashMap<String, PooledSandbox>) -> Option<String> {
    entries
        .iter()
        .min_by_key(|(_, p)| (p.last_used, p.seq))
        .map(|(k, _)| k.clone())
}

fn retire(doomed: Vec<Arc<dyn RemoteDesktop>>) {
    tokio::spawn(async move {
        join_all(doomed.iter().map(|d| kill_quietly(d.as_ref()))).await;
    });
}

/// Teardown is best-effort: failures are logged, never retried or surfaced.
async fn kill_quietly(desktop: &dyn RemoteDesktop) {
    if let Err(e) = desktop.kill().await {
        tracing::error!(sandbox_id = %desktop.sandbox_id(), error = %e, "failed to close sandbox");
    }
}
