// Model-space ↔ device-space coordinate mapping.
use std::sync::Arc;

use crate::desktop::{Point, RemoteDesktop, Resolution};
use crate::errors::{DeskPilotError, DeskPilotResult};

/// Translates between the display size advertised to the provider and the
/// sandbox's real screen. Fixed for the lifetime of one streamer.
pub struct ResolutionScaler {
    desktop: Arc<dyn RemoteDesktop>,
    actual: Resolution,
    scaled: Resolution,
    scale_x: f64,
    scale_y: f64,
}

impl ResolutionScaler {
    /// Queries the sandbox for its actual resolution. There is no fallback:
    /// an unknown screen size is a configuration error.
    pub async fn new(
        desktop: Arc<dyn RemoteDesktop>,
        requested: Resolution,
        max: Resolution,
    ) -> DeskPilotResult<Self> {
        let actual = desktop.screen_size().await.map_err(|e| {
            DeskPilotError::Config(format!("cannot determine sandbox resolution: {e}"))
        })?;
        Self::from_parts(desktop, requested, actual, max)
    }

    pub fn from_parts(
        desktop: Arc<dyn RemoteDesktop>,
        requested: Resolution,
        actual: Resolution,
        max: Resolution,
    ) -> DeskPilotResult<Self> {
        if actual.width == 0 || actual.height == 0 {
            return Err(DeskPilotError::Config(format!(
                "sandbox reported an empty screen {}x{}",
                actual.width, actual.height
            )));
        }
        if requested.width == 0 || requested.height == 0 {
            return Err(DeskPilotError::Config(format!(
                "invalid requested resolution {}x{}",
                requested.width, requested.height
            )));
        }

        let scaled = fit_within(requested, max);
        let scale_x = actual.width as f64 / scaled.width as f64;
        let scale_y = actual.height as f64 / scaled.height as f64;

        tracing::debug!(
            requested = %format!("{}x{}", requested.width, requested.height),
            scaled = %format!("{}x{}", scaled.width, scaled.height),
            actual = %format!("{}x{}", actual.width, actual.height),
            "resolution scaler ready"
        );

        Ok(Self {
            desktop,
            actual,
            scaled,
            scale_x,
            scale_y,
        })
    }

    /// Resolution advertised to the provider in tool declarations.
    pub fn scaled_resolution(&self) -> Resolution {
        self.scaled
    }

    pub fn actual_resolution(&self) -> Resolution {
        self.actual
    }

    /// `round(c * actual / scaled)` per component.
    pub fn to_device_space(&self, p: Point) -> Point {
        Point {
            x: (p.x as f64 * self.scale_x).round() as i32,
            y: (p.y as f64 * self.scale_y).round() as i32,
        }
    }

    /// Raw PNG at device resolution. Never resized: the provider reasons in
    /// scaled coordinates, not scaled pixels.
    pub async fn screenshot(&self) -> DeskPilotResult<Vec<u8>> {
        self.desktop.screenshot().await
    }
}

/// Shrinks `requested` to fit inside `max`, preserving aspect ratio.
pub fn fit_within(requested: Resolution, max: Resolution) -> Resolution {
    if requested.width <= max.width && requested.height <= max.height {
        return requested;
    }
    let ratio = f64::min(
        max.width as f64 / requested.width as f64,
        max.height as f64 / requested.height as f64,
    );
    Resolution {
        width: ((requested.width as f64 * ratio).round() as u32).clamp(1, max.width),
        height: ((requested.height as f64 * ratio).round() as u32).clamp(1, max.height),
    }
}
