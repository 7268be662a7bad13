//! Sandbox controller: lifecycle of the off-screen render surface
//!
//! The controller launches a surface, navigates it to the report with the
//! intro animation suppressed, waits for the load (bounded by a timeout) and
//! a settle delay, discovers the true document height, resizes the surface to
//! that height and waits for the reflow to settle. Afterwards it serves
//! scroll and rasterize requests until `dispose` releases the surface.
//!
//! Backends implement [`SurfaceLauncher`] and [`RenderSurface`]; see
//! [`synthetic`] for a deterministic in-memory one and `crate::cdp` for
//! headless Chrome.

pub mod synthetic;

use crate::{Error, ExportConfig, IntroSuppression, Result, SandboxTiming, Viewport};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tiny_skia::Pixmap;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Rectangle of the document to rasterize, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Height reported by each layout source. Any single one may under-report
/// (fixed-height bodies, absolutely positioned sections), so the document
/// height is their maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutMetrics {
    pub document_scroll_height: u32,
    pub document_offset_height: u32,
    pub document_client_height: u32,
    pub body_scroll_height: u32,
    pub body_offset_height: u32,
    /// Bottom edge of the lowest section element
    pub sections_bottom: u32,
}

impl LayoutMetrics {
    pub fn content_height(&self) -> u32 {
        [
            self.document_scroll_height,
            self.document_offset_height,
            self.document_client_height,
            self.body_scroll_height,
            self.body_offset_height,
            self.sections_bottom,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// An isolated, off-screen rendering of the report
#[async_trait]
pub trait RenderSurface: Send {
    /// Navigate and resolve once the initial load has finished.
    async fn navigate(&mut self, url: &Url) -> Result<()>;

    /// Query every height source. Inaccessible documents fail with
    /// `Error::SandboxAccessDenied`.
    async fn layout_metrics(&mut self, section_selector: &str) -> Result<LayoutMetrics>;

    /// Resize the viewport.
    async fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    /// Scroll so that `offset` is the top of the viewport.
    async fn scroll_to(&mut self, offset: u32) -> Result<()>;

    /// Rasterize exactly `region` at `scale` device pixels per CSS pixel.
    async fn rasterize(&mut self, region: CaptureRegion, scale: f32) -> Result<Pixmap>;

    /// Release the surface. Called at most once by the controller.
    async fn close(&mut self) -> Result<()>;
}

/// Creates render surfaces
#[async_trait]
pub trait SurfaceLauncher: Send + Sync {
    async fn launch(&self, viewport: Viewport) -> Result<Box<dyn RenderSurface>>;
}

/// Full content size discovered by `prepare`, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedSize {
    pub width: u32,
    pub height: u32,
}

/// Owns one render surface for the duration of a capture.
///
/// Callers must `dispose` on every exit path; dropping an undisposed
/// controller leaves the release to the surface's own `Drop`.
pub struct SandboxController {
    launcher: Arc<dyn SurfaceLauncher>,
    document_url: String,
    viewport: Viewport,
    timing: SandboxTiming,
    intro: IntroSuppression,
    section_selector: String,
    cancel: CancellationToken,
    surface: Option<Box<dyn RenderSurface>>,
    size: Option<PreparedSize>,
}

impl SandboxController {
    pub fn new(launcher: Arc<dyn SurfaceLauncher>, config: &ExportConfig, cancel: CancellationToken) -> Self {
        Self {
            launcher,
            document_url: config.document_url.clone(),
            viewport: config.viewport,
            timing: config.timing,
            intro: config.intro_suppression.clone(),
            section_selector: config.section_selector.clone(),
            cancel,
            surface: None,
            size: None,
        }
    }

    /// Document URL with the intro-suppression flag applied.
    pub fn capture_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.document_url)
            .map_err(|e| Error::ConfigError(format!("invalid document URL '{}': {}", self.document_url, e)))?;
        if !self.intro.param.is_empty() {
            url.query_pairs_mut().append_pair(&self.intro.param, &self.intro.value);
        }
        Ok(url)
    }

    /// Launch, load, settle, measure and resize. Returns the full content size.
    ///
    /// On failure after launch the surface stays owned by the controller so
    /// `dispose` can still release it.
    pub async fn prepare(&mut self) -> Result<PreparedSize> {
        if let Some(size) = self.size {
            return Ok(size);
        }
        let url = self.capture_url()?;
        info!("preparing sandbox for {}", url);

        let surface = race_cancel(&self.cancel, self.launcher.launch(self.viewport)).await??;
        self.surface = Some(surface);
        let timing = self.timing;

        {
            let surface = self.surface.as_mut().ok_or_else(not_prepared)?;
            let load = tokio::time::timeout(Duration::from_millis(timing.load_timeout_ms), surface.navigate(&url));
            match race_cancel(&self.cancel, load).await? {
                Ok(res) => res?,
                Err(_) => {
                    warn!("sandbox load exceeded {}ms", timing.load_timeout_ms);
                    return Err(Error::SandboxLoadTimeout(timing.load_timeout_ms));
                }
            }
        }
        self.settle(timing.initial_settle_ms).await?;

        let metrics = {
            let surface = self.surface.as_mut().ok_or_else(not_prepared)?;
            race_cancel(&self.cancel, surface.layout_metrics(&self.section_selector)).await??
        };
        let height = metrics.content_height();
        debug!("layout metrics {:?} -> height {}", metrics, height);

        {
            let surface = self.surface.as_mut().ok_or_else(not_prepared)?;
            race_cancel(&self.cancel, surface.resize(self.viewport.width, height.max(1))).await??;
        }
        self.settle(timing.resize_settle_ms).await?;

        let size = PreparedSize {
            width: self.viewport.width,
            height,
        };
        self.size = Some(size);
        info!("sandbox ready: {}x{}", size.width, size.height);
        Ok(size)
    }

    pub async fn scroll_to(&mut self, offset: u32) -> Result<()> {
        self.ensure_prepared()?;
        let surface = self.surface.as_mut().ok_or_else(not_prepared)?;
        race_cancel(&self.cancel, surface.scroll_to(offset)).await?
    }

    pub async fn rasterize(&mut self, region: CaptureRegion, scale: f32) -> Result<Pixmap> {
        self.ensure_prepared()?;
        let surface = self.surface.as_mut().ok_or_else(not_prepared)?;
        race_cancel(&self.cancel, surface.rasterize(region, scale)).await?
    }

    /// Cancellable fixed wait.
    pub async fn settle(&self, ms: u64) -> Result<()> {
        if ms == 0 {
            return Ok(());
        }
        race_cancel(&self.cancel, tokio::time::sleep(Duration::from_millis(ms))).await
    }

    pub fn scroll_settle_ms(&self) -> u64 {
        self.timing.scroll_settle_ms
    }

    pub fn size(&self) -> Option<PreparedSize> {
        self.size
    }

    pub fn is_active(&self) -> bool {
        self.surface.is_some()
    }

    /// Release the surface. Safe to call any number of times, including after
    /// a failed `prepare`. Close errors are logged, not returned.
    pub async fn dispose(&mut self) {
        self.size = None;
        if let Some(mut surface) = self.surface.take() {
            debug!("disposing sandbox surface");
            if let Err(e) = surface.close().await {
                warn!("failed to close sandbox surface: {}", e);
            }
        }
    }

    fn ensure_prepared(&self) -> Result<()> {
        if self.size.is_none() {
            return Err(not_prepared());
        }
        Ok(())
    }
}

impl Drop for SandboxController {
    fn drop(&mut self) {
        if self.surface.is_some() {
            warn!("sandbox controller dropped without dispose");
        }
    }
}

fn not_prepared() -> Error {
    Error::Other("sandbox is not prepared".into())
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn race_cancel<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::synthetic::{SyntheticFailure, SyntheticLauncher};
    use super::*;

    fn config(load_timeout_ms: u64) -> ExportConfig {
        ExportConfig {
            document_url: "http://report.local/view?id=7".to_string(),
            timing: SandboxTiming {
                load_timeout_ms,
                initial_settle_ms: 2500,
                resize_settle_ms: 500,
                scroll_settle_ms: 150,
            },
            ..Default::default()
        }
    }

    #[test]
    fn metrics_take_the_maximum_source() {
        let m = LayoutMetrics {
            document_scroll_height: 8000,
            body_offset_height: 720,
            sections_bottom: 9000,
            ..Default::default()
        };
        assert_eq!(m.content_height(), 9000);
        assert_eq!(LayoutMetrics::default().content_height(), 0);
    }

    #[test]
    fn capture_url_carries_intro_flag() {
        let launcher = Arc::new(SyntheticLauncher::new(100));
        let ctl = SandboxController::new(launcher, &config(1000), CancellationToken::new());
        assert_eq!(
            ctl.capture_url().unwrap().as_str(),
            "http://report.local/view?id=7&skipIntro=1"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn prepare_measures_and_resizes() {
        let launcher = Arc::new(SyntheticLauncher::new(9000));
        let probe = launcher.probe();
        let mut ctl = SandboxController::new(launcher, &config(30000), CancellationToken::new());
        let size = ctl.prepare().await.unwrap();
        assert_eq!(size, PreparedSize { width: 1280, height: 9000 });
        assert_eq!(probe.resized_to(), Some((1280, 9000)));
        assert!(probe.navigated_url().unwrap().contains("skipIntro=1"));
        ctl.dispose().await;
        assert_eq!(probe.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_load_times_out_and_dispose_still_releases() {
        let launcher = Arc::new(SyntheticLauncher::new(9000).with_load_delay(Duration::from_secs(60)));
        let probe = launcher.probe();
        let mut ctl = SandboxController::new(launcher, &config(30000), CancellationToken::new());
        let err = ctl.prepare().await.unwrap_err();
        assert!(matches!(err, Error::SandboxLoadTimeout(30000)));
        assert!(ctl.is_active());
        ctl.dispose().await;
        ctl.dispose().await;
        assert!(!ctl.is_active());
        assert_eq!(probe.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn inaccessible_document_reports_access_denied() {
        let launcher = Arc::new(SyntheticLauncher::new(9000).with_failure(SyntheticFailure::AccessDenied));
        let probe = launcher.probe();
        let mut ctl = SandboxController::new(launcher, &config(30000), CancellationToken::new());
        assert!(matches!(ctl.prepare().await, Err(Error::SandboxAccessDenied(_))));
        ctl.dispose().await;
        assert_eq!(probe.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_load_wait() {
        let launcher = Arc::new(SyntheticLauncher::new(9000).with_load_delay(Duration::from_secs(10)));
        let token = CancellationToken::new();
        let mut ctl = SandboxController::new(launcher, &config(30000), token.clone());
        let canceller = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        };
        let (res, _) = tokio::join!(ctl.prepare(), canceller);
        assert!(matches!(res, Err(Error::Cancelled)));
        ctl.dispose().await;
    }

    #[tokio::test]
    async fn rasterize_before_prepare_is_rejected() {
        let launcher = Arc::new(SyntheticLauncher::new(100));
        let mut ctl = SandboxController::new(launcher, &config(1000), CancellationToken::new());
        let region = CaptureRegion { x: 0, y: 0, width: 10, height: 10 };
        assert!(ctl.rasterize(region, 1.0).await.is_err());
        ctl.dispose().await;
    }
}
