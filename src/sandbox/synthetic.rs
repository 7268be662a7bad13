//! Deterministic in-memory render surface
//!
//! Paints every document row with a colour derived from its CSS row index,
//! so composites and page slices can be checked pixel by pixel. Load delays
//! and failures can be injected. Used by tests, benches and dry runs.

use super::{CaptureRegion, LayoutMetrics, RenderSurface, SurfaceLauncher};
use crate::{Error, Result, Viewport};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiny_skia::{Color, Pixmap};
use url::Url;

/// Colour of CSS row `y` in the synthetic document.
pub fn row_color(y: u32) -> [u8; 3] {
    [(y % 251) as u8, ((y / 251) % 251) as u8, 128]
}

/// Failure to inject into the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticFailure {
    /// Launching the surface fails
    Launch,
    /// Layout metrics are not readable
    AccessDenied,
    /// Rasterizing the chunk at this offset fails
    RasterizeAt(u32),
}

/// What the surface observed; shared between the launcher and its surfaces.
#[derive(Debug, Default)]
struct ProbeState {
    launched: usize,
    closed: usize,
    navigated_url: Option<String>,
    resized_to: Option<(u32, u32)>,
    scrolls: Vec<u32>,
    rasterized: Vec<CaptureRegion>,
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticProbe(Arc<Mutex<ProbeState>>);

impl SyntheticProbe {
    fn with<T>(&self, f: impl FnOnce(&mut ProbeState) -> T) -> T {
        let mut guard = match self.0.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn launched(&self) -> usize {
        self.with(|s| s.launched)
    }

    pub fn closed(&self) -> usize {
        self.with(|s| s.closed)
    }

    pub fn navigated_url(&self) -> Option<String> {
        self.with(|s| s.navigated_url.clone())
    }

    pub fn resized_to(&self) -> Option<(u32, u32)> {
        self.with(|s| s.resized_to)
    }

    pub fn scrolls(&self) -> Vec<u32> {
        self.with(|s| s.scrolls.clone())
    }

    pub fn rasterized(&self) -> Vec<CaptureRegion> {
        self.with(|s| s.rasterized.clone())
    }
}

pub struct SyntheticLauncher {
    content_height: u32,
    load_delay: Duration,
    failure: Option<SyntheticFailure>,
    probe: SyntheticProbe,
}

impl SyntheticLauncher {
    pub fn new(content_height: u32) -> Self {
        Self {
            content_height,
            load_delay: Duration::ZERO,
            failure: None,
            probe: SyntheticProbe::default(),
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_failure(mut self, failure: SyntheticFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn probe(&self) -> SyntheticProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl SurfaceLauncher for SyntheticLauncher {
    async fn launch(&self, viewport: Viewport) -> Result<Box<dyn RenderSurface>> {
        if self.failure == Some(SyntheticFailure::Launch) {
            return Err(Error::SandboxAccessDenied("synthetic surface refused to launch".into()));
        }
        self.probe.with(|s| s.launched += 1);
        Ok(Box::new(SyntheticSurface {
            viewport,
            content_height: self.content_height,
            load_delay: self.load_delay,
            failure: self.failure,
            probe: self.probe.clone(),
            loaded: false,
        }))
    }
}

struct SyntheticSurface {
    viewport: Viewport,
    content_height: u32,
    load_delay: Duration,
    failure: Option<SyntheticFailure>,
    probe: SyntheticProbe,
    loaded: bool,
}

#[async_trait]
impl RenderSurface for SyntheticSurface {
    async fn navigate(&mut self, url: &Url) -> Result<()> {
        self.probe.with(|s| s.navigated_url = Some(url.to_string()));
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        self.loaded = true;
        Ok(())
    }

    async fn layout_metrics(&mut self, _section_selector: &str) -> Result<LayoutMetrics> {
        if self.failure == Some(SyntheticFailure::AccessDenied) {
            return Err(Error::SandboxAccessDenied("cross-origin frame blocked layout access".into()));
        }
        if !self.loaded {
            return Err(Error::Other("document not loaded".into()));
        }
        // The body under-reports, as a fixed-height app shell would.
        Ok(LayoutMetrics {
            document_scroll_height: self.content_height,
            document_offset_height: self.content_height,
            document_client_height: self.viewport.height,
            body_scroll_height: self.viewport.height,
            body_offset_height: self.viewport.height,
            sections_bottom: self.content_height,
        })
    }

    async fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.viewport = Viewport { width, height };
        self.probe.with(|s| s.resized_to = Some((width, height)));
        Ok(())
    }

    async fn scroll_to(&mut self, offset: u32) -> Result<()> {
        self.probe.with(|s| s.scrolls.push(offset));
        Ok(())
    }

    async fn rasterize(&mut self, region: CaptureRegion, scale: f32) -> Result<Pixmap> {
        if self.failure == Some(SyntheticFailure::RasterizeAt(region.y)) {
            return Err(Error::CaptureFailure("drawing surface unavailable".into()));
        }
        self.probe.with(|s| s.rasterized.push(region));

        let width = ((region.width as f64) * scale as f64).round() as u32;
        let height = ((region.height as f64) * scale as f64).round() as u32;
        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| Error::CaptureFailure(format!("cannot allocate {}x{} chunk", width, height)))?;

        let row_bytes = width as usize * 4;
        let data = pixmap.data_mut();
        for row in 0..height {
            let css_y = region.y + ((row as f64) / scale as f64).floor() as u32;
            let css_y = css_y.min(region.y + region.height.saturating_sub(1));
            let [r, g, b] = row_color(css_y);
            let start = row as usize * row_bytes;
            for px in data[start..start + row_bytes].chunks_exact_mut(4) {
                px.copy_from_slice(&[r, g, b, 255]);
            }
        }
        Ok(pixmap)
    }

    async fn close(&mut self) -> Result<()> {
        self.probe.with(|s| s.closed += 1);
        Ok(())
    }
}

/// Solid pixmap helper for tests of downstream stages.
pub fn solid_pixmap(width: u32, height: u32, rgb: [u8; 3]) -> Option<Pixmap> {
    let mut p = Pixmap::new(width, height)?;
    p.fill(Color::from_rgba8(rgb[0], rgb[1], rgb[2], 255));
    Some(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rasterize_paints_only_the_requested_rows() {
        let launcher = SyntheticLauncher::new(500);
        let mut surface = launcher.launch(Viewport::default()).await.unwrap();
        let region = CaptureRegion { x: 0, y: 100, width: 4, height: 3 };
        let pixmap = surface.rasterize(region, 2.0).await.unwrap();
        assert_eq!((pixmap.width(), pixmap.height()), (8, 6));
        for row in 0..6u32 {
            let px = pixmap.pixel(0, row).unwrap();
            let [r, g, _] = row_color(100 + row / 2);
            assert_eq!((px.red(), px.green()), (r, g));
        }
    }
}
