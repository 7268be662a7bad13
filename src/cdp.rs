//! Chrome DevTools Protocol render surface (uses the `headless_chrome` crate)
//!
//! `headless_chrome` is blocking, so each surface gets a dedicated worker
//! thread that owns the browser and its tab. Async callers send commands over
//! a channel and wait on a oneshot reply, which keeps the surface `Send`
//! without requiring the tab to be.

use crate::sandbox::{CaptureRegion, LayoutMetrics, RenderSurface, SurfaceLauncher};
use crate::{Error, Result, Viewport};
use async_trait::async_trait;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_skia::Pixmap;
use tokio::sync::oneshot;
use url::Url;

const METRICS_SCRIPT: &str = r#"(function(sel) {
    const d = document.documentElement;
    const b = document.body;
    let bottom = 0;
    document.querySelectorAll(sel).forEach(function(el) {
        const r = el.getBoundingClientRect();
        bottom = Math.max(bottom, r.bottom + window.scrollY);
    });
    return JSON.stringify({
        document_scroll_height: d.scrollHeight,
        document_offset_height: d.offsetHeight,
        document_client_height: d.clientHeight,
        body_scroll_height: b ? b.scrollHeight : 0,
        body_offset_height: b ? b.offsetHeight : 0,
        sections_bottom: Math.ceil(bottom)
    });
})"#;

enum Command {
    Navigate(String, oneshot::Sender<Result<()>>),
    Metrics(String, oneshot::Sender<Result<LayoutMetrics>>),
    Resize(u32, u32, oneshot::Sender<Result<()>>),
    Scroll(u32, oneshot::Sender<Result<()>>),
    Capture(CaptureRegion, f32, oneshot::Sender<Result<Pixmap>>),
    Close(oneshot::Sender<Result<()>>),
}

/// Launches one headless Chrome per surface.
#[derive(Debug, Clone)]
pub struct CdpLauncher {
    /// Upper bound on any single blocking tab operation
    pub operation_timeout: Duration,
}

impl CdpLauncher {
    pub fn new(operation_timeout: Duration) -> Self {
        Self { operation_timeout }
    }
}

impl Default for CdpLauncher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl SurfaceLauncher for CdpLauncher {
    async fn launch(&self, viewport: Viewport) -> Result<Box<dyn RenderSurface>> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();
        let timeout = self.operation_timeout;

        thread::spawn(move || {
            let tab = match TabWorker::start(viewport, timeout) {
                Ok(t) => t,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };
            let _ = init_tx.send(Ok(()));
            tab.run(cmd_rx);
        });

        init_rx
            .await
            .map_err(|e| Error::Other(format!("Surface init canceled: {}", e)))??;
        debug!("launched headless Chrome surface {}x{}", viewport.width, viewport.height);
        Ok(Box::new(CdpSurface { cmd_tx }))
    }
}

/// Async handle to one worker-owned tab. Dropping it without `close` ends
/// the worker loop, which drops the browser.
pub struct CdpSurface {
    cmd_tx: Sender<Command>,
}

impl CdpSurface {
    async fn request<T>(&self, what: &str, make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .map_err(|_| Error::CaptureFailure(format!("{}: render worker has exited", what)))?;
        rx.await
            .map_err(|e| Error::Other(format!("{} canceled: {}", what, e)))?
    }
}

#[async_trait]
impl RenderSurface for CdpSurface {
    async fn navigate(&mut self, url: &Url) -> Result<()> {
        let url = url.to_string();
        self.request("Navigate", |tx| Command::Navigate(url, tx)).await
    }

    async fn layout_metrics(&mut self, section_selector: &str) -> Result<LayoutMetrics> {
        let selector = section_selector.to_string();
        self.request("Metrics", |tx| Command::Metrics(selector, tx)).await
    }

    async fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.request("Resize", |tx| Command::Resize(width, height, tx)).await
    }

    async fn scroll_to(&mut self, offset: u32) -> Result<()> {
        self.request("Scroll", |tx| Command::Scroll(offset, tx)).await
    }

    async fn rasterize(&mut self, region: CaptureRegion, scale: f32) -> Result<Pixmap> {
        self.request("Capture", |tx| Command::Capture(region, scale, tx)).await
    }

    async fn close(&mut self) -> Result<()> {
        self.request("Close", Command::Close).await
    }
}

/// Blocking side: owns the browser for the worker thread's lifetime.
struct TabWorker {
    browser: Browser,
    tab: Arc<Tab>,
}

impl TabWorker {
    fn start(viewport: Viewport, timeout: Duration) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((viewport.width, viewport.height)))
            .build()
            .map_err(|e| Error::CaptureFailure(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::CaptureFailure(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::CaptureFailure(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(timeout);

        Ok(Self { browser, tab })
    }

    fn run(self, commands: mpsc::Receiver<Command>) {
        while let Ok(cmd) = commands.recv() {
            match cmd {
                Command::Navigate(url, resp) => {
                    let _ = resp.send(self.navigate(&url));
                }
                Command::Metrics(selector, resp) => {
                    let _ = resp.send(self.metrics(&selector));
                }
                Command::Resize(width, height, resp) => {
                    let _ = resp.send(self.resize(width, height));
                }
                Command::Scroll(offset, resp) => {
                    let _ = resp.send(self.scroll(offset));
                }
                Command::Capture(region, scale, resp) => {
                    let _ = resp.send(self.capture(region, scale));
                }
                Command::Close(resp) => {
                    let _ = resp.send(self.close());
                    return;
                }
            }
        }
        debug!("render worker channel closed; dropping browser");
    }

    fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::SandboxAccessDenied(format!("Navigation failed: {}", e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::SandboxAccessDenied(format!("Wait for navigation failed: {}", e)))?;
        Ok(())
    }

    fn metrics(&self, selector: &str) -> Result<LayoutMetrics> {
        let quoted = serde_json::to_string(selector)
            .map_err(|e| Error::Other(format!("Failed to quote selector: {}", e)))?;
        let script = format!("{}({})", METRICS_SCRIPT, quoted);
        let eval = self
            .tab
            .evaluate(&script, false)
            .map_err(|e| Error::SandboxAccessDenied(format!("Layout query failed: {}", e)))?;

        let raw = match eval.value {
            Some(serde_json::Value::String(s)) => s,
            other => {
                return Err(Error::SandboxAccessDenied(format!(
                    "Layout query returned {:?}",
                    other
                )))
            }
        };
        serde_json::from_str(&raw)
            .map_err(|e| Error::SandboxAccessDenied(format!("Unreadable layout metrics: {}", e)))
    }

    fn resize(&self, width: u32, height: u32) -> Result<()> {
        self.tab
            .set_bounds(Bounds::Normal {
                left: None,
                top: None,
                width: Some(width as f64),
                height: Some(height as f64),
            })
            .map_err(|e| Error::CaptureFailure(format!("Resize failed: {}", e)))?;
        Ok(())
    }

    fn scroll(&self, offset: u32) -> Result<()> {
        self.tab
            .evaluate(&format!("window.scrollTo(0, {})", offset), false)
            .map_err(|e| Error::CaptureFailure(format!("Scroll failed: {}", e)))?;
        Ok(())
    }

    fn capture(&self, region: CaptureRegion, scale: f32) -> Result<Pixmap> {
        let clip = Page::Viewport {
            x: region.x as f64,
            y: region.y as f64,
            width: region.width as f64,
            height: region.height as f64,
            scale: scale as f64,
        };
        let png = self
            .tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(clip), true)
            .map_err(|e| Error::CaptureFailure(format!("Screenshot failed: {}", e)))?;
        Pixmap::decode_png(&png).map_err(|e| Error::CaptureFailure(format!("Undecodable screenshot: {}", e)))
    }

    fn close(self) -> Result<()> {
        if let Err(e) = self.tab.close(true) {
            warn!("Failed to close tab: {}", e);
        }
        drop(self.tab);
        drop(self.browser);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cdp_surface_lifecycle() {
        // This test requires Chrome to be installed, so we skip it in CI
        if std::env::var("CI").is_ok() {
            return;
        }
        let launcher = CdpLauncher::new(Duration::from_secs(10));
        let mut surface = match launcher.launch(Viewport { width: 320, height: 240 }).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Skipping CDP surface test because Chrome is not available: {}", e);
                return;
            }
        };
        let url = Url::parse("data:text/html,<body style='margin:0'><div data-section-id='a' style='height:900px'></div></body>").unwrap();
        surface.navigate(&url).await.unwrap();
        let metrics = surface.layout_metrics("[data-section-id]").await.unwrap();
        assert!(metrics.content_height() >= 900);
        let bitmap = surface
            .rasterize(CaptureRegion { x: 0, y: 0, width: 320, height: 100 }, 1.0)
            .await
            .unwrap();
        assert_eq!((bitmap.width(), bitmap.height()), (320, 100));
        surface.close().await.unwrap();
    }
}
