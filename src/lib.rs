//! RFox Capture
//!
//! A render-capture and pagination engine for long, dynamically laid-out
//! reports. A report is rendered in an off-screen sandbox, captured in
//! bounded-height chunks, reassembled into one composite bitmap, re-tiled
//! into output-page-shaped slices and written to a paginated PDF, followed
//! by a redacted text dump of the report's content.
//!
//! # Features
//!
//! - **Bounded memory**: chunk capture is sequential and each chunk is
//!   flattened into the composite as soon as it is captured
//! - **Swappable backends**: render surfaces and content stores sit behind
//!   async traits (`cdp` and `http` features provide real ones)
//! - **Graceful degradation**: every stage failure becomes an error page in
//!   the output rather than a failed export
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rfcapture::content::MemoryContentStore;
//! use rfcapture::sandbox::synthetic::SyntheticLauncher;
//! use rfcapture::{ExportConfig, ExportOptions, Exporter};
//!
//! # async fn run() {
//! let config = ExportConfig {
//!     sections: vec!["hero".to_string(), "team".to_string()],
//!     ..Default::default()
//! };
//! let exporter = Exporter::new(
//!     config,
//!     Arc::new(SyntheticLauncher::new(9000)),
//!     Arc::new(MemoryContentStore::new()),
//! );
//! let report = exporter.export(ExportOptions::new("Quarterly Report")).await;
//! println!("saved to {:?}", report.output_path);
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod error;
pub use error::{Error, Result};

pub mod content;
pub mod document;
pub mod pipeline;
pub mod progress;
pub mod redact;
pub mod rendering;
pub mod sandbox;

// Chrome DevTools render surface (worker-thread backed)
#[cfg(feature = "cdp")]
pub mod cdp;

pub use content::{ContentRecord, ContentStore};
pub use document::text::TextLayout;
pub use pipeline::{ExportOptions, ExportReport, Exporter};
pub use progress::{ProgressHandler, ProgressReport};
pub use redact::RedactionPolicy;
pub use sandbox::{RenderSurface, SurfaceLauncher};

/// Configuration for one export run
///
/// The defaults describe an A4 export of a 1280px-wide report captured at
/// 2x in 4000px chunks. Every field may be omitted from a JSON config file.
///
/// # Examples
///
/// ```
/// let cfg = rfcapture::ExportConfig::default();
/// assert_eq!(cfg.chunk_height, 4000);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// URL of the visual document the end user sees
    pub document_url: String,
    /// Sandbox viewport; `width` is the fixed content width
    pub viewport: Viewport,
    /// Maximum height of one captured chunk, in CSS pixels
    pub chunk_height: u32,
    /// Device scale factor used for rasterization
    pub device_scale: f32,
    /// Document background, used under the composite and every page slice
    pub background: [u8; 3],
    /// Output page format (always portrait)
    pub page_format: PageFormat,
    /// Load timeout and settle delays
    pub timing: SandboxTiming,
    /// Query flag that makes the document skip its entrance animation
    pub intro_suppression: IntroSuppression,
    /// Selector matching every report section element
    pub section_selector: String,
    /// Report sections to fetch, in text-dump order
    pub sections: Vec<String>,
    /// Which content keys are elided from the text dump
    pub redaction: RedactionPolicy,
    /// Text page geometry
    pub text: TextLayout,
    /// JPEG quality for image pages (1-100)
    pub jpeg_quality: u8,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            document_url: "http://localhost:3000/".to_string(),
            viewport: Viewport::default(),
            chunk_height: 4000,
            device_scale: 2.0,
            background: [255, 255, 255],
            page_format: PageFormat::A4,
            timing: SandboxTiming::default(),
            intro_suppression: IntroSuppression::default(),
            section_selector: "[data-section-id]".to_string(),
            sections: Vec::new(),
            redaction: RedactionPolicy::default(),
            text: TextLayout::default(),
            jpeg_quality: 92,
        }
    }
}

impl ExportConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let cfg: ExportConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.as_ref().display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.validate_document()?;
        self.validate_capture()
    }

    /// Page geometry and text layout. Without these no page can be written.
    pub fn validate_document(&self) -> Result<()> {
        let (width, height) = self.page_format.size_pt();
        if !(width > 0.0 && height > 0.0) {
            return Err(Error::ConfigError("page size must be positive".into()));
        }
        self.text.validate(width, height)
    }

    /// Settings only the image pages depend on.
    pub fn validate_capture(&self) -> Result<()> {
        if self.viewport.width == 0 {
            return Err(Error::ConfigError("viewport width must be positive".into()));
        }
        if self.chunk_height == 0 {
            return Err(Error::ConfigError("chunk_height must be positive".into()));
        }
        if !(self.device_scale.is_finite() && self.device_scale > 0.0) {
            return Err(Error::ConfigError(format!(
                "device_scale must be positive, got {}",
                self.device_scale
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::ConfigError("jpeg_quality must be within 1..=100".into()));
        }
        Ok(())
    }

    pub(crate) fn background_color(&self) -> tiny_skia::Color {
        let [r, g, b] = self.background;
        tiny_skia::Color::from_rgba8(r, g, b, 255)
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Portrait output page sizes, in PDF points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageFormat {
    A4,
    Letter,
    Custom { width_pt: f32, height_pt: f32 },
}

impl PageFormat {
    /// (width, height) in points
    pub fn size_pt(&self) -> (f32, f32) {
        match *self {
            PageFormat::A4 => (595.28, 841.89),
            PageFormat::Letter => (612.0, 792.0),
            PageFormat::Custom { width_pt, height_pt } => (width_pt, height_pt),
        }
    }
}

/// Sandbox waits, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxTiming {
    /// Upper bound on the initial document load
    pub load_timeout_ms: u64,
    /// Wait after load for lazy content and animations
    pub initial_settle_ms: u64,
    /// Wait after resizing the surface to full height
    pub resize_settle_ms: u64,
    /// Wait after each scroll before rasterizing a chunk
    pub scroll_settle_ms: u64,
}

impl Default for SandboxTiming {
    fn default() -> Self {
        Self {
            load_timeout_ms: 30000,
            initial_settle_ms: 2500,
            resize_settle_ms: 500,
            scroll_settle_ms: 150,
        }
    }
}

/// Query parameter appended to the document URL so the captured state is
/// already the settled state. Scoped to one session; nothing is remembered
/// between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntroSuppression {
    pub param: String,
    pub value: String,
}

impl Default for IntroSuppression {
    fn default() -> Self {
        Self {
            param: "skipIntro".to_string(),
            value: "1".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExportConfig::default();
        assert_eq!(config.viewport.width, 1280);
        assert_eq!(config.chunk_height, 4000);
        assert_eq!(config.device_scale, 2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_config_uses_defaults() {
        let cfg: ExportConfig = serde_json::from_str(
            r#"{"chunk_height": 2000, "page_format": "letter", "timing": {"load_timeout_ms": 100}}"#,
        )
        .unwrap();
        assert_eq!(cfg.chunk_height, 2000);
        assert_eq!(cfg.page_format, PageFormat::Letter);
        assert_eq!(cfg.timing.load_timeout_ms, 100);
        assert_eq!(cfg.timing.scroll_settle_ms, 150);
        assert_eq!(cfg.viewport.width, 1280);
    }

    #[test]
    fn custom_page_format_from_json() {
        let cfg: ExportConfig = serde_json::from_str(
            r#"{"page_format": {"custom": {"width_pt": 300.0, "height_pt": 400.0}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.page_format.size_pt(), (300.0, 400.0));
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        let cfg = ExportConfig {
            chunk_height: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::ConfigError(_))));

        let cfg = ExportConfig {
            device_scale: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = ExportConfig {
            jpeg_quality: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn capture_settings_are_checked_apart_from_page_geometry() {
        let cfg = ExportConfig {
            chunk_height: 0,
            ..Default::default()
        };
        assert!(cfg.validate_document().is_ok());
        assert!(cfg.validate_capture().is_err());

        let cfg = ExportConfig {
            page_format: PageFormat::Custom {
                width_pt: 0.0,
                height_pt: 300.0,
            },
            ..Default::default()
        };
        assert!(cfg.validate_document().is_err());
        assert!(cfg.validate_capture().is_ok());
    }
}
