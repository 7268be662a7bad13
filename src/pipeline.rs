//! Export orchestrator
//!
//! Runs the visual capture and the content fetch side by side on the current
//! task, writes the title page, the image pages (or an error page standing in
//! for them) and the text dump, then saves the document. Stage failures are
//! caught here and turned into error pages; `Exporter::export` itself never
//! fails.

use crate::content::{fetch_redacted, ContentRecord, ContentStore};
use crate::document::text::format_section;
use crate::document::{output_file_name, DocumentSink, PdfDocument, TextPage, TextPaginator};
use crate::progress::{ProgressBand, ProgressHandler, ProgressReport, ProgressTracker};
use crate::rendering::paginate::paginate;
use crate::rendering::raster::capture_chunks;
use crate::rendering::{CaptureSession, CompositeBitmap, Compositor};
use crate::sandbox::{SandboxController, SurfaceLauncher};
use crate::{Error, ExportConfig, Result};
use chrono::NaiveDate;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-invocation options
#[derive(Clone)]
pub struct ExportOptions {
    /// Shown on the title page and used to derive the file name
    pub title_label: String,
    pub on_progress: Option<ProgressHandler>,
    pub cancel: Option<CancellationToken>,
    /// Directory the PDF is written to
    pub output_dir: PathBuf,
    /// Date stamped on the title page and in the file name; today if unset
    pub date: Option<NaiveDate>,
}

impl ExportOptions {
    pub fn new(title_label: impl Into<String>) -> Self {
        Self {
            title_label: title_label.into(),
            on_progress: None,
            cancel: None,
            output_dir: PathBuf::from("."),
            date: None,
        }
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&ProgressReport) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

/// Outcome of one export run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportReport {
    /// `None` if nothing was written (unusable page layout, cancellation, save failure)
    pub output_path: Option<PathBuf>,
    pub image_pages: usize,
    /// Text pages including the title page and any error pages
    pub text_pages: usize,
    /// One message per stage that fell back to an error page or was skipped
    pub degradations: Vec<String>,
    pub cancelled: bool,
}

/// Entry point tying a render backend and a content store to one config.
///
/// Each `export` call builds its own sandbox and session; concurrent calls
/// share nothing but the backends.
pub struct Exporter {
    config: ExportConfig,
    launcher: Arc<dyn SurfaceLauncher>,
    store: Arc<dyn ContentStore>,
}

impl Exporter {
    pub fn new(config: ExportConfig, launcher: Arc<dyn SurfaceLauncher>, store: Arc<dyn ContentStore>) -> Self {
        Self {
            config,
            launcher,
            store,
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Run one export to completion.
    pub async fn export(&self, options: ExportOptions) -> ExportReport {
        let progress = ProgressTracker::new(options.on_progress.clone());
        let cancel = options.cancel.clone().unwrap_or_default();
        let mut report = ExportReport::default();

        if let Err(e) = self.config.validate_document() {
            error!("export aborted, no page can be laid out: {}", e);
            report.degradations.push(e.to_string());
            progress.report(100, format!("Export aborted: {}", e));
            return report;
        }

        let config = &self.config;
        let (page_width, page_height) = config.page_format.size_pt();
        let paginator = TextPaginator::new(config.text.clone(), page_width, page_height);
        let mut pdf = PdfDocument::new(page_width, page_height, config.jpeg_quality);
        let date = options
            .date
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        info!("exporting '{}' from {}", options.title_label, config.document_url);

        let cover = paginator.title_page(
            &options.title_label,
            &[
                format!("Generated {}", date.format("%Y-%m-%d")),
                format!("Source: {}", config.document_url),
            ],
        );
        if !self.push_text_page(&mut pdf, &cover, &mut report) {
            report.degradations.push("title page could not be written".into());
        }

        let (visual, content) = tokio::join!(
            self.capture_visual(&mut pdf, &progress, &cancel),
            self.fetch_content(&progress, &cancel)
        );

        if cancel.is_cancelled() || matches!(visual, Err(Error::Cancelled)) || matches!(content, Err(Error::Cancelled)) {
            info!("export of '{}' cancelled; nothing written", options.title_label);
            progress.status("Export cancelled");
            report.cancelled = true;
            return report;
        }

        match visual {
            Ok(pages) => report.image_pages = pages,
            Err(e) => {
                if e.is_capture_stage() || matches!(e, Error::ConfigError(_)) {
                    warn!("visual capture degraded to an error page: {}", e);
                } else {
                    error!("image pages failed outside capture: {}", e);
                }
                let page = paginator.error_page(
                    "Visual capture unavailable",
                    "The report could not be rendered for capture. The content dump follows.",
                    &e.to_string(),
                );
                self.push_text_page(&mut pdf, &page, &mut report);
                report.degradations.push(e.to_string());
            }
        }

        match content {
            Ok(record) => self.write_text_dump(&mut pdf, &paginator, &record, &progress, &mut report),
            Err(e) => {
                warn!("content dump degraded to an error page: {}", e);
                let page = paginator.error_page(
                    "Content unavailable",
                    "The report data could not be loaded, so the content dump is omitted.",
                    &failure_detail(&e),
                );
                self.push_text_page(&mut pdf, &page, &mut report);
                report.degradations.push(e.to_string());
            }
        }

        let path = options.output_dir.join(output_file_name(&options.title_label, date));
        progress.status("Saving document");
        match save(pdf, &options.output_dir, &path) {
            Ok(()) => {
                info!(
                    "saved {} ({} image page(s), {} text page(s))",
                    path.display(),
                    report.image_pages,
                    report.text_pages
                );
                report.output_path = Some(path);
                progress.report(100, "Export complete");
            }
            Err(e) => {
                error!("failed to save {}: {}", path.display(), e);
                report.degradations.push(e.to_string());
                progress.report(100, format!("Export failed to save: {}", e));
            }
        }
        report
    }

    /// Capture, composite and paginate into `pdf`. The sandbox is disposed
    /// before pagination starts, whatever the capture outcome. Invalid capture
    /// settings fail here, before any sandbox is launched.
    async fn capture_visual(
        &self,
        pdf: &mut PdfDocument,
        progress: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        self.config.validate_capture()?;
        let mut sandbox = SandboxController::new(self.launcher.clone(), &self.config, cancel.clone());
        let composite = self.capture_composite(&mut sandbox, progress).await;
        sandbox.dispose().await;
        let composite = composite?;

        let (page_width, page_height) = self.config.page_format.size_pt();
        paginate(composite, page_width, page_height, progress, |slice| {
            pdf.add_image_page(&slice)
        })
    }

    async fn capture_composite(
        &self,
        sandbox: &mut SandboxController,
        progress: &ProgressTracker,
    ) -> Result<CompositeBitmap> {
        let config = &self.config;
        progress.report(ProgressBand::PREPARE.start, "Preparing render sandbox");
        let size = sandbox.prepare().await?;
        progress.report(
            ProgressBand::PREPARE.end,
            format!("Sandbox ready ({}x{})", size.width, size.height),
        );
        if size.height == 0 {
            return Err(Error::CaptureFailure("document has zero height".into()));
        }

        let mut session = CaptureSession::new(size.width, size.height, config.chunk_height, config.device_scale);
        let mut compositor = Compositor::new(
            size.width,
            size.height,
            config.device_scale,
            config.background_color(),
        )?;
        capture_chunks(sandbox, &mut session, progress, |chunk| compositor.draw(chunk)).await?;
        session.verify_coverage()?;

        let composite = compositor.finish();
        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "composite {}x{} sha256 {}",
                composite.width(),
                composite.height(),
                composite.digest()
            );
        }
        progress.report(ProgressBand::COMPOSITE.end, "Composite assembled");
        Ok(composite)
    }

    async fn fetch_content(&self, progress: &ProgressTracker, cancel: &CancellationToken) -> Result<ContentRecord> {
        progress.status(format!("Fetching {} content section(s)", self.config.sections.len()));
        let record = fetch_redacted(
            self.store.as_ref(),
            &self.config.sections,
            &self.config.redaction,
            cancel,
        )
        .await?;
        debug!("fetched {} content section(s)", record.len());
        Ok(record)
    }

    fn write_text_dump(
        &self,
        pdf: &mut PdfDocument,
        paginator: &TextPaginator,
        record: &ContentRecord,
        progress: &ProgressTracker,
        report: &mut ExportReport,
    ) {
        progress.report(ProgressBand::TEXT.start, "Formatting content");
        let mut sections: Vec<(String, Option<String>)> = Vec::with_capacity(self.config.sections.len());
        for name in &self.config.sections {
            if sections.iter().any(|(seen, _)| seen == name) {
                continue;
            }
            let body = record.get(name).and_then(format_section);
            if body.is_none() {
                debug!("section '{}' is empty; skipped", name);
            }
            sections.push((name.clone(), body));
        }

        let pages = paginator.paginate_sections(&sections);
        let total = pages.len();
        for (i, page) in pages.iter().enumerate() {
            if !self.push_text_page(pdf, page, report) {
                report
                    .degradations
                    .push(format!("text dump stopped after {} of {} page(s)", i, total));
                break;
            }
            progress.report(
                ProgressBand::TEXT.at(i + 1, total),
                format!("Wrote content page {}/{}", i + 1, total),
            );
        }
    }

    fn push_text_page(&self, pdf: &mut PdfDocument, page: &TextPage, report: &mut ExportReport) -> bool {
        match pdf.add_text_page(page) {
            Ok(()) => {
                report.text_pages += 1;
                true
            }
            Err(e) => {
                warn!("failed to write text page: {}", e);
                false
            }
        }
    }
}

fn save(pdf: PdfDocument, dir: &std::path::Path, path: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    pdf.save(path)
}

/// Short technical line for an error page.
fn failure_detail(err: &Error) -> String {
    match err {
        Error::ContentFetchFailure { outcomes, .. } => {
            let parts: Vec<String> = outcomes.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
            format!("{} ({})", err, parts.join("; "))
        }
        other => other.to_string(),
    }
}
