use anyhow::{bail, Context};
use clap::Parser;
use rfcapture::cdp::CdpLauncher;
use rfcapture::content::http::HttpContentStore;
use rfcapture::{ExportConfig, ExportOptions, Exporter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Capture a long scrolling report into a paginated PDF.
#[derive(Parser, Debug)]
#[command(name = "rfcapture", version, about)]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// URL of the report to capture
    #[arg(long)]
    url: Option<String>,

    /// Base URL of the content store (sections are fetched from `<base>/<section>`)
    #[arg(long)]
    content_url: String,

    /// Section to include in the content dump, in order (repeatable)
    #[arg(long = "section")]
    sections: Vec<String>,

    /// Title shown on the cover page and used for the file name
    #[arg(long, default_value = "Report")]
    title: String,

    /// Directory to write the PDF into
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Chunk height in CSS pixels
    #[arg(long)]
    chunk_height: Option<u32>,

    /// Device scale factor
    #[arg(long)]
    scale: Option<f32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExportConfig::from_json_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => ExportConfig::default(),
    };
    if let Some(url) = args.url {
        config.document_url = url;
    }
    if !args.sections.is_empty() {
        config.sections = args.sections;
    }
    if let Some(h) = args.chunk_height {
        config.chunk_height = h;
    }
    if let Some(s) = args.scale {
        config.device_scale = s;
    }
    config.validate().context("invalid configuration")?;

    let store = HttpContentStore::new(&args.content_url, config.timing.load_timeout_ms)
        .with_context(|| format!("content store at {}", args.content_url))?;
    let launcher = CdpLauncher::new(Duration::from_millis(config.timing.load_timeout_ms));
    let exporter = Exporter::new(config, Arc::new(launcher), Arc::new(store));

    let cancel = tokio_util::sync::CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let options = ExportOptions::new(args.title)
        .output_dir(args.out_dir)
        .with_cancel(cancel)
        .on_progress(|p| eprintln!("[{:>3}%] {}", p.percent, p.status));
    let report = exporter.export(options).await;

    for d in &report.degradations {
        eprintln!("warning: {}", d);
    }
    if report.cancelled {
        bail!("export cancelled");
    }
    match report.output_path {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => bail!("no document was written"),
    }
}
