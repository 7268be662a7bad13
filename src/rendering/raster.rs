//! Chunked rasterizer
//!
//! Splits `[0, full_height)` into contiguous intervals of at most
//! `chunk_height` CSS pixels and captures them one at a time, in ascending
//! order. Each chunk is handed to the sink as soon as it is captured, so only
//! one raw chunk bitmap is alive at a time; `chunk_height` therefore bounds
//! peak memory independently of document length.

use crate::progress::{ProgressBand, ProgressTracker};
use crate::sandbox::{CaptureRegion, SandboxController};
use crate::{Error, Result};
use log::{debug, info};
use tiny_skia::Pixmap;

/// One interval of the document, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub offset: u32,
    pub height: u32,
}

impl ChunkSpan {
    pub fn end(&self) -> u32 {
        self.offset + self.height
    }
}

/// A captured interval. Ownership moves to the compositor, which drops it
/// once drawn.
pub struct Chunk {
    pub span: ChunkSpan,
    pub bitmap: Pixmap,
}

/// Partition `[0, full_height)` into `ceil(full_height / chunk_height)` spans.
pub fn plan_chunks(full_height: u32, chunk_height: u32) -> Vec<ChunkSpan> {
    if chunk_height == 0 {
        return Vec::new();
    }
    let count = full_height.div_ceil(chunk_height);
    (0..count)
        .map(|i| {
            let offset = i * chunk_height;
            ChunkSpan {
                offset,
                height: chunk_height.min(full_height - offset),
            }
        })
        .collect()
}

/// Geometry and bookkeeping of one capture run.
///
/// Only spans are retained; bitmaps leave through the sink.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub width: u32,
    pub full_height: u32,
    pub chunk_height: u32,
    pub scale: f32,
    pub captured: Vec<ChunkSpan>,
}

impl CaptureSession {
    pub fn new(width: u32, full_height: u32, chunk_height: u32, scale: f32) -> Self {
        Self {
            width,
            full_height,
            chunk_height,
            scale,
            captured: Vec::new(),
        }
    }

    pub fn plan(&self) -> Vec<ChunkSpan> {
        plan_chunks(self.full_height, self.chunk_height)
    }

    /// Captured spans must tile `[0, full_height)` exactly, in order.
    pub fn verify_coverage(&self) -> Result<()> {
        let mut expected = 0u32;
        for span in &self.captured {
            if span.offset != expected || span.height == 0 {
                return Err(Error::CaptureFailure(format!(
                    "chunk coverage broken at offset {} (expected {})",
                    span.offset, expected
                )));
            }
            expected = span.end();
        }
        if expected != self.full_height {
            return Err(Error::CaptureFailure(format!(
                "chunks cover {}px of {}px",
                expected, self.full_height
            )));
        }
        Ok(())
    }
}

/// Capture every planned chunk in ascending order and pass each to `sink`.
///
/// Any failed interval fails the whole capture; no partial reassembly is
/// attempted. Cancellation is passed through unchanged.
pub async fn capture_chunks<F>(
    sandbox: &mut SandboxController,
    session: &mut CaptureSession,
    progress: &ProgressTracker,
    mut sink: F,
) -> Result<()>
where
    F: FnMut(Chunk) -> Result<()>,
{
    let plan = session.plan();
    let total = plan.len();
    let settle_ms = sandbox.scroll_settle_ms();
    info!(
        "capturing {}px in {} chunk(s) of {}px at {}x",
        session.full_height, total, session.chunk_height, session.scale
    );

    for (i, span) in plan.into_iter().enumerate() {
        progress.status(format!("Capturing chunk {}/{}", i + 1, total));
        sandbox.scroll_to(span.offset).await.map_err(|e| chunk_error(i, span, e))?;
        sandbox.settle(settle_ms).await?;

        let region = CaptureRegion {
            x: 0,
            y: span.offset,
            width: session.width,
            height: span.height,
        };
        let bitmap = sandbox
            .rasterize(region, session.scale)
            .await
            .map_err(|e| chunk_error(i, span, e))?;
        debug!(
            "chunk {} @{} -> {}x{} bitmap",
            i,
            span.offset,
            bitmap.width(),
            bitmap.height()
        );

        session.captured.push(span);
        sink(Chunk { span, bitmap })?;
        progress.report(
            ProgressBand::CAPTURE.at(i + 1, total),
            format!("Captured chunk {}/{}", i + 1, total),
        );
    }
    Ok(())
}

fn chunk_error(index: usize, span: ChunkSpan, err: Error) -> Error {
    match err {
        Error::Cancelled => Error::Cancelled,
        other => Error::CaptureFailure(format!("chunk {} at offset {}: {}", index, span.offset, other)),
    }
}
