//! Bitmap compositor: reassembles chunks into one full-resolution bitmap

use super::raster::Chunk;
use super::scaled_len;
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use tiny_skia::{Color, IntRect, Pixmap, PixmapPaint, Transform};

/// The full document as one bitmap, `(width·scale, height·scale)` device pixels.
pub struct CompositeBitmap {
    pixmap: Pixmap,
    background: Color,
}

impl CompositeBitmap {
    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn background(&self) -> Color {
        self.background
    }

    /// Hex SHA-256 of the premultiplied RGBA pixel data.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.pixmap.width().to_be_bytes());
        hasher.update(self.pixmap.height().to_be_bytes());
        hasher.update(self.pixmap.data());
        hex::encode(hasher.finalize())
    }
}

/// Draws chunks, in ascending offset order, onto a background-filled canvas.
pub struct Compositor {
    pixmap: Pixmap,
    background: Color,
    scale: f32,
    last_offset: Option<u32>,
}

impl Compositor {
    /// Allocate a `(width·scale) × (height·scale)` canvas filled with `background`.
    pub fn new(width: u32, height: u32, scale: f32, background: Color) -> Result<Self> {
        let w = scaled_len(width, scale);
        let h = scaled_len(height, scale);
        let mut pixmap = Pixmap::new(w, h)
            .ok_or_else(|| Error::CaptureFailure(format!("cannot allocate {}x{} composite bitmap", w, h)))?;
        pixmap.fill(background);
        Ok(Self {
            pixmap,
            background,
            scale,
            last_offset: None,
        })
    }

    /// Draw one chunk at `offset·scale`, clipped to its own interval. The
    /// chunk is consumed.
    pub fn draw(&mut self, chunk: Chunk) -> Result<()> {
        let span = chunk.span;
        if let Some(last) = self.last_offset {
            if span.offset <= last {
                return Err(Error::CaptureFailure(format!(
                    "chunk at offset {} drawn after offset {}",
                    span.offset, last
                )));
            }
        }
        self.last_offset = Some(span.offset);

        let top = scaled_len(span.offset, self.scale);
        let interval = scaled_len(span.end(), self.scale).saturating_sub(top);
        let available = self.pixmap.height().saturating_sub(top);
        let rows = interval.min(available).min(chunk.bitmap.height());
        let cols = chunk.bitmap.width().min(self.pixmap.width());
        if rows == 0 || cols == 0 {
            return Ok(());
        }

        let clipped;
        let source = if rows < chunk.bitmap.height() || cols < chunk.bitmap.width() {
            let rect = IntRect::from_xywh(0, 0, cols, rows)
                .ok_or_else(|| Error::CaptureFailure("invalid chunk clip rectangle".into()))?;
            clipped = chunk
                .bitmap
                .clone_rect(rect)
                .ok_or_else(|| Error::CaptureFailure("failed to clip chunk bitmap".into()))?;
            &clipped
        } else {
            &chunk.bitmap
        };

        self.pixmap.draw_pixmap(
            0,
            top as i32,
            source.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        Ok(())
    }

    pub fn finish(self) -> CompositeBitmap {
        CompositeBitmap {
            pixmap: self.pixmap,
            background: self.background,
        }
    }

    /// Composite a complete chunk list. Chunks are drawn in ascending offset
    /// order whatever order they arrive in.
    pub fn composite(
        width: u32,
        height: u32,
        scale: f32,
        background: Color,
        mut chunks: Vec<Chunk>,
    ) -> Result<CompositeBitmap> {
        chunks.sort_by_key(|c| c.span.offset);
        let mut compositor = Compositor::new(width, height, scale, background)?;
        for chunk in chunks {
            compositor.draw(chunk)?;
        }
        Ok(compositor.finish())
    }
}
