//! Raster stages: chunked capture, compositing and page re-tiling

pub mod composite;
pub mod paginate;
pub mod raster;

pub use composite::{CompositeBitmap, Compositor};
pub use paginate::{PageGeometry, PageSlice};
pub use raster::{plan_chunks, CaptureSession, Chunk, ChunkSpan};

/// Length in device pixels of `css` CSS pixels at `scale`.
///
/// Every stage converts through this one function so chunk placement and
/// composite size round the same way.
pub fn scaled_len(css: u32, scale: f32) -> u32 {
    ((css as f64) * (scale as f64)).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_len_rounds_to_nearest() {
        assert_eq!(scaled_len(4000, 2.0), 8000);
        assert_eq!(scaled_len(3, 1.5), 5);
        assert_eq!(scaled_len(0, 3.0), 0);
    }
}
