//! Page paginator: re-tiles the composite into output-page-shaped slices

use super::composite::CompositeBitmap;
use crate::progress::{ProgressBand, ProgressTracker};
use crate::{Error, Result};
use log::debug;
use tiny_skia::{Pixmap, PixmapPaint, Transform};

/// How the composite maps onto output pages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// Output units per composite pixel (`page_width / composite_width`)
    pub scale_factor: f64,
    /// Composite pixels that fit on one page
    pub scaled_page_height: f64,
    pub total_pages: usize,
}

impl PageGeometry {
    pub fn new(composite_width: u32, composite_height: u32, page_width: f32, page_height: f32) -> Result<Self> {
        if composite_width == 0 {
            return Err(Error::CaptureFailure("composite has zero width".into()));
        }
        let scale_factor = page_width as f64 / composite_width as f64;
        let scaled_page_height = page_height as f64 / scale_factor;
        if !(scaled_page_height >= 1.0) {
            return Err(Error::ConfigError(format!(
                "page of {}x{}pt holds less than one composite row",
                page_width, page_height
            )));
        }
        let total_pages = (composite_height as f64 / scaled_page_height).ceil() as usize;
        Ok(Self {
            scale_factor,
            scaled_page_height,
            total_pages,
        })
    }

    /// Source interval `[offset, offset + height)` of page `index`, in
    /// composite pixels. Consecutive pages share their boundary exactly.
    pub fn source_rect(&self, index: usize, composite_height: u32) -> (u32, u32) {
        let boundary = |i: usize| -> u32 {
            let y = (i as f64 * self.scaled_page_height).floor();
            (y.min(composite_height as f64)) as u32
        };
        let start = boundary(index);
        let end = if index + 1 >= self.total_pages {
            composite_height
        } else {
            boundary(index + 1)
        };
        (start, end.saturating_sub(start))
    }
}

/// One output image page
pub struct PageSlice {
    pub index: usize,
    /// Top of the source rectangle within the composite
    pub source_offset: u32,
    pub source_height: u32,
    /// `(composite_width, source_height)`, background underneath
    pub bitmap: Pixmap,
    /// Output units; the width always equals the page width
    pub placement_width: f32,
    pub placement_height: f32,
}

/// Slice `composite` into pages and hand them to `sink` in index order.
///
/// The composite is consumed and freed once the last slice is produced.
/// Returns the number of pages emitted.
pub fn paginate<F>(
    composite: CompositeBitmap,
    page_width: f32,
    page_height: f32,
    progress: &ProgressTracker,
    mut sink: F,
) -> Result<usize>
where
    F: FnMut(PageSlice) -> Result<()>,
{
    let width = composite.width();
    let height = composite.height();
    let geometry = PageGeometry::new(width, height, page_width, page_height)?;
    debug!(
        "paginating {}x{} composite into {} page(s), {:.1}px per page",
        width, height, geometry.total_pages, geometry.scaled_page_height
    );

    for index in 0..geometry.total_pages {
        let (offset, source_height) = geometry.source_rect(index, height);
        let mut bitmap = Pixmap::new(width, source_height).ok_or_else(|| {
            Error::CaptureFailure(format!("cannot allocate {}x{} page slice", width, source_height))
        })?;
        bitmap.fill(composite.background());
        bitmap.draw_pixmap(
            0,
            -(offset as i32),
            composite.pixmap().as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );

        sink(PageSlice {
            index,
            source_offset: offset,
            source_height,
            bitmap,
            placement_width: page_width,
            placement_height: (source_height as f64 * geometry.scale_factor) as f32,
        })?;
        progress.report(
            ProgressBand::PAGINATE.at(index + 1, geometry.total_pages),
            format!("Laid out page {}/{}", index + 1, geometry.total_pages),
        );
    }
    drop(composite);
    Ok(geometry.total_pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::composite::Compositor;
    use crate::rendering::raster::{Chunk, ChunkSpan};
    use crate::sandbox::synthetic::solid_pixmap;
    use tiny_skia::Color;

    #[test]
    fn page_count_is_ceiling_of_height_over_page_height() {
        // 100px wide onto a 50x70 page: 140 composite rows per page
        let g = PageGeometry::new(100, 1000, 50.0, 70.0).unwrap();
        assert_eq!(g.scale_factor, 0.5);
        assert_eq!(g.scaled_page_height, 140.0);
        assert_eq!(g.total_pages, 8);

        let exact = PageGeometry::new(100, 280, 50.0, 70.0).unwrap();
        assert_eq!(exact.total_pages, 2);
    }

    #[test]
    fn source_rects_are_contiguous_and_cover_once() {
        for (w, h, pw, ph) in [(2560u32, 18000u32, 595.28f32, 841.89f32), (100, 1000, 50.0, 70.0), (7, 13, 3.0, 5.0)] {
            let g = PageGeometry::new(w, h, pw, ph).unwrap();
            let mut cursor = 0;
            for i in 0..g.total_pages {
                let (offset, height) = g.source_rect(i, h);
                assert_eq!(offset, cursor);
                assert!(height > 0, "page {} of {} empty", i, g.total_pages);
                cursor += height;
            }
            assert_eq!(cursor, h);
        }
    }

    #[test]
    fn degenerate_page_is_rejected() {
        assert!(PageGeometry::new(10_000, 100, 600.0, 0.01).is_err());
        assert!(PageGeometry::new(0, 100, 600.0, 800.0).is_err());
    }

    #[test]
    fn slices_are_emitted_in_order_and_last_page_is_filled() {
        // Composite 10x25 of red over a green background.
        let mut c = Compositor::new(10, 25, 1.0, Color::from_rgba8(0, 255, 0, 255)).unwrap();
        c.draw(Chunk {
            span: ChunkSpan { offset: 0, height: 25 },
            bitmap: solid_pixmap(10, 25, [255, 0, 0]).unwrap(),
        })
        .unwrap();
        let composite = c.finish();

        let progress = ProgressTracker::new(None);
        let mut slices = Vec::new();
        // page 20x20pt: scale 2, 10 composite rows per page
        let n = paginate(composite, 20.0, 20.0, &progress, |s| {
            slices.push(s);
            Ok(())
        })
        .unwrap();

        assert_eq!(n, 3);
        let idx: Vec<usize> = slices.iter().map(|s| s.index).collect();
        assert_eq!(idx, vec![0, 1, 2]);
        let last = &slices[2];
        assert_eq!((last.source_offset, last.source_height), (20, 5));
        assert_eq!((last.bitmap.width(), last.bitmap.height()), (10, 5));
        assert_eq!(last.placement_height, 10.0);
        assert_eq!(last.placement_width, 20.0);
        let px = last.bitmap.pixel(9, 4).unwrap();
        assert_eq!((px.red(), px.alpha()), (255, 255));
        assert_eq!(progress.snapshot().percent, ProgressBand::PAGINATE.end);
    }

    #[test]
    fn sink_error_stops_pagination() {
        let c = Compositor::new(10, 100, 1.0, Color::WHITE).unwrap().finish();
        let progress = ProgressTracker::new(None);
        let mut calls = 0;
        let res = paginate(c, 10.0, 10.0, &progress, |_| {
            calls += 1;
            Err(Error::Document("disk full".into()))
        });
        assert!(res.is_err());
        assert_eq!(calls, 1);
    }
}
