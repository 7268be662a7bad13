//! Output document: page model, text layout and the PDF writer

pub mod pdf;
pub mod text;

use crate::rendering::PageSlice;
use crate::Result;

pub use pdf::PdfDocument;
pub use text::{TextLayout, TextPage, TextPaginator};

/// Receives finished pages in document order.
pub trait DocumentSink {
    fn add_image_page(&mut self, slice: &PageSlice) -> Result<()>;
    fn add_text_page(&mut self, page: &TextPage) -> Result<()>;
    fn page_count(&self) -> usize;
}

/// `<title>_<YYYY-MM-DD>.pdf`, keeping only filename-safe characters.
pub fn output_file_name(title: &str, date: chrono::NaiveDate) -> String {
    let mut stem = String::with_capacity(title.len());
    for c in title.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            stem.push(c);
        } else if c.is_whitespace() && !stem.ends_with('_') {
            stem.push('_');
        }
    }
    let stem = stem.trim_matches('_');
    let stem = if stem.is_empty() { "report" } else { stem };
    format!("{}_{}.pdf", stem, date.format("%Y-%m-%d"))
}
