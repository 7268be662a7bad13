//! PDF writer backed by `lopdf`
//!
//! Image pages embed each slice as a JPEG (`DCTDecode`) XObject scaled to the
//! page width and anchored at the top edge. Text pages use the standard
//! Helvetica and Courier faces, so no fonts are embedded.

use super::text::{FontRole, TextPage};
use super::DocumentSink;
use crate::rendering::PageSlice;
use crate::Result;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::path::Path;

pub struct PdfDocument {
    doc: Document,
    pages_id: ObjectId,
    font_resources: ObjectId,
    kids: Vec<ObjectId>,
    page_width: f32,
    page_height: f32,
    jpeg_quality: u8,
}

impl PdfDocument {
    pub fn new(page_width: f32, page_height: f32, jpeg_quality: u8) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let heading = doc.add_object(standard_font("Helvetica-Bold"));
        let body = doc.add_object(standard_font("Helvetica"));
        let mono = doc.add_object(standard_font("Courier"));
        let font_resources = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => heading,
                "F2" => body,
                "F3" => mono,
            },
        });

        Self {
            doc,
            pages_id,
            font_resources,
            kids: Vec::new(),
            page_width,
            page_height,
            jpeg_quality,
        }
    }

    fn push_page(&mut self, content: Content, resources: ObjectId) -> Result<()> {
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                self.page_width.into(),
                self.page_height.into(),
            ],
            "Contents" => content_id,
            "Resources" => resources,
        });
        self.kids.push(page_id);
        Ok(())
    }

    fn finalize(&mut self) {
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            "Count" => Object::Integer(self.kids.len() as i64),
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();
    }

    /// Write the document to `path`, consuming it.
    pub fn save(mut self, path: &Path) -> Result<()> {
        self.finalize();
        self.doc.save(path)?;
        Ok(())
    }

    /// Serialize the document to memory, consuming it.
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        self.finalize();
        let mut out = Vec::new();
        self.doc.save_to(&mut out)?;
        Ok(out)
    }
}

impl DocumentSink for PdfDocument {
    fn add_image_page(&mut self, slice: &PageSlice) -> Result<()> {
        let (w, h) = (slice.bitmap.width(), slice.bitmap.height());
        let mut rgb = Vec::with_capacity(w as usize * h as usize * 3);
        for px in slice.bitmap.pixels() {
            let c = px.demultiply();
            rgb.extend_from_slice(&[c.red(), c.green(), c.blue()]);
        }
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality).encode(&rgb, w, h, ExtendedColorType::Rgb8)?;
        drop(rgb);

        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(w as i64),
                "Height" => Object::Integer(h as i64),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "DCTDecode",
            },
            jpeg,
        )
        .with_compression(false);
        let image_id = self.doc.add_object(image);
        let resources = self.doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        });

        let bottom = self.page_height - slice.placement_height;
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        slice.placement_width.into(),
                        Object::Integer(0),
                        Object::Integer(0),
                        slice.placement_height.into(),
                        Object::Integer(0),
                        bottom.into(),
                    ],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        self.push_page(content, resources)
    }

    fn add_text_page(&mut self, page: &TextPage) -> Result<()> {
        let mut operations = Vec::with_capacity(page.runs.len() * 5);
        for run in &page.runs {
            let font = match run.font {
                FontRole::Heading => "F1",
                FontRole::Body => "F2",
                FontRole::Mono => "F3",
            };
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec![font.into(), run.size.into()]));
            operations.push(Operation::new("Td", vec![run.x.into(), (self.page_height - run.y).into()]));
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(win_ansi(&run.text), StringFormat::Literal)],
            ));
            operations.push(Operation::new("ET", vec![]));
        }
        let resources = self.font_resources;
        self.push_page(Content { operations }, resources)
    }

    fn page_count(&self) -> usize {
        self.kids.len()
    }
}

fn standard_font(base: &str) -> lopdf::Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => Object::Name(base.as_bytes().to_vec()),
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Latin-1 approximation of WinAnsi; anything else becomes `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7e | 0xa0..=0xff => c as u32 as u8,
            0x09 => b' ',
            _ => b'?',
        })
        .collect()
}
