//! Text paginator: lays out pre-formatted text across fixed-size pages
//!
//! Bodies are set in a monospace face so the wrap width in characters is
//! exact. Long lines wrap at word boundaries where possible and at the
//! column limit otherwise; original line breaks are always kept.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Advance width of one monospace glyph, in ems
const MONO_ADVANCE_EM: f32 = 0.6;
/// Average proportional glyph width, in ems, used to wrap headings
const PROPORTIONAL_ADVANCE_EM: f32 = 0.55;

/// Text page geometry, in points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextLayout {
    pub margin: f32,
    pub cover_title_size: f32,
    pub title_size: f32,
    pub title_advance: f32,
    pub body_size: f32,
    pub line_height: f32,
    /// Blank lines advance by this smaller step
    pub blank_line_height: f32,
}

impl Default for TextLayout {
    fn default() -> Self {
        Self {
            margin: 40.0,
            cover_title_size: 22.0,
            title_size: 14.0,
            title_advance: 24.0,
            body_size: 8.0,
            line_height: 10.0,
            blank_line_height: 5.0,
        }
    }
}

impl TextLayout {
    pub fn validate(&self, page_width: f32, page_height: f32) -> Result<()> {
        let sizes = [
            self.cover_title_size,
            self.title_size,
            self.title_advance,
            self.body_size,
            self.line_height,
            self.blank_line_height,
        ];
        if sizes.iter().any(|s| !(*s > 0.0)) || self.margin < 0.0 {
            return Err(Error::ConfigError("text sizes must be positive".into()));
        }
        if page_width - 2.0 * self.margin < self.body_size * MONO_ADVANCE_EM {
            return Err(Error::ConfigError("page too narrow for text margins".into()));
        }
        if page_height - 2.0 * self.margin < self.title_advance + self.line_height {
            return Err(Error::ConfigError("page too short for text margins".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontRole {
    Heading,
    Body,
    Mono,
}

/// One line of text placed on a page. `y` is the baseline, measured from the
/// top edge.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub font: FontRole,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextPage {
    pub runs: Vec<TextRun>,
}

impl TextPage {
    pub fn texts(&self) -> Vec<&str> {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

/// Pretty-printed dump of one section, or `None` when the section is absent.
pub fn format_section(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => serde_json::to_string_pretty(other).ok(),
    }
}

/// Split `line` into pieces of at most `max_chars` characters.
///
/// Breaks after the last whitespace that follows visible text in the window,
/// or hard at the limit if there is none. Trailing whitespace of a piece is
/// trimmed; nothing else is lost or reordered. Indentation wider than a whole
/// line is folded into the next piece rather than emitted as a blank one.
pub fn wrap_line(line: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = line.chars().collect();
    if chars.len() <= max_chars {
        return vec![line.to_string()];
    }

    let mut out = Vec::new();
    let mut start = 0;
    while chars.len() - start > max_chars {
        let window = &chars[start..start + max_chars];
        let Some(first) = window.iter().position(|c| !c.is_whitespace()) else {
            start += max_chars;
            continue;
        };
        let brk = window
            .iter()
            .rposition(|c| c.is_whitespace())
            .filter(|&p| p > first)
            .map(|p| p + 1)
            .unwrap_or(max_chars);
        let piece: String = chars[start..start + brk].iter().collect();
        out.push(piece.trim_end().to_string());
        start += brk;
    }
    out.push(chars[start..].iter().collect());
    out
}

pub struct TextPaginator {
    layout: TextLayout,
    page_width: f32,
    page_height: f32,
}

impl TextPaginator {
    pub fn new(layout: TextLayout, page_width: f32, page_height: f32) -> Self {
        Self {
            layout,
            page_width,
            page_height,
        }
    }

    pub fn layout(&self) -> &TextLayout {
        &self.layout
    }

    /// Monospace columns available on one line.
    pub fn chars_per_line(&self) -> usize {
        columns(self.usable_width(), self.layout.body_size, MONO_ADVANCE_EM)
    }

    fn usable_width(&self) -> f32 {
        self.page_width - 2.0 * self.layout.margin
    }

    fn bottom(&self) -> f32 {
        self.page_height - self.layout.margin
    }

    /// Lay out `(title, body)` sections in order. Sections without a body are
    /// skipped; every other section starts on a fresh page.
    pub fn paginate_sections(&self, sections: &[(String, Option<String>)]) -> Vec<TextPage> {
        let mut cursor = Cursor::new(self);
        let cols = self.chars_per_line();
        for (title, body) in sections {
            let Some(body) = body else { continue };
            cursor.break_page();
            cursor.place(title, FontRole::Heading, self.layout.title_size, self.layout.title_advance);
            for line in body.lines() {
                if line.trim().is_empty() {
                    cursor.blank(self.layout.blank_line_height);
                    continue;
                }
                for piece in wrap_line(line, cols) {
                    cursor.place(&piece, FontRole::Mono, self.layout.body_size, self.layout.line_height);
                }
            }
        }
        cursor.finish()
    }

    /// Cover page: wrapped title followed by detail lines.
    pub fn title_page(&self, title: &str, details: &[String]) -> TextPage {
        let size = self.layout.cover_title_size;
        let mut cursor = Cursor::new(self);
        cursor.y = self.layout.margin + size * 2.0;
        for piece in wrap_line(title, columns(self.usable_width(), size, PROPORTIONAL_ADVANCE_EM)) {
            cursor.place(&piece, FontRole::Heading, size, size * 1.3);
        }
        cursor.blank(size);
        let body = self.layout.body_size * 1.5;
        for line in details {
            for piece in wrap_line(line, columns(self.usable_width(), body, PROPORTIONAL_ADVANCE_EM)) {
                cursor.place(&piece, FontRole::Body, body, body * 1.5);
            }
        }
        cursor.finish().into_iter().next().unwrap_or_default()
    }

    /// A single page standing in for output that could not be produced.
    pub fn error_page(&self, heading: &str, message: &str, detail: &str) -> TextPage {
        let l = &self.layout;
        let mut cursor = Cursor::new(self);
        cursor.place(heading, FontRole::Heading, l.title_size, l.title_advance);
        let body = l.body_size * 1.25;
        for piece in wrap_line(message, columns(self.usable_width(), body, PROPORTIONAL_ADVANCE_EM)) {
            cursor.place(&piece, FontRole::Body, body, l.line_height * 1.25);
        }
        cursor.blank(l.line_height);
        for piece in wrap_line(&format!("Detail: {}", detail), self.chars_per_line()) {
            cursor.place(&piece, FontRole::Mono, l.body_size, l.line_height);
        }
        // error pages never spill; keep the first page only
        cursor.finish().into_iter().next().unwrap_or_default()
    }
}

fn columns(width: f32, size: f32, advance_em: f32) -> usize {
    ((width / (size * advance_em)).floor() as usize).max(1)
}

/// Vertical cursor over a growing list of pages
struct Cursor<'a> {
    paginator: &'a TextPaginator,
    pages: Vec<TextPage>,
    page: TextPage,
    dirty: bool,
    y: f32,
}

impl<'a> Cursor<'a> {
    fn new(paginator: &'a TextPaginator) -> Self {
        Self {
            paginator,
            pages: Vec::new(),
            page: TextPage::default(),
            dirty: false,
            y: paginator.layout.margin,
        }
    }

    fn break_page(&mut self) {
        if self.dirty {
            self.pages.push(std::mem::take(&mut self.page));
        }
        self.dirty = false;
        self.y = self.paginator.layout.margin;
    }

    fn ensure_room(&mut self, advance: f32) {
        if self.dirty && self.y + advance > self.paginator.bottom() {
            self.break_page();
        }
    }

    fn place(&mut self, text: &str, font: FontRole, size: f32, advance: f32) {
        self.ensure_room(advance);
        self.page.runs.push(TextRun {
            x: self.paginator.layout.margin,
            y: self.y + size,
            size,
            font,
            text: text.to_string(),
        });
        self.y += advance;
        self.dirty = true;
    }

    fn blank(&mut self, advance: f32) {
        self.ensure_room(advance);
        self.y += advance;
        self.dirty = true;
    }

    fn finish(mut self) -> Vec<TextPage> {
        if self.dirty {
            self.pages.push(self.page);
        }
        self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn small() -> TextPaginator {
        // 200x200pt, 20pt margins: 160pt usable; 8pt mono -> 33 columns
        let layout = TextLayout {
            margin: 20.0,
            title_advance: 20.0,
            line_height: 10.0,
            blank_line_height: 4.0,
            ..Default::default()
        };
        TextPaginator::new(layout, 200.0, 200.0)
    }

    #[test]
    fn wrap_keeps_short_lines_and_breaks_at_words() {
        assert_eq!(wrap_line("short", 10), vec!["short"]);
        assert_eq!(wrap_line("alpha beta gamma", 11), vec!["alpha beta", "gamma"]);
        assert_eq!(wrap_line("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn wrap_does_not_break_inside_leading_indentation() {
        let pieces = wrap_line("    \"key\": \"averyveryverylongvalue\"", 12);
        assert!(pieces.iter().all(|p| !p.trim().is_empty()));
        let joined: String = pieces.concat().chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(joined, "\"key\":\"averyveryverylongvalue\"");
    }

    #[test]
    fn indentation_wider_than_a_line_is_not_a_blank_piece() {
        let deep = format!("{}\"k\": 1", " ".repeat(40));
        assert_eq!(wrap_line(&deep, 33), vec![format!("{}\"k\": 1", " ".repeat(7))]);

        let deeper = format!("{}\"key\": \"value\"", " ".repeat(70));
        let pieces = wrap_line(&deeper, 33);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].trim_start(), "\"key\": \"value\"");
    }

    #[test]
    fn absent_sections_are_skipped() {
        let p = small();
        let pages = p.paginate_sections(&[
            ("hero".into(), format_section(&json!({"a": 1}))),
            ("team".into(), format_section(&Value::Null)),
            ("footer".into(), format_section(&json!("bye"))),
        ]);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].runs[0].text, "hero");
        assert_eq!(pages[1].runs[0].text, "footer");
        assert!(pages.iter().all(|p| !p.texts().contains(&"team")));
    }

    #[test]
    fn long_sections_split_across_pages_without_loss() {
        let p = small();
        let body: Vec<String> = (0..40).map(|i| format!("line {}", i)).collect();
        let pages = p.paginate_sections(&[("big".into(), Some(body.join("\n")))]);
        assert!(pages.len() > 1);

        let bottom = 200.0 - 20.0;
        for page in &pages {
            for run in &page.runs {
                assert!(run.y <= bottom, "run '{}' below margin", run.text);
            }
        }
        let texts: Vec<String> = pages.iter().flat_map(|p| p.texts()).map(String::from).collect();
        assert_eq!(texts[0], "big");
        assert_eq!(&texts[1..], &body[..]);
        assert_eq!(texts.iter().filter(|t| *t == "big").count(), 1);
    }

    #[test]
    fn wide_lines_wrap_in_place() {
        let p = small();
        let cols = p.chars_per_line();
        assert_eq!(cols, 33);
        let long = "x".repeat(cols * 2 + 5);
        let pages = p.paginate_sections(&[("s".into(), Some(format!("first\n{}\nlast", long)))]);
        assert_eq!(pages[0].texts(), vec!["s", "first", &long[..cols], &long[cols..cols * 2], &long[cols * 2..], "last"]);
    }

    #[test]
    fn blank_lines_advance_less_than_text_lines() {
        let p = small();
        let pages = p.paginate_sections(&[("s".into(), Some("a\n\nb\nc".into()))]);
        let runs = &pages[0].runs;
        let gap_with_blank = runs[2].y - runs[1].y;
        let gap_plain = runs[3].y - runs[2].y;
        assert_eq!(gap_plain, 10.0);
        assert_eq!(gap_with_blank, 14.0);
    }

    #[test]
    fn every_section_starts_a_page() {
        let p = small();
        let pages = p.paginate_sections(&[("a".into(), Some("1".into())), ("b".into(), Some("2".into()))]);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].runs[0].y, pages[0].runs[0].y);
    }

    #[test]
    fn error_page_carries_detail_line() {
        let page = small().error_page("Visual capture unavailable", "The report could not be rendered.", "Sandbox load timed out after 30000ms");
        let texts = page.texts();
        assert_eq!(texts[0], "Visual capture unavailable");
        assert!(texts.iter().any(|t| t.starts_with("Detail:")));
    }

    #[test]
    fn layout_validation() {
        let l = TextLayout::default();
        assert!(l.validate(595.28, 841.89).is_ok());
        assert!(l.validate(60.0, 841.89).is_err());
        assert!(l.validate(595.28, 100.0).is_err());
    }
}
