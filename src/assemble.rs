use crate::canvas::{Canvas, Document};
use crate::debug::{DebugLogger, log_event};
use crate::error::{ReportError, Result};
use crate::geometry::PageGeometry;
use crate::layout::{LayoutSink, PageOpen, Slice, entries_for, walk};
use crate::progress::ProgressTracker;
use crate::raster::{copy_rows, row_at};
use crate::section::{RasterSnapshot, Section};
use crate::types::{Color, Pt};
use serde_json::json;

pub(crate) const REGULAR: &str = "Helvetica";
pub(crate) const BOLD: &str = "Helvetica-Bold";

pub(crate) const BRAND: Color = Color {
    r: 0.118,
    g: 0.337,
    b: 0.192,
};
pub(crate) const MUTED: Color = Color {
    r: 0.42,
    g: 0.45,
    b: 0.43,
};

/// Text repeated on every content page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageChrome {
    pub product_name: String,
    /// Subject of the report, shown under the product name.
    pub report_name: String,
    pub date_label: String,
    pub footer_lines: Vec<String>,
}

impl Default for PageChrome {
    fn default() -> Self {
        Self {
            product_name: "Field Report".to_string(),
            report_name: "Report".to_string(),
            date_label: String::new(),
            footer_lines: Vec::new(),
        }
    }
}

/// Advance width of `text` in the base-14 Helvetica metrics (close enough for the bold face).
pub(crate) fn text_width(text: &str, font_size: Pt) -> Pt {
    let units: u32 = text.chars().map(glyph_units).sum();
    font_size * (units as f32 / 1000.0)
}

fn glyph_units(ch: char) -> u32 {
    match ch {
        ' ' | '/' | '.' | ',' | ':' | '!' | 'f' | 't' | 'I' | '[' | ']' => 278,
        'i' | 'j' | 'l' | '\'' => 222,
        '-' | '(' | ')' | 'r' => 333,
        'm' => 833,
        'w' => 722,
        'W' => 944,
        'M' => 833,
        'A' | 'B' | 'E' | 'K' | 'P' | 'S' | 'V' | 'X' | 'Y' => 667,
        'C' | 'D' | 'H' | 'N' | 'R' | 'U' => 722,
        'G' | 'O' | 'Q' => 778,
        'F' | 'T' | 'Z' => 611,
        'J' | 'c' | 'k' | 's' | 'v' | 'x' | 'y' | 'z' => 500,
        'L' => 556,
        _ => 556,
    }
}

/// Header band of a content page: product, subject and date on the left and right, the
/// `current/total` indicator under the date.
pub(crate) fn draw_header(
    canvas: &mut Canvas,
    geometry: &PageGeometry,
    chrome: &PageChrome,
    indicator: &str,
) {
    if geometry.header_band <= Pt::ZERO {
        return;
    }
    let left = geometry.margin_left;
    let right = geometry.page_size.width - geometry.margin_right;
    let top = geometry.header_band * 0.2;

    canvas.set_fill_color(BRAND);
    canvas.set_font(BOLD, Pt::from_f32(12.0));
    canvas.draw_string(left, top, chrome.product_name.clone());
    canvas.set_fill_color(Color::BLACK);
    canvas.set_font(REGULAR, Pt::from_f32(9.0));
    canvas.draw_string(left, top + Pt::from_f32(15.0), chrome.report_name.clone());
    if !chrome.date_label.is_empty() {
        canvas.set_font(REGULAR, Pt::from_f32(8.0));
        let width = text_width(&chrome.date_label, Pt::from_f32(8.0));
        canvas.draw_string(right - width, top, chrome.date_label.clone());
    }
    canvas.set_font(BOLD, Pt::from_f32(9.0));
    let width = text_width(indicator, Pt::from_f32(9.0));
    canvas.draw_string(right - width, top + Pt::from_f32(15.0), indicator);

    canvas.set_stroke_color(BRAND);
    canvas.set_line_width(Pt::from_f32(0.75));
    canvas.hline(left, right, geometry.header_band);
}

/// Footer band: a rule and the static copyright/contact lines. Drawn on the cover too.
pub(crate) fn draw_footer(canvas: &mut Canvas, geometry: &PageGeometry, chrome: &PageChrome) {
    if geometry.footer_band <= Pt::ZERO {
        return;
    }
    let left = geometry.margin_left;
    let right = geometry.page_size.width - geometry.margin_right;
    let page_height = geometry.page_size.height;
    let top = page_height - geometry.footer_band;

    canvas.set_stroke_color(MUTED);
    canvas.set_line_width(Pt::from_f32(0.5));
    canvas.hline(left, right, top);
    canvas.set_fill_color(MUTED);
    canvas.set_font(REGULAR, Pt::from_f32(7.0));
    let mut y = top + Pt::from_f32(4.0);
    for line in &chrome.footer_lines {
        if y + Pt::from_f32(7.0) > page_height {
            break;
        }
        canvas.draw_string(left, y, line.clone());
        y += Pt::from_f32(9.0);
    }
    canvas.set_fill_color(Color::BLACK);
}

/// Render pass. Replays the placement walk and draws what the measurement pass planned.
pub struct PageAssembler<'a> {
    geometry: &'a PageGeometry,
    chrome: &'a PageChrome,
    logger: Option<&'a DebugLogger>,
}

impl<'a> PageAssembler<'a> {
    pub fn new(geometry: &'a PageGeometry, chrome: &'a PageChrome) -> Self {
        Self {
            geometry,
            chrome,
            logger: None,
        }
    }

    pub(crate) fn with_logger(mut self, logger: Option<&'a DebugLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Renders the content pages into a fresh document. `total_pages` counts the cover.
    pub fn render(
        &self,
        sections: &[Section],
        snapshots: &[Option<RasterSnapshot>],
        total_pages: usize,
    ) -> Result<Document> {
        let mut canvas = Canvas::new(self.geometry.page_size);
        self.render_into(&mut canvas, sections, snapshots, total_pages, None)?;
        Ok(canvas.finish())
    }

    /// Appends the content pages to `canvas` and returns how many were emitted.
    pub(crate) fn render_into(
        &self,
        canvas: &mut Canvas,
        sections: &[Section],
        snapshots: &[Option<RasterSnapshot>],
        total_pages: usize,
        progress: Option<&ProgressTracker<'_>>,
    ) -> Result<usize> {
        let entries = entries_for(sections, snapshots)?;
        let mut sink = RenderSink {
            canvas,
            assembler: self,
            sections,
            snapshots,
            total_pages,
            opened: 0,
            progress,
        };
        let content_pages = walk(&entries, self.geometry, &mut sink)?;
        sink.close_page();

        let rendered = sink.opened;
        if rendered != content_pages || rendered + 1 != total_pages {
            return Err(ReportError::PageCountMismatch {
                planned: total_pages,
                rendered: rendered + 1,
            });
        }
        Ok(rendered)
    }
}

struct RenderSink<'c, 'a, 'p> {
    canvas: &'c mut Canvas,
    assembler: &'c PageAssembler<'a>,
    sections: &'c [Section],
    snapshots: &'c [Option<RasterSnapshot>],
    total_pages: usize,
    opened: usize,
    progress: Option<&'c ProgressTracker<'p>>,
}

impl RenderSink<'_, '_, '_> {
    fn close_page(&mut self) {
        if self.opened == 0 {
            return;
        }
        log_event(
            self.assembler.logger,
            "render.page",
            json!({
                "page": self.opened + 1,
                "commands": self.canvas.current_command_count(),
            }),
        );
        self.canvas.show_page();
        if let Some(progress) = self.progress {
            progress.rendered(self.opened, self.total_pages.saturating_sub(1));
        }
    }
}

impl LayoutSink for RenderSink<'_, '_, '_> {
    fn open_page(&mut self, page: usize, reason: PageOpen) {
        self.close_page();
        self.opened += 1;
        let absolute = page + 1;
        if reason != PageOpen::First {
            log_event(
                self.assembler.logger,
                "layout.page_break",
                json!({"page": absolute, "reason": reason.as_str()}),
            );
        }
        self.canvas.meta("page", absolute.to_string());
        let indicator = format!("{absolute}/{}", self.total_pages);
        draw_header(
            self.canvas,
            self.assembler.geometry,
            self.assembler.chrome,
            &indicator,
        );
        draw_footer(self.canvas, self.assembler.geometry, self.assembler.chrome);
    }

    fn title_bar(&mut self, section_index: usize, _page: usize, y: Pt) {
        let geometry = self.assembler.geometry;
        let Some(section) = self.sections.get(section_index) else {
            return;
        };
        let font_size = Pt::from_f32(10.0).min(geometry.title_bar);
        self.canvas.meta("section", section_index.to_string());
        if geometry.title_bar > Pt::ZERO {
            self.canvas.fill_rect(
                geometry.margin_left,
                y,
                geometry.content_width(),
                geometry.title_bar,
                BRAND,
            );
        }
        self.canvas.set_fill_color(Color::WHITE);
        self.canvas.set_font(BOLD, font_size);
        self.canvas.draw_string(
            geometry.margin_left + Pt::from_mm(3.0),
            y + (geometry.title_bar - font_size) * 0.5,
            section.title.clone(),
        );
        self.canvas.set_fill_color(Color::BLACK);
    }

    fn content(&mut self, section_index: usize, slice: Slice) {
        let geometry = self.assembler.geometry;
        let Some(Some(snapshot)) = self.snapshots.get(section_index) else {
            return;
        };
        let x = geometry.margin_left;
        let width = geometry.content_width();
        if slice.source_offset == Pt::ZERO && slice.height == snapshot.scaled_height {
            self.canvas.draw_image(
                x,
                slice.dest_y,
                width,
                slice.height,
                format!("s{section_index}"),
                snapshot.pixmap().clone(),
            );
            return;
        }

        let start = row_at(
            slice.source_offset,
            snapshot.pixel_height,
            snapshot.scaled_height,
        );
        let end = row_at(
            slice.source_offset + slice.height,
            snapshot.pixel_height,
            snapshot.scaled_height,
        );
        match copy_rows(snapshot.pixmap(), start, end) {
            Some(rows) => self.canvas.draw_image(
                x,
                slice.dest_y,
                width,
                slice.height,
                format!("s{section_index}-r{start}"),
                rows,
            ),
            None => log::debug!(
                "slice of section {section_index} at {:?} rounds to zero rows",
                slice.source_offset
            ),
        }
    }
}
