use crate::assemble::{BOLD, BRAND, MUTED, PageChrome, REGULAR, draw_footer, text_width};
use crate::canvas::{Canvas, Page};
use crate::geometry::PageGeometry;
use crate::types::{Color, Pt};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const NOT_AVAILABLE: &str = "N/A";

const CARD_FILL: Color = Color {
    r: 0.953,
    g: 0.965,
    b: 0.957,
};

/// Descriptive data about the report subject. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportMetadata {
    pub subject_id: Option<String>,
    pub subject_name: Option<String>,
    pub crop: Option<String>,
    pub variety: Option<String>,
    /// Sowing date.
    pub reference_date: Option<NaiveDate>,
    pub area_hectares: Option<f64>,
    pub irrigation: Option<String>,
}

impl ReportMetadata {
    /// Label/value pairs of the metadata card, in reading order.
    pub fn card_rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Field ID", text_or_na(self.subject_id.as_deref())),
            ("Field", text_or_na(self.subject_name.as_deref())),
            ("Crop", text_or_na(self.crop.as_deref())),
            ("Variety", text_or_na(self.variety.as_deref())),
            (
                "Sowing date",
                self.reference_date
                    .map(|date| date.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            ),
            ("Irrigation", text_or_na(self.irrigation.as_deref())),
            (
                "Area",
                self.area_hectares
                    .filter(|area| area.is_finite())
                    .map(|area| format!("{area:.2} ha"))
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            ),
        ]
    }
}

fn text_or_na(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Static first page: brand block, metadata card and the generation date.
pub struct CoverPageGenerator<'a> {
    geometry: &'a PageGeometry,
    chrome: &'a PageChrome,
    generated_on: NaiveDate,
}

impl<'a> CoverPageGenerator<'a> {
    pub fn new(geometry: &'a PageGeometry, chrome: &'a PageChrome, generated_on: NaiveDate) -> Self {
        Self {
            geometry,
            chrome,
            generated_on,
        }
    }

    pub fn render(&self, metadata: &ReportMetadata) -> Page {
        let mut canvas = Canvas::new(self.geometry.page_size);
        self.draw(&mut canvas, metadata);
        canvas.finish().pages.into_iter().next().unwrap_or_default()
    }

    /// Draws the cover onto the open page of `canvas` and closes it.
    pub(crate) fn draw(&self, canvas: &mut Canvas, metadata: &ReportMetadata) {
        let geometry = self.geometry;
        let left = geometry.margin_left;
        let width = geometry.content_width();

        canvas.meta("page", "1");
        canvas.meta("cover", "true");

        // Brand block.
        let block_height = Pt::from_mm(55.0);
        canvas.fill_rect(Pt::ZERO, Pt::ZERO, geometry.page_size.width, block_height, BRAND);
        canvas.set_fill_color(Color::WHITE);
        canvas.set_font(BOLD, Pt::from_f32(26.0));
        canvas.draw_string(left, Pt::from_mm(18.0), self.chrome.product_name.clone());
        canvas.set_font(REGULAR, Pt::from_f32(12.0));
        canvas.draw_string(left, Pt::from_mm(32.0), "Field report");

        let title = metadata
            .subject_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("Field report");
        canvas.set_fill_color(Color::BLACK);
        canvas.set_font(BOLD, Pt::from_f32(20.0));
        canvas.draw_string(left, Pt::from_mm(70.0), title);

        self.draw_card(canvas, metadata, left, Pt::from_mm(88.0), width);

        let generated = self.generated_on.format("%Y-%m-%d").to_string();
        let block_top = geometry.content_end() - Pt::from_mm(20.0);
        canvas.set_fill_color(MUTED);
        canvas.set_font(REGULAR, Pt::from_f32(9.0));
        canvas.draw_string(left, block_top, "Generated on");
        canvas.set_fill_color(Color::BLACK);
        canvas.set_font(BOLD, Pt::from_f32(12.0));
        canvas.draw_string(left, block_top + Pt::from_f32(13.0), generated);

        draw_footer(canvas, geometry, self.chrome);
        canvas.show_page();
    }

    /// Two-column card; rows alternate between the left and right column.
    fn draw_card(&self, canvas: &mut Canvas, metadata: &ReportMetadata, x: Pt, y: Pt, width: Pt) {
        let rows = metadata.card_rows();
        let row_height = Pt::from_mm(14.0);
        let padding = Pt::from_mm(5.0);
        let line_count = rows.len().div_ceil(2);
        let height = padding + padding + row_height * line_count as f32;
        let column = (width - padding - padding) * 0.5;
        let value_size = Pt::from_f32(11.0);

        canvas.fill_rect(x, y, width, height, CARD_FILL);
        canvas.set_stroke_color(BRAND);
        canvas.set_line_width(Pt::from_f32(0.75));
        canvas.hline(x, x + width, y);

        for (index, (label, value)) in rows.into_iter().enumerate() {
            let col_x = x + padding + if index % 2 == 0 { Pt::ZERO } else { column };
            let row_y = y + padding + row_height * (index / 2) as f32;
            canvas.set_fill_color(MUTED);
            canvas.set_font(REGULAR, Pt::from_f32(8.0));
            canvas.draw_string(col_x, row_y, label);
            canvas.set_fill_color(Color::BLACK);
            canvas.set_font(BOLD, value_size);
            let value = fit_to_width(&value, value_size, column - padding);
            canvas.draw_string(col_x, row_y + Pt::from_f32(11.0), value);
        }
    }
}

/// Truncates with an ellipsis so long names stay inside their column.
fn fit_to_width(text: &str, font_size: Pt, max: Pt) -> String {
    if text_width(text, font_size) <= max {
        return text.to_string();
    }
    let mut out = String::new();
    for ch in text.chars() {
        out.push(ch);
        if text_width(&out, font_size) + text_width("...", font_size) > max {
            out.pop();
            break;
        }
    }
    out.push_str("...");
    out
}
