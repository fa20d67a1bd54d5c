use crate::error::ReportError;
use crate::types::{Pt, Size};
use serde::{Deserialize, Serialize};

/// Fixed page layout for one build. Every length is in points; the serde form is millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageGeometry {
    pub page_size: Size,
    pub margin_left: Pt,
    pub margin_right: Pt,
    pub header_band: Pt,
    pub footer_band: Pt,
    /// Space between the header band and the content band, and between the content band and
    /// the footer band.
    pub band_padding: Pt,
    pub title_bar: Pt,
    pub section_gap: Pt,
    /// Content height that must fit under a title bar before a section may start on a page.
    pub min_content: Pt,
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self {
            page_size: Size::a4(),
            margin_left: Pt::from_mm(10.0),
            margin_right: Pt::from_mm(10.0),
            header_band: Pt::from_mm(20.0),
            footer_band: Pt::from_mm(12.0),
            band_padding: Pt::from_mm(4.0),
            title_bar: Pt::from_mm(8.0),
            section_gap: Pt::from_mm(5.0),
            min_content: Pt::from_mm(30.0),
        }
    }
}

impl PageGeometry {
    pub fn content_width(&self) -> Pt {
        self.page_size.width - self.margin_left - self.margin_right
    }

    pub fn content_start(&self) -> Pt {
        self.header_band + self.band_padding
    }

    pub fn content_end(&self) -> Pt {
        self.page_size.height - self.footer_band - self.band_padding
    }

    pub fn content_band(&self) -> Pt {
        self.content_end() - self.content_start()
    }

    /// Smallest band that can hold a title bar plus the minimum content under it.
    pub fn required_band(&self) -> Pt {
        self.title_bar + self.min_content
    }

    pub fn validate(&self) -> Result<(), ReportError> {
        if self.content_width() <= Pt::ZERO {
            return Err(ReportError::InvalidConfiguration(format!(
                "margins {:?} + {:?} leave no content width on a {:?} page",
                self.margin_left, self.margin_right, self.page_size.width
            )));
        }
        let negative = [
            self.margin_left,
            self.margin_right,
            self.header_band,
            self.footer_band,
            self.band_padding,
            self.title_bar,
            self.section_gap,
        ]
        .iter()
        .any(|v| *v < Pt::ZERO);
        if negative {
            return Err(ReportError::InvalidConfiguration(
                "page geometry lengths must not be negative".to_string(),
            ));
        }
        if self.min_content <= Pt::ZERO {
            return Err(ReportError::InvalidConfiguration(
                "minimum content height must be positive".to_string(),
            ));
        }
        let band = self.content_band();
        let required = self.required_band();
        if band < required {
            return Err(ReportError::LayoutImpossible { band, required });
        }
        Ok(())
    }
}
