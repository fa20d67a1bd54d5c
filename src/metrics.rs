use crate::canvas::Document;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageMetrics {
    pub page_number: usize,
    pub command_count: usize,
    pub image_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureMetrics {
    pub section_index: usize,
    pub capture_ms: f64,
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Capture error message when the section was kept without content.
    pub error: Option<String>,
}

/// Timings and counts for one build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildMetrics {
    pub captures: Vec<CaptureMetrics>,
    pub pages: Vec<PageMetrics>,
    pub total_pages: usize,
    pub capture_ms: f64,
    pub layout_ms: f64,
    pub render_ms: f64,
    pub serialize_ms: f64,
    pub total_bytes: usize,
}

impl BuildMetrics {
    pub fn failed_sections(&self) -> Vec<usize> {
        self.captures
            .iter()
            .filter(|capture| capture.error.is_some())
            .map(|capture| capture.section_index)
            .collect()
    }

    pub(crate) fn record_pages(&mut self, document: &Document) {
        self.pages = document
            .pages
            .iter()
            .enumerate()
            .map(|(index, page)| PageMetrics {
                page_number: index + 1,
                command_count: page.commands.len(),
                image_count: page.image_ids().count(),
            })
            .collect();
        self.total_pages = document.pages.len();
    }
}
