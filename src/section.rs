use crate::types::Pt;
use std::fmt;
use tiny_skia::Pixmap;

/// Opaque handle to a live-view region. The view decides what the string means.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionRef(String);

impl SectionRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SectionRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One report unit, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    pub forces_page_break: bool,
    pub excluded: bool,
    pub source: SectionRef,
    /// CSS pixel width to assume when the view reports no width of its own.
    pub content_width_hint: Option<u32>,
}

impl Section {
    pub fn new(title: impl Into<String>, source: impl Into<SectionRef>) -> Self {
        Self {
            title: title.into(),
            forces_page_break: false,
            excluded: false,
            source: source.into(),
            content_width_hint: None,
        }
    }

    pub fn with_page_break(mut self) -> Self {
        self.forces_page_break = true;
        self
    }

    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }

    pub fn with_width_hint(mut self, css_px: u32) -> Self {
        self.content_width_hint = Some(css_px);
        self
    }
}

/// Flattened bitmap of one section.
#[derive(Debug, Clone)]
pub struct RasterSnapshot {
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Height once the bitmap is scaled to the document content width.
    pub scaled_height: Pt,
    pixmap: Pixmap,
}

impl RasterSnapshot {
    /// Wraps a finished bitmap, deriving `scaled_height` for `content_width`.
    pub fn from_pixmap(pixmap: Pixmap, content_width: Pt) -> Self {
        let pixel_width = pixmap.width();
        let pixel_height = pixmap.height();
        Self {
            pixel_width,
            pixel_height,
            scaled_height: scaled_height(pixel_width, pixel_height, content_width),
            pixmap,
        }
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }
}

pub(crate) fn scaled_height(pixel_width: u32, pixel_height: u32, content_width: Pt) -> Pt {
    if pixel_width == 0 {
        return Pt::ZERO;
    }
    content_width.mul_ratio(pixel_height as u64, pixel_width as u64)
}

/// Capture outcome for one section as the layout passes see it.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SectionContent<'a> {
    Raster(&'a RasterSnapshot),
    /// Capture failed: the title bar is kept, the content area is empty.
    Missing,
}

impl SectionContent<'_> {
    pub(crate) fn height(&self) -> Pt {
        match self {
            SectionContent::Raster(snapshot) => snapshot.scaled_height,
            SectionContent::Missing => Pt::ZERO,
        }
    }
}
