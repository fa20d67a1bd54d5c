//! In-memory stand-in for a live dashboard, shared by unit tests.

use crate::capture::{LayerKind, LiveView, MapLayer, MapRegion, NodeRef, SurfaceSize};
use crate::error::ViewError;
use crate::raster::LayerBitmap;
use crate::section::SectionRef;
use crate::types::Matrix2D;
use base64::Engine;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;
use tiny_skia::Pixmap;

pub(crate) const GREEN: [u8; 3] = [0, 255, 0];
pub(crate) const RED: [u8; 3] = [255, 0, 0];

pub(crate) struct FakeSection {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) background: [u8; 3],
    pub(crate) regions: Vec<MapRegion>,
    pub(crate) flatten_failures: u32,
    attempts: Cell<u32>,
}

impl FakeSection {
    pub(crate) fn plain(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            background: [255, 255, 255],
            regions: Vec::new(),
            flatten_failures: 0,
            attempts: Cell::new(0),
        }
    }

    pub(crate) fn filled(width: u32, height: u32, background: [u8; 3]) -> Self {
        Self {
            background,
            ..Self::plain(width, height)
        }
    }
}

#[derive(Clone)]
pub(crate) struct FakeLayer {
    node: String,
    kind: LayerKind,
    pane: Option<String>,
    css_width: f32,
    css_height: f32,
    color: [u8; 3],
    delay: Option<Duration>,
    data_uri: bool,
}

impl FakeLayer {
    pub(crate) fn canvas(node: &str, pane: Option<&str>, w: f32, h: f32, color: [u8; 3]) -> Self {
        Self {
            node: node.to_string(),
            kind: LayerKind::Canvas,
            pane: pane.map(str::to_string),
            css_width: w,
            css_height: h,
            color,
            delay: None,
            data_uri: false,
        }
    }

    pub(crate) fn vector(node: &str, pane: Option<&str>, w: f32, h: f32, color: [u8; 3]) -> Self {
        Self {
            kind: LayerKind::Vector,
            ..Self::canvas(node, pane, w, h, color)
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn as_data_uri(mut self) -> Self {
        self.data_uri = true;
        self
    }

    pub(crate) fn layer(&self) -> MapLayer {
        MapLayer {
            node: NodeRef::new(self.node.clone()),
            kind: self.kind,
            pane: self.pane.clone().map(NodeRef::new),
            css_width: self.css_width,
            css_height: self.css_height,
        }
    }

    fn bitmap(&self) -> Result<LayerBitmap, ViewError> {
        let w = self.css_width.max(1.0) as u32;
        let h = self.css_height.max(1.0) as u32;
        if self.data_uri {
            let [r, g, b] = self.color;
            let img = image::RgbaImage::from_pixel(w, h, image::Rgba([r, g, b, 255]));
            let mut bytes = Vec::new();
            img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
                .map_err(|err| ViewError::new(err.to_string()))?;
            return Ok(LayerBitmap::DataUri(format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(&bytes)
            )));
        }
        Ok(LayerBitmap::Pixmap(solid(w, h, self.color)?))
    }
}

fn solid(w: u32, h: u32, [r, g, b]: [u8; 3]) -> Result<Pixmap, ViewError> {
    let mut pixmap = Pixmap::new(w.max(1), h.max(1)).ok_or_else(|| ViewError::new("bad size"))?;
    pixmap.fill(tiny_skia::Color::from_rgba8(r, g, b, 255));
    Ok(pixmap)
}

pub(crate) struct FakeSaved {
    transforms: HashMap<String, Matrix2D>,
    chrome_hidden: bool,
}

/// Tracks its presentation state so tests can assert it is put back exactly.
#[derive(Default)]
pub(crate) struct FakeView {
    sections: HashMap<String, FakeSection>,
    layers: HashMap<String, FakeLayer>,
    transforms: HashMap<String, Matrix2D>,
    original_transforms: HashMap<String, Matrix2D>,
    chrome_hidden: bool,
    outstanding: usize,
    suspends: usize,
    flatten_chrome: RefCell<Vec<bool>>,
    pub(crate) fail_restore: bool,
}

impl FakeView {
    pub(crate) fn with_section(mut self, id: &str, section: FakeSection) -> Self {
        self.sections.insert(id.to_string(), section);
        self
    }

    pub(crate) fn with_layer(mut self, layer: FakeLayer) -> Self {
        self.layers.insert(layer.node.clone(), layer);
        self
    }

    pub(crate) fn with_transform(mut self, node: &str, matrix: Matrix2D) -> Self {
        self.transforms.insert(node.to_string(), matrix);
        self.original_transforms.insert(node.to_string(), matrix);
        self
    }

    pub(crate) fn is_pristine(&self) -> bool {
        !self.chrome_hidden && self.outstanding == 0 && self.transforms == self.original_transforms
    }

    pub(crate) fn suspend_count(&self) -> usize {
        self.suspends
    }

    /// Whether chrome was visible at each `flatten_static` call.
    pub(crate) fn chrome_visible_during_flatten(&self) -> Vec<bool> {
        self.flatten_chrome.borrow().clone()
    }
}

impl LiveView for FakeView {
    type Saved = FakeSaved;

    fn measure(&self, section: &SectionRef) -> Result<Option<SurfaceSize>, ViewError> {
        Ok(self.sections.get(section.as_str()).map(|s| SurfaceSize {
            width: s.width,
            height: s.height,
        }))
    }

    fn map_regions(&self, section: &SectionRef) -> Vec<MapRegion> {
        self.sections
            .get(section.as_str())
            .map(|s| s.regions.clone())
            .unwrap_or_default()
    }

    fn resolve_effective_transform(&self, node: &NodeRef) -> Matrix2D {
        self.transforms
            .get(node.as_str())
            .copied()
            .unwrap_or_default()
    }

    fn suspend_presentation(&mut self, _section: &SectionRef) -> Result<FakeSaved, ViewError> {
        let saved = FakeSaved {
            transforms: std::mem::take(&mut self.transforms),
            chrome_hidden: self.chrome_hidden,
        };
        self.chrome_hidden = true;
        self.outstanding += 1;
        self.suspends += 1;
        Ok(saved)
    }

    fn restore_presentation(&mut self, saved: FakeSaved) -> Result<(), ViewError> {
        if self.fail_restore {
            return Err(ViewError::new("view detached"));
        }
        self.transforms = saved.transforms;
        self.chrome_hidden = saved.chrome_hidden;
        self.outstanding -= 1;
        Ok(())
    }

    async fn flatten_static(&self, section: &SectionRef, scale: f32) -> Result<Pixmap, ViewError> {
        self.flatten_chrome.borrow_mut().push(!self.chrome_hidden);
        tokio::task::yield_now().await;
        let section = self
            .sections
            .get(section.as_str())
            .ok_or_else(|| ViewError::new("section vanished"))?;
        let attempt = section.attempts.get() + 1;
        section.attempts.set(attempt);
        if attempt <= section.flatten_failures {
            return Err(ViewError::new(format!("render attempt {attempt} failed")));
        }
        let w = (section.width.max(1) as f32 * scale).round() as u32;
        let h = (section.height.max(1) as f32 * scale).round() as u32;
        solid(w, h, section.background)
    }

    async fn layer_bitmap(&self, layer: &MapLayer) -> Result<LayerBitmap, ViewError> {
        let fake = self
            .layers
            .get(layer.node.as_str())
            .ok_or_else(|| ViewError::new(format!("no layer {}", layer.node)))?;
        if let Some(delay) = fake.delay {
            tokio::time::sleep(delay).await;
        }
        fake.bitmap()
    }
}
