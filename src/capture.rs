use crate::debug::{DebugLogger, log_event};
use crate::error::{CaptureError, ViewError};
use crate::raster::{LayerBitmap, draw_layer};
use crate::section::{RasterSnapshot, Section, SectionRef};
use crate::types::{Matrix2D, Pt};
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::time::{Duration, Instant};
use tiny_skia::Pixmap;

/// Size of a live region in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

/// Handle to a node inside the live view (a map pane, a layer element).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(String);

impl NodeRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Raster imagery drawn on a canvas surface.
    Canvas,
    /// Overlays drawn on a vector surface; rasterizing them may take a while.
    Vector,
}

impl LayerKind {
    fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Canvas => "canvas",
            LayerKind::Vector => "vector",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapLayer {
    pub node: NodeRef,
    pub kind: LayerKind,
    /// Pane the layer hangs from; pan/zoom is often applied there instead of on the layer.
    pub pane: Option<NodeRef>,
    pub css_width: f32,
    pub css_height: f32,
}

/// An interactive map inside a section.
#[derive(Debug, Clone, PartialEq)]
pub struct MapRegion {
    /// Top-left of the map container relative to the section, in CSS pixels.
    pub offset_x: f32,
    pub offset_y: f32,
    pub layers: Vec<MapLayer>,
}

/// View-layer collaborator. Implemented by whatever hosts the live dashboard.
pub trait LiveView {
    /// Presentation state saved by [`LiveView::suspend_presentation`].
    type Saved;

    /// `Ok(None)` when the section is not in the view.
    fn measure(&self, section: &SectionRef) -> Result<Option<SurfaceSize>, ViewError>;

    fn map_regions(&self, section: &SectionRef) -> Vec<MapRegion>;

    /// Transform currently in effect for `node`, as computed by the view (not the declared
    /// style).
    fn resolve_effective_transform(&self, node: &NodeRef) -> Matrix2D;

    /// Hides chrome (legend toggles, buttons) and neutralizes inline transforms for the
    /// section, returning what is needed to put everything back.
    fn suspend_presentation(&mut self, section: &SectionRef) -> Result<Self::Saved, ViewError>;

    fn restore_presentation(&mut self, saved: Self::Saved) -> Result<(), ViewError>;

    /// Flattens the non-map content at `scale` device pixels per CSS pixel.
    fn flatten_static(
        &self,
        section: &SectionRef,
        scale: f32,
    ) -> impl Future<Output = Result<Pixmap, ViewError>>;

    fn layer_bitmap(&self, layer: &MapLayer) -> impl Future<Output = Result<LayerBitmap, ViewError>>;
}

/// Presentation state held suspended for one section. Restores on drop, which covers
/// success, error returns and a dropped (cancelled) capture future alike.
pub struct PresentationGuard<'v, V: LiveView> {
    view: &'v mut V,
    saved: Option<V::Saved>,
    section: SectionRef,
    logger: Option<DebugLogger>,
}

impl<'v, V: LiveView> PresentationGuard<'v, V> {
    pub fn acquire(view: &'v mut V, section: &SectionRef) -> Result<Self, ViewError> {
        let saved = view.suspend_presentation(section)?;
        Ok(Self {
            view,
            saved: Some(saved),
            section: section.clone(),
            logger: None,
        })
    }

    fn with_logger(mut self, logger: Option<DebugLogger>) -> Self {
        self.logger = logger;
        self
    }
}

impl<V: LiveView> Deref for PresentationGuard<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        self.view
    }
}

impl<V: LiveView> Drop for PresentationGuard<'_, V> {
    fn drop(&mut self) {
        let Some(saved) = self.saved.take() else {
            return;
        };
        if let Err(err) = self.view.restore_presentation(saved) {
            // Stale presentation state is preferable to aborting the build.
            log::warn!("restoring presentation of section {} failed: {err}", self.section);
            log_event(
                self.logger.as_ref(),
                "capture.restore_failed",
                json!({"section": self.section.as_str(), "error": err.to_string()}),
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    /// Device pixels per CSS pixel in the flattened bitmap.
    pub supersample: f32,
    /// Upper bound on waiting for one layer's bitmap.
    pub layer_timeout: Duration,
    /// Extra attempts at flattening the static content.
    pub retries: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            supersample: 2.0,
            layer_timeout: Duration::from_secs(8),
            retries: 1,
        }
    }
}

struct PlannedLayer {
    layer: MapLayer,
    placement: Matrix2D,
}

/// Flattens sections of a live view into [`RasterSnapshot`]s.
pub struct RasterCaptureService {
    settings: CaptureSettings,
    content_width: Pt,
    logger: Option<DebugLogger>,
}

impl RasterCaptureService {
    pub fn new(settings: CaptureSettings, content_width: Pt) -> Self {
        Self {
            settings,
            content_width,
            logger: None,
        }
    }

    pub(crate) fn with_logger(mut self, logger: Option<DebugLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub async fn capture<V: LiveView>(
        &self,
        view: &mut V,
        section: &Section,
    ) -> Result<RasterSnapshot, CaptureError> {
        let started = Instant::now();
        let id = section.source.as_str();
        let size = view
            .measure(&section.source)
            .map_err(|err| CaptureError::View {
                section: id.to_string(),
                message: err.to_string(),
            })?
            .ok_or_else(|| CaptureError::UnknownSection(id.to_string()))?;
        let width = if size.width == 0 {
            section.content_width_hint.unwrap_or(0)
        } else {
            size.width
        };
        if width == 0 || size.height == 0 {
            return Err(CaptureError::ZeroSize {
                section: id.to_string(),
                width,
                height: size.height,
            });
        }

        let ss = self.settings.supersample.max(1.0);
        let dest_w = (width as f32 * ss).round().max(1.0) as u32;
        let dest_h = (size.height as f32 * ss).round().max(1.0) as u32;
        let mut dest = Pixmap::new(dest_w, dest_h).ok_or_else(|| CaptureError::ZeroSize {
            section: id.to_string(),
            width: dest_w,
            height: dest_h,
        })?;
        dest.fill(tiny_skia::Color::WHITE);

        // Transforms are read while the view is still live; the guard neutralizes them.
        let layers = self.plan_layers(&*view, &section.source, ss);

        let guard = PresentationGuard::acquire(view, &section.source)
            .map_err(|err| CaptureError::View {
                section: id.to_string(),
                message: err.to_string(),
            })?
            .with_logger(self.logger.clone());

        let flat = self.flatten_with_retry(&*guard, &section.source, ss).await?;
        draw_layer(
            &mut dest,
            &flat,
            width as f32,
            size.height as f32,
            Matrix2D::scale(ss, ss),
        );

        let mut drawn = 0usize;
        let mut skipped = 0usize;
        for planned in &layers {
            if self.draw_map_layer(&*guard, &mut dest, planned, id).await {
                drawn += 1;
            } else {
                skipped += 1;
            }
        }
        drop(guard);

        if let Some(logger) = self.logger.as_ref() {
            logger.increment("capture.layers_drawn", drawn as u64);
        }
        let snapshot = RasterSnapshot::from_pixmap(dest, self.content_width);
        log::debug!(
            "captured section {id}: {}x{} px, {drawn} layer(s), {skipped} skipped",
            snapshot.pixel_width,
            snapshot.pixel_height
        );
        log_event(
            self.logger.as_ref(),
            "capture.section",
            json!({
                "section": id,
                "pixel_width": snapshot.pixel_width,
                "pixel_height": snapshot.pixel_height,
                "scaled_height_pt": snapshot.scaled_height.to_f32(),
                "layers_drawn": drawn,
                "layers_skipped": skipped,
                "ms": started.elapsed().as_secs_f64() * 1000.0,
            }),
        );
        Ok(snapshot)
    }

    fn plan_layers<V: LiveView>(&self, view: &V, section: &SectionRef, ss: f32) -> Vec<PlannedLayer> {
        let device = Matrix2D::scale(ss, ss);
        let mut planned = Vec::new();
        for region in view.map_regions(section) {
            let container = device.then(Matrix2D::translate(region.offset_x, region.offset_y));
            for layer in region.layers {
                let pane = layer
                    .pane
                    .as_ref()
                    .map(|pane| view.resolve_effective_transform(pane))
                    .unwrap_or_default();
                let own = view.resolve_effective_transform(&layer.node);
                planned.push(PlannedLayer {
                    placement: container.then(pane).then(own),
                    layer,
                });
            }
        }
        planned
    }

    async fn flatten_with_retry<V: LiveView>(
        &self,
        view: &V,
        section: &SectionRef,
        scale: f32,
    ) -> Result<Pixmap, CaptureError> {
        let attempts = self.settings.retries.saturating_add(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match view.flatten_static(section, scale).await {
                Ok(pixmap) => return Ok(pixmap),
                Err(err) => {
                    log::warn!(
                        "flattening section {section} failed (attempt {attempt}/{attempts}): {err}"
                    );
                    last_error = err.to_string();
                }
            }
        }
        Err(CaptureError::Flatten {
            section: section.to_string(),
            attempts,
            message: last_error,
        })
    }

    /// Draws one layer; a slow or broken layer is skipped and the capture keeps what it has.
    async fn draw_map_layer<V: LiveView>(
        &self,
        view: &V,
        dest: &mut Pixmap,
        planned: &PlannedLayer,
        section: &str,
    ) -> bool {
        let layer = &planned.layer;
        let outcome =
            tokio::time::timeout(self.settings.layer_timeout, view.layer_bitmap(layer)).await;
        let reason = match outcome {
            Ok(Ok(bitmap)) => match bitmap.into_pixmap() {
                Some(pixmap) => {
                    if draw_layer(
                        dest,
                        &pixmap,
                        layer.css_width,
                        layer.css_height,
                        planned.placement,
                    ) {
                        return true;
                    }
                    "empty or non-finite layer".to_string()
                }
                None => "undecodable layer bitmap".to_string(),
            },
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!(
                "timed out after {} ms",
                self.settings.layer_timeout.as_millis()
            ),
        };
        log::warn!(
            "skipping {} layer {} of section {section}: {reason}",
            layer.kind.as_str(),
            layer.node
        );
        log_event(
            self.logger.as_ref(),
            "capture.layer_skipped",
            json!({
                "section": section,
                "layer": layer.node.as_str(),
                "kind": layer.kind.as_str(),
                "reason": reason,
            }),
        );
        false
    }
}
