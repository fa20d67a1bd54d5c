mod artifact;
mod assemble;
mod canvas;
mod capture;
mod config;
mod cover;
mod debug;
mod error;
mod geometry;
mod layout;
mod metrics;
mod pdf;
mod pdfinspect;
mod progress;
mod raster;
mod section;
#[cfg(test)]
mod testing;
mod types;

pub use artifact::{DocumentArtifact, report_file_name};
pub use assemble::{PageAssembler, PageChrome};
pub use canvas::{Canvas, Command, Document, Page};
pub use capture::{
    CaptureSettings, LayerKind, LiveView, MapLayer, MapRegion, NodeRef, PresentationGuard,
    RasterCaptureService, SurfaceSize,
};
pub use config::ReportConfig;
pub use cover::{CoverPageGenerator, ReportMetadata};
use debug::{DebugLogger, log_event};
pub use error::{CaptureError, ReportError, Result, ViewError};
pub use geometry::PageGeometry;
pub use layout::{LayoutPlan, PageOpen, SectionPlacement, Slice, plan};
pub use metrics::{BuildMetrics, CaptureMetrics, PageMetrics};
pub use pdf::{PdfOptions, document_to_pdf};
pub use pdfinspect::{
    PdfInspectError, PdfInspectErrorCode, PdfInspectReport, inspect_pdf_bytes, inspect_pdf_path,
    require_page_count,
};
pub use progress::{BuildStage, FnProgress, NoProgress, ProgressSink};
use progress::ProgressTracker;
pub use raster::LayerBitmap;
pub use section::{RasterSnapshot, Section, SectionRef};
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};
pub use types::{Color, Matrix2D, Pt, Size};

use chrono::NaiveDate;

/// Report export pipeline: capture, plan, cover, render, serialize.
pub struct FieldPress {
    config: ReportConfig,
    generated_on: Option<NaiveDate>,
    debug: Option<DebugLogger>,
}

impl FieldPress {
    pub fn builder() -> FieldPressBuilder {
        FieldPressBuilder::new()
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    fn emit_debug_summary(&self, context: &str) {
        if let Some(logger) = self.debug.as_ref() {
            logger.emit_summary(context);
            logger.flush();
        }
    }

    /// Builds the report for `sections` out of the live `view`.
    ///
    /// Sections are captured one at a time and in order. A section that fails to capture is
    /// kept with its title bar and no content; the failure is listed in the returned metrics.
    /// Dropping the returned future restores any presentation state the view had suspended.
    pub async fn build<V: LiveView>(
        &self,
        view: &mut V,
        sections: &[Section],
        metadata: &ReportMetadata,
        progress: &dyn ProgressSink,
    ) -> Result<(DocumentArtifact, BuildMetrics)> {
        let result = self.build_inner(view, sections, metadata, progress).await;
        if let Err(err) = &result {
            log::warn!("report build failed: {err}");
            log_event(
                self.debug.as_ref(),
                "build.failed",
                json!({"error": err.to_string()}),
            );
        }
        self.emit_debug_summary("build");
        result
    }

    async fn build_inner<V: LiveView>(
        &self,
        view: &mut V,
        sections: &[Section],
        metadata: &ReportMetadata,
        progress: &dyn ProgressSink,
    ) -> Result<(DocumentArtifact, BuildMetrics)> {
        let geometry = &self.config.geometry;
        geometry.validate()?;

        let tracker = ProgressTracker::new(progress);
        let mut metrics = BuildMetrics::default();
        let generated_on = self
            .generated_on
            .unwrap_or_else(|| chrono::Local::now().date_naive());

        tracker.stage(BuildStage::Capture);
        let started = Instant::now();
        let snapshots = self
            .capture_all(view, sections, &tracker, &mut metrics)
            .await;
        metrics.capture_ms = started.elapsed().as_secs_f64() * 1000.0;

        tracker.stage(BuildStage::Layout);
        let started = Instant::now();
        let plan = layout::plan(sections, &snapshots, geometry)?;
        metrics.layout_ms = started.elapsed().as_secs_f64() * 1000.0;
        log::debug!(
            "planned {} page(s) for {} section(s)",
            plan.total_pages,
            sections.len()
        );

        let chrome = PageChrome {
            product_name: self.config.product_name.clone(),
            report_name: metadata
                .subject_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| "Report".to_string()),
            date_label: generated_on.format("%Y-%m-%d").to_string(),
            footer_lines: self.config.footer_lines.clone(),
        };

        tracker.stage(BuildStage::Cover);
        let started = Instant::now();
        let mut canvas = Canvas::new(geometry.page_size);
        CoverPageGenerator::new(geometry, &chrome, generated_on).draw(&mut canvas, metadata);

        tracker.stage(BuildStage::Render);
        PageAssembler::new(geometry, &chrome)
            .with_logger(self.debug.as_ref())
            .render_into(
                &mut canvas,
                sections,
                &snapshots,
                plan.total_pages,
                Some(&tracker),
            )?;
        let document = canvas.finish();
        metrics.render_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics.record_pages(&document);
        if document.pages.len() != plan.total_pages {
            return Err(ReportError::PageCountMismatch {
                planned: plan.total_pages,
                rendered: document.pages.len(),
            });
        }

        tracker.stage(BuildStage::Serialize);
        let started = Instant::now();
        let options = PdfOptions {
            title: Some(format!("{} - {}", chrome.product_name, chrome.report_name)),
            creation_date: Some(generated_on.format("D:%Y%m%d").to_string()),
            ..PdfOptions::default()
        };
        let bytes = document_to_pdf(&document, &options)?;
        if self.config.verify_output {
            inspect_pdf_bytes(&bytes)
                .and_then(|report| require_page_count(&report, plan.total_pages))
                .map_err(|err| ReportError::Serialization(err.to_string()))?;
        }
        metrics.serialize_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics.total_bytes = bytes.len();

        let file_name = report_file_name(
            &self.config.file_prefix,
            metadata.subject_name.as_deref(),
            generated_on,
        );
        tracker.stage(BuildStage::Done);
        Ok((DocumentArtifact::new(file_name, bytes), metrics))
    }

    /// Captures every non-excluded section in order; failures become `None`.
    async fn capture_all<V: LiveView>(
        &self,
        view: &mut V,
        sections: &[Section],
        tracker: &ProgressTracker<'_>,
        metrics: &mut BuildMetrics,
    ) -> Vec<Option<RasterSnapshot>> {
        let service = RasterCaptureService::new(
            CaptureSettings {
                supersample: self.config.supersample,
                layer_timeout: self.config.layer_timeout(),
                retries: self.config.capture_retries,
            },
            self.config.geometry.content_width(),
        )
        .with_logger(self.debug.clone());

        let mut snapshots = Vec::with_capacity(sections.len());
        for (index, section) in sections.iter().enumerate() {
            if section.excluded {
                snapshots.push(None);
                tracker.captured(index + 1, sections.len());
                continue;
            }
            let started = Instant::now();
            let outcome = service.capture(&mut *view, section).await;
            let capture_ms = started.elapsed().as_secs_f64() * 1000.0;
            match outcome {
                Ok(snapshot) => {
                    metrics.captures.push(CaptureMetrics {
                        section_index: index,
                        capture_ms,
                        pixel_width: snapshot.pixel_width,
                        pixel_height: snapshot.pixel_height,
                        error: None,
                    });
                    snapshots.push(Some(snapshot));
                }
                Err(err) => {
                    log::warn!("section {:?} kept without content: {err}", section.title);
                    log_event(
                        self.debug.as_ref(),
                        "capture.failed",
                        json!({
                            "index": index,
                            "section": section.source.as_str(),
                            "error": err.to_string(),
                        }),
                    );
                    metrics.captures.push(CaptureMetrics {
                        section_index: index,
                        capture_ms,
                        error: Some(err.to_string()),
                        ..CaptureMetrics::default()
                    });
                    snapshots.push(None);
                }
            }
            tracker.captured(index + 1, sections.len());
        }
        snapshots
    }
}

pub struct FieldPressBuilder {
    config: ReportConfig,
    generated_on: Option<NaiveDate>,
    debug_path: Option<PathBuf>,
}

impl Default for FieldPressBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldPressBuilder {
    pub fn new() -> Self {
        Self {
            config: ReportConfig::default(),
            generated_on: None,
            debug_path: None,
        }
    }

    /// Replaces every setting with `config`; later calls still override single fields.
    pub fn config(mut self, config: ReportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn geometry(mut self, geometry: PageGeometry) -> Self {
        self.config.geometry = geometry;
        self
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.config.geometry.page_size = size;
        self
    }

    pub fn supersample(mut self, factor: f32) -> Self {
        self.config.supersample = factor;
        self
    }

    pub fn layer_timeout(mut self, timeout: Duration) -> Self {
        self.config.layer_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn capture_retries(mut self, retries: u32) -> Self {
        self.config.capture_retries = retries;
        self
    }

    pub fn product_name(mut self, name: impl Into<String>) -> Self {
        self.config.product_name = name.into();
        self
    }

    pub fn footer_line(mut self, line: impl Into<String>) -> Self {
        self.config.footer_lines.push(line.into());
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    pub fn verify_output(mut self, enabled: bool) -> Self {
        self.config.verify_output = enabled;
        self
    }

    /// Date shown in the header and used in the file name. Defaults to today (local time).
    pub fn generated_on(mut self, date: NaiveDate) -> Self {
        self.generated_on = Some(date);
        self
    }

    /// Writes a JSON-lines build log to `path`.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<FieldPress> {
        self.config.validate()?;
        let debug = match self.debug_path {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };
        Ok(FieldPress {
            config: self.config,
            generated_on: self.generated_on,
            debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::tests::SharedBuffer;
    use crate::progress::tests::Recorder;
    use crate::testing::{FakeLayer, FakeSection, FakeView, GREEN};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
    }

    fn press() -> FieldPress {
        FieldPress::builder()
            .product_name("AgroView")
            .footer_line("(c) AgroView")
            .footer_line("support@agroview.example")
            .generated_on(date())
            .layer_timeout(Duration::from_millis(50))
            .build()
            .unwrap()
    }

    fn press_with_log(buffer: &SharedBuffer) -> FieldPress {
        let mut press = press();
        press.debug = Some(DebugLogger::from_writer(buffer.clone()));
        press
    }

    fn metadata() -> ReportMetadata {
        ReportMetadata {
            subject_id: Some("F-102".to_string()),
            subject_name: Some("North Field".to_string()),
            crop: Some("Wheat".to_string()),
            ..ReportMetadata::default()
        }
    }

    /// Three sections: a map with a canvas layer, a tall chart and a table.
    fn dashboard() -> (FakeView, Vec<Section>) {
        let mut map = FakeSection::plain(400, 250);
        map.regions.push(MapRegion {
            offset_x: 0.0,
            offset_y: 20.0,
            layers: vec![FakeLayer::canvas("tiles", Some("pane"), 400.0, 230.0, GREEN).layer()],
        });
        let view = FakeView::default()
            .with_section("map", map)
            .with_section("chart", FakeSection::filled(400, 1200, [240, 240, 250]))
            .with_section("table", FakeSection::plain(400, 150))
            .with_transform("pane", Matrix2D::translate(-60.0, -30.0))
            .with_layer(FakeLayer::canvas("tiles", Some("pane"), 400.0, 230.0, GREEN));
        let sections = vec![
            Section::new("Field map", "map"),
            Section::new("Yield history", "chart"),
            Section::new("Operations", "table").with_page_break(),
        ];
        (view, sections)
    }

    #[tokio::test]
    async fn build_produces_pdf_with_planned_page_count() {
        let (mut view, sections) = dashboard();
        let recorder = Recorder::default();
        let (artifact, metrics) = press()
            .build(&mut view, &sections, &metadata(), &recorder)
            .await
            .unwrap();

        let report = inspect_pdf_bytes(&artifact.bytes).unwrap();
        assert_eq!(report.page_count, metrics.total_pages);
        assert!(report.page_count >= 3);
        assert!(report.image_count >= 3);
        assert_eq!(artifact.file_name, "fieldreport-North-Field-2026-10-15.pdf");
        assert!(metrics.failed_sections().is_empty());
        assert!(view.is_pristine());

        let values = recorder.values.lock().unwrap().clone();
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{values:?}");
        assert_eq!(values.last(), Some(&100));
        let stages = recorder.stages.lock().unwrap().clone();
        assert_eq!(
            stages,
            vec![
                BuildStage::Capture,
                BuildStage::Layout,
                BuildStage::Cover,
                BuildStage::Render,
                BuildStage::Serialize,
                BuildStage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn failed_capture_keeps_the_section_and_finishes() {
        let mut view = FakeView::default()
            .with_section("ok", FakeSection::plain(400, 200))
            .with_section("empty", FakeSection::plain(400, 0));
        let sections = vec![
            Section::new("Rainfall", "empty"),
            Section::new("NDVI", "ok"),
        ];
        let recorder = Recorder::default();
        let buffer = SharedBuffer::default();
        let (artifact, metrics) = press_with_log(&buffer)
            .build(&mut view, &sections, &ReportMetadata::default(), &recorder)
            .await
            .unwrap();

        assert_eq!(metrics.failed_sections(), vec![0]);
        assert_eq!(metrics.total_pages, 2);
        assert_eq!(metrics.pages[1].image_count, 1);
        assert_eq!(artifact.file_name, "fieldreport-report-2026-10-15.pdf");
        assert_eq!(recorder.values.lock().unwrap().last(), Some(&100));

        let lines = buffer.lines();
        assert!(lines.iter().any(|l| l["type"] == "capture.failed" && l["index"] == 0));
        assert!(lines.iter().any(|l| l["type"] == "capture.section"));
        assert!(lines.iter().any(|l| l["type"] == "render.page"));
        assert_eq!(lines.last().unwrap()["type"], "debug.summary");
    }

    #[tokio::test]
    async fn excluded_sections_are_never_captured() {
        let mut view = FakeView::default().with_section("ok", FakeSection::plain(400, 200));
        let sections = vec![
            Section::new("Hidden", "not-in-view").excluded(),
            Section::new("NDVI", "ok"),
        ];
        let (_, metrics) = press()
            .build(&mut view, &sections, &metadata(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(metrics.captures.len(), 1);
        assert_eq!(metrics.captures[0].section_index, 1);
        assert_eq!(view.suspend_count(), 1);
    }

    #[tokio::test]
    async fn dropping_the_build_restores_the_view() {
        let mut map = FakeSection::plain(300, 300);
        map.regions.push(MapRegion {
            offset_x: 0.0,
            offset_y: 0.0,
            layers: vec![FakeLayer::vector("fields", None, 300.0, 300.0, GREEN).layer()],
        });
        let mut view = FakeView::default().with_section("map", map).with_layer(
            FakeLayer::vector("fields", None, 300.0, 300.0, GREEN)
                .with_delay(Duration::from_secs(10)),
        );
        let press = FieldPress::builder()
            .layer_timeout(Duration::from_secs(60))
            .generated_on(date())
            .build()
            .unwrap();
        let sections = vec![Section::new("Map", "map")];
        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            press.build(&mut view, &sections, &metadata(), &NoProgress),
        )
        .await;
        assert!(outcome.is_err());
        assert!(view.is_pristine());
    }

    #[tokio::test]
    async fn empty_section_list_yields_cover_and_one_content_page() {
        let mut view = FakeView::default();
        let (artifact, metrics) = press()
            .build(&mut view, &[], &metadata(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(metrics.total_pages, 2);
        assert_eq!(inspect_pdf_bytes(&artifact.bytes).unwrap().page_count, 2);
    }

    #[test]
    fn impossible_geometry_is_rejected_at_build_time() {
        let geometry = PageGeometry {
            min_content: Pt::from_mm(400.0),
            ..PageGeometry::default()
        };
        let err = FieldPress::builder().geometry(geometry).build().err().unwrap();
        assert!(matches!(err, ReportError::LayoutImpossible { .. }));
    }

    #[test]
    fn builder_settings_land_in_config() {
        let press = FieldPress::builder()
            .supersample(3.0)
            .capture_retries(4)
            .file_prefix("agro")
            .layer_timeout(Duration::from_millis(1500))
            .build()
            .unwrap();
        assert_eq!(press.config().supersample, 3.0);
        assert_eq!(press.config().capture_retries, 4);
        assert_eq!(press.config().file_prefix, "agro");
        assert_eq!(press.config().layer_timeout(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn saved_artifact_round_trips_through_lopdf() {
        let (mut view, sections) = dashboard();
        let (artifact, _) = press()
            .build(&mut view, &sections, &metadata(), &NoProgress)
            .await
            .unwrap();
        let dir = std::env::temp_dir().join(format!(
            "fieldpress_lib_save_{}_{}",
            std::process::id(),
            artifact.sha256_hex()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = artifact.save_to(&dir).unwrap();
        let report = inspect_pdf_path(&path).unwrap();
        assert_eq!(report.file_size_bytes, artifact.bytes.len());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
