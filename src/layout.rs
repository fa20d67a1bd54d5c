use crate::error::ReportError;
use crate::geometry::PageGeometry;
use crate::section::{RasterSnapshot, Section, SectionContent};
use crate::types::Pt;

/// Why the walk opened a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOpen {
    First,
    /// The section asked for a fresh page.
    ForcedBreak,
    /// Title bar plus minimum content did not fit under the cursor.
    NoRoom,
    /// Content continued from the previous page.
    Overflow,
}

impl PageOpen {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageOpen::First => "first",
            PageOpen::ForcedBreak => "forced_break",
            PageOpen::NoRoom => "no_room",
            PageOpen::Overflow => "overflow",
        }
    }
}

/// A vertical run of one section's scaled snapshot assigned to a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    /// 1-based content page (the cover is not counted).
    pub page: usize,
    /// Page y of the slice top.
    pub dest_y: Pt,
    /// Offset of the slice top within the scaled snapshot.
    pub source_offset: Pt,
    pub height: Pt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionPlacement {
    pub section_index: usize,
    pub start_page: usize,
    pub title_y: Pt,
    pub sliced: bool,
    pub slices: Vec<Slice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    /// Content pages plus the cover page.
    pub total_pages: usize,
    pub content_pages: usize,
    pub placements: Vec<SectionPlacement>,
}

impl LayoutPlan {
    pub fn placement(&self, section_index: usize) -> Option<&SectionPlacement> {
        self.placements
            .iter()
            .find(|p| p.section_index == section_index)
    }
}

/// Receives placement events from [`walk`]. The measurement pass records them; the render
/// pass draws them.
pub(crate) trait LayoutSink {
    fn open_page(&mut self, page: usize, reason: PageOpen);
    fn title_bar(&mut self, section_index: usize, page: usize, y: Pt);
    fn content(&mut self, section_index: usize, slice: Slice);
}

/// What the placement rules need to know about a section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LayoutEntry {
    pub forces_page_break: bool,
    pub excluded: bool,
    pub content_height: Pt,
}

impl LayoutEntry {
    pub(crate) fn new(section: &Section, content: SectionContent<'_>) -> Self {
        Self {
            forces_page_break: section.forces_page_break,
            excluded: section.excluded,
            content_height: content.height(),
        }
    }
}

pub(crate) fn entries_for(
    sections: &[Section],
    snapshots: &[Option<RasterSnapshot>],
) -> Result<Vec<LayoutEntry>, ReportError> {
    if sections.len() != snapshots.len() {
        return Err(ReportError::SnapshotMismatch {
            sections: sections.len(),
            snapshots: snapshots.len(),
        });
    }
    Ok(sections
        .iter()
        .zip(snapshots)
        .map(|(section, snapshot)| {
            let content = match snapshot {
                Some(snapshot) => SectionContent::Raster(snapshot),
                None => SectionContent::Missing,
            };
            LayoutEntry::new(section, content)
        })
        .collect())
}

/// The placement rules. Both passes run exactly this walk; returns the content page count.
pub(crate) fn walk<S: LayoutSink>(
    entries: &[LayoutEntry],
    geometry: &PageGeometry,
    sink: &mut S,
) -> Result<usize, ReportError> {
    geometry.validate()?;

    let start = geometry.content_start();
    let end = geometry.content_end();
    let mut page = 1usize;
    let mut y = start;
    let mut first = true;
    sink.open_page(page, PageOpen::First);

    for (index, entry) in entries.iter().enumerate() {
        if entry.excluded {
            continue;
        }

        if entry.forces_page_break && !first && y > start {
            page += 1;
            y = start;
            sink.open_page(page, PageOpen::ForcedBreak);
        } else if geometry.required_band() > end - y {
            page += 1;
            y = start;
            sink.open_page(page, PageOpen::NoRoom);
        }
        first = false;

        sink.title_bar(index, page, y);
        y += geometry.title_bar;

        let total = entry.content_height;
        let mut offset = Pt::ZERO;
        loop {
            let remaining = end - y;
            let leftover = total - offset;
            if leftover <= remaining {
                if leftover > Pt::ZERO {
                    sink.content(
                        index,
                        Slice {
                            page,
                            dest_y: y,
                            source_offset: offset,
                            height: leftover,
                        },
                    );
                }
                y += leftover;
                break;
            }
            sink.content(
                index,
                Slice {
                    page,
                    dest_y: y,
                    source_offset: offset,
                    height: remaining,
                },
            );
            offset += remaining;
            page += 1;
            y = start;
            sink.open_page(page, PageOpen::Overflow);
        }

        // A gap past the band parks the cursor at the bottom; the next section's room check
        // then opens the page, so a trailing gap never produces an empty page.
        y += geometry.section_gap;
        if y > end {
            y = end;
        }
    }

    Ok(page)
}

#[derive(Default)]
struct PlanRecorder {
    placements: Vec<SectionPlacement>,
}

impl LayoutSink for PlanRecorder {
    fn open_page(&mut self, _page: usize, _reason: PageOpen) {}

    fn title_bar(&mut self, section_index: usize, page: usize, y: Pt) {
        self.placements.push(SectionPlacement {
            section_index,
            start_page: page,
            title_y: y,
            sliced: false,
            slices: Vec::new(),
        });
    }

    fn content(&mut self, section_index: usize, slice: Slice) {
        if let Some(current) = self.placements.last_mut() {
            debug_assert_eq!(current.section_index, section_index);
            current.slices.push(slice);
            current.sliced = current.slices.len() > 1;
        }
    }
}

pub(crate) fn plan_entries(
    entries: &[LayoutEntry],
    geometry: &PageGeometry,
) -> Result<LayoutPlan, ReportError> {
    let mut recorder = PlanRecorder::default();
    let content_pages = walk(entries, geometry, &mut recorder)?;
    Ok(LayoutPlan {
        total_pages: content_pages + 1,
        content_pages,
        placements: recorder.placements,
    })
}

/// Measurement pass. `snapshots[i]` is `None` when section `i` could not be captured.
pub fn plan(
    sections: &[Section],
    snapshots: &[Option<RasterSnapshot>],
    geometry: &PageGeometry,
) -> Result<LayoutPlan, ReportError> {
    let entries = entries_for(sections, snapshots)?;
    plan_entries(&entries, geometry)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Size;
    use tiny_skia::Pixmap;

    /// Page whose content band is exactly `band_mm`, with no header, footer or padding.
    pub(crate) fn band_geometry(band_mm: f32, title_mm: f32, gap_mm: f32) -> PageGeometry {
        PageGeometry {
            page_size: Size::from_mm(210.0, band_mm),
            margin_left: Pt::from_mm(10.0),
            margin_right: Pt::from_mm(10.0),
            header_band: Pt::ZERO,
            footer_band: Pt::ZERO,
            band_padding: Pt::ZERO,
            title_bar: Pt::from_mm(title_mm),
            section_gap: Pt::from_mm(gap_mm),
            min_content: Pt::from_mm(10.0),
        }
    }

    pub(crate) fn entry(height_mm: f32) -> LayoutEntry {
        LayoutEntry {
            forces_page_break: false,
            excluded: false,
            content_height: Pt::from_mm(height_mm),
        }
    }

    pub(crate) fn forced(height_mm: f32) -> LayoutEntry {
        LayoutEntry {
            forces_page_break: true,
            ..entry(height_mm)
        }
    }

    fn excluded(height_mm: f32) -> LayoutEntry {
        LayoutEntry {
            excluded: true,
            ..entry(height_mm)
        }
    }

    /// Deterministic pseudo-random section lists for property checks.
    pub(crate) fn generated_entries(seed: u64, count: usize) -> Vec<LayoutEntry> {
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let mut next = move || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u32
        };
        (0..count)
            .map(|_| LayoutEntry {
                forces_page_break: next() % 5 == 0,
                excluded: next() % 9 == 0,
                content_height: Pt::from_milli_i64((next() % 900_000) as i64),
            })
            .collect()
    }

    #[test]
    fn scenario_a_middle_section_splits_across_two_pages() {
        let geometry = band_geometry(250.0, 0.0, 0.0);
        let plan = plan_entries(&[entry(40.0), entry(300.0), entry(40.0)], &geometry).unwrap();
        assert_eq!(plan.content_pages, 2);
        assert_eq!(plan.total_pages, 3);

        let middle = plan.placement(1).unwrap();
        assert!(middle.sliced);
        assert_eq!(middle.slices.len(), 2);
        assert_eq!(middle.slices[0].page, 1);
        assert_eq!(middle.slices[1].page, 2);
        assert_eq!(plan.placement(2).unwrap().start_page, 2);
    }

    #[test]
    fn scenario_b_forced_break_starts_fresh_page_despite_room() {
        let geometry = band_geometry(250.0, 8.0, 5.0);
        let plan =
            plan_entries(&[entry(30.0), forced(30.0), entry(30.0)], &geometry).unwrap();
        assert_eq!(plan.content_pages, 2);
        let second = plan.placement(1).unwrap();
        assert_eq!(second.start_page, 2);
        assert_eq!(second.title_y, geometry.content_start());
        assert_eq!(plan.placement(2).unwrap().start_page, 2);
    }

    #[test]
    fn forced_break_on_first_section_does_not_add_a_page() {
        let geometry = band_geometry(250.0, 8.0, 5.0);
        let plan = plan_entries(&[forced(30.0), entry(30.0)], &geometry).unwrap();
        assert_eq!(plan.content_pages, 1);
        assert_eq!(plan.placement(0).unwrap().start_page, 1);
    }

    #[test]
    fn forced_break_after_excluded_leading_section_counts_as_first() {
        let geometry = band_geometry(250.0, 8.0, 5.0);
        let plan = plan_entries(&[excluded(30.0), forced(30.0)], &geometry).unwrap();
        assert_eq!(plan.content_pages, 1);
        assert_eq!(plan.placement(1).unwrap().start_page, 1);
    }

    #[test]
    fn scenario_c_excluded_section_contributes_nothing() {
        let geometry = band_geometry(250.0, 8.0, 5.0);
        let with = plan_entries(&[entry(100.0), excluded(400.0), entry(100.0)], &geometry).unwrap();
        let without = plan_entries(&[entry(100.0), entry(100.0)], &geometry).unwrap();
        assert_eq!(with.total_pages, without.total_pages);
        assert!(with.placement(1).is_none());
        assert_eq!(
            with.placement(2).unwrap().title_y,
            without.placement(1).unwrap().title_y
        );
    }

    #[test]
    fn exact_fit_does_not_open_an_extra_page() {
        let geometry = band_geometry(250.0, 0.0, 0.0);
        let first = entry(100.0);
        let rest = LayoutEntry {
            content_height: geometry.content_band() - first.content_height,
            ..first
        };
        let plan = plan_entries(&[first, rest], &geometry).unwrap();
        assert_eq!(plan.content_pages, 1);
        let second = plan.placement(1).unwrap();
        assert!(!second.sliced);
        assert_eq!(second.slices.len(), 1);
        assert_eq!(
            second.slices[0].dest_y + second.slices[0].height,
            geometry.content_end()
        );
    }

    #[test]
    fn exact_fit_followed_by_gap_leaves_no_trailing_page() {
        let geometry = band_geometry(250.0, 0.0, 5.0);
        let plan = plan_entries(&[entry(250.0)], &geometry).unwrap();
        assert_eq!(plan.content_pages, 1);
    }

    #[test]
    fn gap_past_band_pushes_next_section_to_new_page() {
        let geometry = band_geometry(250.0, 0.0, 5.0);
        let plan = plan_entries(&[entry(247.0), entry(20.0)], &geometry).unwrap();
        assert_eq!(plan.content_pages, 2);
        let next = plan.placement(1).unwrap();
        assert_eq!(next.start_page, 2);
        assert_eq!(next.title_y, geometry.content_start());
    }

    #[test]
    fn title_without_room_for_minimum_content_moves_to_next_page() {
        let geometry = band_geometry(250.0, 8.0, 0.0);
        // 235mm used leaves 15mm: below the 8mm title + 10mm minimum.
        let plan = plan_entries(&[entry(227.0), entry(5.0)], &geometry).unwrap();
        assert_eq!(plan.placement(1).unwrap().start_page, 2);
    }

    #[test]
    fn tall_section_spans_several_full_pages() {
        let geometry = band_geometry(250.0, 0.0, 0.0);
        let plan = plan_entries(&[entry(800.0)], &geometry).unwrap();
        assert_eq!(plan.content_pages, 4);
        let placement = plan.placement(0).unwrap();
        let pages: Vec<usize> = placement.slices.iter().map(|s| s.page).collect();
        assert_eq!(pages, vec![1, 2, 3, 4]);
    }

    #[test]
    fn failed_capture_keeps_title_without_content() {
        let geometry = band_geometry(250.0, 8.0, 5.0);
        let plan = plan_entries(&[entry(0.0), entry(20.0)], &geometry).unwrap();
        let failed = plan.placement(0).unwrap();
        assert!(failed.slices.is_empty());
        assert_eq!(
            plan.placement(1).unwrap().title_y,
            geometry.content_start() + geometry.title_bar + geometry.section_gap
        );
    }

    #[test]
    fn slices_are_contiguous_and_sum_to_scaled_height() {
        let geometry = band_geometry(250.0, 8.0, 5.0);
        for seed in 0..40u64 {
            let entries = generated_entries(seed, 12);
            let plan = plan_entries(&entries, &geometry).unwrap();
            for placement in &plan.placements {
                let expected = entries[placement.section_index].content_height;
                let total: Pt = placement.slices.iter().map(|s| s.height).sum();
                assert_eq!(total, expected, "seed {seed} section {}", placement.section_index);
                let mut cursor = Pt::ZERO;
                for (k, slice) in placement.slices.iter().enumerate() {
                    assert_eq!(slice.source_offset, cursor);
                    assert!(slice.height > Pt::ZERO);
                    assert!(slice.dest_y + slice.height <= geometry.content_end());
                    if k > 0 {
                        assert_eq!(slice.page, placement.slices[k - 1].page + 1);
                        assert_eq!(slice.dest_y, geometry.content_start());
                    }
                    cursor += slice.height;
                }
            }
        }
    }

    #[test]
    fn forced_break_sections_always_start_at_content_start() {
        let geometry = band_geometry(250.0, 8.0, 5.0);
        for seed in 100..140u64 {
            let entries = generated_entries(seed, 10);
            let plan = plan_entries(&entries, &geometry).unwrap();
            for (k, placement) in plan.placements.iter().enumerate() {
                if k > 0 && entries[placement.section_index].forces_page_break {
                    assert_eq!(placement.title_y, geometry.content_start());
                    assert!(placement.start_page > plan.placements[k - 1].start_page);
                }
            }
        }
    }

    #[test]
    fn planning_is_idempotent() {
        let geometry = PageGeometry::default();
        let entries = generated_entries(7, 15);
        let first = plan_entries(&entries, &geometry).unwrap();
        let second = plan_entries(&entries, &geometry).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn impossible_geometry_fails_before_any_page() {
        struct Counting(usize);
        impl LayoutSink for Counting {
            fn open_page(&mut self, _page: usize, _reason: PageOpen) {
                self.0 += 1;
            }
            fn title_bar(&mut self, _section_index: usize, _page: usize, _y: Pt) {}
            fn content(&mut self, _section_index: usize, _slice: Slice) {}
        }
        let geometry = band_geometry(15.0, 8.0, 0.0);
        let mut sink = Counting(0);
        let err = walk(&[entry(10.0)], &geometry, &mut sink).unwrap_err();
        assert!(matches!(err, ReportError::LayoutImpossible { .. }));
        assert_eq!(sink.0, 0);
    }

    #[test]
    fn plan_accepts_snapshots_and_missing_captures() {
        let geometry = band_geometry(250.0, 8.0, 5.0);
        let sections = vec![
            Section::new("NDVI", "ndvi"),
            Section::new("Weather", "weather"),
        ];
        let snapshot =
            RasterSnapshot::from_pixmap(Pixmap::new(380, 190).unwrap(), geometry.content_width());
        let snapshots = vec![Some(snapshot.clone()), None];
        let plan = plan(&sections, &snapshots, &geometry).unwrap();
        assert_eq!(plan.content_pages, 1);
        assert_eq!(
            plan.placement(0).unwrap().slices[0].height,
            snapshot.scaled_height
        );
        assert!(plan.placement(1).unwrap().slices.is_empty());
    }

    #[test]
    fn plan_rejects_mismatched_snapshot_count() {
        let geometry = PageGeometry::default();
        let sections = vec![Section::new("NDVI", "ndvi")];
        let err = plan(&sections, &[], &geometry).unwrap_err();
        assert!(matches!(
            err,
            ReportError::SnapshotMismatch {
                sections: 1,
                snapshots: 0
            }
        ));
    }
}
