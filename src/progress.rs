use std::sync::Mutex;

/// Pipeline milestones, in the order a build reaches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildStage {
    Capture,
    Layout,
    Cover,
    Render,
    Serialize,
    Done,
}

/// Passive observer of a build. Percent values arrive non-decreasing in `0..=100`.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, percent: u8);

    fn on_stage(&self, _stage: BuildStage) {}
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _percent: u8) {}
}

/// Adapts a closure into a [`ProgressSink`].
pub struct FnProgress<F>(pub F);

impl<F> ProgressSink for FnProgress<F>
where
    F: Fn(u8) + Send + Sync,
{
    fn on_progress(&self, percent: u8) {
        (self.0)(percent)
    }
}

/// Maps stage-local progress onto the overall percentage and keeps it monotone.
pub(crate) struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    last: Mutex<u8>,
}

// Share of the 0..=100 range each stage ends at.
const CAPTURE_END: u8 = 70;
const LAYOUT_END: u8 = 75;
const COVER_END: u8 = 80;
const RENDER_END: u8 = 95;

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            last: Mutex::new(0),
        }
    }

    pub(crate) fn stage(&self, stage: BuildStage) {
        self.sink.on_stage(stage);
        match stage {
            BuildStage::Capture => self.report(0),
            BuildStage::Layout => self.report(CAPTURE_END),
            BuildStage::Cover => self.report(LAYOUT_END),
            BuildStage::Render => self.report(COVER_END),
            BuildStage::Serialize => self.report(RENDER_END),
            BuildStage::Done => self.report(100),
        }
    }

    /// `done` of `total` sections captured, whether or not the capture succeeded.
    pub(crate) fn captured(&self, done: usize, total: usize) {
        self.report(scaled(0, CAPTURE_END, done, total));
    }

    pub(crate) fn rendered(&self, done: usize, total: usize) {
        self.report(scaled(COVER_END, RENDER_END, done, total));
    }

    fn report(&self, percent: u8) {
        let percent = percent.min(100);
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        if percent < *last {
            return;
        }
        *last = percent;
        drop(last);
        self.sink.on_progress(percent);
    }
}

fn scaled(from: u8, to: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return to;
    }
    let span = (to - from) as usize;
    from + (span * done.min(total) / total) as u8
}
