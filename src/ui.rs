//! Progress reporting on stderr.
//!
//! Batches can take minutes, so we show a bar while receipts are scanned.
//! Log lines and status messages go through the same [`MultiProgress`], which
//! clears the bars before printing and redraws them afterwards.

use std::{io, sync::Arc, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressFinish, ProgressStyle};

/// How often spinners and bars redraw on their own.
const TICK: Duration = Duration::from_millis(250);

/// Labels for a long-running activity.
pub struct Activity<'a> {
    pub emoji: &'a str,
    /// Shown while running, e.g. "Scanning receipts".
    pub running: &'a str,
    /// Shown once the activity is finished.
    pub finished: &'a str,
}

/// Handle to the terminal. Clones draw into the same set of bars.
#[derive(Clone)]
pub struct Ui {
    bars: Arc<MultiProgress>,
}

impl Ui {
    pub fn init() -> Ui {
        Ui {
            bars: Arc::new(MultiProgress::new()),
        }
    }

    /// A UI that never draws anything.
    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        Ui {
            bars: Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden())),
        }
    }

    /// Stop drawing bars. Used when results are written to stdout, where a
    /// bar would end up mixed into a redirected terminal.
    pub fn hide_progress_bars(&self) {
        self.bars.set_draw_target(ProgressDrawTarget::hidden());
    }

    /// A `tracing` writer that doesn't tear our bars.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter {
            bars: self.bars.clone(),
        }
    }

    /// A spinner, for activities of unknown length.
    pub fn new_spinner(&self, activity: &Activity<'_>) -> ProgressBar {
        let style = ProgressStyle::default_spinner()
            .template("{spinner} {prefix:3}{msg}")
            .expect("bad progress bar template");
        self.start(ProgressBar::new_spinner().with_style(style), activity)
    }

    /// A bar when the stream knows how long it is, and a spinner otherwise.
    pub fn new_from_size_hint(
        &self,
        activity: &Activity<'_>,
        size_hint: (usize, Option<usize>),
    ) -> ProgressBar {
        let Some(len) = size_hint.1.filter(|len| *len > 0) else {
            return self.new_spinner(activity);
        };
        let style = ProgressStyle::default_bar()
            .template("  {prefix:3}{msg:25} {pos:>4}/{len:4} {elapsed_precise} {wide_bar:.cyan/blue} {eta_precise}")
            .expect("bad progress bar template");
        let len = u64::try_from(len).unwrap_or(u64::MAX);
        self.start(ProgressBar::new(len).with_style(style), activity)
    }

    fn start(&self, bar: ProgressBar, activity: &Activity<'_>) -> ProgressBar {
        let bar = self.bars.add(bar);
        bar.set_prefix(activity.emoji.to_owned());
        bar.set_message(activity.running.to_owned());
        bar.enable_steady_tick(TICK);
        bar.with_finish(ProgressFinish::WithMessage(activity.finished.to_owned().into()))
    }

    /// Print a one-line status message to stderr.
    pub fn display_message(&self, emoji: &str, msg: &str) {
        self.bars.suspend(|| eprintln!("{emoji:3}{msg}"));
    }
}

/// Writes to stderr with our progress bars cleared out of the way.
#[derive(Clone)]
pub struct SafeStderrWriter {
    bars: Arc<MultiProgress>,
}

impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bars.suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        // One suspend per log line, not one per partial write.
        self.bars.suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.bars.suspend(|| io::stderr().flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
