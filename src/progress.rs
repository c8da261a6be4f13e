//! Live progress reporting
//!
//! To avoid corrupted terminal output, you should not write anything to stdout
//! or stderr yourself as long as a report is being displayed. Please use logs
//! for debug messages.

use crate::fetch::StatsSnapshot;
use indicatif::{ProgressBar, ProgressStyle};

/// CLI progress report for a word-checking run
///
/// One bar spans the whole word list. Its position is the number of words
/// known to be done (baseline plus completions this run) and its message is
/// refreshed on the heartbeat cadence with the in-flight count and the
/// outcome histogram.
#[derive(Clone, Debug)]
pub struct ProgressReport(ProgressBar);
//
impl ProgressReport {
    /// Prepare to report progress over a word list
    pub fn new(total_words: usize) -> Self {
        let bar = ProgressBar::new(total_words as u64).with_style(
            ProgressStyle::with_template(
                "{prefix} {wide_bar} {percent:>3}% ({pos}/{len}) {msg}",
            )
            .expect("the progress bar template above should be valid"),
        );
        Self(bar.with_prefix("Checking words"))
    }

    /// Invisible report, for tests and non-interactive use
    pub fn hidden(total_words: usize) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total_words as u64);
        Self(bar)
    }

    /// Heartbeat: refresh completion count, in-flight count and histogram
    pub fn heartbeat(&self, words_done: usize, inflight: usize, stats: StatsSnapshot) {
        self.0.set_position(words_done as u64);
        self.0.set_message(format!("inflight:{inflight} {stats}"));
    }

    /// Print a one-off line above the bar without corrupting it
    pub fn note(&self, msg: impl AsRef<str>) {
        self.0.println(msg);
    }

    /// Stop reporting, leaving the final state visible
    pub fn finish(&self, stats: StatsSnapshot) {
        self.0.set_message(format!("inflight:0 {stats}"));
        self.0.finish();
    }
}
