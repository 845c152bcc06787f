#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for the Gun Violence Archive client.
//!
//! Provides an `indicatif`-backed progress bar behind the
//! [`ProgressCallback`] trait, plus [`init_logger`] which sets up
//! `indicatif-log-bridge` so that `log::info!` and friends are suspended
//! while the bar redraws.

use std::sync::Arc;
use std::time::Duration;

use gva_archive::progress::{BATCH_TOTAL, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;

pub use indicatif::MultiProgress;

/// An `indicatif` [`ProgressBar`] that implements [`ProgressCallback`].
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Style to switch to once the batch job starts reporting percentages.
    batch_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Creates a bar for one export. It spins while the query is being
    /// registered and becomes a percentage bar once the batch job starts
    /// reporting.
    #[must_use]
    pub fn export_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        Arc::new(Self::new(multi, message))
    }

    fn new(multi: &MultiProgress, message: &str) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        let batch_style =
            ProgressStyle::with_template("  {msg} {wide_bar:.cyan/dim} {percent}% [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-");

        Self { bar, batch_style }
    }
}

impl ProgressCallback for IndicatifProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn batch_started(&self) {
        self.bar.set_length(BATCH_TOTAL);
        self.bar.set_position(0);
        self.bar.set_style(self.batch_style.clone());
    }

    fn batch_percent(&self, percent: u8, status: &str) {
        self.bar.set_position(u64::from(percent));
        if !status.is_empty() {
            self.bar.set_message(status.to_string());
        }
    }

    fn completed(&self) {
        self.bar.finish_with_message("Export downloaded");
    }

    fn abandoned(&self) {
        self.bar.finish_and_clear();
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// Logs at `Info` unless `RUST_LOG` says otherwise. `verbose` forces
/// `Debug`. Log lines go to stderr, leaving stdout for results.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger(verbose: bool) -> MultiProgress {
    let multi = MultiProgress::new();

    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(LevelFilter::Info).parse_env("RUST_LOG");
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    let logger = builder.build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // Ignore error if logger was already set (e.g., in tests)

    log::set_max_level(level);

    multi
}

#[cfg(test)]
mod tests {
    use indicatif::ProgressDrawTarget;

    use super::*;

    fn hidden_bar() -> IndicatifProgress {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        IndicatifProgress::new(&multi, "Registering query")
    }

    #[test]
    fn spinner_until_batch_starts() {
        let progress = hidden_bar();
        progress.phase("Kicking off CSV export");

        assert_eq!(progress.bar.length(), None);
        assert_eq!(progress.bar.message(), "Kicking off CSV export");
    }

    #[test]
    fn batch_percentages_drive_the_bar() {
        let progress = hidden_bar();
        progress.batch_started();
        progress.batch_percent(50, "");

        assert_eq!(progress.bar.length(), Some(BATCH_TOTAL));
        assert_eq!(progress.bar.position(), 50);
        assert_eq!(progress.bar.message(), "Registering query");

        progress.batch_percent(75, "Processed 75%");
        assert_eq!(progress.bar.position(), 75);
        assert_eq!(progress.bar.message(), "Processed 75%");
    }

    #[test]
    fn completion_finishes_the_bar() {
        let progress = hidden_bar();
        progress.batch_started();
        progress.batch_percent(100, "");
        progress.completed();

        assert!(progress.bar.is_finished());
        assert_eq!(progress.bar.message(), "Export downloaded");
    }
}
