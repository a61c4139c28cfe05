//! Terminal progress output.
//!
//! Per-track transfers are drawn as a single line that is redrawn in place:
//!
//! ```text
//! [██████████░░░░░░░░░░░░░░] 1.5 MB / 3.6 MB (2/10)
//! ```
//!
//! When the server announced no size, a marker moves through the bar
//! instead.

use std::{fmt, io, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};

use crate::{
    downloader::{DownloadOutcome, Transfer},
    error::Error,
    planner::Progress,
    track::Track,
};

/// Default number of cells in a bar.
pub const BAR_WIDTH: usize = 24;

/// Speed of the indeterminate marker.
pub const FRAME: Duration = Duration::from_millis(120);

const FILLED: char = '█';
const EMPTY: char = '░';

/// Renders a bar of `width` cells.
///
/// With a known, positive `total` the bar is filled proportionally to
/// `current`. Otherwise a single marker is drawn at a position derived from
/// `elapsed`.
#[must_use]
pub fn render_bar(current: u64, total: Option<u64>, width: usize, elapsed: Duration) -> String {
    if width == 0 {
        return String::new();
    }

    match total {
        Some(total) if total > 0 => {
            let filled = (u128::from(current) * width as u128 / u128::from(total)) as usize;
            let filled = filled.min(width);
            let mut bar = String::with_capacity(width * FILLED.len_utf8());
            bar.extend(std::iter::repeat(FILLED).take(filled));
            bar.extend(std::iter::repeat(EMPTY).take(width - filled));
            bar
        }
        _ => {
            let marker = (elapsed.as_millis() / FRAME.as_millis()) as usize % width;
            (0..width)
                .map(|cell| if cell == marker { FILLED } else { EMPTY })
                .collect()
        }
    }
}

/// Formats a byte count with binary units.
///
/// Values of ten or more and plain bytes have no decimals, smaller values
/// one. A trailing `.0` is dropped.
#[must_use]
#[expect(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 || value >= 10.0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        let formatted = format!("{value:.1}");
        let formatted = formatted.strip_suffix(".0").unwrap_or(&formatted);
        format!("{formatted} {}", UNITS[unit])
    }
}

/// About one redraw per [`FRAME`].
const DRAW_RATE: u8 = 8;

/// Template of the per-track line. `track_bar`, `received` and `size` are
/// custom keys, `msg` holds the run counter.
const TEMPLATE: &str = "[{track_bar}] {received} / {size} {msg}";

fn style() -> ProgressStyle {
    ProgressStyle::with_template(TEMPLATE)
        .expect("progress template is valid")
        .with_key(
            "track_bar",
            |state: &ProgressState, w: &mut dyn fmt::Write| {
                let bar = render_bar(state.pos(), state.len(), BAR_WIDTH, state.elapsed());
                let _ = w.write_str(&bar);
            },
        )
        .with_key("received", |state: &ProgressState, w: &mut dyn fmt::Write| {
            let _ = w.write_str(&format_bytes(state.pos()));
        })
        .with_key("size", |state: &ProgressState, w: &mut dyn fmt::Write| {
            let _ = w.write_str(&size_text(state.len()));
        })
}

fn size_text(total: Option<u64>) -> String {
    total.map_or_else(|| "?".to_owned(), format_bytes)
}

fn counter(progress: &Progress) -> String {
    format!("({}/{})", progress.completed(), progress.total())
}

fn outcome_line(track: &Track, outcome: &DownloadOutcome) -> String {
    match outcome {
        DownloadOutcome::Downloaded { bytes, .. } => {
            format!("  completed: {track} ({})", format_bytes(*bytes))
        }
        DownloadOutcome::Skipped { path } => {
            format!("  file exists, skipping: {}", path.display())
        }
    }
}

fn failure_line(track: &Track, error: &Error) -> String {
    format!("  failed: {track} ({error})")
}

/// Draws download progress to a terminal.
///
/// Each track gets its own bar, which is cleared once the track finishes
/// and replaced by a line describing the outcome.
pub struct Reporter {
    multi: MultiProgress,
    bar: Option<ProgressBar>,
}

impl Reporter {
    #[must_use]
    pub fn new(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bar: None,
        }
    }

    /// Draws to standard error, which leaves standard output to the data.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(ProgressDrawTarget::stderr_with_hz(DRAW_RATE))
    }

    /// Draws nothing.
    #[must_use]
    pub fn hidden() -> Self {
        Self::new(ProgressDrawTarget::hidden())
    }

    /// Announces the start of a track's download and shows its bar.
    ///
    /// Until a size is known, a marker moves through the bar.
    ///
    /// # Errors
    ///
    /// Returns error if writing to the terminal fails.
    pub fn started(&mut self, track: &Track, progress: &Progress) -> io::Result<()> {
        self.clear();
        self.multi.println(format!("downloading: {track}"))?;

        let bar = self.multi.add(ProgressBar::no_length());
        bar.set_style(style());
        bar.set_message(counter(progress));
        bar.enable_steady_tick(FRAME);
        self.bar = Some(bar);

        Ok(())
    }

    /// Updates the current bar. Redraws are rate limited by the draw
    /// target.
    pub fn transfer(&mut self, transfer: Transfer) {
        if let Some(bar) = &self.bar {
            if let Some(total) = transfer.total {
                bar.set_length(total);
            }
            bar.set_position(transfer.received);
        }
    }

    /// Clears the bar and reports a finished track.
    ///
    /// # Errors
    ///
    /// Returns error if writing to the terminal fails.
    pub fn completed(&mut self, track: &Track, outcome: &DownloadOutcome) -> io::Result<()> {
        self.clear();
        self.multi.println(outcome_line(track, outcome))
    }

    /// Clears the bar and reports a failed track.
    ///
    /// # Errors
    ///
    /// Returns error if writing to the terminal fails.
    pub fn failed(&mut self, track: &Track, error: &Error) -> io::Result<()> {
        self.clear();
        self.multi.println(failure_line(track, error))
    }

    fn clear(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::track::TrackId;

    #[test]
    fn bytes_use_binary_steps() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1_048_576), "1 MB");
        assert_eq!(format_bytes(15_360), "15 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024 + 512 * 1024 * 1024), "5.5 GB");
        assert_eq!(format_bytes(u64::MAX), "16777216 TB");
    }

    #[test]
    fn known_total_fills_proportionally() {
        let bar = render_bar(50, Some(100), 24, Duration::ZERO);
        assert_eq!(bar.chars().filter(|&c| c == FILLED).count(), 12);
        assert_eq!(bar.chars().count(), 24);

        let full = render_bar(150, Some(100), 10, Duration::ZERO);
        assert!(full.chars().all(|c| c == FILLED));

        let empty = render_bar(0, Some(100), 10, Duration::ZERO);
        assert!(empty.chars().all(|c| c == EMPTY));
    }

    #[test]
    fn unknown_total_moves_a_marker() {
        let at = |ms| {
            render_bar(999, None, 24, Duration::from_millis(ms))
                .chars()
                .position(|c| c == FILLED)
        };
        assert_eq!(at(0), Some(0));
        assert_eq!(at(119), Some(0));
        assert_eq!(at(120), Some(1));
        assert_eq!(at(120 * 25), Some(1));

        let zero_total = render_bar(5, Some(0), 8, Duration::from_millis(240));
        assert_eq!(zero_total.chars().position(|c| c == FILLED), Some(2));
    }

    fn track() -> Track {
        Track {
            id: TrackId("1".to_owned()),
            name: "晴天".to_owned(),
            artists: vec!["周杰伦".to_owned()],
            album: None,
            playback_ref: TrackId("1".to_owned()),
        }
    }

    #[test]
    fn bar_follows_transfers() {
        let mut progress = Progress::default();
        progress.extend(3);

        let mut reporter = Reporter::hidden();
        reporter.started(&track(), &progress).unwrap();

        let bar = reporter.bar.clone().unwrap();
        assert_eq!(bar.length(), None);
        assert_eq!(bar.message(), "(0/3)");

        reporter.transfer(Transfer {
            received: 1024,
            total: None,
        });
        assert_eq!((bar.position(), bar.length()), (1024, None));

        reporter.transfer(Transfer {
            received: 3072,
            total: Some(4096),
        });
        assert_eq!((bar.position(), bar.length()), (3072, Some(4096)));
    }

    #[test]
    fn finished_tracks_clear_their_bar() {
        let mut progress = Progress::default();
        progress.extend(2);

        let mut reporter = Reporter::hidden();
        reporter.started(&track(), &progress).unwrap();
        let bar = reporter.bar.clone().unwrap();
        progress.advance();

        let outcome = DownloadOutcome::Downloaded {
            bytes: 2048,
            path: PathBuf::from("晴天.mp3"),
        };
        reporter.completed(&track(), &outcome).unwrap();
        assert!(bar.is_finished());
        assert!(reporter.bar.is_none());

        // Without a bar, transfers are ignored.
        reporter.transfer(Transfer {
            received: 1,
            total: None,
        });

        reporter.started(&track(), &progress).unwrap();
        assert_eq!(reporter.bar.as_ref().unwrap().message(), "(1/2)");
        reporter
            .failed(&track(), &Error::not_found("audio url not available"))
            .unwrap();
        assert!(reporter.bar.is_none());
    }

    #[test]
    fn outcome_lines() {
        let downloaded = DownloadOutcome::Downloaded {
            bytes: 2048,
            path: PathBuf::from("晴天.mp3"),
        };
        assert_eq!(
            outcome_line(&track(), &downloaded),
            "  completed: 晴天 - 周杰伦 (2 KB)"
        );

        let skipped = DownloadOutcome::Skipped {
            path: PathBuf::from("downloads/晴天.mp3"),
        };
        assert_eq!(
            outcome_line(&track(), &skipped),
            "  file exists, skipping: downloads/晴天.mp3"
        );

        assert_eq!(
            failure_line(&track(), &Error::not_found("audio url not available")),
            "  failed: 晴天 - 周杰伦 (not found: audio url not available)"
        );
    }

    #[test]
    fn sizes_fall_back_to_unknown() {
        assert_eq!(size_text(None), "?");
        assert_eq!(size_text(Some(4096)), "4 KB");
    }
}
