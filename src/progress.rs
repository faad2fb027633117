//! Aligned progress lines for long searches.
//!
//! Every line goes through `tracing::info!`. When a log path is configured the
//! same line is appended, with a wall-clock timestamp, to that file under an
//! exclusive lock so several searches can share one log.
//!
//! Lines look like:
//!   "[Iter 003/100] Accepted (NAS ): Exact=50.0000%, Generous=81.2500%, Forgiveness=25.0000%"

use chrono::Local;
use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::eval::MetricTuple;
use crate::report::SearchKind;

/// What happened in a round, as shown in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundOutcome {
    Initial,
    Accepted,
    Rejected,
    RolledBack,
    Final,
}

impl RoundOutcome {
    /// Fixed-width label.
    fn label(&self) -> &'static str {
        match self {
            RoundOutcome::Initial => "Initial ",
            RoundOutcome::Accepted => "Accepted",
            RoundOutcome::Rejected => "Rejected",
            RoundOutcome::RolledBack => "Rollback",
            RoundOutcome::Final => "Final   ",
        }
    }
}

/// Round prefix with dynamic zero padding, e.g. `[Iter 003/100]`.
pub fn format_iteration_prefix(iteration: usize, total: usize) -> String {
    let width = total.to_string().len();
    format!("[Iter {:0width$}/{:0width$}]", iteration, total, width = width)
}

pub fn format_iteration_log(
    iteration: usize,
    total: usize,
    outcome: RoundOutcome,
    kind: SearchKind,
    metrics: &MetricTuple,
) -> String {
    format!(
        "{} {} ({}): Exact={:.4}%, Generous={:.4}%, Forgiveness={:.4}%",
        format_iteration_prefix(iteration, total),
        outcome.label(),
        kind.tag(),
        metrics.exact,
        metrics.generous,
        metrics.forgiveness
    )
}

/// Progress sink for one search run.
pub struct ProgressLogger {
    kind: SearchKind,
    log_path: Option<PathBuf>,
}

impl ProgressLogger {
    pub fn new(kind: SearchKind, log_path: Option<&Path>) -> Self {
        Self { kind, log_path: log_path.map(Path::to_path_buf) }
    }

    pub fn log(&mut self, msg: &str) {
        tracing::info!(search = %self.kind, "{}", msg);

        if let Some(ref path) = self.log_path {
            let line = format!("{} | {}\n", Local::now().format("%H:%M:%S"), msg);
            if let Err(e) = append_locked(path, &line) {
                tracing::warn!(path = %path.display(), error = %e, "cannot write progress log");
            }
        }
    }

    pub fn round(
        &mut self,
        iteration: usize,
        total: usize,
        outcome: RoundOutcome,
        metrics: &MetricTuple,
    ) {
        let line = format_iteration_log(iteration, total, outcome, self.kind, metrics);
        self.log(&line);
    }
}

/// Append `line` to `path` while holding an exclusive lock on the file.
fn append_locked(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;
    let written = file.write_all(line.as_bytes()).and_then(|()| file.flush());
    let unlocked = FileExt::unlock(&file);
    written.and(unlocked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_padding() {
        assert_eq!(format_iteration_prefix(3, 100), "[Iter 003/100]");
        assert_eq!(format_iteration_prefix(7, 9), "[Iter 7/9]");
    }

    #[test]
    fn test_iteration_line() {
        let line = format_iteration_log(
            3,
            100,
            RoundOutcome::Accepted,
            SearchKind::Nas,
            &MetricTuple::new(50.0, 81.25, 25.0),
        );
        assert_eq!(
            line,
            "[Iter 003/100] Accepted (NAS ): Exact=50.0000%, Generous=81.2500%, Forgiveness=25.0000%"
        );
    }

    #[test]
    fn test_appends_to_file() {
        let path = std::env::temp_dir().join(format!("blueprint-progress-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut logger = ProgressLogger::new(SearchKind::HillClimb, Some(path.as_path()));
        logger.log("first");
        logger.round(1, 10, RoundOutcome::Rejected, &MetricTuple::default());

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("| first"));
        assert!(lines[1].contains("[Iter 01/10] Rejected (HC  )"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unwritable_path_reports_error() {
        let dir = std::env::temp_dir();
        assert!(append_locked(&dir, "line\n").is_err());

        // the search keeps going with only the tracing output
        let mut logger = ProgressLogger::new(SearchKind::Nas, Some(dir.as_path()));
        logger.log("still running");
    }
}
