//! What a search loop hands back to its caller.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::eval::MetricTuple;

/// Which loop produced a report or a log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    HillClimb,
    Nas,
    ParallelNas,
    Evolution,
    ItemLearning,
    Refinement,
    ConnectionSearch,
}

impl SearchKind {
    /// Four-character tag used in aligned progress lines.
    pub fn tag(&self) -> &'static str {
        match self {
            SearchKind::HillClimb => "HC  ",
            SearchKind::Nas => "NAS ",
            SearchKind::ParallelNas => "PNAS",
            SearchKind::Evolution => "EVO ",
            SearchKind::ItemLearning => "ITEM",
            SearchKind::Refinement => "REF ",
            SearchKind::ConnectionSearch => "CONN",
        }
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag().trim_end())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The round budget ran out.
    Exhausted,
    /// Every tracked metric reached 100.
    Perfect,
    /// Too many rounds in a row without improvement.
    Stalled,
    /// A configured accuracy target was reached.
    ThresholdReached,
    /// The loop had nothing to work on (no sessions, no eligible edge, ...).
    NothingToDo,
}

/// One committed round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    pub metrics: MetricTuple,
    pub note: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub kind: SearchKind,
    pub initial: MetricTuple,
    pub final_metrics: MetricTuple,
    pub history: Vec<RoundRecord>,
    pub rounds: usize,
    pub accepted: usize,
    pub stop_reason: StopReason,
}

impl SearchReport {
    pub fn new(kind: SearchKind, initial: MetricTuple) -> Self {
        Self {
            kind,
            initial,
            final_metrics: initial,
            history: Vec::new(),
            rounds: 0,
            accepted: 0,
            stop_reason: StopReason::Exhausted,
        }
    }

    /// Note an accepted round.
    pub fn record(&mut self, round: usize, metrics: MetricTuple, note: impl Into<String>) {
        self.accepted += 1;
        self.final_metrics = metrics;
        self.history.push(RoundRecord { round, metrics, note: note.into() });
    }

    pub fn finish(mut self, final_metrics: MetricTuple, stop_reason: StopReason) -> Self {
        self.final_metrics = final_metrics;
        self.stop_reason = stop_reason;
        self
    }

    pub fn improved(&self) -> bool {
        self.accepted > 0
    }
}

/// Every session is classified exactly right. Generous and forgiveness may
/// still have headroom.
pub fn is_perfect(metrics: &MetricTuple) -> bool {
    metrics.exact >= 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_finish() {
        let start = MetricTuple::new(10.0, 20.0, 30.0);
        let mut report = SearchReport::new(SearchKind::Nas, start);
        assert!(!report.improved());

        report.record(3, MetricTuple::new(20.0, 20.0, 30.0), "dense");
        report.rounds = 5;
        let report = report.finish(MetricTuple::new(20.0, 20.0, 30.0), StopReason::Stalled);

        assert!(report.improved());
        assert_eq!(report.accepted, 1);
        assert_eq!(report.history[0].round, 3);
        assert_eq!(report.initial, start);
        assert_eq!(report.stop_reason, StopReason::Stalled);
    }

    #[test]
    fn test_tags_are_aligned() {
        for kind in [
            SearchKind::HillClimb,
            SearchKind::Nas,
            SearchKind::ParallelNas,
            SearchKind::Evolution,
            SearchKind::ItemLearning,
            SearchKind::Refinement,
            SearchKind::ConnectionSearch,
        ] {
            assert_eq!(kind.tag().len(), 4);
        }
        assert_eq!(SearchKind::Nas.to_string(), "NAS");
    }

    #[test]
    fn test_is_perfect() {
        assert!(is_perfect(&MetricTuple::new(100.0, 100.0, 100.0)));
        assert!(is_perfect(&MetricTuple::new(100.0, 62.5, 80.0)));
        assert!(!is_perfect(&MetricTuple::new(99.9, 100.0, 100.0)));
    }
}
