//! Acceptance rules shared by every search loop.
//!
//! A policy answers two questions: does a candidate beat the committed best,
//! and which of several accepted candidates wins a parallel round.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::eval::MetricTuple;
use crate::report::is_perfect;

/// One of the three tracked accuracies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Exact,
    Generous,
    Forgiveness,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Exact, Metric::Generous, Metric::Forgiveness];

    pub fn of(&self, tuple: &MetricTuple) -> f64 {
        match self {
            Metric::Exact => tuple.exact,
            Metric::Generous => tuple.generous,
            Metric::Forgiveness => tuple.forgiveness,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptancePolicy {
    /// Any metric strictly greater, regardless of the others.
    AnyImproves,
    /// No metric lower and at least one strictly greater.
    #[default]
    NoRegression,
    /// Exact strictly greater, or exact equal and generous or forgiveness strictly greater.
    ExactFirst,
    /// Any of the listed metrics strictly greater.
    Selected(Vec<Metric>),
}

impl AcceptancePolicy {
    pub fn accepts(&self, candidate: &MetricTuple, best: &MetricTuple) -> bool {
        match self {
            AcceptancePolicy::AnyImproves => Metric::ALL
                .iter()
                .any(|m| m.of(candidate) > m.of(best)),
            AcceptancePolicy::NoRegression => {
                Metric::ALL.iter().all(|m| m.of(candidate) >= m.of(best))
                    && Metric::ALL.iter().any(|m| m.of(candidate) > m.of(best))
            }
            AcceptancePolicy::ExactFirst => {
                candidate.exact > best.exact
                    || (candidate.exact == best.exact
                        && (candidate.generous > best.generous
                            || candidate.forgiveness > best.forgiveness))
            }
            AcceptancePolicy::Selected(metrics) => {
                metrics.iter().any(|m| m.of(candidate) > m.of(best))
            }
        }
    }

    /// The tuple to track as best after accepting `accepted`.
    ///
    /// Policies that tolerate regressions keep an element-wise running maximum,
    /// so the tracked best never decreases.
    pub fn advance(&self, best: &MetricTuple, accepted: &MetricTuple) -> MetricTuple {
        match self {
            AcceptancePolicy::AnyImproves | AcceptancePolicy::Selected(_) => best.max_with(accepted),
            AcceptancePolicy::NoRegression | AcceptancePolicy::ExactFirst => *accepted,
        }
    }

    /// Order two accepted candidates; `Greater` means `a` is the better one.
    pub fn rank(&self, a: &MetricTuple, b: &MetricTuple) -> Ordering {
        let cmp = |x: f64, y: f64| x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        match self {
            AcceptancePolicy::ExactFirst => cmp(a.exact, b.exact)
                .then_with(|| cmp(a.generous, b.generous))
                .then_with(|| cmp(a.forgiveness, b.forgiveness)),
            AcceptancePolicy::Selected(metrics) => {
                let sum = |t: &MetricTuple| metrics.iter().map(|m| m.of(t)).sum::<f64>();
                cmp(sum(a), sum(b))
            }
            AcceptancePolicy::AnyImproves | AcceptancePolicy::NoRegression => {
                cmp(a.exact + a.generous + a.forgiveness, b.exact + b.generous + b.forgiveness)
            }
        }
    }

    /// Best accepted entry of `candidates`, where each entry is
    /// `(worker index, metrics, payload)`. Ties go to the lower worker index,
    /// so the winner does not depend on the order results arrived in.
    pub fn select_winner<T>(
        &self,
        best: &MetricTuple,
        candidates: Vec<(usize, MetricTuple, T)>,
    ) -> Option<(usize, MetricTuple, T)> {
        candidates
            .into_iter()
            .filter(|(_, metrics, _)| self.accepts(metrics, best))
            .max_by(|(wa, a, _), (wb, b, _)| self.rank(a, b).then_with(|| wb.cmp(wa)))
    }

    /// Whether a loop tracking `best` under this policy can stop early.
    ///
    /// Exact at 100 always ends the search. A `Selected` policy also ends once
    /// any of its metrics is saturated, since that metric can no longer rise.
    pub fn reached_perfect(&self, best: &MetricTuple) -> bool {
        match self {
            AcceptancePolicy::Selected(metrics) => {
                is_perfect(best) || metrics.iter().any(|m| m.of(best) >= 100.0)
            }
            _ => is_perfect(best),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AcceptancePolicy::AnyImproves => "any-improves",
            AcceptancePolicy::NoRegression => "no-regression",
            AcceptancePolicy::ExactFirst => "exact-first",
            AcceptancePolicy::Selected(_) => "selected",
        }
    }
}
