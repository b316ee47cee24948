// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Decision trace: per-routing-decision records with counterfactuals.
//!
//! When enabled, every routing decision stores the chosen target, the top-K
//! alternatives with their scores, and — once the request completes — the
//! realized latency outcome. Records are append-only and ordered by event
//! time. Regret for one decision is the score gap between the best-scoring
//! alternative and the chosen target (zero for pure argmax policies).

use crate::InstanceId;
use crate::policy::RoutingOutcome;
use crate::request::RequestId;
use blis_config::Ticks;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Realized latency components of a routed request.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DecisionOutcome {
    /// Time to first token.
    pub ttft: Ticks,
    /// End-to-end latency.
    pub e2e: Ticks,
}

/// One routing decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    /// Decision tick.
    pub time: Ticks,
    /// The routed request.
    pub request_id: RequestId,
    /// Chosen target instance.
    pub chosen: InstanceId,
    /// Score of the chosen target.
    pub chosen_score: f64,
    /// Top-K alternatives by score, excluding the chosen target.
    pub alternatives: Vec<(InstanceId, f64)>,
    /// Realized outcome, filled at completion.
    pub outcome: Option<DecisionOutcome>,
}

/// Summary of a recorded trace.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TraceSummary {
    /// Number of decisions recorded.
    pub decisions: usize,
    /// How often each instance was chosen.
    pub target_distribution: BTreeMap<InstanceId, u64>,
    /// Mean score regret across decisions.
    pub mean_regret: f64,
    /// Maximum score regret across decisions.
    pub max_regret: f64,
}

/// Append-only decision trace.
#[derive(Debug, Default)]
pub struct DecisionTrace {
    enabled: bool,
    counterfactual_k: usize,
    records: Vec<DecisionRecord>,
    by_request: HashMap<RequestId, usize>,
}

impl DecisionTrace {
    /// A trace sink. When `enabled` is false every call is a no-op.
    #[must_use]
    pub fn new(enabled: bool, counterfactual_k: usize) -> Self {
        Self {
            enabled,
            counterfactual_k,
            records: Vec::new(),
            by_request: HashMap::new(),
        }
    }

    /// Whether records are being captured.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Records one routing decision.
    pub fn record_decision(&mut self, time: Ticks, request_id: &RequestId, outcome: &RoutingOutcome) {
        if !self.enabled {
            return;
        }
        let chosen_score = outcome
            .scores
            .iter()
            .find(|(i, _)| *i == outcome.target)
            .map_or(0.0, |&(_, s)| s);
        let mut alternatives: Vec<(InstanceId, f64)> = outcome
            .scores
            .iter()
            .filter(|(i, _)| *i != outcome.target)
            .copied()
            .collect();
        // Descending score, id as the deterministic tiebreak.
        alternatives.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        alternatives.truncate(self.counterfactual_k);
        let _ = self.by_request.insert(request_id.clone(), self.records.len());
        self.records.push(DecisionRecord {
            time,
            request_id: request_id.clone(),
            chosen: outcome.target,
            chosen_score,
            alternatives,
            outcome: None,
        });
    }

    /// Fills the realized outcome for a completed request.
    pub fn record_outcome(&mut self, request_id: &RequestId, ttft: Ticks, e2e: Ticks) {
        if !self.enabled {
            return;
        }
        if let Some(&idx) = self.by_request.get(request_id) {
            self.records[idx].outcome = Some(DecisionOutcome { ttft, e2e });
        }
    }

    /// The recorded decisions, in event-time order.
    #[must_use]
    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }

    /// Target distribution and regret statistics.
    #[must_use]
    pub fn summarize(&self) -> TraceSummary {
        let mut target_distribution: BTreeMap<InstanceId, u64> = BTreeMap::new();
        let mut regret_sum = 0.0;
        let mut max_regret = 0.0f64;
        for record in &self.records {
            *target_distribution.entry(record.chosen).or_insert(0) += 1;
            let best_alternative = record
                .alternatives
                .first()
                .map_or(record.chosen_score, |&(_, s)| s);
            let regret = (best_alternative - record.chosen_score).max(0.0);
            regret_sum += regret;
            max_regret = max_regret.max(regret);
        }
        TraceSummary {
            decisions: self.records.len(),
            target_distribution,
            mean_regret: if self.records.is_empty() {
                0.0
            } else {
                regret_sum / self.records.len() as f64
            },
            max_regret,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(target: InstanceId, scores: Vec<(InstanceId, f64)>) -> RoutingOutcome {
        RoutingOutcome { target, scores }
    }

    #[test]
    fn disabled_trace_records_nothing() {
        let mut trace = DecisionTrace::new(false, 3);
        trace.record_decision(10, &"r0".to_owned(), &outcome(0, vec![(0, 0.0), (1, 5.0)]));
        assert!(trace.records().is_empty());
        assert_eq!(trace.summarize().decisions, 0);
    }

    #[test]
    fn alternatives_are_top_k_by_score() {
        let mut trace = DecisionTrace::new(true, 2);
        trace.record_decision(
            10,
            &"r0".to_owned(),
            &outcome(0, vec![(0, 1.0), (1, 5.0), (2, 3.0), (3, 4.0)]),
        );
        let record = &trace.records()[0];
        assert_eq!(record.alternatives, vec![(1, 5.0), (3, 4.0)]);
    }

    #[test]
    fn regret_measures_the_score_gap_to_the_best_alternative() {
        let mut trace = DecisionTrace::new(true, 3);
        // Chose a target 5 points below the best alternative.
        trace.record_decision(10, &"r0".to_owned(), &outcome(0, vec![(0, 0.0), (1, 5.0)]));
        // Argmax choice: zero regret.
        trace.record_decision(20, &"r1".to_owned(), &outcome(1, vec![(0, 0.0), (1, 5.0)]));
        let summary = trace.summarize();
        assert_eq!(summary.mean_regret, 2.5);
        assert_eq!(summary.max_regret, 5.0);
        assert_eq!(summary.target_distribution.get(&0), Some(&1));
        assert_eq!(summary.target_distribution.get(&1), Some(&1));
    }

    #[test]
    fn outcomes_attach_to_their_decision() {
        let mut trace = DecisionTrace::new(true, 1);
        trace.record_decision(10, &"r0".to_owned(), &outcome(0, vec![(0, 0.0)]));
        trace.record_outcome(&"r0".to_owned(), 1_000, 5_000);
        let recorded = trace.records()[0].outcome.expect("outcome present");
        assert_eq!(recorded.ttft, 1_000);
        assert_eq!(recorded.e2e, 5_000);
    }
}
