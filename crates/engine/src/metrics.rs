// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Metrics collection and aggregation.
//!
//! Per-request records are captured at terminal transitions (completion,
//! rejection); aggregation happens once, after the loop. Percentiles are
//! nearest-rank over the exactly sorted sample — no sketches, so two
//! identical runs aggregate to identical bytes.

use crate::kv::CacheStats;
use crate::request::{Request, RequestId};
use blis_config::{SloClass, Ticks};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Terminal status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Completed all generation.
    Ok,
    /// Denied admission.
    Rejected,
}

/// One request's terminal record.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    /// Request id.
    pub id: RequestId,
    /// Originating client.
    pub client_id: String,
    /// SLO class.
    pub slo_class: SloClass,
    /// Terminal status.
    pub status: RequestStatus,
    /// Instance the request ran on, if it was routed.
    pub instance: Option<crate::InstanceId>,
    /// Arrival tick.
    pub arrival_time: Ticks,
    /// Time to first token, when completed.
    pub ttft: Option<Ticks>,
    /// End-to-end latency, when completed.
    pub e2e: Option<Ticks>,
    /// Wait between injection and first scheduling.
    pub queue_delay: Option<Ticks>,
    /// Mean inter-token gap.
    pub itl_mean: Option<f64>,
    /// Prompt length in tokens.
    pub input_tokens: usize,
    /// Generated tokens.
    pub output_tokens: usize,
    /// Preemption count.
    pub preemptions: u32,
    /// Prefix-cache blocks this request hit.
    pub kv_hit_blocks: usize,
    /// Rejection reason, for rejected requests.
    pub reject_reason: Option<String>,
}

impl RequestRecord {
    fn completed(request: &Request) -> Self {
        Self {
            id: request.id.clone(),
            client_id: request.client_id.clone(),
            slo_class: request.slo_class,
            status: RequestStatus::Ok,
            instance: request.assigned_instance,
            arrival_time: request.arrival_time,
            ttft: request.ttft(),
            e2e: request.e2e(),
            queue_delay: match (request.inject_time, request.first_scheduled_time) {
                (Some(inject), Some(first)) => Some(first - inject),
                _ => None,
            },
            itl_mean: request.itl_mean(),
            input_tokens: request.input_tokens.len(),
            output_tokens: request.outputs_generated,
            preemptions: request.preemptions,
            kv_hit_blocks: request.kv_hit_blocks,
            reject_reason: None,
        }
    }

    fn rejected(request: &Request, reason: &str) -> Self {
        Self {
            id: request.id.clone(),
            client_id: request.client_id.clone(),
            slo_class: request.slo_class,
            status: RequestStatus::Rejected,
            instance: None,
            arrival_time: request.arrival_time,
            ttft: None,
            e2e: None,
            queue_delay: None,
            itl_mean: None,
            input_tokens: request.input_tokens.len(),
            output_tokens: 0,
            preemptions: 0,
            kv_hit_blocks: 0,
            reject_reason: Some(reason.to_owned()),
        }
    }
}

/// Mean and exact percentiles of a latency sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct LatencySummary {
    /// Sample size.
    pub count: usize,
    /// Arithmetic mean, in ticks.
    pub mean: f64,
    /// Median (nearest rank).
    pub p50: Ticks,
    /// 90th percentile (nearest rank).
    pub p90: Ticks,
    /// 99th percentile (nearest rank).
    pub p99: Ticks,
}

impl LatencySummary {
    /// Summarizes a sample by exact sort; deterministic for a fixed sample.
    #[must_use]
    pub fn from_samples(mut samples: Vec<Ticks>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();
        let count = samples.len();
        let sum: i128 = samples.iter().map(|&t| i128::from(t)).sum();
        let nearest_rank = |p: f64| -> Ticks {
            let rank = ((p * count as f64).ceil() as usize).clamp(1, count);
            samples[rank - 1]
        };
        Self {
            count,
            mean: sum as f64 / count as f64,
            p50: nearest_rank(0.50),
            p90: nearest_rank(0.90),
            p99: nearest_rank(0.99),
        }
    }
}

/// Per-SLO-class latency partition.
#[derive(Debug, Clone, Serialize)]
pub struct SloReport {
    /// The class.
    pub slo_class: SloClass,
    /// Completed requests of this class.
    pub completed: usize,
    /// TTFT distribution.
    pub ttft: LatencySummary,
    /// E2E distribution.
    pub e2e: LatencySummary,
    /// Fraction of completions meeting the class TTFT target.
    pub attainment: f64,
}

/// Per-instance aggregates collected at finalization.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    /// The instance id.
    pub instance: crate::InstanceId,
    /// Requests completed on this instance.
    pub completed: u64,
    /// Steps executed.
    pub steps: u64,
    /// Preemptions performed.
    pub preemptions: u64,
    /// Head-of-line bypass events during batch formation.
    pub hol_events: u64,
    /// Requests still waiting at the horizon.
    pub queued_at_horizon: usize,
    /// Requests still running at the horizon.
    pub running_at_horizon: usize,
    /// KV cache counters.
    pub kv: CacheStats,
    /// Final GPU KV utilization.
    pub kv_utilization: f64,
}

/// Anomaly counters surfaced in the report.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AnomalyCounters {
    /// Completions of a lower-priority request while a higher-priority
    /// request admitted earlier was still outstanding.
    pub priority_inversions: u64,
    /// Batch formations that bypassed a blocked queue head.
    pub hol_blocking: u64,
    /// Admission rejections.
    pub rejections: u64,
    /// Preemption events.
    pub preemptions: u64,
    /// Prefix-cache block hits.
    pub cache_hits: u64,
    /// Offload/reload round trips inside the thrash window.
    pub cache_thrashes: u64,
}

/// The aggregated simulation results.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Simulated horizon in ticks.
    pub horizon: Ticks,
    /// Arrivals observed.
    pub arrivals: u64,
    /// Requests admitted.
    pub admitted: u64,
    /// Requests completed.
    pub completed: u64,
    /// Requests rejected.
    pub rejected: u64,
    /// Requests still queued at the horizon.
    pub queued_at_horizon: u64,
    /// Requests still in a running batch at the horizon.
    pub inflight_at_horizon: u64,
    /// Prompt tokens across completed requests.
    pub total_input_tokens: u64,
    /// Generated tokens across completed requests.
    pub total_output_tokens: u64,
    /// Completed requests per simulated second.
    pub throughput_rps: f64,
    /// Generated tokens per simulated second.
    pub output_tokens_per_second: f64,
    /// Cluster-wide TTFT distribution.
    pub ttft: LatencySummary,
    /// Cluster-wide E2E distribution.
    pub e2e: LatencySummary,
    /// Mean of per-request mean inter-token gaps.
    pub itl_mean: Option<f64>,
    /// Per-class partitions; present when more than one class occurred.
    pub per_slo: Vec<SloReport>,
    /// Anomaly counters.
    pub anomalies: AnomalyCounters,
    /// Aggregated KV cache counters.
    pub kv: CacheStats,
    /// Cluster-wide preemptions per completed request.
    pub preemption_rate: f64,
    /// Prefix-cache hit rate over hits + misses.
    pub kv_hit_rate: f64,
    /// Per-instance aggregates.
    pub instances: Vec<InstanceReport>,
}

/// Collects terminal records and anomaly counters during the run.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    records: Vec<RequestRecord>,
    arrivals: u64,
    admitted: u64,
    /// Admitted requests still between admission and injection.
    in_pipeline: u64,
    preemption_events: u64,
    admission_order: u64,
    /// Admitted, not-yet-completed requests: id -> (priority, admission order).
    outstanding: HashMap<RequestId, (i32, u64)>,
    priority_inversions: u64,
}

impl MetricsCollector {
    /// A fresh collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one cluster arrival.
    pub fn record_arrival(&mut self) {
        self.arrivals += 1;
    }

    /// Counts one admission.
    pub fn record_admitted(&mut self, id: &RequestId, priority: i32) {
        self.admitted += 1;
        self.in_pipeline += 1;
        let order = self.admission_order;
        self.admission_order += 1;
        let _ = self.outstanding.insert(id.clone(), (priority, order));
    }

    /// Marks an admitted request as injected into an instance.
    pub fn record_injected(&mut self) {
        debug_assert!(self.in_pipeline > 0);
        self.in_pipeline -= 1;
    }

    /// Records a rejection with its reason.
    pub fn record_rejected(&mut self, request: &Request, reason: &str) {
        self.records.push(RequestRecord::rejected(request, reason));
    }

    /// Records a completion, checking it against outstanding higher-priority
    /// requests for priority inversion.
    pub fn record_completion(&mut self, request: &Request) {
        if let Some((priority, order)) = self.outstanding.remove(&request.id) {
            let inverted = self
                .outstanding
                .values()
                .any(|&(p, o)| p > priority && o < order);
            if inverted {
                self.priority_inversions += 1;
            }
        }
        self.records.push(RequestRecord::completed(request));
    }

    /// Counts one preemption event.
    pub fn record_preemption(&mut self) {
        self.preemption_events += 1;
    }

    /// Read access to the terminal records (trace/debug output).
    #[must_use]
    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    /// Aggregates everything into the final report and asserts conservation:
    /// every admitted request completed or is still accounted for in a queue
    /// or batch.
    #[must_use]
    pub fn finalize(
        &self,
        horizon: Ticks,
        instances: Vec<InstanceReport>,
        slo_ttft_targets: &BTreeMap<SloClass, Ticks>,
    ) -> SimulationReport {
        let completed: Vec<&RequestRecord> = self
            .records
            .iter()
            .filter(|r| r.status == RequestStatus::Ok)
            .collect();
        let rejected = self
            .records
            .iter()
            .filter(|r| r.status == RequestStatus::Rejected)
            .count() as u64;

        let queued_at_horizon: u64 = instances.iter().map(|i| i.queued_at_horizon as u64).sum();
        // In-flight covers running batches plus requests the horizon caught
        // between admission and injection.
        let inflight_at_horizon: u64 = instances
            .iter()
            .map(|i| i.running_at_horizon as u64)
            .sum::<u64>()
            + self.in_pipeline;
        assert_eq!(
            self.admitted,
            completed.len() as u64 + queued_at_horizon + inflight_at_horizon,
            "request conservation violated"
        );

        let ttft = LatencySummary::from_samples(completed.iter().filter_map(|r| r.ttft).collect());
        let e2e = LatencySummary::from_samples(completed.iter().filter_map(|r| r.e2e).collect());
        let itls: Vec<f64> = completed.iter().filter_map(|r| r.itl_mean).collect();
        let itl_mean = if itls.is_empty() {
            None
        } else {
            Some(itls.iter().sum::<f64>() / itls.len() as f64)
        };

        let mut classes: Vec<SloClass> = completed.iter().map(|r| r.slo_class).collect();
        classes.sort_unstable();
        classes.dedup();
        let per_slo = if classes.len() > 1 {
            classes
                .iter()
                .map(|&class| {
                    let of_class: Vec<&&RequestRecord> =
                        completed.iter().filter(|r| r.slo_class == class).collect();
                    let target = slo_ttft_targets.get(&class).copied().unwrap_or(Ticks::MAX);
                    let met = of_class
                        .iter()
                        .filter(|r| r.ttft.is_some_and(|t| t <= target))
                        .count();
                    SloReport {
                        slo_class: class,
                        completed: of_class.len(),
                        ttft: LatencySummary::from_samples(
                            of_class.iter().filter_map(|r| r.ttft).collect(),
                        ),
                        e2e: LatencySummary::from_samples(
                            of_class.iter().filter_map(|r| r.e2e).collect(),
                        ),
                        attainment: if of_class.is_empty() {
                            1.0
                        } else {
                            met as f64 / of_class.len() as f64
                        },
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        let kv = instances.iter().fold(CacheStats::default(), |acc, i| CacheStats {
            hits: acc.hits + i.kv.hits,
            misses: acc.misses + i.kv.misses,
            evictions: acc.evictions + i.kv.evictions,
            allocation_failures: acc.allocation_failures + i.kv.allocation_failures,
            offloads: acc.offloads + i.kv.offloads,
            reloads: acc.reloads + i.kv.reloads,
            thrashes: acc.thrashes + i.kv.thrashes,
        });
        let hol_blocking: u64 = instances.iter().map(|i| i.hol_events).sum();

        let horizon_seconds = horizon as f64 / 1e6;
        let total_input_tokens: u64 = completed.iter().map(|r| r.input_tokens as u64).sum();
        let total_output_tokens: u64 = completed.iter().map(|r| r.output_tokens as u64).sum();

        SimulationReport {
            horizon,
            arrivals: self.arrivals,
            admitted: self.admitted,
            completed: completed.len() as u64,
            rejected,
            queued_at_horizon,
            inflight_at_horizon,
            total_input_tokens,
            total_output_tokens,
            throughput_rps: completed.len() as f64 / horizon_seconds,
            output_tokens_per_second: total_output_tokens as f64 / horizon_seconds,
            ttft,
            e2e,
            itl_mean,
            per_slo,
            anomalies: AnomalyCounters {
                priority_inversions: self.priority_inversions,
                hol_blocking,
                rejections: rejected,
                preemptions: self.preemption_events,
                cache_hits: kv.hits,
                cache_thrashes: kv.thrashes,
            },
            kv,
            preemption_rate: if completed.is_empty() {
                0.0
            } else {
                self.preemption_events as f64 / completed.len() as f64
            },
            kv_hit_rate: if kv.hits + kv.misses == 0 {
                0.0
            } else {
                kv.hits as f64 / (kv.hits + kv.misses) as f64
            },
            instances,
        }
    }
}

/// Weighted fitness score over named report metrics.
#[derive(Debug, Clone, Serialize)]
pub struct FitnessReport {
    /// Weighted total.
    pub total: f64,
    /// Per-metric contribution (weight times normalized value).
    pub contributions: BTreeMap<String, f64>,
}

/// Scores a report under additive weights. Each metric normalizes into
/// [0, 1] with higher-is-better orientation; unknown metric names score
/// zero and are reported with a zero contribution.
#[must_use]
pub fn fitness(report: &SimulationReport, weights: &BTreeMap<String, f64>) -> FitnessReport {
    let mut contributions = BTreeMap::new();
    let mut total = 0.0;
    for (name, &weight) in weights {
        let normalized = match name.as_str() {
            "throughput" => report.throughput_rps / (1.0 + report.throughput_rps),
            "p99_ttft" => 1.0 / (1.0 + report.ttft.p99 as f64 / 1e6),
            "p99_e2e" => 1.0 / (1.0 + report.e2e.p99 as f64 / 1e6),
            "slo_attainment" => {
                if report.per_slo.is_empty() {
                    1.0
                } else {
                    report.per_slo.iter().map(|s| s.attainment).sum::<f64>()
                        / report.per_slo.len() as f64
                }
            }
            "rejection_rate" => {
                if report.arrivals == 0 {
                    1.0
                } else {
                    1.0 - report.rejected as f64 / report.arrivals as f64
                }
            }
            "preemption_rate" => 1.0 - report.preemption_rate.min(1.0),
            _ => 0.0,
        };
        let contribution = weight * normalized;
        total += contribution;
        let _ = contributions.insert(name.clone(), contribution);
    }
    FitnessReport {
        total,
        contributions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_rank_percentiles_are_exact() {
        let samples: Vec<Ticks> = (1..=100).collect();
        let s = LatencySummary::from_samples(samples);
        assert_eq!(s.p50, 50);
        assert_eq!(s.p90, 90);
        assert_eq!(s.p99, 99);
        assert_eq!(s.mean, 50.5);
    }

    #[test]
    fn single_sample_summary_is_that_sample() {
        let s = LatencySummary::from_samples(vec![42]);
        assert_eq!(s.p50, 42);
        assert_eq!(s.p99, 42);
        assert_eq!(s.count, 1);
    }

    #[test]
    fn priority_inversion_detects_overtaking_completions() {
        use blis_config::SloClass;
        let mut m = MetricsCollector::new();
        let mut high = Request::new("high", "c", "t", SloClass::Interactive, vec![0; 8], 1, 0, 0);
        let mut low = Request::new("low", "c", "t", SloClass::Batch, vec![0; 8], 1, 0, 1);
        m.record_admitted(&high.id, 10);
        m.record_admitted(&low.id, 0);

        for (r, offset) in [(&mut high, 0), (&mut low, 1)] {
            r.set_admission_time(10 + offset);
            r.set_routing_time(10 + offset);
            r.set_inject_time(10 + offset);
            r.mark_first_scheduled(20 + offset);
            r.mark_first_token(30 + offset);
        }
        // The low-priority request finishes while high is outstanding.
        low.mark_completed(40);
        m.record_completion(&low);
        high.mark_completed(50);
        m.record_completion(&high);
        assert_eq!(m.priority_inversions, 1);
    }

    #[test]
    #[should_panic(expected = "conservation")]
    fn lost_requests_fail_conservation() {
        let mut m = MetricsCollector::new();
        // Admitted and injected, but never completed and absent from every
        // instance report: the request leaked.
        m.record_admitted(&"ghost".to_owned(), 0);
        m.record_injected();
        let _ = m.finalize(1_000, Vec::new(), &BTreeMap::new());
    }

    #[test]
    fn fitness_weights_compose_additively() {
        let m = MetricsCollector::new();
        let report = m.finalize(1_000_000, Vec::new(), &BTreeMap::new());
        let mut weights = BTreeMap::new();
        let _ = weights.insert("rejection_rate".to_owned(), 2.0);
        let _ = weights.insert("p99_ttft".to_owned(), 1.0);
        let f = fitness(&report, &weights);
        assert_eq!(f.contributions.len(), 2);
        assert!((f.total - (2.0 + 1.0)).abs() < 1e-9);
    }
}
