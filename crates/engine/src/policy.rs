// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Policy implementations: admission, priority, wait-queue ordering, and
//! routing.
//!
//! Each family is a closed set of named variants resolved from the policy
//! bundle; there is no open registration. Every decision is a pure function
//! of the visible state plus, for stateful policies (round-robin cursor,
//! token-bucket fill), state mutated only inside the decision itself — which
//! keeps runs reproducible.

use crate::InstanceId;
use crate::request::Request;
use blis_config::Ticks;
use blis_config::policy::{
    AdmissionName, PolicyBundle, PriorityName, RoutingName, SchedulerName, ScorerName,
    ScorerWeight,
};

/// Lazy-refill token bucket charged per input token.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_tick: f64,
    fill: f64,
    last_refill: Ticks,
}

impl TokenBucket {
    /// A full bucket. `refill_rate` is tokens per second.
    #[must_use]
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_per_tick: refill_rate / 1e6,
            fill: capacity,
            last_refill: 0,
        }
    }

    fn refill(&mut self, now: Ticks) {
        if now > self.last_refill {
            let added = (now - self.last_refill) as f64 * self.refill_per_tick;
            self.fill = (self.fill + added).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Charges `tokens` if the bucket holds them. Partial charges never
    /// happen: on failure the fill is untouched.
    pub fn try_charge(&mut self, tokens: f64, now: Ticks) -> bool {
        self.refill(now);
        if self.fill >= tokens {
            self.fill -= tokens;
            true
        } else {
            false
        }
    }

    /// Current fill, after a lazy refill to `now`.
    pub fn fill(&mut self, now: Ticks) -> f64 {
        self.refill(now);
        self.fill
    }
}

/// Admission decision for one arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// The request proceeds to routing.
    Admit,
    /// The request is rejected with a stable reason label.
    Reject(&'static str),
}

/// The admission policy, resolved from the bundle.
#[derive(Debug, Clone)]
pub enum AdmissionPolicy {
    /// Admit unconditionally.
    AlwaysAdmit,
    /// Reject unconditionally.
    RejectAll,
    /// Charge a token bucket per input token.
    TokenBucket(TokenBucket),
}

impl AdmissionPolicy {
    /// Resolves the bundle's admission selection.
    #[must_use]
    pub fn from_bundle(bundle: &PolicyBundle) -> Self {
        match bundle.admission {
            AdmissionName::AlwaysAdmit => AdmissionPolicy::AlwaysAdmit,
            AdmissionName::RejectAll => AdmissionPolicy::RejectAll,
            AdmissionName::TokenBucket => AdmissionPolicy::TokenBucket(TokenBucket::new(
                bundle.token_bucket_capacity,
                bundle.token_bucket_refill_rate,
            )),
        }
    }

    /// Decides admission for one request at `now`.
    pub fn decide(&mut self, request: &Request, now: Ticks) -> AdmissionOutcome {
        match self {
            AdmissionPolicy::AlwaysAdmit => AdmissionOutcome::Admit,
            AdmissionPolicy::RejectAll => AdmissionOutcome::Reject("reject-all policy"),
            AdmissionPolicy::TokenBucket(bucket) => {
                if bucket.try_charge(request.input_tokens.len() as f64, now) {
                    AdmissionOutcome::Admit
                } else {
                    AdmissionOutcome::Reject("token bucket exhausted")
                }
            }
        }
    }
}

/// Maps SLO classes onto integer priorities (higher runs first).
#[derive(Debug, Clone, Copy)]
pub struct PriorityPolicy(PriorityName);

impl PriorityPolicy {
    /// Resolves the bundle's priority selection.
    #[must_use]
    pub fn from_bundle(bundle: &PolicyBundle) -> Self {
        Self(bundle.priority)
    }

    /// The priority assigned to a request of the given class.
    #[must_use]
    pub fn priority(&self, slo_class: blis_config::SloClass) -> i32 {
        use blis_config::SloClass;
        match (self.0, slo_class) {
            (PriorityName::Constant, _) => 0,
            (PriorityName::SloBased, SloClass::Interactive) => 10,
            (PriorityName::SloBased, SloClass::Batch) => 0,
            (PriorityName::InvertedSlo, SloClass::Interactive) => 0,
            (PriorityName::InvertedSlo, SloClass::Batch) => 10,
        }
    }
}

/// Sort key for the wait queue under a scheduler. Lower sorts first; the
/// arrival sequence makes every ordering total and deterministic.
#[must_use]
pub fn wait_queue_key(scheduler: SchedulerName, request: &Request) -> (i64, i64, u64) {
    let inject = request.inject_time.unwrap_or(request.arrival_time);
    match scheduler {
        SchedulerName::Fcfs => (0, inject, request.arrival_seq),
        SchedulerName::PriorityFcfs => (
            -i64::from(request.priority),
            inject,
            request.arrival_seq,
        ),
        SchedulerName::Sjf => (
            request.remaining_work() as i64,
            inject,
            request.arrival_seq,
        ),
        SchedulerName::ReversePriority => (
            i64::from(request.priority),
            inject,
            request.arrival_seq,
        ),
    }
}

/// One instance's state as the router sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterSnapshot {
    /// The instance id.
    pub instance: InstanceId,
    /// Wait-queue depth.
    pub queue_depth: usize,
    /// Running-batch size.
    pub batch_size: usize,
    /// In-flight KV tier transfers.
    pub pending_transfers: usize,
    /// GPU KV utilization fraction.
    pub kv_utilization: f64,
    /// Longest cached prefix of the request being routed, in blocks.
    pub prefix_match_blocks: usize,
}

impl RouterSnapshot {
    fn load(&self) -> f64 {
        (self.queue_depth + self.batch_size + self.pending_transfers) as f64
    }
}

/// A routing decision with the full score vector for counterfactuals.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingOutcome {
    /// The chosen instance.
    pub target: InstanceId,
    /// `(instance, score)` for every instance, higher is better.
    pub scores: Vec<(InstanceId, f64)>,
}

/// The routing policy, resolved from the bundle.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    name: RoutingName,
    scorers: Vec<ScorerWeight>,
    rr_cursor: usize,
}

impl RoutingPolicy {
    /// Resolves the bundle's routing selection.
    #[must_use]
    pub fn from_bundle(bundle: &PolicyBundle) -> Self {
        Self {
            name: bundle.routing,
            scorers: bundle.routing_scorers.clone(),
            rr_cursor: 0,
        }
    }

    /// Picks a target among the snapshots. Ties break on the lowest
    /// instance id; round-robin ignores scores entirely.
    pub fn route(&mut self, snapshots: &[RouterSnapshot]) -> RoutingOutcome {
        assert!(!snapshots.is_empty(), "routing over an empty cluster");
        let scores: Vec<(InstanceId, f64)> = snapshots
            .iter()
            .map(|s| (s.instance, self.score(s)))
            .collect();
        let target = match self.name {
            RoutingName::RoundRobin => {
                let target = snapshots[self.rr_cursor % snapshots.len()].instance;
                self.rr_cursor = (self.rr_cursor + 1) % snapshots.len();
                target
            }
            _ => {
                let mut best = scores[0];
                for &(instance, score) in &scores[1..] {
                    if score > best.1 || (score == best.1 && instance < best.0) {
                        best = (instance, score);
                    }
                }
                best.0
            }
        };
        RoutingOutcome { target, scores }
    }

    fn score(&self, snapshot: &RouterSnapshot) -> f64 {
        match self.name {
            RoutingName::RoundRobin => 0.0,
            RoutingName::LeastLoaded => -snapshot.load(),
            RoutingName::AlwaysBusiest => snapshot.load(),
            RoutingName::PrefixAffinity => snapshot.prefix_match_blocks as f64,
            RoutingName::Weighted => self
                .scorers
                .iter()
                .map(|sw| sw.weight * scorer_value(sw.scorer, snapshot))
                .sum(),
        }
    }
}

fn scorer_value(scorer: ScorerName, snapshot: &RouterSnapshot) -> f64 {
    match scorer {
        ScorerName::QueueDepth => -(snapshot.queue_depth as f64),
        ScorerName::KvUtilization => -snapshot.kv_utilization,
        ScorerName::LoadBalance => -snapshot.load(),
        ScorerName::PrefixAffinity => snapshot.prefix_match_blocks as f64,
    }
}
