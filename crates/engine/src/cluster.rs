// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Cluster-level admission and routing pipeline.
//!
//! Three stages, each a configurable latency apart: arrival, admission
//! decision, routing decision. Every arrival produces exactly one terminal
//! outcome — rejected at admission, or injected into exactly one instance —
//! in monotonic causal time order. Stage latencies compose additively into
//! the injection time under low load.

use crate::clock::EventQueue;
use crate::event::EventKind;
use crate::metrics::MetricsCollector;
use crate::oracle::LatencyOracle;
use crate::policy::{
    AdmissionOutcome, AdmissionPolicy, PriorityPolicy, RouterSnapshot, RoutingOutcome,
    RoutingPolicy,
};
use crate::request::{Request, RequestState};
use blis_config::Ticks;
use blis_config::policy::PolicyBundle;
use blis_config::simulation::SimulationConfig;

/// The admission/routing pipeline.
#[derive(Debug)]
pub struct ClusterPipeline {
    admission: AdmissionPolicy,
    routing: RoutingPolicy,
    priority: PriorityPolicy,
    admission_latency: Ticks,
    routing_latency: Ticks,
    oracle: Box<dyn LatencyOracle>,
}

impl ClusterPipeline {
    /// Builds the pipeline from the resolved bundle and engine knobs. The
    /// oracle supplies the queue-pipeline overhead added before admission.
    #[must_use]
    pub fn new(
        bundle: &PolicyBundle,
        sim: &SimulationConfig,
        oracle: Box<dyn LatencyOracle>,
    ) -> Self {
        Self {
            admission: AdmissionPolicy::from_bundle(bundle),
            routing: RoutingPolicy::from_bundle(bundle),
            priority: PriorityPolicy::from_bundle(bundle),
            admission_latency: sim.admission_latency,
            routing_latency: sim.routing_latency,
            oracle,
        }
    }

    /// Handles `ClusterArrival`: decide admission now; an admitted request's
    /// `AdmissionDecision` fires after the admission latency plus the
    /// oracle's queueing overhead.
    pub fn on_arrival(
        &mut self,
        mut request: Box<Request>,
        queue: &mut EventQueue,
        metrics: &mut MetricsCollector,
    ) {
        let now = queue.now();
        metrics.record_arrival();

        match self.admission.decide(&request, now) {
            AdmissionOutcome::Admit => {
                let delay = self.admission_latency + self.oracle.queueing_time(&request);
                queue.push(now + delay, EventKind::AdmissionDecision { request });
            }
            AdmissionOutcome::Reject(reason) => {
                request.state = RequestState::Rejected;
                tracing::debug!(id = %request.id, reason, "rejected at admission");
                metrics.record_rejected(&request, reason);
            }
        }
    }

    /// Handles `AdmissionDecision`: stamp the admission, assign priority,
    /// and schedule routing.
    pub fn on_admission_decision(
        &mut self,
        mut request: Box<Request>,
        queue: &mut EventQueue,
        metrics: &mut MetricsCollector,
    ) {
        let now = queue.now();
        request.set_admission_time(now);
        request.priority = self.priority.priority(request.slo_class);
        metrics.record_admitted(&request.id, request.priority);
        queue.push(
            now + self.routing_latency,
            EventKind::RoutingDecision { request },
        );
    }

    /// Handles `RoutingDecision`: pick the target over the instance
    /// snapshots and stamp the request. The caller records the trace entry
    /// and emits the `InjectRequest` event.
    pub fn on_routing_decision(
        &mut self,
        request: &mut Request,
        snapshots: &[RouterSnapshot],
        now: Ticks,
    ) -> RoutingOutcome {
        let outcome = self.routing.route(snapshots);
        request.set_routing_time(now);
        request.assigned_instance = Some(outcome.target);
        outcome
    }
}
