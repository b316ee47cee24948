// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Simulation events.
//!
//! The event queue is the only cross-component communication channel.
//! Requests travel *inside* events while they move between pipeline stages,
//! so ownership is always unambiguous: a request is either in flight on the
//! queue, queued/running inside one instance, or retired into metrics.

use crate::InstanceId;
use crate::kv::TransferId;
use crate::request::{Request, RequestId};
use blis_config::Ticks;

/// A scheduled event: `(time, sequence)` orders the queue; `kind` carries
/// the payload.
#[derive(Debug)]
pub struct Event {
    /// Simulated time the event fires at.
    pub time: Ticks,
    /// Monotonic push tiebreaker; equal-time events pop in push order.
    pub sequence: u64,
    /// The event payload.
    pub kind: EventKind,
}

/// Every event kind the engine dispatches on.
#[derive(Debug)]
pub enum EventKind {
    /// A request arrives at the cluster boundary.
    ClusterArrival {
        /// The arriving request.
        request: Box<Request>,
    },
    /// The admission decision for an admitted request fires.
    AdmissionDecision {
        /// The admitted request.
        request: Box<Request>,
    },
    /// The routing decision for an admitted request fires.
    RoutingDecision {
        /// The request to route.
        request: Box<Request>,
    },
    /// A routed request lands in its target instance's wait queue.
    InjectRequest {
        /// The target instance.
        instance: InstanceId,
        /// The request to enqueue.
        request: Box<Request>,
    },
    /// An instance forms and launches its next batch.
    StepAdvance {
        /// The instance to advance.
        instance: InstanceId,
    },
    /// A launched step finishes its forward pass.
    StepComplete {
        /// The instance whose step completed.
        instance: InstanceId,
        /// The step counter value the completion belongs to; guards against
        /// dispatching a stale completion after preemption reshuffles.
        step: u64,
    },
    /// A KV tier transfer (offload or reload) finishes.
    TransferComplete {
        /// The instance owning the KV store.
        instance: InstanceId,
        /// The transfer that finished.
        transfer: TransferId,
    },
    /// A request finished generating; carries it out of the instance into
    /// metrics.
    Completion {
        /// The completed request.
        request: Box<Request>,
    },
    /// A request was evicted from a running batch.
    Preemption {
        /// The instance the request was running on.
        instance: InstanceId,
        /// The preempted request (it stays queued inside the instance).
        request_id: RequestId,
    },
}

impl EventKind {
    /// Short label used in trace output and debug logging.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::ClusterArrival { .. } => "cluster_arrival",
            EventKind::AdmissionDecision { .. } => "admission_decision",
            EventKind::RoutingDecision { .. } => "routing_decision",
            EventKind::InjectRequest { .. } => "inject_request",
            EventKind::StepAdvance { .. } => "step_advance",
            EventKind::StepComplete { .. } => "step_complete",
            EventKind::TransferComplete { .. } => "transfer_complete",
            EventKind::Completion { .. } => "completion",
            EventKind::Preemption { .. } => "preemption",
        }
    }
}
