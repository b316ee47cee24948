// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Cluster driver: constructs the components, primes the event queue with
//! the arrival stream, and runs the dispatch loop to the horizon.
//!
//! The driver is the single writer of the clock, queue, metrics, and trace.
//! Dispatching is a pure function of event kind; all component state is
//! mutated only inside dispatch, one event at a time.

use crate::clock::EventQueue;
use crate::cluster::ClusterPipeline;
use crate::error::Error;
use crate::event::{Event, EventKind};
use crate::instance::{InstanceConfig, InstanceSim};
use crate::kv::tiered::{TieredConfig, TieredKvStore};
use crate::metrics::{FitnessReport, MetricsCollector, SimulationReport, fitness};
use crate::oracle::{self, OracleSpec};
use crate::policy::RouterSnapshot;
use crate::request::Request;
use crate::trace::{DecisionTrace, TraceSummary};
use blis_config::policy::PolicyBundle;
use blis_config::simulation::SimulationConfig;
use serde::Serialize;

/// Everything a finished run produces.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationOutput {
    /// Aggregated metrics.
    #[serde(flatten)]
    pub report: SimulationReport,
    /// Weighted fitness score, when fitness weights were configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fitness: Option<FitnessReport>,
    /// Decision-trace summary, when tracing and summarization are enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_summary: Option<TraceSummary>,
}

/// Owns all components and runs the event loop.
#[derive(Debug)]
pub struct ClusterDriver {
    queue: EventQueue,
    instances: Vec<InstanceSim>,
    cluster: ClusterPipeline,
    metrics: MetricsCollector,
    trace: DecisionTrace,
    sim: SimulationConfig,
    block_size: usize,
    primed: bool,
}

impl ClusterDriver {
    /// Builds a driver from resolved configuration. The same oracle spec
    /// parameterizes every instance plus the pipeline's queueing overhead.
    pub fn new(
        sim: SimulationConfig,
        bundle: &PolicyBundle,
        oracle_spec: &OracleSpec,
    ) -> Result<Self, Error> {
        let mut config_errors = sim.validation_errors();
        config_errors.extend(bundle.validation_errors());
        if !config_errors.is_empty() {
            return Err(Error::Configuration {
                details: config_errors.join("; "),
            });
        }

        let tiered_cfg = TieredConfig {
            cpu_blocks: sim.kv_cpu_blocks,
            offload_threshold: sim.kv_offload_threshold,
            transfer_bandwidth: sim.kv_transfer_bandwidth,
            transfer_base_latency: sim.kv_transfer_base_latency,
            thrash_window: sim.kv_thrash_window,
        };
        let instance_cfg = InstanceConfig::from(&sim);
        let instances = (0..sim.num_instances)
            .map(|id| {
                InstanceSim::new(
                    id,
                    instance_cfg,
                    bundle.scheduler,
                    oracle::build(oracle_spec),
                    TieredKvStore::new(sim.total_kv_blocks, tiered_cfg),
                )
            })
            .collect();
        let cluster = ClusterPipeline::new(bundle, &sim, oracle::build(oracle_spec));
        let trace = DecisionTrace::new(sim.trace_level.enabled(), sim.counterfactual_k);

        Ok(Self {
            queue: EventQueue::new(),
            instances,
            cluster,
            metrics: MetricsCollector::new(),
            trace,
            block_size: sim.block_size_tokens,
            sim,
            primed: false,
        })
    }

    /// Primes the queue with the full arrival stream. The stream is fixed
    /// before the loop starts; arrivals at or beyond the horizon are
    /// discarded by the loop's horizon check.
    pub fn prime(&mut self, requests: Vec<Request>) -> Result<(), Error> {
        if requests.is_empty() {
            return Err(Error::EmptyWorkload);
        }
        for request in requests {
            let at = request.arrival_time;
            self.queue.push(
                at,
                EventKind::ClusterArrival {
                    request: Box::new(request),
                },
            );
        }
        self.primed = true;
        Ok(())
    }

    /// Runs the loop until the queue drains or the horizon is reached, then
    /// finalizes metrics.
    pub fn run(&mut self) -> SimulationOutput {
        assert!(self.primed, "run() before prime()");
        let horizon = self.sim.horizon;
        loop {
            match self.queue.peek_time() {
                None => break,
                Some(t) if t >= horizon => break,
                Some(_) => {}
            }
            let Some(event) = self.queue.pop() else {
                break;
            };
            self.dispatch(event);
        }
        tracing::debug!(now = self.queue.now(), "event loop finished");

        let reports = self.instances.iter().map(InstanceSim::report).collect();
        let report = self
            .metrics
            .finalize(horizon, reports, &self.sim.slo_ttft_targets);
        let fitness_report = if self.sim.fitness_weights.is_empty() {
            None
        } else {
            Some(fitness(&report, &self.sim.fitness_weights))
        };
        let trace_summary = if self.trace.enabled() && self.sim.summarize_trace {
            Some(self.trace.summarize())
        } else {
            None
        };
        SimulationOutput {
            report,
            fitness: fitness_report,
            trace_summary,
        }
    }

    /// The decision trace captured by the run.
    #[must_use]
    pub fn trace(&self) -> &DecisionTrace {
        &self.trace
    }

    /// Per-request terminal records.
    #[must_use]
    pub fn records(&self) -> &[crate::metrics::RequestRecord] {
        self.metrics.records()
    }

    /// GPU-tier KV accounting per instance, for invariant checks.
    #[must_use]
    pub fn kv_accountings(&self) -> Vec<crate::kv::TierAccounting> {
        self.instances
            .iter()
            .map(InstanceSim::kv_accounting)
            .collect()
    }

    fn dispatch(&mut self, event: Event) {
        tracing::trace!(time = event.time, kind = event.kind.label(), "dispatch");
        match event.kind {
            EventKind::ClusterArrival { request } => {
                self.cluster
                    .on_arrival(request, &mut self.queue, &mut self.metrics);
            }
            EventKind::AdmissionDecision { request } => {
                self.cluster
                    .on_admission_decision(request, &mut self.queue, &mut self.metrics);
            }
            EventKind::RoutingDecision { mut request } => {
                let hashes = request.block_hashes(self.block_size).to_vec();
                let snapshots: Vec<RouterSnapshot> = self
                    .instances
                    .iter()
                    .map(|i| i.router_snapshot(&hashes))
                    .collect();
                let now = self.queue.now();
                let outcome = self
                    .cluster
                    .on_routing_decision(&mut request, &snapshots, now);
                self.trace.record_decision(now, &request.id, &outcome);
                self.queue.push(
                    now,
                    EventKind::InjectRequest {
                        instance: outcome.target,
                        request,
                    },
                );
            }
            EventKind::InjectRequest { instance, request } => {
                self.metrics.record_injected();
                self.instances[instance].on_inject(request, &mut self.queue);
            }
            EventKind::StepAdvance { instance } => {
                self.instances[instance].on_step_advance(&mut self.queue);
            }
            EventKind::StepComplete { instance, step } => {
                self.instances[instance].on_step_complete(step, &mut self.queue);
            }
            EventKind::TransferComplete { instance, transfer } => {
                self.instances[instance].on_transfer_complete(transfer, &mut self.queue);
            }
            EventKind::Completion { request } => {
                if let (Some(ttft), Some(e2e)) = (request.ttft(), request.e2e()) {
                    self.trace.record_outcome(&request.id, ttft, e2e);
                }
                self.metrics.record_completion(&request);
            }
            EventKind::Preemption { .. } => {
                self.metrics.record_preemption();
            }
        }
    }
}
