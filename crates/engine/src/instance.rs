// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-instance simulator: wait queue, running batch, batch formation with
//! chunked prefill, step execution, preemption, and completion.
//!
//! The instance is a state machine driven entirely by events: `InjectRequest`
//! adds work, `StepAdvance` forms and launches a batch, `StepComplete`
//! advances request progress and relaunches, `TransferComplete` unblocks
//! requests waiting on KV reloads. At most one step is in flight at a time;
//! batch formation always sees a consistent snapshot because instance state
//! is only mutated inside dispatch.

use crate::InstanceId;
use crate::clock::EventQueue;
use crate::event::EventKind;
use crate::kv::tiered::ReloadState;
use crate::kv::{PendingTransfer, TieredKvStore, blocks_for_tokens};
use crate::metrics::InstanceReport;
use crate::oracle::{BatchWorkload, LatencyOracle};
use crate::policy::{RouterSnapshot, wait_queue_key};
use crate::request::{Request, RequestState};
use blis_config::Ticks;
use blis_config::policy::SchedulerName;
use blis_config::simulation::SimulationConfig;

/// Batch-formation limits for one instance.
#[derive(Debug, Clone, Copy)]
pub struct InstanceConfig {
    /// Maximum co-scheduled requests.
    pub max_running: usize,
    /// Maximum scheduled new tokens per step.
    pub max_scheduled_tokens: usize,
    /// Prefill chunk cap; zero disables chunking.
    pub long_prefill_token_threshold: usize,
    /// Tokens per KV block.
    pub block_size_tokens: usize,
    /// Maximum model sequence length.
    pub max_model_len: usize,
}

impl From<&SimulationConfig> for InstanceConfig {
    fn from(cfg: &SimulationConfig) -> Self {
        Self {
            max_running: cfg.max_running_reqs,
            max_scheduled_tokens: cfg.max_scheduled_tokens,
            long_prefill_token_threshold: cfg.long_prefill_token_threshold,
            block_size_tokens: cfg.block_size_tokens,
            max_model_len: cfg.max_model_len,
        }
    }
}

/// One simulated inference server.
#[derive(Debug)]
pub struct InstanceSim {
    id: InstanceId,
    cfg: InstanceConfig,
    scheduler: SchedulerName,
    oracle: Box<dyn LatencyOracle>,
    kv: TieredKvStore,
    wait: Vec<Box<Request>>,
    running: Vec<Box<Request>>,
    step_counter: u64,
    in_step: bool,
    advance_scheduled: bool,
    steps_executed: u64,
    hol_events: u64,
    preemptions: u64,
    completed: u64,
    clamp_warned: bool,
}

impl InstanceSim {
    /// A fresh, idle instance.
    #[must_use]
    pub fn new(
        id: InstanceId,
        cfg: InstanceConfig,
        scheduler: SchedulerName,
        oracle: Box<dyn LatencyOracle>,
        kv: TieredKvStore,
    ) -> Self {
        Self {
            id,
            cfg,
            scheduler,
            oracle,
            kv,
            wait: Vec::new(),
            running: Vec::new(),
            step_counter: 0,
            in_step: false,
            advance_scheduled: false,
            steps_executed: 0,
            hol_events: 0,
            preemptions: 0,
            completed: 0,
            clamp_warned: false,
        }
    }

    /// The instance id.
    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Admission/queue-pipeline overhead the instance's oracle charges.
    #[must_use]
    pub fn queueing_time(&self, request: &Request) -> Ticks {
        self.oracle.queueing_time(request)
    }

    /// The router's view of this instance against one request's prefix.
    #[must_use]
    pub fn router_snapshot(&self, prefix_hashes: &[crate::kv::BlockHash]) -> RouterSnapshot {
        RouterSnapshot {
            instance: self.id,
            queue_depth: self.wait.len(),
            batch_size: self.running.len(),
            pending_transfers: self.kv.pending_transfer_count(),
            kv_utilization: self.kv.utilization(),
            prefix_match_blocks: self.kv.longest_prefix_blocks(prefix_hashes),
        }
    }

    /// Handles `InjectRequest`: enqueue and wake the instance if idle.
    pub fn on_inject(&mut self, mut request: Box<Request>, queue: &mut EventQueue) {
        let now = queue.now();
        request.set_inject_time(now);
        request.state = RequestState::Waiting;
        self.wait.push(request);
        self.schedule_advance(queue, now);
    }

    /// Handles `TransferComplete`: apply the transfer and retry batch
    /// formation if work is waiting.
    pub fn on_transfer_complete(&mut self, transfer: crate::kv::TransferId, queue: &mut EventQueue) {
        self.kv.on_transfer_complete(transfer, queue.now());
        if !self.wait.is_empty() || !self.running.is_empty() {
            self.schedule_advance(queue, queue.now());
        }
    }

    /// Handles `StepAdvance`: forms the next batch and launches the step.
    pub fn on_step_advance(&mut self, queue: &mut EventQueue) {
        self.advance_scheduled = false;
        if self.in_step {
            return;
        }
        let now = queue.now();
        let mut budget = self.cfg.max_scheduled_tokens;
        let mut preempted_this_round = 0u64;

        // Phase 1: continuing requests keep their slots. Decode takes one
        // token; an unfinished prefill takes its next chunk. A continuing
        // request that cannot get its next blocks triggers preemption of the
        // batch tail (possibly itself).
        let mut idx = 0;
        while idx < self.running.len() {
            let num_new = self.next_chunk(&self.running[idx], budget);
            if num_new == 0 {
                self.running[idx].num_new_tokens = 0;
                idx += 1;
                continue;
            }
            let needed = {
                let req = &self.running[idx];
                blocks_for_tokens(req.progress_index() + num_new, self.cfg.block_size_tokens)
                    .saturating_sub(req.kv_blocks.len())
            };
            let mut preempted_self = false;
            while needed > 0 && self.kv.available_blocks() < needed {
                let victim = self.preemption_victim();
                self.preempt(victim, now, queue);
                preempted_this_round += 1;
                if victim == idx {
                    preempted_self = true;
                    break;
                }
                if victim < idx {
                    idx -= 1;
                }
            }
            if preempted_self {
                continue;
            }
            if needed > 0 {
                match self.kv.allocate(needed, now) {
                    Ok(ids) => self.running[idx].kv_blocks.extend(ids),
                    Err(_) => {
                        // Capacity vanished between the check and the
                        // allocation cannot happen single-threaded; treat as
                        // a bug loudly.
                        panic!("allocation failed after capacity check on instance {}", self.id);
                    }
                }
            }
            let req = &mut self.running[idx];
            req.num_new_tokens = num_new;
            budget -= num_new;
            idx += 1;
        }

        // Phase 2: admit from the wait queue in scheduler order.
        let scheduler = self.scheduler;
        self.wait.sort_by_key(|r| wait_queue_key(scheduler, r));
        let mut admitted_any = false;
        let mut head_blocked = false;
        let mut i = 0;
        while i < self.wait.len() {
            if self.running.len() >= self.cfg.max_running || budget == 0 {
                break;
            }
            // A request whose full sequence cannot fit the model context is
            // never admitted; it stays queued like any other unschedulable
            // request.
            if self.wait[i].total_tokens() > self.cfg.max_model_len {
                i += 1;
                continue;
            }
            let hashes = self.wait[i]
                .block_hashes(self.cfg.block_size_tokens)
                .to_vec();
            match self.kv.reload_state(&hashes, now) {
                ReloadState::Pending => {
                    if i == 0 {
                        head_blocked = true;
                    }
                    i += 1;
                    continue;
                }
                ReloadState::Started(transfer) => {
                    self.push_transfer(queue, transfer);
                    if i == 0 {
                        head_blocked = true;
                    }
                    i += 1;
                    continue;
                }
                ReloadState::Clear => {}
            }

            // Fresh (or preemption-reset) requests recover whatever prefix
            // the cache still owns before counting allocation needs.
            let mut acquired_hits = 0;
            if self.wait[i].kv_blocks.is_empty() && self.wait[i].inputs_processed == 0 {
                let (ids, hits) = self.kv.get_cached_blocks(&hashes, now);
                if hits > 0 {
                    let input_len = self.wait[i].input_tokens.len();
                    let req = &mut self.wait[i];
                    req.kv_blocks = ids;
                    req.kv_hit_blocks += hits;
                    req.inputs_processed =
                        (hits * self.cfg.block_size_tokens).min(input_len.saturating_sub(1));
                    acquired_hits = hits;
                }
            }

            let num_new = self.next_chunk(&self.wait[i], budget);
            if num_new == 0 {
                break;
            }
            let needed = {
                let req = &self.wait[i];
                blocks_for_tokens(req.progress_index() + num_new, self.cfg.block_size_tokens)
                    .saturating_sub(req.kv_blocks.len())
            };
            match self.kv.allocate(needed, now) {
                Ok(ids) => {
                    let mut req = self.wait.remove(i);
                    req.kv_blocks.extend(ids);
                    req.num_new_tokens = num_new;
                    req.state = if req.in_decode() {
                        RequestState::RunningDecode
                    } else {
                        RequestState::RunningPrefill
                    };
                    req.mark_first_scheduled(now);
                    budget -= num_new;
                    self.running.push(req);
                    admitted_any = true;
                }
                Err(_) => {
                    // Not enough KV for the next candidate: stop admitting.
                    // Roll back the prefix references taken above so the
                    // blocks stay evictable while the request waits.
                    if acquired_hits > 0 {
                        let req = &mut self.wait[i];
                        let held = std::mem::take(&mut req.kv_blocks);
                        req.kv_hit_blocks -= acquired_hits;
                        req.inputs_processed = 0;
                        let transfers = self.kv.release(&held, now);
                        for t in transfers {
                            self.push_transfer(queue, t);
                        }
                    }
                    break;
                }
            }
        }
        if head_blocked && admitted_any {
            self.hol_events += 1;
        }

        // Phase 3: launch.
        let workload = self.batch_workload();
        if workload.scheduled_tokens() == 0 {
            // Idle, or everything is blocked on reloads/KV. A future
            // injection, transfer, or completion wakes the instance again.
            return;
        }
        let mut step_time = self.oracle.step_time(&workload);
        if step_time <= 0 {
            if !self.clamp_warned {
                tracing::warn!(
                    instance = self.id,
                    "oracle returned a non-positive step time; clamping to 1 tick"
                );
                self.clamp_warned = true;
            }
            step_time = 1;
        }
        let mut duration = step_time;
        if admitted_any {
            duration += self.oracle.scheduling_processing_time();
        }
        duration += preempted_this_round as Ticks * self.oracle.preemption_processing_time();

        self.step_counter += 1;
        self.in_step = true;
        queue.push(
            now + duration,
            EventKind::StepComplete {
                instance: self.id,
                step: self.step_counter,
            },
        );
    }

    /// Handles `StepComplete`: advance progress, emit completions, relaunch.
    pub fn on_step_complete(&mut self, step: u64, queue: &mut EventQueue) {
        assert_eq!(step, self.step_counter, "stale step completion on instance {}", self.id);
        assert!(self.in_step, "step completion while idle on instance {}", self.id);
        self.in_step = false;
        self.steps_executed += 1;
        let now = queue.now();
        let block_size = self.cfg.block_size_tokens;

        let mut output_tokens = 0u64;
        let mut still_running: Vec<Box<Request>> = Vec::with_capacity(self.running.len());
        let draining: Vec<Box<Request>> = self.running.drain(..).collect();
        for mut req in draining {
            let num_new = req.num_new_tokens;
            req.num_new_tokens = 0;
            if num_new == 0 {
                still_running.push(req);
                continue;
            }
            if req.in_decode() {
                req.outputs_generated += 1;
                req.record_output_token(now);
                output_tokens += 1;
            } else {
                req.inputs_processed += num_new;
                debug_assert!(req.inputs_processed <= req.input_tokens.len());
                // Publish hashes for every input block that is now fully
                // materialized, making it shareable.
                let full_blocks = req.inputs_processed / block_size;
                let hashes = req.block_hashes(block_size).to_vec();
                let publish = full_blocks.min(hashes.len()).min(req.kv_blocks.len());
                self.kv.assign_hashes(&req.kv_blocks[..publish], &hashes[..publish]);
                if req.inputs_processed == req.input_tokens.len() {
                    // The final prefill chunk yields the first output token.
                    req.mark_first_token(now);
                    req.state = RequestState::RunningDecode;
                    if req.outputs_generated == 0 && req.output_tokens_target > 0 {
                        req.outputs_generated = 1;
                        req.record_output_token(now);
                        output_tokens += 1;
                    }
                }
            }

            if req.is_finished() {
                req.mark_completed(now);
                let held = std::mem::take(&mut req.kv_blocks);
                let transfers = self.kv.release(&held, now);
                for t in transfers {
                    self.push_transfer(queue, t);
                }
                self.completed += 1;
                queue.push(now, EventKind::Completion { request: req });
            } else {
                still_running.push(req);
            }
        }
        self.running = still_running;

        if !self.running.is_empty() || !self.wait.is_empty() {
            let post = output_tokens as Ticks * self.oracle.output_token_processing_time();
            self.schedule_advance(queue, now + post);
        }
    }

    /// Tokens this request would process in the next step under the current
    /// budget: one for decode, the next chunk for prefill.
    fn next_chunk(&self, request: &Request, budget: usize) -> usize {
        if request.in_decode() {
            usize::from(budget >= 1)
        } else {
            let mut chunk = request.remaining_prefill().min(budget);
            if self.cfg.long_prefill_token_threshold > 0 {
                chunk = chunk.min(self.cfg.long_prefill_token_threshold);
            }
            chunk
        }
    }

    /// Preemption victim: lowest priority, then latest first-scheduled, then
    /// latest arrival.
    fn preemption_victim(&self) -> usize {
        assert!(!self.running.is_empty(), "preemption with an empty batch");
        let mut victim = 0;
        for idx in 1..self.running.len() {
            let (a, b) = (&self.running[idx], &self.running[victim]);
            let newer = (
                a.priority,
                std::cmp::Reverse(a.first_scheduled_time),
                std::cmp::Reverse(a.arrival_seq),
            ) < (
                b.priority,
                std::cmp::Reverse(b.first_scheduled_time),
                std::cmp::Reverse(b.arrival_seq),
            );
            if newer {
                victim = idx;
            }
        }
        victim
    }

    /// Evicts the request at `idx` from the running batch back into the wait
    /// queue. Generated output tokens are retained; the prompt re-prefills
    /// whatever prefix the cache no longer owns at re-admission.
    fn preempt(&mut self, idx: usize, now: Ticks, queue: &mut EventQueue) {
        let mut req = self.running.remove(idx);
        let held = std::mem::take(&mut req.kv_blocks);
        let transfers = self.kv.release(&held, now);
        for t in transfers {
            self.push_transfer(queue, t);
        }
        req.inputs_processed = 0;
        req.num_new_tokens = 0;
        req.state = RequestState::Preempted;
        req.preemptions += 1;
        self.preemptions += 1;
        queue.push(
            now,
            EventKind::Preemption {
                instance: self.id,
                request_id: req.id.clone(),
            },
        );
        self.wait.push(req);
    }

    fn batch_workload(&self) -> BatchWorkload {
        let mut workload = BatchWorkload::default();
        for req in &self.running {
            if req.num_new_tokens == 0 {
                continue;
            }
            workload.batch_size += 1;
            if req.in_decode() {
                workload.decode_tokens += req.num_new_tokens as u64;
                workload.context_tokens += req.progress_index() as u64;
            } else {
                workload.prefill_tokens += req.num_new_tokens as u64;
            }
        }
        workload
    }

    fn schedule_advance(&mut self, queue: &mut EventQueue, at: Ticks) {
        if self.in_step || self.advance_scheduled {
            return;
        }
        queue.push(at, EventKind::StepAdvance { instance: self.id });
        self.advance_scheduled = true;
    }

    fn push_transfer(&self, queue: &mut EventQueue, transfer: PendingTransfer) {
        queue.push(
            transfer.complete_at,
            EventKind::TransferComplete {
                instance: self.id,
                transfer: transfer.id,
            },
        );
    }

    /// Final per-instance aggregates.
    #[must_use]
    pub fn report(&self) -> InstanceReport {
        InstanceReport {
            instance: self.id,
            completed: self.completed,
            steps: self.steps_executed,
            preemptions: self.preemptions,
            hol_events: self.hol_events,
            queued_at_horizon: self.wait.len(),
            running_at_horizon: self.running.len(),
            kv: *self.kv.stats(),
            kv_utilization: self.kv.utilization(),
        }
    }

    /// KV accounting snapshot, used by invariant checks in tests.
    #[must_use]
    pub fn kv_accounting(&self) -> crate::kv::TierAccounting {
        self.kv.gpu_accounting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::tiered::TieredConfig;
    use crate::oracle::BlackboxOracle;
    use blis_config::SloClass;
    use blis_config::defaults::BlackboxCoefficients;

    const STEP_US: f64 = 1_000.0;

    fn flat_oracle() -> Box<dyn LatencyOracle> {
        Box::new(BlackboxOracle::new(BlackboxCoefficients {
            beta0: STEP_US,
            beta1: 0.0,
            beta2: 0.0,
            alpha0: 0.0,
            alpha1: 0.0,
            output_token_us: 0.0,
            scheduling_us: 0.0,
            preemption_us: 0.0,
        }))
    }

    fn instance(cfg: InstanceConfig, gpu_blocks: usize) -> InstanceSim {
        InstanceSim::new(
            0,
            cfg,
            SchedulerName::Fcfs,
            flat_oracle(),
            TieredKvStore::new(gpu_blocks, TieredConfig::default()),
        )
    }

    fn config() -> InstanceConfig {
        InstanceConfig {
            max_running: 8,
            max_scheduled_tokens: 2048,
            long_prefill_token_threshold: 0,
            block_size_tokens: 16,
            max_model_len: 8192,
        }
    }

    fn request(id: &str, input: usize, output: usize, seq: u64) -> Box<Request> {
        let tokens: Vec<u32> = (0..input as u32).map(|t| t.wrapping_mul(seq as u32 + 1)).collect();
        let mut r = Request::new(id, "c", "t", SloClass::Interactive, tokens, output, 0, seq);
        r.set_admission_time(0);
        r.set_routing_time(0);
        Box::new(r)
    }

    /// Drains the queue, driving one instance; returns completed requests in
    /// completion order.
    fn pump(instance: &mut InstanceSim, queue: &mut EventQueue) -> Vec<Request> {
        let mut completed = Vec::new();
        while let Some(event) = queue.pop() {
            match event.kind {
                EventKind::StepAdvance { .. } => instance.on_step_advance(queue),
                EventKind::StepComplete { step, .. } => instance.on_step_complete(step, queue),
                EventKind::TransferComplete { transfer, .. } => {
                    instance.on_transfer_complete(transfer, queue);
                }
                EventKind::Completion { request } => completed.push(*request),
                EventKind::Preemption { .. } => {}
                other => panic!("unexpected event in instance test: {other:?}"),
            }
        }
        completed
    }

    #[test]
    fn single_request_runs_prefill_then_decode() {
        let mut inst = instance(config(), 64);
        let mut queue = EventQueue::new();
        inst.on_inject(request("r0", 128, 4, 0), &mut queue);
        let done = pump(&mut inst, &mut queue);
        assert_eq!(done.len(), 1);
        let r = &done[0];
        // One prefill step (emits token 1) + three decode steps.
        assert_eq!(r.first_token_time, Some(1_000));
        assert_eq!(r.completion_time, Some(4_000));
        assert_eq!(r.outputs_generated, 4);
        // Released KV is cached, not leaked.
        assert!(inst.kv_accounting().balanced());
        assert_eq!(inst.kv_accounting().referenced, 0);
    }

    #[test]
    fn token_budget_chunks_long_prefills() {
        let cfg = InstanceConfig {
            max_scheduled_tokens: 100,
            ..config()
        };
        let mut inst = instance(cfg, 64);
        let mut queue = EventQueue::new();
        inst.on_inject(request("r0", 250, 1, 0), &mut queue);
        let done = pump(&mut inst, &mut queue);
        // ceil(250 / 100) = 3 prefill steps; the last one emits the only token.
        assert_eq!(done[0].first_token_time, Some(3_000));
        assert_eq!(done[0].completion_time, Some(3_000));
    }

    #[test]
    fn long_prefill_threshold_caps_chunks() {
        let cfg = InstanceConfig {
            long_prefill_token_threshold: 64,
            ..config()
        };
        let mut inst = instance(cfg, 64);
        let mut queue = EventQueue::new();
        inst.on_inject(request("r0", 256, 1, 0), &mut queue);
        let done = pump(&mut inst, &mut queue);
        // 256 tokens at 64 per chunk: four prefill steps.
        assert_eq!(done[0].first_token_time, Some(4_000));
    }

    #[test]
    fn max_running_one_forces_sequential_processing() {
        let cfg = InstanceConfig {
            max_running: 1,
            ..config()
        };
        let mut inst = instance(cfg, 64);
        let mut queue = EventQueue::new();
        inst.on_inject(request("a", 64, 2, 0), &mut queue);
        inst.on_inject(request("b", 64, 2, 1), &mut queue);
        let done = pump(&mut inst, &mut queue);
        assert_eq!(done.len(), 2);
        // a: steps at 1000, 2000; b runs only afterwards: 3000, 4000.
        assert_eq!(done[0].completion_time, Some(2_000));
        assert_eq!(done[1].completion_time, Some(4_000));
        assert_eq!(done[1].first_scheduled_time, Some(2_000));
    }

    #[test]
    fn kv_pressure_preempts_and_everyone_still_finishes() {
        // 12 blocks of 16 tokens: 192 token capacity. Both prompts fit at
        // admission (4 blocks each) but grow to 9 blocks by completion, so
        // decode eventually starves one of them out of the batch.
        let mut inst = instance(config(), 12);
        let mut queue = EventQueue::new();
        inst.on_inject(request("a", 64, 80, 0), &mut queue);
        inst.on_inject(request("b", 64, 80, 1), &mut queue);
        let done = pump(&mut inst, &mut queue);
        assert_eq!(done.len(), 2, "every admitted request completes");
        let total_preemptions: u32 = done.iter().map(|r| r.preemptions).sum();
        assert!(total_preemptions >= 1, "KV pressure must preempt");
        assert!(inst.kv_accounting().balanced());
    }

    #[test]
    fn oversized_requests_are_never_admitted() {
        let cfg = InstanceConfig {
            max_model_len: 100,
            ..config()
        };
        let mut inst = instance(cfg, 64);
        let mut queue = EventQueue::new();
        // 128 + 8 tokens exceed the context limit; 64 + 8 fit.
        inst.on_inject(request("too-big", 128, 8, 0), &mut queue);
        inst.on_inject(request("fits", 64, 8, 1), &mut queue);
        let done = pump(&mut inst, &mut queue);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, "fits");
        let report = inst.report();
        assert_eq!(report.queued_at_horizon, 1, "oversized request stays queued");
        assert!(inst.kv_accounting().balanced());
    }

    #[test]
    fn identical_prompts_hit_the_prefix_cache() {
        let mut inst = instance(config(), 64);
        let mut queue = EventQueue::new();
        inst.on_inject(request("a", 128, 2, 0), &mut queue);
        let first = pump(&mut inst, &mut queue);
        assert_eq!(first[0].kv_hit_blocks, 0);

        // Same token content arrives later: the full prompt is cached.
        inst.on_inject(request("b", 128, 2, 0), &mut queue);
        let second = pump(&mut inst, &mut queue);
        assert_eq!(second[0].kv_hit_blocks, 8);
    }

    #[test]
    fn preempted_requests_keep_generated_tokens() {
        let mut inst = instance(config(), 12);
        let mut queue = EventQueue::new();
        inst.on_inject(request("a", 64, 80, 0), &mut queue);
        inst.on_inject(request("b", 64, 80, 1), &mut queue);
        let done = pump(&mut inst, &mut queue);
        for r in &done {
            assert_eq!(r.outputs_generated, 80, "{} lost generated tokens", r.id);
        }
    }
}
