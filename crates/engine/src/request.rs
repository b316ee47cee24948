// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! The simulated request and its lifecycle.
//!
//! A request is a unit of work: a prompt of `input_tokens` plus an
//! `output_tokens_target` to generate. Progress is tracked as
//! `inputs_processed + outputs_generated`; the sum is the request's KV
//! length. Timestamps are set exactly once, in causal order, and asserted
//! monotonic — a violation is an engine bug, not a workload property.

use crate::InstanceId;
use crate::kv::{BlockHash, BlockId, prefix_hashes};
use blis_config::{SloClass, Ticks};

/// Stable request identifier.
pub type RequestId = String;

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Queued at the cluster or in an instance wait queue.
    Waiting,
    /// In the running batch, processing prompt tokens.
    RunningPrefill,
    /// In the running batch, generating output tokens.
    RunningDecode,
    /// Evicted from a running batch; back in the wait queue.
    Preempted,
    /// All output tokens generated.
    Completed,
    /// Denied admission.
    Rejected,
}

impl RequestState {
    /// Stable label used in metrics and trace records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Waiting => "waiting",
            RequestState::RunningPrefill => "running_prefill",
            RequestState::RunningDecode => "running_decode",
            RequestState::Preempted => "preempted",
            RequestState::Completed => "completed",
            RequestState::Rejected => "rejected",
        }
    }
}

/// A simulated inference request.
#[derive(Debug, Clone)]
pub struct Request {
    /// Stable identifier.
    pub id: RequestId,
    /// Originating client.
    pub client_id: String,
    /// Tenant the client belongs to.
    pub tenant_id: String,
    /// SLO class driving priority and metric partitioning.
    pub slo_class: SloClass,
    /// Prompt token ids. Only length and content hash matter to the engine.
    pub input_tokens: Vec<u32>,
    /// How many tokens to generate.
    pub output_tokens_target: usize,

    /// Cluster arrival tick.
    pub arrival_time: Ticks,
    /// When the admission decision fired.
    pub admission_time: Option<Ticks>,
    /// When the routing decision fired.
    pub routing_time: Option<Ticks>,
    /// When the request landed in an instance wait queue.
    pub inject_time: Option<Ticks>,
    /// When the request first entered a running batch.
    pub first_scheduled_time: Option<Ticks>,
    /// When the prefill first completed (first output token).
    pub first_token_time: Option<Ticks>,
    /// When the last output token was generated.
    pub completion_time: Option<Ticks>,

    /// Lifecycle state.
    pub state: RequestState,
    /// Prompt tokens whose KV is materialized (cache hits included).
    pub inputs_processed: usize,
    /// Output tokens generated so far.
    pub outputs_generated: usize,
    /// Tokens scheduled for this request in the step being executed.
    pub num_new_tokens: usize,

    /// KV block ids currently held on the assigned instance.
    pub kv_blocks: Vec<BlockId>,
    /// Blocks satisfied from the prefix cache over the request lifetime.
    pub kv_hit_blocks: usize,
    /// How many times the request was preempted.
    pub preemptions: u32,
    /// Priority assigned by the priority policy at admission.
    pub priority: i32,
    /// Instance the request was routed to.
    pub assigned_instance: Option<InstanceId>,
    /// Arrival order tiebreaker for deterministic queue sorts.
    pub arrival_seq: u64,

    prev_token_time: Option<Ticks>,
    itl_total: Ticks,
    itl_gaps: u32,
    block_hashes: Vec<BlockHash>,
}

impl Request {
    /// A fresh request at the cluster boundary.
    #[must_use]
    pub fn new(
        id: impl Into<RequestId>,
        client_id: impl Into<String>,
        tenant_id: impl Into<String>,
        slo_class: SloClass,
        input_tokens: Vec<u32>,
        output_tokens_target: usize,
        arrival_time: Ticks,
        arrival_seq: u64,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            tenant_id: tenant_id.into(),
            slo_class,
            input_tokens,
            output_tokens_target,
            arrival_time,
            admission_time: None,
            routing_time: None,
            inject_time: None,
            first_scheduled_time: None,
            first_token_time: None,
            completion_time: None,
            state: RequestState::Waiting,
            inputs_processed: 0,
            outputs_generated: 0,
            num_new_tokens: 0,
            kv_blocks: Vec::new(),
            kv_hit_blocks: 0,
            preemptions: 0,
            priority: 0,
            assigned_instance: None,
            arrival_seq,
            prev_token_time: None,
            itl_total: 0,
            itl_gaps: 0,
            block_hashes: Vec::new(),
        }
    }

    /// Total KV length: prompt tokens processed plus outputs generated.
    #[must_use]
    pub fn progress_index(&self) -> usize {
        self.inputs_processed + self.outputs_generated
    }

    /// Prompt length plus generation target.
    #[must_use]
    pub fn total_tokens(&self) -> usize {
        self.input_tokens.len() + self.output_tokens_target
    }

    /// Prompt tokens still to prefill.
    #[must_use]
    pub fn remaining_prefill(&self) -> usize {
        self.input_tokens.len().saturating_sub(self.inputs_processed)
    }

    /// Estimated remaining work, used by the SJF scheduler.
    #[must_use]
    pub fn remaining_work(&self) -> usize {
        self.total_tokens().saturating_sub(self.progress_index())
    }

    /// Whether the prompt is fully prefilled and generation is under way.
    #[must_use]
    pub fn in_decode(&self) -> bool {
        self.inputs_processed >= self.input_tokens.len()
    }

    /// Whether every target token has been generated.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.in_decode() && self.outputs_generated >= self.output_tokens_target
    }

    /// Content hashes of the full prompt blocks, computed once per request.
    pub fn block_hashes(&mut self, block_size: usize) -> &[BlockHash] {
        if self.block_hashes.is_empty() && self.input_tokens.len() >= block_size {
            self.block_hashes = prefix_hashes(&self.input_tokens, block_size);
        }
        &self.block_hashes
    }

    /// Records the admission decision time.
    pub fn set_admission_time(&mut self, now: Ticks) {
        assert!(now >= self.arrival_time, "admission before arrival for {}", self.id);
        assert!(self.admission_time.is_none(), "admission set twice for {}", self.id);
        self.admission_time = Some(now);
    }

    /// Records the routing decision time.
    pub fn set_routing_time(&mut self, now: Ticks) {
        assert!(
            self.admission_time.is_some_and(|t| now >= t),
            "routing out of order for {}",
            self.id
        );
        self.routing_time = Some(now);
    }

    /// Records the wait-queue injection time.
    pub fn set_inject_time(&mut self, now: Ticks) {
        assert!(
            self.routing_time.is_some_and(|t| now >= t),
            "injection out of order for {}",
            self.id
        );
        self.inject_time = Some(now);
    }

    /// Records the first time the request entered a running batch.
    /// Subsequent admissions (after preemption) keep the first value.
    pub fn mark_first_scheduled(&mut self, now: Ticks) {
        if self.first_scheduled_time.is_none() {
            assert!(
                self.inject_time.is_some_and(|t| now >= t),
                "scheduling out of order for {}",
                self.id
            );
            self.first_scheduled_time = Some(now);
        }
    }

    /// Records prefill completion (first token).
    pub fn mark_first_token(&mut self, now: Ticks) {
        if self.first_token_time.is_none() {
            assert!(
                self.first_scheduled_time.is_some_and(|t| now >= t),
                "first token out of order for {}",
                self.id
            );
            self.first_token_time = Some(now);
        }
    }

    /// Accounts one generated output token at `now` for ITL tracking.
    pub fn record_output_token(&mut self, now: Ticks) {
        if let Some(prev) = self.prev_token_time {
            debug_assert!(now >= prev);
            self.itl_total += now - prev;
            self.itl_gaps += 1;
        }
        self.prev_token_time = Some(now);
    }

    /// Records completion of the last output token.
    pub fn mark_completed(&mut self, now: Ticks) {
        assert!(
            self.first_token_time.is_some_and(|t| now >= t),
            "completion out of order for {}",
            self.id
        );
        self.completion_time = Some(now);
        self.state = RequestState::Completed;
    }

    /// Mean gap between consecutive output tokens, if at least two were
    /// generated.
    #[must_use]
    pub fn itl_mean(&self) -> Option<f64> {
        if self.itl_gaps == 0 {
            None
        } else {
            Some(self.itl_total as f64 / f64::from(self.itl_gaps))
        }
    }

    /// Time to first token, once known.
    #[must_use]
    pub fn ttft(&self) -> Option<Ticks> {
        self.first_token_time.map(|t| t - self.arrival_time)
    }

    /// End-to-end latency, once known.
    #[must_use]
    pub fn e2e(&self) -> Option<Ticks> {
        self.completion_time.map(|t| t - self.arrival_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        Request::new(
            "r0",
            "client",
            "tenant",
            SloClass::Interactive,
            vec![1; 64],
            16,
            1_000,
            0,
        )
    }

    #[test]
    fn progress_tracks_inputs_and_outputs() {
        let mut r = request();
        assert_eq!(r.remaining_work(), 80);
        r.inputs_processed = 64;
        r.outputs_generated = 5;
        assert_eq!(r.progress_index(), 69);
        assert!(r.in_decode());
        assert!(!r.is_finished());
        r.outputs_generated = 16;
        assert!(r.is_finished());
    }

    #[test]
    fn timestamps_progress_in_causal_order() {
        let mut r = request();
        r.set_admission_time(1_500);
        r.set_routing_time(1_700);
        r.set_inject_time(1_700);
        r.mark_first_scheduled(2_000);
        r.mark_first_token(9_000);
        r.mark_completed(20_000);
        assert_eq!(r.ttft(), Some(8_000));
        assert_eq!(r.e2e(), Some(19_000));
    }

    #[test]
    #[should_panic(expected = "routing out of order")]
    fn routing_before_admission_panics() {
        let mut r = request();
        r.set_routing_time(1_200);
    }

    #[test]
    fn itl_averages_decode_gaps() {
        let mut r = request();
        r.record_output_token(10_000);
        r.record_output_token(10_400);
        r.record_output_token(11_000);
        assert_eq!(r.itl_mean(), Some(500.0));
    }

    #[test]
    fn block_hashes_cover_only_full_blocks() {
        let mut r = request();
        // 64 tokens at block size 16 -> 4 full blocks.
        assert_eq!(r.block_hashes(16).len(), 4);
        let mut short = Request::new(
            "r1",
            "c",
            "t",
            SloClass::Batch,
            vec![1; 10],
            4,
            0,
            1,
        );
        assert!(short.block_hashes(16).is_empty());
    }
}
