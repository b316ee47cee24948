// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Discrete-event simulation engine for LLM inference clusters.
//!
//! The engine drives a multi-instance cluster through four coupled state
//! machines sharing one logical clock:
//! - the cluster-level admission/routing pipeline ([`cluster`]),
//! - the per-instance request lifecycle ([`request`]),
//! - the per-instance batch-formation and step loop ([`instance`]) —
//!   vLLM-style continuous batching with chunked prefill, preemption, and
//!   prefix caching,
//! - the tiered GPU+CPU KV cache with bounded-bandwidth transfers ([`kv`]).
//!
//! Control flow is event-driven: components never block; long operations are
//! represented as start/complete event pairs on the single priority queue
//! ([`clock`]). One logical executor processes one event at a time, which
//! makes every run bit-deterministic given `(inputs, seed)`.
//!
//! Time is logical, integer-valued, in microseconds ("ticks"). External I/O
//! happens strictly before the loop (config, workload build) and after it
//! (results dump); the hot loop is pure computation.

pub mod clock;
pub mod cluster;
pub mod driver;
pub mod error;
pub mod event;
pub mod instance;
pub mod kv;
pub mod metrics;
pub mod oracle;
pub mod policy;
pub mod request;
pub mod trace;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use blis_config::Ticks;

/// Index of an instance within the cluster.
pub type InstanceId = usize;
