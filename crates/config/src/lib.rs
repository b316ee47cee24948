// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration model for the BLIS cluster simulator.
//!
//! Data model:
//! - simulation config (engine knobs: KV sizing, batch limits, pipeline latencies)
//! - policy bundle (admission / routing / priority / scheduler selections)
//! - workload spec (versioned, canonical description of the synthetic arrival stream)
//! - hardware config (per-GPU peak compute / bandwidth / MFU tables)
//! - defaults file (model id -> deployment defaults, presets, trained calibrations)
//! - model config (HuggingFace-style `config.json`, resolved from path, cache, or HTTPS)
//!
//! All documents are serde + schemars modeled, deserialized from YAML or JSON,
//! and validated before the simulation loop starts. Validation failures name
//! the offending option.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod defaults;
pub mod error;
pub mod hardware;
pub mod io;
pub mod model;
pub mod policy;
pub mod simulation;
pub mod workload;

/// Simulated time is integer microseconds ("ticks").
pub type Ticks = i64;

/// The SLO class attached to every request. Drives priority assignment and
/// per-class metric partitioning.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum SloClass {
    /// Latency-sensitive traffic (chat, completion endpoints).
    Interactive,
    /// Throughput-oriented traffic (offline batch jobs).
    Batch,
}

impl SloClass {
    /// Stable label used in reports and trace records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SloClass::Interactive => "interactive",
            SloClass::Batch => "batch",
        }
    }
}

impl std::fmt::Display for SloClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision-trace verbosity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum TraceLevel {
    /// No decision trace is recorded.
    #[default]
    None,
    /// Record one trace entry per routing decision, with counterfactuals.
    Decisions,
}

impl TraceLevel {
    /// Whether any trace records should be captured.
    #[must_use]
    pub fn enabled(&self) -> bool {
        matches!(self, TraceLevel::Decisions)
    }
}
