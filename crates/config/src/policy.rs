// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Policy bundle: named admission / routing / priority / scheduler selections
//! and their parameters.
//!
//! Each policy family is a small closed set of named variants. CLI flags
//! override bundle fields one by one; the resolved bundle is what the engine
//! sees.

use crate::error::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Admission policy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionName {
    /// Admit every arrival.
    #[default]
    AlwaysAdmit,
    /// Reject every arrival (pathology and control experiments).
    RejectAll,
    /// Token-bucket admission charged per input token.
    TokenBucket,
}

/// Routing policy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingName {
    /// Cyclic assignment.
    #[default]
    RoundRobin,
    /// Minimize queue depth + batch size + pending transfers.
    LeastLoaded,
    /// Maximize the same load measure (pathology study).
    AlwaysBusiest,
    /// Route to the instance with the longest KV prefix match.
    PrefixAffinity,
    /// Linear combination of named scorers.
    Weighted,
}

/// Priority policy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PriorityName {
    /// Every request gets the same priority.
    #[default]
    Constant,
    /// Priority derived from the SLO class (interactive above batch).
    SloBased,
    /// Inverted SLO priority (priority-inversion studies).
    InvertedSlo,
}

/// Wait-queue scheduler names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerName {
    /// First come, first served, by injection time.
    #[default]
    Fcfs,
    /// Priority first, injection time as tiebreak.
    PriorityFcfs,
    /// Shortest estimated remaining work first.
    Sjf,
    /// Inverted priority order (priority-inversion studies).
    ReversePriority,
}

/// Scorer names usable in weighted routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ScorerName {
    /// Penalizes instances with deeper wait queues.
    QueueDepth,
    /// Penalizes instances with fuller KV caches.
    KvUtilization,
    /// Penalizes instances with larger total load (queue + batch + transfers).
    LoadBalance,
    /// Rewards instances holding a longer prefix of the request.
    PrefixAffinity,
}

impl ScorerName {
    /// Parses a scorer name as it appears in `routing_scorers` lists.
    pub fn parse(name: &str) -> Result<Self, Error> {
        match name {
            "queue-depth" => Ok(ScorerName::QueueDepth),
            "kv-utilization" => Ok(ScorerName::KvUtilization),
            "load-balance" => Ok(ScorerName::LoadBalance),
            "prefix-affinity" => Ok(ScorerName::PrefixAffinity),
            other => Err(Error::UnknownVariant {
                kind: "routing scorer",
                name: other.to_owned(),
            }),
        }
    }
}

/// One weighted scorer in a weighted-routing ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScorerWeight {
    /// The scorer.
    pub scorer: ScorerName,
    /// Its linear weight.
    pub weight: f64,
}

/// A comma-separated `name:weight` scorer list, e.g.
/// `queue-depth:1.0,prefix-affinity:2.5`. This is the CLI-flag form of the
/// weighted-routing ensemble.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScorerList(pub Vec<ScorerWeight>);

impl FromStr for ScorerList {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut scorers = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, weight) = part.split_once(':').ok_or_else(|| Error::InvalidScorerSpec {
                spec: part.to_owned(),
                details: "expected `name:weight`".to_owned(),
            })?;
            let weight: f64 = weight.trim().parse().map_err(|_| Error::InvalidScorerSpec {
                spec: part.to_owned(),
                details: format!("`{}` is not a number", weight.trim()),
            })?;
            if !weight.is_finite() {
                return Err(Error::InvalidScorerSpec {
                    spec: part.to_owned(),
                    details: "weight must be finite".to_owned(),
                });
            }
            scorers.push(ScorerWeight {
                scorer: ScorerName::parse(name.trim())?,
                weight,
            });
        }
        if scorers.is_empty() {
            return Err(Error::InvalidScorerSpec {
                spec: s.to_owned(),
                details: "scorer list is empty".to_owned(),
            });
        }
        Ok(ScorerList(scorers))
    }
}

/// The resolved policy bundle handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(deny_unknown_fields)]
pub struct PolicyBundle {
    /// Admission policy selection.
    #[serde(default)]
    pub admission: AdmissionName,

    /// Token-bucket capacity, in tokens. Used when `admission = token-bucket`.
    #[serde(default = "default_token_bucket_capacity")]
    pub token_bucket_capacity: f64,

    /// Token-bucket refill rate, in tokens per second. Used when
    /// `admission = token-bucket`.
    #[serde(default)]
    pub token_bucket_refill_rate: f64,

    /// Routing policy selection.
    #[serde(default)]
    pub routing: RoutingName,

    /// Scorer ensemble for `routing = weighted`.
    #[serde(default)]
    pub routing_scorers: Vec<ScorerWeight>,

    /// Priority policy selection.
    #[serde(default)]
    pub priority: PriorityName,

    /// Wait-queue scheduler selection.
    #[serde(default)]
    pub scheduler: SchedulerName,
}

impl PolicyBundle {
    /// Returns one message per inconsistent option. Empty means valid.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.admission == AdmissionName::TokenBucket {
            if !self.token_bucket_capacity.is_finite() || self.token_bucket_capacity <= 0.0 {
                errors.push(format!(
                    "token_bucket_capacity must be a positive finite number, got {}",
                    self.token_bucket_capacity
                ));
            }
            if !self.token_bucket_refill_rate.is_finite() || self.token_bucket_refill_rate < 0.0 {
                errors.push(format!(
                    "token_bucket_refill_rate must be finite and not negative, got {}",
                    self.token_bucket_refill_rate
                ));
            }
        }
        if self.routing == RoutingName::Weighted && self.routing_scorers.is_empty() {
            errors.push("routing = weighted requires a non-empty routing_scorers list".to_owned());
        }
        for sw in &self.routing_scorers {
            if !sw.weight.is_finite() {
                errors.push(format!("routing_scorers weight for {:?} must be finite", sw.scorer));
            }
        }
        errors
    }
}

fn default_token_bucket_capacity() -> f64 {
    100_000.0
}
