// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Hardware profiles: per-GPU peak compute, peak memory bandwidth, and MFU
//! lookup tables consumed by the roofline oracle.

use crate::error::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One row of an MFU lookup table: achieved model-FLOPs utilization at a
/// batched-token operating point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MfuEntry {
    /// Total batched tokens (prefill + decode) in the step.
    pub batched_tokens: u64,
    /// Achieved MFU at this operating point, within (0, 1].
    pub mfu: f64,
}

/// Peak numbers and the MFU table for one GPU SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GpuProfile {
    /// Peak dense compute in TFLOPs (half precision).
    pub peak_tflops: f64,
    /// Peak HBM bandwidth in GB/s.
    pub peak_hbm_gbps: f64,
    /// MFU table, sorted ascending by `batched_tokens`. Lookup takes the
    /// entry with the largest `batched_tokens` not exceeding the query, or
    /// the first entry for smaller queries.
    pub mfu_table: Vec<MfuEntry>,
}

impl GpuProfile {
    /// MFU achieved at the given batched-token count.
    #[must_use]
    pub fn mfu_at(&self, batched_tokens: u64) -> f64 {
        let mut mfu = self.mfu_table.first().map_or(0.5, |e| e.mfu);
        for entry in &self.mfu_table {
            if entry.batched_tokens <= batched_tokens {
                mfu = entry.mfu;
            } else {
                break;
            }
        }
        mfu
    }

    fn validation_errors(&self, name: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.peak_tflops.is_finite() || self.peak_tflops <= 0.0 {
            errors.push(format!("gpus.{name}.peak_tflops must be positive and finite"));
        }
        if !self.peak_hbm_gbps.is_finite() || self.peak_hbm_gbps <= 0.0 {
            errors.push(format!("gpus.{name}.peak_hbm_gbps must be positive and finite"));
        }
        if self.mfu_table.is_empty() {
            errors.push(format!("gpus.{name}.mfu_table must not be empty"));
        }
        for (i, entry) in self.mfu_table.iter().enumerate() {
            if !(0.0..=1.0).contains(&entry.mfu) || entry.mfu == 0.0 {
                errors.push(format!("gpus.{name}.mfu_table[{i}].mfu must be within (0, 1]"));
            }
        }
        for pair in self.mfu_table.windows(2) {
            if pair[0].batched_tokens >= pair[1].batched_tokens {
                errors.push(format!(
                    "gpus.{name}.mfu_table must be strictly ascending by batched_tokens"
                ));
                break;
            }
        }
        errors
    }
}

/// The hardware config document: GPU SKU name -> profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(deny_unknown_fields)]
pub struct HardwareConfig {
    /// All known GPU profiles.
    #[serde(default)]
    pub gpus: BTreeMap<String, GpuProfile>,
}

impl HardwareConfig {
    /// Loads and validates a hardware config from a YAML or JSON file.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let cfg: HardwareConfig = crate::io::from_file(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates every profile.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        for (name, profile) in &self.gpus {
            errors.extend(profile.validation_errors(name));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration { errors })
        }
    }

    /// Looks up a GPU profile by SKU name.
    pub fn gpu(&self, name: &str) -> Result<&GpuProfile, Error> {
        self.gpus.get(name).ok_or_else(|| Error::UnknownVariant {
            kind: "gpu profile",
            name: name.to_owned(),
        })
    }
}
