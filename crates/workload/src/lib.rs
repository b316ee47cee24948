// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Workload tooling for the BLIS simulator.
//!
//! - [`generate`]: turns a canonical workload spec into the arrival stream
//!   the driver primes its queue with. The stream is fully determined by the
//!   spec (including its seed) before the simulation starts.
//! - [`compose`]: merges several specs into one, re-normalizing client rate
//!   fractions.
//! - [`convert`]: translates external formats (ServeGen, CSV traces,
//!   presets, inference-perf) into the canonical spec.

pub mod compose;
pub mod convert;
pub mod error;
pub mod generate;

pub use compose::compose;
pub use error::Error;
pub use generate::build_stream;
