// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the simulation engine.
//!
//! Only construction-time problems surface as `Result`s. Runtime invariant
//! violations (conservation, timestamp monotonicity, negative-time
//! scheduling) indicate engine bugs and panic instead; request-level
//! "failures" such as rejections or KV allocation pressure are ordinary
//! simulation outcomes recorded in metrics.

/// Errors raised while assembling a simulation from resolved configuration.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The resolved configuration cannot produce a runnable engine.
    #[error("engine configuration error: {details}")]
    Configuration {
        /// What was wrong.
        details: String,
    },

    /// The arrival stream was empty; there is nothing to simulate.
    #[error("the workload produced no arrivals before the horizon")]
    EmptyWorkload,
}
