// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for workload generation and conversion.

use miette::Diagnostic;

/// Errors raised while generating, composing, or converting workloads.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// A config-layer error (spec validation, preset lookup, IO).
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] blis_config::error::Error),

    /// A distribution could not be instantiated from the spec parameters.
    #[error("workload generation error for client `{client}`: {details}")]
    #[diagnostic(code(blis_workload::generation_error))]
    Generation {
        /// The client whose parameters failed.
        client: String,
        /// What went wrong.
        details: String,
    },

    /// Two specs being composed collide on a client id.
    #[error("compose: duplicate client id `{client}` across input specs")]
    #[diagnostic(code(blis_workload::duplicate_client))]
    DuplicateClient {
        /// The colliding id.
        client: String,
    },

    /// A CSV trace line could not be parsed.
    #[error("trace line {line}: {details}")]
    #[diagnostic(code(blis_workload::trace_parse_error))]
    TraceParse {
        /// 1-indexed line number.
        line: usize,
        /// What was wrong with it.
        details: String,
    },

    /// A conversion input was structurally empty.
    #[error("conversion produced no clients from {source_kind} input")]
    #[diagnostic(code(blis_workload::empty_conversion))]
    EmptyConversion {
        /// The input format.
        source_kind: &'static str,
    },
}
