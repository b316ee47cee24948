// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Test support: deterministic request streams and oracle parameterizations
//! shared by unit and integration tests.

use crate::request::Request;
use blis_config::SloClass;
use blis_config::Ticks;
use blis_config::defaults::BlackboxCoefficients;

/// Deterministic token content: `content_seed` fully determines the prompt,
/// so two requests with the same seed and length share every prefix block.
#[must_use]
pub fn tokens(content_seed: u32, len: usize) -> Vec<u32> {
    (0..len as u32)
        .map(|i| i.wrapping_mul(2_654_435_761).wrapping_add(content_seed))
        .collect()
}

/// One request with deterministic content.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn request(
    id: impl Into<String>,
    slo_class: SloClass,
    content_seed: u32,
    input_len: usize,
    output_len: usize,
    arrival_time: Ticks,
    arrival_seq: u64,
) -> Request {
    Request::new(
        id,
        "test-client",
        "test-tenant",
        slo_class,
        tokens(content_seed, input_len),
        output_len,
        arrival_time,
        arrival_seq,
    )
}

/// A constant-size, constant-interval stream with distinct prompt contents.
#[must_use]
pub fn constant_stream(
    count: usize,
    input_len: usize,
    output_len: usize,
    interval: Ticks,
    start: Ticks,
) -> Vec<Request> {
    (0..count)
        .map(|i| {
            request(
                format!("r{i}"),
                SloClass::Interactive,
                i as u32 + 1,
                input_len,
                output_len,
                start + interval * i as Ticks,
                i as u64,
            )
        })
        .collect()
}

/// Coefficients where one step costs exactly `step_us` and every overhead is
/// zero, making latency arithmetic exact in tests.
#[must_use]
pub fn flat_coefficients(step_us: f64) -> BlackboxCoefficients {
    BlackboxCoefficients {
        beta0: step_us,
        beta1: 0.0,
        beta2: 0.0,
        alpha0: 0.0,
        alpha1: 0.0,
        output_token_us: 0.0,
        scheduling_us: 0.0,
        preemption_us: 0.0,
    }
}
