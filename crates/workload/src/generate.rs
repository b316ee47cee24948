// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Arrival-stream generation from the canonical workload spec.
//!
//! Each client gets an independent RNG derived from the spec seed and the
//! client's position, so adding a client never perturbs the streams of the
//! others. Per-client streams are generated to the horizon, merged by
//! arrival time, and truncated to `num_requests`; the merged order assigns
//! the stable arrival sequence numbers the engine uses as tiebreaks.

use crate::error::Error;
use blis_config::Ticks;
use blis_config::workload::{ArrivalProcess, ClientSpec, LengthDistribution, WorkloadSpec};
use blis_engine::request::Request;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Gamma, Normal};

/// Vocabulary size used for synthetic token ids. Only hashes matter.
const VOCAB: u32 = 32_000;

/// Golden-ratio increment decorrelating per-client seeds.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

struct PendingArrival {
    client_index: usize,
    per_client_seq: u64,
    arrival_time: Ticks,
    input_len: usize,
    output_len: usize,
}

/// Builds the full arrival stream for a validated spec.
pub fn build_stream(spec: &WorkloadSpec) -> Result<Vec<Request>, Error> {
    spec.validate()?;
    let mut arrivals: Vec<PendingArrival> = Vec::new();
    for (client_index, client) in spec.clients.iter().enumerate() {
        let mut rng = StdRng::seed_from_u64(
            spec.seed
                .wrapping_add(SEED_STRIDE.wrapping_mul(client_index as u64 + 1)),
        );
        arrivals.extend(client_arrivals(spec, client, client_index, &mut rng)?);
    }
    // Merge deterministically: time, then client order, then per-client seq.
    arrivals.sort_by_key(|a| (a.arrival_time, a.client_index, a.per_client_seq));
    arrivals.truncate(spec.num_requests);

    let mut token_rng = StdRng::seed_from_u64(spec.seed.wrapping_add(SEED_STRIDE));
    let requests = arrivals
        .into_iter()
        .enumerate()
        .map(|(seq, arrival)| {
            let client = &spec.clients[arrival.client_index];
            let tokens: Vec<u32> = (0..arrival.input_len)
                .map(|_| token_rng.random_range(0..VOCAB))
                .collect();
            Request::new(
                format!("{}-{}", client.id, arrival.per_client_seq),
                client.id.clone(),
                client.tenant.clone().unwrap_or_else(|| client.id.clone()),
                client.slo_class,
                tokens,
                arrival.output_len,
                arrival.arrival_time,
                seq as u64,
            )
        })
        .collect();
    Ok(requests)
}

fn client_arrivals(
    spec: &WorkloadSpec,
    client: &ClientSpec,
    client_index: usize,
    rng: &mut StdRng,
) -> Result<Vec<PendingArrival>, Error> {
    let rate_per_second = spec.rate * client.rate_fraction;
    let mean_gap_ticks = 1e6 / rate_per_second;
    let gen_err = |details: String| Error::Generation {
        client: client.id.clone(),
        details,
    };

    let mut arrivals = Vec::new();
    let mut t = 0.0f64;
    let mut per_client_seq = 0u64;
    loop {
        let gap = match client.arrival {
            ArrivalProcess::Poisson => {
                let exp = Exp::new(1.0 / mean_gap_ticks).map_err(|e| gen_err(e.to_string()))?;
                exp.sample(rng)
            }
            ArrivalProcess::Gamma { shape } => {
                let gamma = Gamma::new(shape, mean_gap_ticks / shape)
                    .map_err(|e| gen_err(e.to_string()))?;
                gamma.sample(rng)
            }
            ArrivalProcess::Constant => mean_gap_ticks,
        };
        t += gap;
        let arrival_time = t.round() as Ticks;
        if arrival_time >= spec.horizon || arrivals.len() >= spec.num_requests {
            break;
        }
        let input_len = sample_length(&client.input_tokens, rng);
        let output_len = sample_length(&client.output_tokens, rng);
        arrivals.push(PendingArrival {
            client_index,
            per_client_seq,
            arrival_time,
            input_len,
            output_len,
        });
        per_client_seq += 1;
    }
    Ok(arrivals)
}

fn sample_length(dist: &LengthDistribution, rng: &mut StdRng) -> usize {
    let sampled = match *dist {
        LengthDistribution::Gaussian { mean, std_dev } => match Normal::new(mean, std_dev) {
            Ok(normal) => normal.sample(rng),
            // std_dev 0 is legal in the spec but not for rand_distr.
            Err(_) => mean,
        },
        LengthDistribution::Exponential { mean } => match Exp::new(1.0 / mean) {
            Ok(exp) => exp.sample(rng),
            Err(_) => mean,
        },
        LengthDistribution::Constant { value } => value as f64,
    };
    sampled.round().max(1.0) as usize
}
