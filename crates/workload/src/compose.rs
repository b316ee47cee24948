// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Workload composition: merge several specs into one.
//!
//! The composed spec offers the sum of the input rates; each client's rate
//! fraction is re-normalized so it contributes exactly the traffic it did in
//! its source spec. Composing a single spec is the identity (up to client
//! ordering).

use crate::error::Error;
use blis_config::workload::WorkloadSpec;
use std::collections::HashSet;

/// Merges validated specs into one canonical spec.
///
/// The composed seed and version come from the first spec; the horizon is
/// the maximum of the inputs and `num_requests` their sum. Client ids must
/// be unique across the inputs.
pub fn compose(specs: &[WorkloadSpec]) -> Result<WorkloadSpec, Error> {
    assert!(!specs.is_empty(), "compose of zero specs");
    for spec in specs {
        spec.validate()?;
    }

    let total_rate: f64 = specs.iter().map(|s| s.rate).sum();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut clients = Vec::new();
    for spec in specs {
        for client in &spec.clients {
            if !seen.insert(client.id.as_str()) {
                return Err(Error::DuplicateClient {
                    client: client.id.clone(),
                });
            }
            let mut merged = client.clone();
            merged.rate_fraction = client.rate_fraction * spec.rate / total_rate;
            clients.push(merged);
        }
    }

    let composed = WorkloadSpec {
        version: specs[0].version.clone(),
        rate: total_rate,
        seed: specs[0].seed,
        horizon: specs.iter().map(|s| s.horizon).max().unwrap_or(0),
        num_requests: specs.iter().map(|s| s.num_requests).sum(),
        clients,
    };
    composed.validate()?;
    Ok(composed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blis_config::workload::WORKLOAD_SPEC_VERSION_V1;
    use blis_config::workload::{ArrivalProcess, ClientSpec, LengthDistribution};
    use blis_config::SloClass;
    use pretty_assertions::assert_eq;

    fn client(id: &str, fraction: f64) -> ClientSpec {
        ClientSpec {
            id: id.to_owned(),
            tenant: None,
            rate_fraction: fraction,
            slo_class: SloClass::Interactive,
            arrival: ArrivalProcess::Poisson,
            input_tokens: LengthDistribution::Constant { value: 128 },
            output_tokens: LengthDistribution::Constant { value: 32 },
        }
    }

    fn spec(rate: f64, clients: Vec<ClientSpec>) -> WorkloadSpec {
        WorkloadSpec {
            version: WORKLOAD_SPEC_VERSION_V1.to_owned(),
            rate,
            seed: 7,
            horizon: 60_000_000,
            num_requests: 100,
            clients,
        }
    }

    #[test]
    fn composing_one_spec_is_the_identity() {
        let s = spec(10.0, vec![client("a", 0.4), client("b", 0.6)]);
        let composed = compose(std::slice::from_ref(&s)).expect("compose");
        assert_eq!(composed, s);
    }

    #[test]
    fn rates_add_and_fractions_renormalize() {
        let s1 = spec(10.0, vec![client("a", 1.0)]);
        let s2 = spec(30.0, vec![client("b", 0.5), client("c", 0.5)]);
        let composed = compose(&[s1, s2]).expect("compose");
        assert_eq!(composed.rate, 40.0);
        assert_eq!(composed.num_requests, 200);
        let fraction = |id: &str| {
            composed
                .clients
                .iter()
                .find(|c| c.id == id)
                .map(|c| c.rate_fraction)
                .expect("client present")
        };
        assert_eq!(fraction("a"), 0.25);
        assert_eq!(fraction("b"), 0.375);
        assert_eq!(fraction("c"), 0.375);
    }

    #[test]
    fn duplicate_client_ids_are_rejected() {
        let s1 = spec(10.0, vec![client("a", 1.0)]);
        let s2 = spec(10.0, vec![client("a", 1.0)]);
        let err = compose(&[s1, s2]).expect_err("must fail");
        assert!(err.to_string().contains("duplicate client id `a`"));
    }
}
