// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Conversion of external workload formats into the canonical spec.
//!
//! Supported inputs:
//! - **ServeGen** JSON client lists,
//! - **CSV traces** (`arrival_us,input_tokens,output_tokens[,slo_class]`),
//!   summarized into per-class empirical clients,
//! - **presets** from the defaults file,
//! - **inference-perf** style YAML stage configs.
//!
//! Trace conversion is deliberately lossy: the canonical spec describes
//! distributions, so a trace becomes a rate plus per-class token means.

use crate::error::Error;
use blis_config::defaults::DefaultsFile;
use blis_config::workload::{
    ArrivalProcess, ClientSpec, LengthDistribution, WORKLOAD_SPEC_VERSION_V1, WorkloadSpec,
};
use blis_config::{SloClass, Ticks};
use serde::Deserialize;
use std::path::Path;

/// One ServeGen client entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServeGenClient {
    name: String,
    qps: f64,
    #[serde(default)]
    category: Option<String>,
    input_mean: f64,
    #[serde(default)]
    input_std: Option<f64>,
    output_mean: f64,
}

/// The subset of a ServeGen spec this converter understands.
#[derive(Debug, Deserialize)]
struct ServeGenSpec {
    #[serde(default)]
    seed: u64,
    clients: Vec<ServeGenClient>,
}

/// Converts a ServeGen JSON document.
pub fn from_servegen(json: &str, horizon: Ticks, num_requests: usize) -> Result<WorkloadSpec, Error> {
    let spec: ServeGenSpec =
        blis_config::io::from_json_str(json, Path::new("<servegen>"))?;
    if spec.clients.is_empty() {
        return Err(Error::EmptyConversion {
            source_kind: "servegen",
        });
    }
    let total_rate: f64 = spec.clients.iter().map(|c| c.qps).sum();
    let clients = spec
        .clients
        .iter()
        .map(|c| ClientSpec {
            id: c.name.clone(),
            tenant: None,
            rate_fraction: c.qps / total_rate,
            slo_class: match c.category.as_deref() {
                Some("batch") | Some("offline") => SloClass::Batch,
                _ => SloClass::Interactive,
            },
            arrival: ArrivalProcess::Poisson,
            input_tokens: match c.input_std {
                Some(std_dev) if std_dev > 0.0 => LengthDistribution::Gaussian {
                    mean: c.input_mean,
                    std_dev,
                },
                _ => LengthDistribution::Constant {
                    value: c.input_mean.round().max(1.0) as u64,
                },
            },
            output_tokens: LengthDistribution::Exponential { mean: c.output_mean },
        })
        .collect();
    finish(total_rate, spec.seed, horizon, num_requests, clients)
}

/// Converts a CSV trace. Each line is
/// `arrival_us,input_tokens,output_tokens[,slo_class]`; a header line is
/// skipped when the first field is not numeric.
pub fn from_csv_trace(csv: &str, seed: u64) -> Result<WorkloadSpec, Error> {
    struct Row {
        arrival: Ticks,
        input: u64,
        output: u64,
        slo: SloClass,
    }
    let mut rows: Vec<Row> = Vec::new();
    for (idx, line) in csv.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if idx == 0 && fields[0].parse::<Ticks>().is_err() {
            continue; // header
        }
        if fields.len() < 3 {
            return Err(Error::TraceParse {
                line: idx + 1,
                details: "expected arrival_us,input_tokens,output_tokens".to_owned(),
            });
        }
        let parse = |s: &str, what: &str| {
            s.parse::<u64>().map_err(|_| Error::TraceParse {
                line: idx + 1,
                details: format!("`{s}` is not a valid {what}"),
            })
        };
        rows.push(Row {
            arrival: parse(fields[0], "arrival tick")? as Ticks,
            input: parse(fields[1], "input token count")?,
            output: parse(fields[2], "output token count")?,
            slo: match fields.get(3).copied() {
                Some("batch") => SloClass::Batch,
                _ => SloClass::Interactive,
            },
        });
    }
    if rows.is_empty() {
        return Err(Error::EmptyConversion {
            source_kind: "csv-trace",
        });
    }
    rows.sort_by_key(|r| r.arrival);
    let span_ticks = rows.last().map_or(1, |r| r.arrival.max(1));
    let total_rate = rows.len() as f64 / (span_ticks as f64 / 1e6);

    let mut clients = Vec::new();
    for slo in [SloClass::Interactive, SloClass::Batch] {
        let of_class: Vec<&Row> = rows.iter().filter(|r| r.slo == slo).collect();
        if of_class.is_empty() {
            continue;
        }
        let mean = |f: fn(&Row) -> u64| {
            of_class.iter().map(|r| f(r) as f64).sum::<f64>() / of_class.len() as f64
        };
        clients.push(ClientSpec {
            id: format!("trace-{slo}"),
            tenant: None,
            rate_fraction: of_class.len() as f64 / rows.len() as f64,
            slo_class: slo,
            arrival: ArrivalProcess::Poisson,
            input_tokens: LengthDistribution::Exponential { mean: mean(|r| r.input).max(1.0) },
            output_tokens: LengthDistribution::Exponential { mean: mean(|r| r.output).max(1.0) },
        });
    }
    finish(
        total_rate,
        seed,
        span_ticks + 1,
        rows.len(),
        clients,
    )
}

/// Resolves a named preset from the defaults file.
pub fn from_preset(defaults: &DefaultsFile, name: &str) -> Result<WorkloadSpec, Error> {
    let spec = defaults.preset(name)?.clone();
    spec.validate()?;
    Ok(spec)
}

/// One inference-perf stage.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InferencePerfStage {
    rate: f64,
    duration_s: f64,
}

/// The subset of an inference-perf config this converter understands.
#[derive(Debug, Deserialize)]
struct InferencePerfSpec {
    #[serde(default)]
    seed: u64,
    prompt_tokens: u64,
    output_tokens: u64,
    stages: Vec<InferencePerfStage>,
}

/// Converts an inference-perf YAML document. Stages collapse into one
/// Poisson client at the rate-weighted mean rate over the total duration.
pub fn from_inference_perf(yaml: &str) -> Result<WorkloadSpec, Error> {
    let spec: InferencePerfSpec =
        blis_config::io::from_yaml_str(yaml, Path::new("<inference-perf>"))?;
    if spec.stages.is_empty() {
        return Err(Error::EmptyConversion {
            source_kind: "inference-perf",
        });
    }
    let total_duration: f64 = spec.stages.iter().map(|s| s.duration_s).sum();
    let total_requests: f64 = spec.stages.iter().map(|s| s.rate * s.duration_s).sum();
    let rate = total_requests / total_duration;
    let clients = vec![ClientSpec {
        id: "inference-perf".to_owned(),
        tenant: None,
        rate_fraction: 1.0,
        slo_class: SloClass::Interactive,
        arrival: ArrivalProcess::Poisson,
        input_tokens: LengthDistribution::Constant { value: spec.prompt_tokens.max(1) },
        output_tokens: LengthDistribution::Constant { value: spec.output_tokens.max(1) },
    }];
    finish(
        rate,
        spec.seed,
        (total_duration * 1e6).round() as Ticks,
        total_requests.round() as usize,
        clients,
    )
}

fn finish(
    rate: f64,
    seed: u64,
    horizon: Ticks,
    num_requests: usize,
    clients: Vec<ClientSpec>,
) -> Result<WorkloadSpec, Error> {
    let spec = WorkloadSpec {
        version: WORKLOAD_SPEC_VERSION_V1.to_owned(),
        rate,
        seed,
        horizon,
        num_requests: num_requests.max(1),
        clients,
    };
    spec.validate()?;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servegen_clients_map_onto_canonical_clients() {
        let json = r#"{
            "seed": 5,
            "clients": [
                {"name": "chat", "qps": 8.0, "input_mean": 120.0, "input_std": 30.0, "output_mean": 60.0},
                {"name": "jobs", "qps": 2.0, "category": "batch", "input_mean": 900.0, "output_mean": 300.0}
            ]
        }"#;
        let spec = from_servegen(json, 60_000_000, 500).expect("convert");
        assert_eq!(spec.rate, 10.0);
        assert_eq!(spec.clients.len(), 2);
        assert_eq!(spec.clients[0].rate_fraction, 0.8);
        assert_eq!(spec.clients[1].slo_class, SloClass::Batch);
        assert!(matches!(
            spec.clients[0].input_tokens,
            LengthDistribution::Gaussian { .. }
        ));
    }

    #[test]
    fn csv_trace_summarizes_per_class() {
        let csv = "arrival_us,input_tokens,output_tokens,slo_class\n\
                   0,100,10,interactive\n\
                   500000,300,30,batch\n\
                   1000000,200,20,interactive\n";
        let spec = from_csv_trace(csv, 9).expect("convert");
        // Three requests over one second.
        assert!((spec.rate - 3.0).abs() < 1e-9);
        assert_eq!(spec.clients.len(), 2);
        let interactive = &spec.clients[0];
        assert!((interactive.rate_fraction - 2.0 / 3.0).abs() < 1e-9);
        assert!(matches!(
            interactive.input_tokens,
            LengthDistribution::Exponential { mean } if (mean - 150.0).abs() < 1e-9
        ));
    }

    #[test]
    fn csv_trace_reports_bad_lines() {
        let err = from_csv_trace("0,abc,10\n", 0).expect_err("must fail");
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn inference_perf_stages_collapse_to_mean_rate() {
        let yaml = "prompt_tokens: 256\noutput_tokens: 64\nstages:\n  - rate: 10\n    duration_s: 30\n  - rate: 20\n    duration_s: 30\n";
        let spec = from_inference_perf(yaml).expect("convert");
        assert!((spec.rate - 15.0).abs() < 1e-9);
        assert_eq!(spec.num_requests, 900);
        assert_eq!(spec.horizon, 60_000_000);
    }

    #[test]
    fn preset_lookup_validates_the_spec() {
        let defaults = DefaultsFile::default();
        let err = from_preset(&defaults, "missing").expect_err("must fail");
        assert!(err.to_string().contains("missing"));
    }
}
