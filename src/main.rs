// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! BLIS command-line interface.
//!
//! Subcommands: `run` (execute a simulation), `compose` (merge workload
//! specs), `convert` (translate external workload formats), `schema` (print
//! the JSON Schema of a config document). Stdout carries machine-parseable
//! results only; diagnostics go to stderr at the configured log level.

// The binary is the one place allowed to talk to stdout/stderr directly.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use blis_config::error::Error as ConfigError;
use blis_config::model::ModelResolver;
use blis_config::policy::{
    AdmissionName, PolicyBundle, PriorityName, RoutingName, SchedulerName, ScorerList,
};
use blis_config::simulation::{OracleName, SimulationConfig};
use blis_config::workload::WorkloadSpec;
use blis_config::{TraceLevel, defaults::DefaultsFile, hardware::HardwareConfig};
use blis_engine::driver::ClusterDriver;
use blis_engine::oracle::OracleSpec;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "blis", version, about = "Discrete-event simulator for LLM inference clusters")]
struct Cli {
    /// Diagnostic verbosity on stderr (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a simulation and print aggregated metrics as JSON.
    Run(Box<RunArgs>),
    /// Merge multiple workload specs into one.
    Compose(ComposeArgs),
    /// Translate an external workload format into the canonical spec.
    Convert(ConvertArgs),
    /// Print the JSON Schema of a configuration document.
    Schema(SchemaArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// Workload spec file (YAML or JSON).
    #[arg(long, conflicts_with = "preset")]
    workload: Option<PathBuf>,

    /// Preset workload name from the defaults file.
    #[arg(long, requires = "defaults")]
    preset: Option<String>,

    /// Simulation config file; flags below override individual fields.
    #[arg(long)]
    sim: Option<PathBuf>,

    /// Policy bundle file; flags below override individual fields.
    #[arg(long)]
    policies: Option<PathBuf>,

    /// Defaults file (model deployment defaults, presets, calibrations).
    #[arg(long)]
    defaults: Option<PathBuf>,

    /// Hardware config file (GPU peaks and MFU tables).
    #[arg(long)]
    hardware: Option<PathBuf>,

    /// Explicit model `config.json` path (skips cache and network).
    #[arg(long)]
    model_config: Option<PathBuf>,

    /// Cache directory for fetched model configs.
    #[arg(long)]
    model_cache_dir: Option<PathBuf>,

    /// GPU SKU override for the roofline oracle.
    #[arg(long)]
    gpu: Option<String>,

    /// Also write the results JSON to this file.
    #[arg(long)]
    results: Option<PathBuf>,

    /// Write the raw decision trace records to this file (JSON).
    #[arg(long)]
    trace_out: Option<PathBuf>,

    // --- simulation overrides ---
    /// Number of instances.
    #[arg(long)]
    num_instances: Option<usize>,
    /// Horizon in ticks (microseconds).
    #[arg(long)]
    horizon: Option<i64>,
    /// Driver RNG seed.
    #[arg(long)]
    seed: Option<u64>,
    /// GPU KV capacity per instance, in blocks.
    #[arg(long)]
    total_kv_blocks: Option<usize>,
    /// Tokens per KV block.
    #[arg(long)]
    block_size_tokens: Option<usize>,
    /// CPU KV capacity per instance, in blocks.
    #[arg(long)]
    kv_cpu_blocks: Option<usize>,
    /// GPU utilization fraction triggering offload.
    #[arg(long)]
    kv_offload_threshold: Option<f64>,
    /// Tier transfer bandwidth, blocks per tick.
    #[arg(long)]
    kv_transfer_bandwidth: Option<u64>,
    /// Fixed latency per tier transfer, ticks.
    #[arg(long)]
    kv_transfer_base_latency: Option<i64>,
    /// Max co-scheduled requests per step.
    #[arg(long)]
    max_running_reqs: Option<usize>,
    /// Max scheduled tokens per step.
    #[arg(long)]
    max_scheduled_tokens: Option<usize>,
    /// Prefill chunk cap (0 disables chunking).
    #[arg(long)]
    long_prefill_token_threshold: Option<usize>,
    /// Maximum model sequence length.
    #[arg(long)]
    max_model_len: Option<usize>,
    /// Admission stage latency, ticks.
    #[arg(long)]
    admission_latency: Option<i64>,
    /// Routing stage latency, ticks.
    #[arg(long)]
    routing_latency: Option<i64>,
    /// Latency oracle (blackbox, roofline).
    #[arg(long, value_enum)]
    oracle: Option<OracleArg>,
    /// Model id or HuggingFace repo.
    #[arg(long)]
    model: Option<String>,
    /// Tensor-parallel degree.
    #[arg(long)]
    tensor_parallel: Option<u32>,
    /// Decision-trace level (none, decisions).
    #[arg(long, value_enum)]
    trace_level: Option<TraceArg>,
    /// Alternatives recorded per routing decision.
    #[arg(long)]
    counterfactual_k: Option<usize>,
    /// Append a trace summary to the results.
    #[arg(long)]
    summarize_trace: bool,

    // --- policy overrides ---
    /// Admission policy (always-admit, reject-all, token-bucket).
    #[arg(long, value_enum)]
    admission: Option<AdmissionArg>,
    /// Routing policy (round-robin, least-loaded, always-busiest,
    /// prefix-affinity, weighted).
    #[arg(long, value_enum)]
    routing: Option<RoutingArg>,
    /// Priority policy (constant, slo-based, inverted-slo).
    #[arg(long, value_enum)]
    priority: Option<PriorityArg>,
    /// Scheduler (fcfs, priority-fcfs, sjf, reverse-priority).
    #[arg(long, value_enum)]
    scheduler: Option<SchedulerArg>,
    /// Weighted-routing scorers as `name:weight,...`.
    #[arg(long)]
    routing_scorers: Option<String>,
    /// Token-bucket capacity, tokens.
    #[arg(long)]
    token_bucket_capacity: Option<f64>,
    /// Token-bucket refill rate, tokens per second.
    #[arg(long)]
    token_bucket_refill_rate: Option<f64>,
}

#[derive(Debug, Parser)]
struct ComposeArgs {
    /// Input workload spec files.
    #[arg(required = true)]
    specs: Vec<PathBuf>,

    /// Output file; stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConvertFormat {
    Servegen,
    CsvTrace,
    Preset,
    InferencePerf,
}

#[derive(Debug, Parser)]
struct ConvertArgs {
    /// Input format.
    #[arg(long, value_enum)]
    format: ConvertFormat,

    /// Input file (ignored for `preset`).
    input: Option<PathBuf>,

    /// Preset name, for `--format preset`.
    #[arg(long)]
    preset_name: Option<String>,

    /// Defaults file, required for `--format preset`.
    #[arg(long)]
    defaults: Option<PathBuf>,

    /// Seed stamped into the converted spec.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Horizon for formats that do not carry one, in ticks.
    #[arg(long, default_value_t = 60_000_000)]
    horizon: i64,

    /// Request cap for formats that do not carry one.
    #[arg(long, default_value_t = 1000)]
    num_requests: usize,

    /// Output file; stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SchemaKind {
    Workload,
    Policies,
    Simulation,
    Hardware,
    Defaults,
}

#[derive(Debug, Parser)]
struct SchemaArgs {
    /// Which document schema to print.
    #[arg(value_enum)]
    kind: SchemaKind,
}

// clap's ValueEnum and the serde enums live in different crates; the small
// mirror enums below keep the CLI surface kebab-case without leaking clap
// into blis-config.
macro_rules! mirror_enum {
    ($name:ident -> $target:ident { $($variant:ident),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
        enum $name { $($variant),+ }
        impl From<$name> for $target {
            fn from(v: $name) -> $target {
                match v { $($name::$variant => $target::$variant),+ }
            }
        }
    };
}

mirror_enum!(OracleArg -> OracleName { Blackbox, Roofline });
mirror_enum!(TraceArg -> TraceLevel { None, Decisions });
mirror_enum!(AdmissionArg -> AdmissionName { AlwaysAdmit, RejectAll, TokenBucket });
mirror_enum!(RoutingArg -> RoutingName { RoundRobin, LeastLoaded, AlwaysBusiest, PrefixAffinity, Weighted });
mirror_enum!(PriorityArg -> PriorityName { Constant, SloBased, InvertedSlo });
mirror_enum!(SchedulerArg -> SchedulerName { Fcfs, PriorityFcfs, Sjf, ReversePriority });

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    match dispatch(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(command: Command) -> miette::Result<()> {
    match command {
        Command::Run(args) => run(*args),
        Command::Compose(args) => compose(args),
        Command::Convert(args) => convert(args),
        Command::Schema(args) => schema(args),
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> miette::Report {
    miette::Report::msg(format!("failed to write `{}`: {err}", path.display()))
}

fn run(args: RunArgs) -> miette::Result<()> {
    let mut sim: SimulationConfig = match &args.sim {
        Some(path) => blis_config::io::from_file(path).map_err(miette::Report::new)?,
        None => SimulationConfig::default(),
    };
    let mut bundle: PolicyBundle = match &args.policies {
        Some(path) => blis_config::io::from_file(path).map_err(miette::Report::new)?,
        None => PolicyBundle::default(),
    };
    apply_sim_overrides(&mut sim, &args);
    apply_policy_overrides(&mut bundle, &args).map_err(miette::Report::new)?;

    let defaults = match &args.defaults {
        Some(path) => Some(DefaultsFile::from_file(path).map_err(miette::Report::new)?),
        None => None,
    };

    let workload = load_workload(&args, defaults.as_ref()).map_err(miette::Report::new)?;
    let oracle_spec = resolve_oracle(&sim, &args, defaults.as_ref())?;

    let stream = blis_workload::build_stream(&workload).map_err(miette::Report::new)?;
    tracing::info!(requests = stream.len(), "workload stream built");

    let mut driver = ClusterDriver::new(sim, &bundle, &oracle_spec)
        .map_err(|e| miette::Report::msg(e.to_string()))?;
    driver
        .prime(stream)
        .map_err(|e| miette::Report::msg(e.to_string()))?;
    let output = driver.run();

    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| miette::Report::msg(format!("results serialization failed: {e}")))?;
    println!("{json}");
    if let Some(path) = &args.results {
        std::fs::write(path, &json).map_err(|e| io_error(path, &e))?;
    }
    if let Some(path) = &args.trace_out {
        let trace_json = serde_json::to_string_pretty(driver.trace().records())
            .map_err(|e| miette::Report::msg(format!("trace serialization failed: {e}")))?;
        std::fs::write(path, trace_json).map_err(|e| io_error(path, &e))?;
    }
    Ok(())
}

fn load_workload(
    args: &RunArgs,
    defaults: Option<&DefaultsFile>,
) -> Result<WorkloadSpec, ConfigError> {
    match (&args.workload, &args.preset) {
        (Some(path), _) => WorkloadSpec::from_file(path),
        (None, Some(name)) => {
            let defaults = defaults.ok_or_else(|| ConfigError::UnknownVariant {
                kind: "preset workload (no defaults file given)",
                name: name.clone(),
            })?;
            let spec = defaults.preset(name)?.clone();
            spec.validate()?;
            Ok(spec)
        }
        (None, None) => Err(ConfigError::InvalidConfiguration {
            errors: vec!["one of --workload or --preset is required".to_owned()],
        }),
    }
}

fn resolve_oracle(
    sim: &SimulationConfig,
    args: &RunArgs,
    defaults: Option<&DefaultsFile>,
) -> miette::Result<OracleSpec> {
    match sim.oracle {
        OracleName::Blackbox => {
            let coefficients = sim
                .model
                .as_deref()
                .zip(defaults)
                .and_then(|(model, defaults)| {
                    let entry = defaults.models.get(model)?;
                    let gpu = args.gpu.as_deref().unwrap_or(&entry.gpu);
                    defaults.calibration(model, sim.tensor_parallel, gpu, &entry.backend)
                })
                .map(|c| c.coefficients);
            if coefficients.is_none() && sim.model.is_some() {
                tracing::warn!(
                    model = sim.model.as_deref(),
                    "no trained calibration found; using built-in coefficients"
                );
            }
            Ok(OracleSpec::Blackbox(coefficients.unwrap_or_default()))
        }
        OracleName::Roofline => {
            let model_id = sim
                .model
                .as_deref()
                .ok_or_else(|| miette::Report::msg("oracle = roofline requires --model"))?;
            let hardware = match &args.hardware {
                Some(path) => HardwareConfig::from_file(path).map_err(miette::Report::new)?,
                None => {
                    return Err(miette::Report::msg(
                        "oracle = roofline requires --hardware",
                    ));
                }
            };
            let model_defaults = defaults.and_then(|d| d.models.get(model_id));
            let gpu_name = args
                .gpu
                .as_deref()
                .or(model_defaults.map(|d| d.gpu.as_str()))
                .ok_or_else(|| {
                    miette::Report::msg("oracle = roofline requires --gpu or a defaults entry")
                })?;
            let gpu = hardware.gpu(gpu_name).map_err(miette::Report::new)?.clone();

            let mut resolver = ModelResolver::new();
            resolver.explicit_path = args.model_config.clone();
            resolver.cache_dir = args.model_cache_dir.clone();
            let repo = model_defaults
                .and_then(|d| d.hf_repo.as_deref())
                .unwrap_or(model_id);
            let model = resolver.resolve(repo).map_err(miette::Report::new)?;
            Ok(OracleSpec::Roofline {
                model,
                gpu,
                tensor_parallel: sim.tensor_parallel,
            })
        }
    }
}

fn apply_sim_overrides(sim: &mut SimulationConfig, args: &RunArgs) {
    macro_rules! set {
        ($($field:ident),+ $(,)?) => {
            $(if let Some(v) = args.$field.clone() { sim.$field = v.into(); })+
        };
    }
    set!(
        num_instances,
        horizon,
        seed,
        total_kv_blocks,
        block_size_tokens,
        kv_cpu_blocks,
        kv_offload_threshold,
        kv_transfer_bandwidth,
        kv_transfer_base_latency,
        max_running_reqs,
        max_scheduled_tokens,
        long_prefill_token_threshold,
        max_model_len,
        admission_latency,
        routing_latency,
        oracle,
        tensor_parallel,
        trace_level,
        counterfactual_k,
    );
    if let Some(model) = &args.model {
        sim.model = Some(model.clone());
    }
    if args.summarize_trace {
        sim.summarize_trace = true;
    }
}

fn apply_policy_overrides(bundle: &mut PolicyBundle, args: &RunArgs) -> Result<(), ConfigError> {
    if let Some(v) = args.admission {
        bundle.admission = v.into();
    }
    if let Some(v) = args.routing {
        bundle.routing = v.into();
    }
    if let Some(v) = args.priority {
        bundle.priority = v.into();
    }
    if let Some(v) = args.scheduler {
        bundle.scheduler = v.into();
    }
    if let Some(list) = &args.routing_scorers {
        bundle.routing_scorers = list.parse::<ScorerList>()?.0;
    }
    if let Some(v) = args.token_bucket_capacity {
        bundle.token_bucket_capacity = v;
    }
    if let Some(v) = args.token_bucket_refill_rate {
        bundle.token_bucket_refill_rate = v;
    }
    Ok(())
}

fn compose(args: ComposeArgs) -> miette::Result<()> {
    let specs: Vec<WorkloadSpec> = args
        .specs
        .iter()
        .map(|p| WorkloadSpec::from_file(p))
        .collect::<Result<_, _>>()
        .map_err(miette::Report::new)?;
    let composed =
        blis_workload::compose(&specs).map_err(|e| miette::Report::msg(e.to_string()))?;
    emit_spec(&composed, args.output.as_deref())
}

fn convert(args: ConvertArgs) -> miette::Result<()> {
    let read_input = || -> miette::Result<String> {
        let path = args.input.as_ref().ok_or_else(|| {
            miette::Report::msg("this format requires an input file argument")
        })?;
        std::fs::read_to_string(path)
            .map_err(|e| miette::Report::msg(format!("failed to read `{}`: {e}", path.display())))
    };
    let spec = match args.format {
        ConvertFormat::Servegen => {
            blis_workload::convert::from_servegen(&read_input()?, args.horizon, args.num_requests)
        }
        ConvertFormat::CsvTrace => blis_workload::convert::from_csv_trace(&read_input()?, args.seed),
        ConvertFormat::InferencePerf => blis_workload::convert::from_inference_perf(&read_input()?),
        ConvertFormat::Preset => {
            let defaults_path = args
                .defaults
                .as_ref()
                .ok_or_else(|| miette::Report::msg("--format preset requires --defaults"))?;
            let defaults = DefaultsFile::from_file(defaults_path).map_err(miette::Report::new)?;
            let name = args
                .preset_name
                .as_deref()
                .ok_or_else(|| miette::Report::msg("--format preset requires --preset-name"))?;
            blis_workload::convert::from_preset(&defaults, name)
        }
    }
    .map_err(|e| miette::Report::msg(e.to_string()))?;
    emit_spec(&spec, args.output.as_deref())
}

fn emit_spec(spec: &WorkloadSpec, output: Option<&Path>) -> miette::Result<()> {
    let yaml = spec.to_yaml().map_err(miette::Report::new)?;
    match output {
        Some(path) => std::fs::write(path, yaml).map_err(|e| io_error(path, &e))?,
        None => println!("{yaml}"),
    }
    Ok(())
}

fn schema(args: SchemaArgs) -> miette::Result<()> {
    let schema = match args.kind {
        SchemaKind::Workload => schemars::schema_for!(WorkloadSpec),
        SchemaKind::Policies => schemars::schema_for!(PolicyBundle),
        SchemaKind::Simulation => schemars::schema_for!(SimulationConfig),
        SchemaKind::Hardware => schemars::schema_for!(HardwareConfig),
        SchemaKind::Defaults => schemars::schema_for!(DefaultsFile),
    };
    let json = serde_json::to_string_pretty(&schema)
        .map_err(|e| miette::Report::msg(format!("schema serialization failed: {e}")))?;
    println!("{json}");
    Ok(())
}
