//! KAS Config Observer
//!
//! Runs one observation pass over a cluster snapshot and prints the next
//! apiserver configuration, the emitted events and the ConfigMap mirror
//! rules. Optionally applies the mirror rules to the cluster.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use kas_config_observer::prelude::*;
use kube::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// KAS Config Observer
#[derive(Parser, Debug)]
#[command(name = "kas-config-observer")]
#[command(about = "Derive kube-apiserver arguments from cluster authentication state")]
#[command(version)]
struct Args {
    /// Multi-document YAML with the Authentication resource and ConfigMaps
    #[arg(long, env = "KAS_SNAPSHOT", required_unless_present = "print_crd")]
    snapshot: Option<PathBuf>,

    /// Previously committed configuration (YAML)
    #[arg(long, env = "KAS_EXISTING_CONFIG")]
    existing: Option<PathBuf>,

    /// Observer configuration file (YAML)
    #[arg(long, env = "KAS_OBSERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Enabled feature gate (repeatable)
    #[arg(long = "enable-gate", value_name = "GATE")]
    enabled_gates: Vec<String>,

    /// Disabled feature gate (repeatable)
    #[arg(long = "disable-gate", value_name = "GATE")]
    disabled_gates: Vec<String>,

    /// Behave as if no feature gate snapshot has been observed yet
    #[arg(long, default_value = "false")]
    gates_unobserved: bool,

    /// Report format
    #[arg(long, value_enum, env = "KAS_OUTPUT", default_value = "yaml")]
    output: OutputFormat,

    /// Apply the resulting mirror rules through the Kubernetes API
    #[arg(long, env = "KAS_APPLY_SYNC_RULES", default_value = "false")]
    apply_sync_rules: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Print CRD YAML and exit
    #[arg(long)]
    print_crd: bool,
}

/// Format of the report printed on stdout
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq)]
enum OutputFormat {
    /// YAML document
    #[default]
    Yaml,
    /// Pretty-printed JSON, the shape the apiserver operator persists
    Json,
}

/// Mirror rule as printed in the report
#[derive(Serialize)]
struct SyncRule {
    target: ResourceLocation,
    source: ResourceLocation,
}

/// Result of a pass as printed on stdout
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    changed: bool,
    config: PathTree,
    events: Vec<RecordedEvent>,
    sync_rules: Vec<SyncRule>,
    errors: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print_crd()?;
        return Ok(());
    }

    init_logging(&args)?;

    let config = match &args.config {
        Some(path) => ObserverConfig::load(path)
            .with_context(|| format!("Failed to load observer config {}", path.display()))?,
        None => ObserverConfig::default(),
    };

    let snapshot_path = args
        .snapshot
        .as_ref()
        .context("--snapshot is required")?;
    let lookup = ClusterSnapshot::load(snapshot_path)
        .with_context(|| format!("Failed to load snapshot {}", snapshot_path.display()))?;

    let existing = match &args.existing {
        Some(path) => load_existing(path)?,
        None => PathTree::new(),
    };

    let gates = FeatureGateTracker::new();
    if !args.gates_unobserved {
        gates.observe(FeatureGates::new(
            args.enabled_gates.iter().cloned(),
            args.disabled_gates.iter().cloned(),
        ));
    }

    let syncer = ResourceSyncController::new(&config.target_namespace);
    let recorder = (InMemoryRecorder::new(), LoggingRecorder);
    let registry = ObserverRegistry::with_defaults()
        .context("Failed to register observers")?
        .with_metrics(ObserverMetrics::new());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        observers = ?registry.names(),
        resources = lookup.len(),
        "Running observation pass"
    );

    let ctx = ObserverContext {
        lookup: &lookup,
        gates: &gates,
        syncer: &syncer,
        recorder: &recorder,
        config: &config,
    };
    let pass = registry.observe(&ctx, &existing);

    for (observer, e) in &pass.errors {
        error!(observer = %observer, error = %e, "Observation failed");
    }

    let report = Report {
        changed: pass.changed,
        events: recorder.0.events(),
        sync_rules: syncer
            .rules()
            .into_iter()
            .map(|(target, source)| SyncRule { target, source })
            .collect(),
        errors: pass
            .errors
            .iter()
            .map(|(observer, e)| format!("{}: {}", observer, e))
            .collect(),
        config: pass.config,
    };
    match args.output {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if !report.errors.is_empty() {
        bail!("{} observer error(s)", report.errors.len());
    }

    if args.apply_sync_rules {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        syncer
            .apply_config_map_rules(&client)
            .await
            .context("Failed to apply mirror rules")?;
        info!(rules = report.sync_rules.len(), "Applied mirror rules");
    }

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str().to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

fn load_existing(path: &Path) -> Result<PathTree> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read existing config {}", path.display()))?;
    if yaml.trim().is_empty() {
        return Ok(PathTree::new());
    }
    serde_yaml::from_str(&yaml)
        .with_context(|| format!("Failed to parse existing config {}", path.display()))
}

/// Print the CRD YAML for installation
fn print_crd() -> Result<()> {
    use kube::CustomResourceExt;

    let crd = Authentication::crd();
    let yaml = serde_yaml::to_string(&crd)?;
    println!("{}", yaml);

    Ok(())
}
