use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use fedtypes_api::{CrudReport, CrudTester, FederatedTypeDescriptor, KindRegistry, Settings};
use fedtypes_store::{MemoryStore, StoreClient};
use metrics::counter;
use serde::Serialize;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "fedctl", version, about = "Federated types: registered kinds and conformance runs")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered federated kinds
    Kinds,
    /// Run the CRUD conformance tester for one or all kinds
    Conformance {
        /// Only this kind (default: every registered kind)
        #[arg(long = "kind")]
        kind: Option<String>,
        /// Use the in-memory store instead of a cluster
        #[arg(long = "memory", action = ArgAction::SetTrue)]
        memory: bool,
        /// Namespace for test objects
        #[arg(long = "ns", env = "FEDTYPES_NAMESPACE")]
        namespace: Option<String>,
        /// Kubeconfig context of the federation API server
        #[arg(long = "context", env = "FEDTYPES_FEDERATION_CONTEXT")]
        context: Option<String>,
        /// Per-event watch timeout in seconds (default: FEDTYPES_WATCH_TIMEOUT_SECS)
        #[arg(long = "timeout")]
        timeout_secs: Option<u64>,
    },
}

#[derive(Serialize)]
struct KindRow {
    kind: &'static str,
    controller: &'static str,
    resources: Vec<String>,
    scheduling: bool,
}

#[derive(Serialize)]
struct ConformanceRow {
    kind: String,
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<CrudReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn init_tracing() {
    let env = std::env::var("FEDTYPES_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FEDTYPES_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid FEDTYPES_METRICS_ADDR; expected host:port");
        }
    }
}

/// Flags win over `FEDTYPES_*`; empty or zero flags leave the env value in place.
fn with_overrides(mut settings: Settings, namespace: Option<String>, context: Option<String>, timeout_secs: Option<u64>) -> Settings {
    if let Some(ns) = namespace.filter(|s| !s.is_empty()) { settings.namespace = ns; }
    if let Some(ctx) = context.filter(|s| !s.is_empty()) { settings.federation_context = Some(ctx); }
    if let Some(secs) = timeout_secs.filter(|s| *s > 0) { settings.watch_timeout = Duration::from_secs(secs); }
    settings
}

fn resource_keys(d: &FederatedTypeDescriptor) -> Vec<String> {
    d.resource_locations
        .iter()
        .map(|r| if r.group.is_empty() { format!("{}/{}", r.version, r.resource) } else { format!("{}/{}/{}", r.group, r.version, r.resource) })
        .collect()
}

fn print_kinds(registry: &KindRegistry, output: Output) -> Result<()> {
    // A throwaway memory client is enough to ask an adapter whether it schedules.
    let probe: StoreClient = MemoryStore::new().into();
    let rows: Vec<KindRow> = registry
        .all()
        .map(|d| KindRow {
            kind: d.kind,
            controller: d.controller_name,
            resources: resource_keys(d),
            scheduling: (d.constructor)(probe.clone()).scheduling().is_some(),
        })
        .collect();
    match output {
        Output::Human => {
            for r in rows {
                let sched = if r.scheduling { "scheduled" } else { "-" };
                println!("{} • {} • {} • {}", r.kind, r.controller, r.resources.join(","), sched);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
    }
    Ok(())
}

async fn run_conformance(registry: &KindRegistry, client: StoreClient, kinds: Vec<String>, settings: &Settings) -> Vec<ConformanceRow> {
    let mut rows = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let adapter = match registry.instantiate(&kind, client.clone()) {
            Ok(a) => a,
            Err(e) => {
                rows.push(ConformanceRow { kind, passed: false, report: None, error: Some(e.to_string()) });
                continue;
            }
        };
        let tester = CrudTester::new(adapter, settings.namespace.clone(), settings.watch_timeout);
        match tester.run().await {
            Ok(report) => {
                counter!("fedtypes_conformance_runs_total", 1u64, "result" => "passed");
                rows.push(ConformanceRow { kind, passed: true, report: Some(report), error: None });
            }
            Err(e) => {
                counter!("fedtypes_conformance_runs_total", 1u64, "result" => "failed");
                error!(kind = %kind, error = ?e, "conformance run failed");
                rows.push(ConformanceRow { kind, passed: false, report: None, error: Some(format!("{:#}", e)) });
            }
        }
    }
    rows
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let registry = KindRegistry::builtin().context("registering federated types")?;

    match cli.command {
        Commands::Kinds => print_kinds(&registry, cli.output)?,
        Commands::Conformance { kind, memory, namespace, context, timeout_secs } => {
            let settings = with_overrides(Settings::from_env(), namespace, context, timeout_secs);
            info!(kind = ?kind, memory, ns = %settings.namespace, context = ?settings.federation_context, "conformance invoked");

            let client: StoreClient = if memory {
                MemoryStore::with_watch_capacity(settings.memory_watch_cap).into()
            } else {
                fedtypes_store::connect(settings.federation_context.as_deref()).await?
            };
            let kinds: Vec<String> = match kind {
                Some(k) => vec![k],
                None => registry.all().map(|d| d.kind.to_string()).collect(),
            };

            let rows = tokio::select! {
                rows = run_conformance(&registry, client, kinds, &settings) => rows,
                _ = signal::ctrl_c() => {
                    warn!("Ctrl-C received; abandoning conformance run");
                    bail!("interrupted");
                }
            };
            let failed = rows.iter().filter(|r| !r.passed).count();
            match cli.output {
                Output::Human => {
                    for r in &rows {
                        match (&r.report, &r.error) {
                            (Some(rep), _) => {
                                let total: u64 = rep.steps.iter().map(|s| s.millis).sum();
                                println!("PASS {} • {} • {} steps • {}ms", r.kind, rep.object, rep.steps.len(), total);
                            }
                            (None, Some(e)) => println!("FAIL {} • {}", r.kind, e),
                            (None, None) => println!("FAIL {}", r.kind),
                        }
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
            if failed > 0 {
                bail!("{} of {} kinds failed conformance", failed, rows.len());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_timeout_env_does_not_reach_clap() {
        std::env::set_var("FEDTYPES_WATCH_TIMEOUT_SECS", "soon");
        let cli = Cli::try_parse_from(["fedctl", "conformance", "--memory"]).expect("parse");
        let Commands::Conformance { timeout_secs, .. } = cli.command else { panic!("expected conformance") };
        assert_eq!(timeout_secs, None);
        let settings = with_overrides(Settings::from_lookup(|k| std::env::var(k).ok()), None, None, timeout_secs);
        assert_eq!(settings.watch_timeout, Duration::from_secs(fedtypes_api::settings::DEFAULT_WATCH_TIMEOUT_SECS));
        std::env::remove_var("FEDTYPES_WATCH_TIMEOUT_SECS");
    }

    #[test]
    fn flags_override_settings() {
        let base = Settings::default();
        let s = with_overrides(base.clone(), Some("team-a".into()), Some("fed".into()), Some(5));
        assert_eq!(s.namespace, "team-a");
        assert_eq!(s.federation_context.as_deref(), Some("fed"));
        assert_eq!(s.watch_timeout, Duration::from_secs(5));
        assert_eq!(with_overrides(base.clone(), Some(String::new()), None, Some(0)), base);
    }
}
