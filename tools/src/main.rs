//! recon-runner: headless reconciliation runner.
//!
//! Usage:
//!   recon-runner --config recon.json --internal internal.json --portal portal.json
//!   recon-runner --config recon.json --internal internal.json --portal portal.json \
//!                --db recon.db --periods 12 --tolerance 50 --json

use anyhow::Result;
use recon_core::{
    clock::SystemClock,
    compare::Tolerance,
    config::ReconConfig,
    fixture::{FixtureInternalClient, FixturePortalClient},
    report::RunReport,
    source::{ExternalPortalSource, InternalSystemSource},
    store::ReconStore,
    ReconEngine,
};
use std::collections::BTreeSet;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config_path = arg_value(&args, "--config");
    let internal_path = arg_value(&args, "--internal")
        .ok_or_else(|| anyhow::anyhow!("--internal <file> is required"))?;
    let portal_path = arg_value(&args, "--portal")
        .ok_or_else(|| anyhow::anyhow!("--portal <file> is required"))?;
    let db = arg_value(&args, "--db").unwrap_or(":memory:");
    let json_output = args.iter().any(|a| a == "--json");

    let config = match config_path {
        Some(path) => ReconConfig::load(path)?,
        None => {
            log::warn!("No --config given, using test defaults");
            ReconConfig::default_test()
        }
    };
    let periods = parse_arg(&args, "--periods", config.default_period_count);
    let tolerance = Tolerance::new(parse_arg(&args, "--tolerance", config.default_tolerance_minor))?;

    let internal = FixtureInternalClient::load(internal_path)?;
    let portal = FixturePortalClient::load(portal_path)?;
    let scope: Vec<String> = internal
        .entities()
        .into_iter()
        .chain(portal.entities())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if !json_output {
        println!("recon-runner");
        println!("  db:         {db}");
        println!("  entities:   {}", scope.len());
        println!("  periods:    {periods}");
        println!("  tolerance:  {}", tolerance.minor_units());
        println!();
    }

    let store = Arc::new(ReconStore::open(db)?);
    store.migrate()?;

    let engine = ReconEngine::new(
        config,
        scope,
        Arc::new(InternalSystemSource::new(internal)),
        Arc::new(ExternalPortalSource::new(portal)),
        store.clone(),
        Arc::new(SystemClock),
    )?;

    let report = engine.reconcile(periods, tolerance).await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, &store)?;
    }
    Ok(())
}

fn print_summary(report: &RunReport, store: &ReconStore) -> Result<()> {
    println!("=== Run {} ===", report.run_id);
    match (report.periods.first(), report.periods.last()) {
        (Some(first), Some(last)) => println!("  window:      {first} .. {last}"),
        _ => println!("  window:      (empty)"),
    }
    println!("  succeeded:   {}", report.succeeded);
    println!("  failed:      {}", report.failed);
    println!("  changed:     {}", report.changes.len());
    for change in &report.changes {
        let d = &change.divergence;
        println!(
            "    {:<9} {}  internal {} / portal {}  diff {}",
            change.transition.as_str(),
            d.id,
            d.internal_contribution,
            d.portal_contribution,
            d.contribution_difference,
        );
    }
    for failure in &report.failures {
        let kind = if failure.retryable { "transient" } else { "permanent" };
        println!("    FAILED    {} ({kind}): {}", failure.entity, failure.reason);
    }
    println!("  open total:  {}", store.open_divergence_count()?);
    Ok(())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    arg_value(args, flag)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
