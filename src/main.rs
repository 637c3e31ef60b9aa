use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use snt_planner::assignment::conflicts::detect_conflicts;
use snt_planner::assignment::gate::{AssignmentGate, DroppedAssignment, GateOutcome};
use snt_planner::assignment::labels::{label_conflicts, LabeledConflict};
use snt_planner::assignment::sink::AssignmentSink;
use snt_planner::assignment::{
    name_org_units, parse_org_unit_list, parse_selection_map, AssignmentSubmission,
    ConflictDecision, ConflictKey, SelectionRequest,
};
use snt_planner::backends::Backends;
use snt_planner::budget::{budget_totals, merge_budgets_by_year, BudgetYear};
use snt_planner::catalog::{Catalog, InterventionPlan, ScenarioId};
use snt_planner::config::{Config, ConfigOverrides, SinkKind, SourceKind};
use snt_planner::output::csv::{budgets_to_csv, conflicts_to_csv};
use snt_planner::output::json::render_json;
use snt_planner::output::table::{
    render_budget_table, render_catalog_table, render_conflicts_table, render_plans_table,
    render_submission_table,
};
use snt_planner::server::run_server;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    Snapshot,
    Http,
    Sqlite,
}

impl From<SourceArg> for SourceKind {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::Snapshot => Self::Snapshot,
            SourceArg::Http => Self::Http,
            SourceArg::Sqlite => Self::Sqlite,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SinkArg {
    Sqlite,
    Http,
    Stdout,
}

impl From<SinkArg> for SinkKind {
    fn from(value: SinkArg) -> Self {
        match value {
            SinkArg::Sqlite => Self::Sqlite,
            SinkArg::Http => Self::Http,
            SinkArg::Stdout => Self::Stdout,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "snt-planner",
    about = "Intervention assignment checks and budget aggregation for SNT malaria planning"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    /// Snapshot file to read the catalog and existing assignments from.
    #[arg(short, long)]
    data: Option<String>,
    #[arg(long, value_enum)]
    source: Option<SourceArg>,
    #[arg(long, value_enum)]
    sink: Option<SinkArg>,
    #[arg(long = "base-url")]
    base_url: Option<String>,
    #[arg(short, long)]
    scenario: Option<i64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Args, Clone)]
struct SelectionArgs {
    /// Comma separated org unit ids, optionally `id=name`.
    #[arg(long = "org-units")]
    org_units: String,
    /// Comma separated `category=intervention` pairs.
    #[arg(long)]
    select: String,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Catalog,
    Plans,
    Check {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    Assign {
        #[command(flatten)]
        selection: SelectionArgs,
        /// Replace the existing assignment for `org_unit:category`.
        #[arg(long)]
        replace: Vec<String>,
        /// Keep the existing assignment for `org_unit:category`.
        #[arg(long)]
        keep: Vec<String>,
        #[arg(long = "replace-all", conflicts_with = "keep_all")]
        replace_all: bool,
        #[arg(long = "keep-all")]
        keep_all: bool,
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
    Budget {
        #[arg(long)]
        file: PathBuf,
    },
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

/// Accepts every submission without writing it.
struct DryRunSink;

#[async_trait]
impl AssignmentSink for DryRunSink {
    async fn submit(&self, submission: &AssignmentSubmission) -> Result<()> {
        info!(
            "dry run: would assign {} intervention(s) to {} org unit(s)",
            submission.intervention_ids.len(),
            submission.org_unit_ids.len()
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    config.apply_overrides(ConfigOverrides {
        snapshot_path: cli.data.clone(),
        source_kind: cli.source.map(Into::into),
        sink_kind: cli.sink.map(Into::into),
        base_url: cli.base_url.clone(),
    });
    let scenario = ScenarioId(cli.scenario.unwrap_or(config.planning.default_scenario));

    if let Commands::Config { init, show } = &cli.command {
        return handle_config_command(*init, *show, &config, &config_path);
    }
    if let Commands::Budget { file } = &cli.command {
        return handle_budget_command(file, cli.output);
    }

    let backends = Backends::from_config(&config)?;
    if let Commands::Serve { host, port } = &cli.command {
        let host = host.clone().unwrap_or_else(|| config.server.host.clone());
        let bind = format!("{host}:{}", port.unwrap_or(config.server.port));
        let addr: SocketAddr = bind
            .parse()
            .map_err(|e| anyhow!("invalid bind address {bind}: {e}"))?;
        return run_server(config, backends, addr).await;
    }

    let source = backends.source();
    match &cli.command {
        Commands::Catalog => {
            let catalog = source.fetch_catalog().await?;
            print_catalog(&catalog, cli.output)?;
        }
        Commands::Plans => {
            let catalog = source.fetch_catalog().await?;
            let plans = source.fetch_plans(scenario).await?;
            print_plans(&plans, &catalog, cli.output)?;
        }
        Commands::Check { selection } => {
            let (selection, existing) = load_selection(&backends, scenario, selection).await?;
            let catalog = source.fetch_catalog().await?;
            let conflicts = detect_conflicts(
                &selection.org_units,
                &selection.selected_interventions_by_category,
                &existing,
            );
            let labeled = label_conflicts(
                &conflicts,
                &selection.selected_interventions_by_category,
                &catalog,
            );
            if labeled.is_empty() && matches!(cli.output, OutputFormat::Table) {
                println!("No conflicts in scenario {scenario}.");
            } else {
                print_conflicts(&labeled, cli.output)?;
            }
        }
        Commands::Assign {
            selection,
            replace,
            keep,
            replace_all,
            keep_all,
            dry_run,
        } => {
            let (selection, existing) = load_selection(&backends, scenario, selection).await?;
            let catalog = source.fetch_catalog().await?;
            let decisions = parse_decisions(replace, keep)?;
            let bulk = if *replace_all {
                Some(ConflictDecision::ReplaceExisting)
            } else if *keep_all {
                Some(ConflictDecision::KeepExisting)
            } else {
                None
            };

            let dry_run_sink = DryRunSink;
            let sink: &dyn AssignmentSink = if *dry_run {
                &dry_run_sink
            } else {
                backends.mirror(&catalog, &selection.org_units).await?;
                backends.sink()
            };
            let selected = selection.selected_interventions_by_category.clone();

            let mut gate = AssignmentGate::new();
            let mut outcome = gate.request(scenario, selection, &existing, sink).await?;
            if let GateOutcome::AwaitingResolution(conflicts) = &outcome {
                for (key, decision) in &decisions {
                    gate.resolve(key.org_unit, key.category, *decision)?;
                }
                if let Some(decision) = bulk {
                    gate.resolve_remaining(decision)?;
                }
                let unresolved = gate.unresolved();
                if !unresolved.is_empty() {
                    let pending: Vec<_> = conflicts
                        .iter()
                        .filter(|c| unresolved.contains(&c.key()))
                        .cloned()
                        .collect();
                    print_conflicts(&label_conflicts(&pending, &selected, &catalog), cli.output)?;
                    bail!(
                        "{} conflict(s) need a decision: pass --replace or --keep with {}",
                        unresolved.len(),
                        join_keys(&unresolved)
                    );
                }
                outcome = gate.commit(sink).await?;
            }

            for line in describe_dropped(outcome.dropped(), &catalog) {
                eprintln!("{line}");
            }
            match outcome {
                GateOutcome::Committed { submission, .. } => {
                    print_submission(&submission, cli.output)?
                }
                GateOutcome::NothingToCommit { .. } => {
                    println!("Nothing to assign: no selected org unit is left to receive the selection.");
                }
                GateOutcome::AwaitingResolution(_) => {}
            }
        }
        Commands::Budget { .. } | Commands::Config { .. } | Commands::Serve { .. } => {}
    }

    Ok(())
}

fn handle_config_command(
    init: bool,
    show: bool,
    config: &Config,
    config_path: &Path,
) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if show || !init {
        println!("{}", render_json(config)?);
    }
    Ok(())
}

fn handle_budget_command(file: &Path, format: OutputFormat) -> Result<()> {
    let data = fs::read_to_string(file)
        .with_context(|| format!("failed reading budgets: {}", file.display()))?;
    let budgets: Vec<BudgetYear> = serde_json::from_str(&data)
        .with_context(|| format!("failed parsing budgets: {}", file.display()))?;
    let merged = merge_budgets_by_year(&budgets);
    let totals = budget_totals(&budgets);
    match format {
        OutputFormat::Table => println!("{}", render_budget_table(&merged, &totals)),
        OutputFormat::Json => println!(
            "{}",
            render_json(&serde_json::json!({ "budgets": merged, "totals": totals }))?
        ),
        OutputFormat::Csv => println!("{}", budgets_to_csv(&merged)?),
    }
    Ok(())
}

async fn load_selection(
    backends: &Backends,
    scenario: ScenarioId,
    args: &SelectionArgs,
) -> Result<(SelectionRequest, Vec<InterventionPlan>)> {
    let mut org_units = parse_org_unit_list(&args.org_units)?;
    if org_units.is_empty() {
        bail!("--org-units cannot be empty");
    }
    let selected = parse_selection_map(&args.select)?;
    if selected.is_empty() {
        bail!("--select cannot be empty");
    }
    let existing = backends.source().fetch_plans(scenario).await?;
    name_org_units(&mut org_units, &existing);
    Ok((SelectionRequest::new(org_units, selected), existing))
}

fn parse_decisions(
    replace: &[String],
    keep: &[String],
) -> Result<Vec<(ConflictKey, ConflictDecision)>> {
    let mut out = Vec::new();
    for (raw_keys, decision) in [
        (replace, ConflictDecision::ReplaceExisting),
        (keep, ConflictDecision::KeepExisting),
    ] {
        for raw in raw_keys {
            let key: ConflictKey = raw.trim().parse()?;
            if out.iter().any(|(existing, _)| *existing == key) {
                bail!("conflicting decisions for {key}");
            }
            out.push((key, decision));
        }
    }
    Ok(out)
}

fn join_keys(keys: &[ConflictKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_catalog(catalog: &Catalog, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_catalog_table(catalog)),
        OutputFormat::Json => println!("{}", render_json(catalog)?),
        OutputFormat::Csv => {
            warn!("CSV output for catalog not implemented, using JSON");
            println!("{}", render_json(catalog)?);
        }
    }
    Ok(())
}

fn print_plans(
    plans: &[InterventionPlan],
    catalog: &Catalog,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_plans_table(plans, catalog)),
        OutputFormat::Json => println!("{}", render_json(plans)?),
        OutputFormat::Csv => {
            warn!("CSV output for plans not implemented, using JSON");
            println!("{}", render_json(plans)?);
        }
    }
    Ok(())
}

fn print_conflicts(conflicts: &[LabeledConflict], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_conflicts_table(conflicts)),
        OutputFormat::Json => println!("{}", render_json(conflicts)?),
        OutputFormat::Csv => println!("{}", conflicts_to_csv(conflicts)?),
    }
    Ok(())
}

/// One line per district left out of the submission, naming every selected
/// intervention it will not receive.
fn describe_dropped(dropped: &[DroppedAssignment], catalog: &Catalog) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = None;
    for entry in dropped {
        let name = catalog
            .intervention(entry.intervention_id)
            .map(|i| i.name.clone())
            .unwrap_or_else(|| format!("intervention #{}", entry.intervention_id));
        let label = if entry.kept_existing {
            format!("{name} (kept existing)")
        } else {
            name
        };
        if current == Some(entry.org_unit.id) {
            if let Some(line) = lines.last_mut() {
                line.push_str(", ");
                line.push_str(&label);
            }
            continue;
        }
        current = Some(entry.org_unit.id);
        lines.push(format!(
            "Not assigned to {} ({}): {label}",
            entry.org_unit.name, entry.org_unit.id
        ));
    }
    lines
}

fn print_submission(submission: &AssignmentSubmission, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_submission_table(submission)),
        OutputFormat::Json => println!("{}", render_json(submission)?),
        OutputFormat::Csv => {
            warn!("CSV output for assignments not implemented, using JSON");
            println!("{}", render_json(submission)?);
        }
    }
    Ok(())
}
