//! CLI entry point for the netdrift differential scanner.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use netdrift_core::DriftConfig;
use netdrift_diff::{flatten, tabulate, DiffOptions, FlatTable};
use netdrift_scan::executor::{normalize_run, NmapExecutor};
use netdrift_scan::nmap_xml::parse_nmap_xml;
use netdrift_scan::orchestrator::{JobState, Orchestrator};
use netdrift_scan::report::{self, DiffRequest, DiffResult, ImportedRun, SnapshotMeta};
use netdrift_store::{SnapshotQuery, SnapshotStore, SqliteStore};

#[derive(Parser)]
#[command(name = "netdrift")]
#[command(about = "Differential network scanner: snapshot, store, diff")]
struct Cli {
    /// Config file prefix (default: netdrift).
    #[arg(short, long, default_value = "netdrift")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a target and persist one snapshot per host found up.
    Scan {
        /// Target to scan: IP address, CIDR range, or hostname.
        target: String,

        /// Scan profile name.
        #[arg(short, long, default_value = "standard")]
        profile: String,
    },

    /// List stored snapshots.
    Snapshots {
        /// Filter by host address.
        #[arg(long)]
        host: Option<String>,

        /// Filter by profile name.
        #[arg(long)]
        profile: Option<String>,

        /// Window start (RFC 3339).
        #[arg(long)]
        from: Option<String>,

        /// Window end (RFC 3339).
        #[arg(long)]
        to: Option<String>,

        /// Only snapshots with at least one port in this state.
        #[arg(long)]
        port_state: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Report drift between stored snapshots.
    Diff {
        /// Filter by host address.
        #[arg(long)]
        host: Option<String>,

        /// Filter by profile name.
        #[arg(long)]
        profile: Option<String>,

        /// Window start (RFC 3339).
        #[arg(long)]
        from: Option<String>,

        /// Window end (RFC 3339).
        #[arg(long)]
        to: Option<String>,

        /// Explicit snapshot UUIDs: give two to diff a pair, more to
        /// diff them as a window.
        #[arg(long = "uuid")]
        uuids: Vec<Uuid>,

        /// Cap on the number of diffs reported.
        #[arg(long)]
        max_diffs: Option<usize>,

        /// Print raw diff trees as JSON instead of flattened tables.
        #[arg(long)]
        json: bool,
    },

    /// Diff two or more nmap XML files without touching the store.
    Import {
        /// XML files in chronological order, oldest first.
        files: Vec<PathBuf>,

        /// Print raw diff trees as JSON instead of flattened tables.
        #[arg(long)]
        json: bool,
    },

    /// List stored scan profiles.
    Profiles,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = DriftConfig::load(&cli.config)?;
    let store = Arc::new(SqliteStore::open(&config.db_path)?);

    match cli.command {
        Command::Scan { target, profile } => run_scan(store, config, &target, &profile).await,
        Command::Snapshots {
            host,
            profile,
            from,
            to,
            port_state,
            limit,
        } => list_snapshots(
            store.as_ref(),
            SnapshotQuery {
                host,
                profile,
                from: parse_time(from.as_deref())?,
                to: parse_time(to.as_deref())?,
                port_state,
                limit,
                ..Default::default()
            },
        ),
        Command::Diff {
            host,
            profile,
            from,
            to,
            uuids,
            max_diffs,
            json,
        } => {
            let options = diff_options(&config);
            if uuids.len() == 2 {
                let result =
                    report::diff_pair(store.as_ref(), &options, uuids[0], uuids[1])?;
                match result {
                    Some(result) => print_diffs(&[result], json)?,
                    None => println!("Snapshots are identical."),
                }
                Ok(())
            } else {
                let request = DiffRequest {
                    host,
                    profile,
                    from: parse_time(from.as_deref())?,
                    to: parse_time(to.as_deref())?,
                    uuids: (!uuids.is_empty()).then_some(uuids),
                    max_diffs,
                    ..Default::default()
                };
                let results =
                    report::diff_stored(store.as_ref(), &options, &request, config.max_diffs)?;
                if results.is_empty() {
                    println!("No drift found.");
                }
                print_diffs(&results, json)
            }
        }
        Command::Import { files, json } => {
            let results = run_import(&config, &files)?;
            if results.is_empty() {
                println!("No drift between the given files.");
            }
            print_diffs(&results, json)
        }
        Command::Profiles => list_profiles(store.as_ref()),
    }
}

async fn run_scan(
    store: Arc<SqliteStore>,
    config: DriftConfig,
    target: &str,
    profile: &str,
) -> anyhow::Result<()> {
    let executor = NmapExecutor::new(&config.nmap_path);
    let version = executor.verify_installation().await?;
    tracing::info!(nmap_version = %version.trim(), "Nmap verified");

    let orchestrator = Orchestrator::new(store, Arc::new(executor), config);
    let mut handle = orchestrator.submit(target, profile)?;
    let job = handle.job.clone();

    let progress = tokio::spawn(async move {
        while let Some(event) = handle.events.recv().await {
            tracing::info!(event = ?event, "Scan progress");
        }
    });

    orchestrator.run().await;
    progress.await?;

    for outcome in orchestrator.outcomes() {
        println!(
            "Scanned {} with profile {}: {} snapshot(s) at {}",
            outcome.target,
            outcome.profile,
            outcome.snapshots.len(),
            outcome.finished_at.to_rfc3339(),
        );
        for snapshot in &outcome.snapshots {
            println!("  {}  {}", snapshot.uuid, snapshot.host);
        }
    }

    let failed = orchestrator
        .jobs()
        .into_iter()
        .any(|j| j.name == job && j.state == JobState::Failed);
    if failed {
        anyhow::bail!("Scan job {job} failed; see the log for details");
    }
    Ok(())
}

fn list_snapshots(store: &dyn SnapshotStore, query: SnapshotQuery) -> anyhow::Result<()> {
    let snapshots = store.get_filtered(&query)?;
    for snapshot in &snapshots {
        println!(
            "{}  {}  {:<15}  {:<10}  {}",
            snapshot.created_at.to_rfc3339(),
            snapshot.uuid,
            snapshot.host,
            snapshot.profile,
            &snapshot.content_hash[..12.min(snapshot.content_hash.len())],
        );
    }
    println!("{} snapshot(s)", snapshots.len());
    Ok(())
}

fn list_profiles(store: &dyn SnapshotStore) -> anyhow::Result<()> {
    for profile in store.list_profiles()? {
        println!(
            "{:<12}  {}  {}",
            profile.name,
            profile.created_at.to_rfc3339(),
            profile.arguments,
        );
    }
    Ok(())
}

fn run_import(config: &DriftConfig, files: &[PathBuf]) -> anyhow::Result<Vec<DiffResult>> {
    let mut runs = Vec::with_capacity(files.len());
    for path in files {
        let xml = std::fs::read(path)?;
        let run = parse_nmap_xml(&xml)?;
        runs.push(ImportedRun {
            arguments: run.args.clone(),
            hosts: normalize_run(&run),
        });
    }
    Ok(report::diff_imported(&diff_options(config), &runs)?)
}

fn diff_options(config: &DriftConfig) -> DiffOptions {
    DiffOptions::with_ignore(config.ignore_fields.iter().map(String::as_str))
}

fn parse_time(raw: Option<&str>) -> anyhow::Result<Option<DateTime<Utc>>> {
    match raw {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| anyhow::anyhow!("Invalid RFC 3339 timestamp {s}: {e}")),
    }
}

fn print_diffs(results: &[DiffResult], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    for result in results {
        println!(
            "host {}: {} -> {}",
            result.newer.host,
            side_label(&result.older),
            side_label(&result.newer),
        );
        print_table(&tabulate(flatten(&result.tree)));
        println!();
    }
    Ok(())
}

fn side_label(meta: &SnapshotMeta) -> String {
    match (&meta.uuid, &meta.created_at) {
        (Some(uuid), Some(at)) => format!("{} ({})", uuid, at.to_rfc3339()),
        _ => meta
            .arguments
            .clone()
            .unwrap_or_else(|| "imported".to_string()),
    }
}

/// Render a flattened diff as a fixed-width table: one column per path
/// depth plus change kind and old/new values.
fn print_table(table: &FlatTable) {
    if table.rows.is_empty() {
        return;
    }

    let mut headers: Vec<String> = vec!["change".to_string()];
    headers.extend((1..=table.depth).map(|i| format!("field_{i}")));
    headers.push("old".to_string());
    headers.push("new".to_string());

    let mut widths: Vec<usize> = headers.iter().map(String::len).collect();
    for row in &table.rows {
        widths[0] = widths[0].max(row.kind.to_string().len());
        for (i, segment) in row.path.iter().enumerate() {
            widths[i + 1] = widths[i + 1].max(segment.len());
        }
        widths[table.depth + 1] = widths[table.depth + 1].max(row.from.len());
        widths[table.depth + 2] = widths[table.depth + 2].max(row.to.len());
    }

    let line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{h:<w$}"))
        .collect();
    println!("{}", line.join("  "));

    for row in &table.rows {
        let mut cells: Vec<String> = vec![format!("{:<w$}", row.kind.to_string(), w = widths[0])];
        for (i, segment) in row.path.iter().enumerate() {
            cells.push(format!("{segment:<w$}", w = widths[i + 1]));
        }
        cells.push(format!("{:<w$}", row.from, w = widths[table.depth + 1]));
        cells.push(format!("{:<w$}", row.to, w = widths[table.depth + 2]));
        println!("{}", cells.join("  ").trim_end());
    }
}
