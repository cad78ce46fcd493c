//! CLI entrypoint for the memledger harness.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use memledger_core::{Filter, ReportSpec, render};
use memledger_harness::{ArtifactIndex, HarnessError, WorkloadOptions, run_workload};
use memledger_membrane::{
    Journal, JournalFormat, LibcBulk, Tracker, TrackerConfig, validate_journal_file,
};

/// Allocation bookkeeping demos and reports.
#[derive(Debug, Parser)]
#[command(name = "memledger-harness")]
#[command(about = "Runs the memledger workload and prints its ledgers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the workload and print summaries, a by-type report and the leak walk.
    Demo {
        /// Journal format: `text` or `jsonl`.
        #[arg(long)]
        format: Option<String>,
        /// Journal path (stderr if omitted).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Write an artifact index of the outputs here.
        #[arg(long)]
        index: Option<PathBuf>,
        /// Blocks deliberately leaked by the workload.
        #[arg(long, default_value_t = 2)]
        leak: usize,
    },
    /// Run the workload and print one ad-hoc report.
    Report {
        /// Comma-separated dimensions, e.g. `type,name`.
        #[arg(long, default_value = "type")]
        group_by: String,
        /// Exact-match filter `dimension=value`; repeatable.
        #[arg(long)]
        filter: Vec<String>,
    },
    /// Validate every line of a JSONL journal.
    ValidateJournal {
        path: PathBuf,
    },
}

const RUN_ID: &str = "memledger-demo";

fn demo(
    format: Option<String>,
    output: Option<PathBuf>,
    index: Option<PathBuf>,
    leak: usize,
) -> Result<(), HarnessError> {
    let mut config = TrackerConfig::from_env();
    if let Some(format) = format {
        config.journal_format = JournalFormat::from_str_loose(&format);
    }
    let journal = match &output {
        Some(path) => Journal::to_file(path, RUN_ID, config.journal_format)?,
        None => Journal::stderr(RUN_ID, config.journal_format),
    }
    .with_min_level(config.log_level);
    let mut tracker = Tracker::with_parts(config, LibcBulk, journal);

    let outcome = run_workload(
        &mut tracker,
        WorkloadOptions {
            leaks: leak,
            ..WorkloadOptions::default()
        },
    )?;
    println!("== types ==");
    println!("{}", tracker.print_types(None));
    println!("== files ==");
    println!("{}", tracker.print_files(None));
    let by_type = tracker.report(&ReportSpec::new().group_by(memledger_core::Dimension::Type));
    println!("== report: type ==");
    println!("{}", render::summary_table(&by_type.rows()));
    if let Some(delta) = &outcome.mesh_watch {
        println!("watch {}: {:+} byte(s)", delta.label, delta.delta);
    }

    let summary = tracker.teardown();
    println!(
        "allocations={} leaks={} leaked_bytes={} peak_bytes={} checksum={}",
        outcome.allocations,
        summary.leaks,
        summary.leaked_bytes,
        summary.heap.peak,
        outcome.checksum
    );
    // Leaked handles stay allocated until process exit.
    drop(outcome.leaked);

    if let Some(index_path) = index {
        let mut artifacts = ArtifactIndex::new(RUN_ID);
        if let Some(path) = &output {
            artifacts.add_file(path, "journal")?;
        }
        artifacts.write(&index_path)?;
        eprintln!(
            "wrote artifact index ({} entries) to {}",
            artifacts.artifacts.len(),
            index_path.display()
        );
    }
    Ok(())
}

fn report(group_by: &str, filters: &[String]) -> Result<(), HarnessError> {
    let mut spec = ReportSpec::new();
    spec.group_by = ReportSpec::parse_group_by(group_by)?;
    for f in filters {
        spec.filters.push(Filter::parse(f)?);
    }
    let mut tracker = Tracker::with_parts(TrackerConfig::from_env(), LibcBulk, Journal::discard());
    let outcome = run_workload(&mut tracker, WorkloadOptions::default())?;
    let tree = tracker.report(&spec);
    println!("{}", render::summary_table(&tree.rows()));
    println!("matched={}", tree.matched());
    drop(outcome.leaked);
    Ok(())
}

fn validate(path: &Path) -> Result<(), HarnessError> {
    let (lines, errors) = validate_journal_file(path)?;
    for e in &errors {
        eprintln!("line {}: {}: {}", e.line_number, e.field, e.message);
    }
    if errors.is_empty() {
        println!("{}: {lines} valid line(s)", path.display());
        Ok(())
    } else {
        Err(HarnessError::InvalidJournal {
            path: path.display().to_string(),
            count: errors.len(),
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Demo {
            format,
            output,
            index,
            leak,
        } => demo(format, output, index, leak)?,
        Command::Report { group_by, filter } => report(&group_by, &filter)?,
        Command::ValidateJournal { path } => validate(&path)?,
    }
    Ok(())
}
