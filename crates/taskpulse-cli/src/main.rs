use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use taskpulse_adapters::column_map_for;
use taskpulse_core::SourceTool;
use taskpulse_pipeline::{AnalysisPipeline, KeywordTable, PipelineConfig, Summary, TaskFilter};
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "taskpulse")]
#[command(about = "Deadline punctuality diagnostics for accounting task exports")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest an export, summarize it and write the report set.
    Analyze {
        /// Source tool id or display name (see `taskpulse tools`).
        #[arg(long)]
        tool: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long = "client")]
        clients: Vec<String>,
        #[arg(long = "assignee")]
        assignees: Vec<String>,
        #[arg(long)]
        reports_dir: Option<PathBuf>,
        #[arg(long)]
        no_reports: bool,
        /// Print the summary as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Print the category assigned to each task name.
    Classify {
        #[arg(required = true)]
        names: Vec<String>,
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// List supported source tools and their required columns.
    Tools,
}

fn filter_from_args(clients: Vec<String>, assignees: Vec<String>) -> TaskFilter {
    let mut filter = TaskFilter::all();
    if !clients.is_empty() {
        filter = filter.with_clients(clients);
    }
    if !assignees.is_empty() {
        filter = filter.with_assignees(assignees);
    }
    filter
}

fn print_summary(summary: &Summary) {
    let mean_delay = summary
        .mean_delay_days
        .map(|d| format!("{d:.1}"))
        .unwrap_or_else(|| "N/A".to_string());
    println!(
        "tasks={} on_time={} late={} pending={} on_time_rate={:.1}% mean_delay_days={}",
        summary.total,
        summary.status_counts.on_time,
        summary.status_counts.late,
        summary.status_counts.pending,
        summary.on_time_rate,
        mean_delay
    );
    for row in &summary.by_assignee {
        let rate = row
            .on_time_rate
            .map(|r| format!("{r:.1}%"))
            .unwrap_or_else(|| "N/A".to_string());
        println!("  assignee {}: tasks={} on_time_rate={}", row.assignee, row.task_count, rate);
    }
    for row in &summary.late_by_category {
        println!("  late {}: {}", row.category, row.late_count);
    }
    for row in &summary.time_series {
        println!("  month {}: on_time_rate={:.1}%", row.month, row.on_time_rate);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::from_env();
    debug!(?config, "loaded configuration");

    match cli.command {
        Commands::Analyze {
            tool,
            input,
            clients,
            assignees,
            reports_dir,
            no_reports,
            json,
        } => {
            if let Some(dir) = reports_dir {
                config.reports_dir = dir;
            }
            let pipeline = AnalysisPipeline::new(config)?;
            let batch = pipeline.ingest_file(&input, &tool)?;
            let analysis = pipeline.analyze(&batch, &filter_from_args(clients, assignees));

            if json {
                let text = serde_json::to_string_pretty(&analysis.summary)
                    .context("serializing summary")?;
                println!("{text}");
            } else {
                println!(
                    "analysis complete: batch_id={} tool={} tasks={}",
                    batch.batch_id,
                    batch.source_tool.id(),
                    batch.tasks.len()
                );
                print_summary(&analysis.summary);
            }

            if !no_reports {
                let paths = pipeline.write_reports(&batch, &analysis)?;
                eprintln!("reports written to {}", paths.dir.display());
            }
        }
        Commands::Classify { names, rules } => {
            let table = match rules {
                Some(path) => KeywordTable::from_path(&path)
                    .with_context(|| format!("loading keyword rules {}", path.display()))?,
                None => config.load_keyword_table()?,
            };
            for name in names {
                println!("{}\t{}", table.classify(&name).as_str(), name);
            }
        }
        Commands::Tools => {
            for tool in SourceTool::ALL {
                println!("{} ({})", tool.id(), tool.display_name());
                for (field, header) in column_map_for(tool).pairs() {
                    println!("  {field:<15} <- {header}");
                }
            }
        }
    }

    Ok(())
}
