//! Report set for one analysed batch: CSV export, summary, brief and snapshots.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::types::Date32Type;
use arrow_array::{Date32Array, RecordBatch, StringArray, UInt32Array};
use arrow_csv::WriterBuilder;
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use taskpulse_core::{CanonicalTask, TaskBatch};
use tracing::{info, info_span};
use uuid::Uuid;

use crate::diagnosis::DiagnosisPrompt;
use crate::summary::TaskFilter;
use crate::Analysis;

const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct ReportManifest {
    pub schema_version: u32,
    pub batch_id: Uuid,
    pub source_tool: String,
    pub task_count: usize,
    pub files: Vec<ReportManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub dir: PathBuf,
    pub tasks_csv: PathBuf,
    pub summary_json: PathBuf,
    pub brief_md: PathBuf,
    pub diagnosis_prompt_md: PathBuf,
    pub tasks_parquet: PathBuf,
    pub manifest: PathBuf,
}

fn tasks_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("task_id", DataType::Utf8, false),
        Field::new("task_name", DataType::Utf8, false),
        Field::new("client", DataType::Utf8, false),
        Field::new("assignee", DataType::Utf8, false),
        Field::new("due_date", DataType::Date32, true),
        Field::new("completed_date", DataType::Date32, true),
        Field::new("source_tool", DataType::Utf8, false),
        Field::new("category", DataType::Utf8, true),
        Field::new("deadline_status", DataType::Utf8, true),
        Field::new("delay_days", DataType::UInt32, true),
        Field::new("completion_month", DataType::Utf8, true),
    ]))
}

fn text_column(tasks: &[CanonicalTask], field: fn(&CanonicalTask) -> &str) -> StringArray {
    StringArray::from_iter_values(tasks.iter().map(field))
}

/// One row per task, canonical field names as columns.
pub fn tasks_record_batch(tasks: &[CanonicalTask]) -> Result<RecordBatch> {
    let months = tasks
        .iter()
        .map(|t| t.completion_month().map(|m| m.to_string()))
        .collect::<Vec<_>>();

    RecordBatch::try_new(
        tasks_schema(),
        vec![
            Arc::new(text_column(tasks, |t| t.task_id.as_str())),
            Arc::new(text_column(tasks, |t| t.task_name.as_str())),
            Arc::new(text_column(tasks, |t| t.client.as_str())),
            Arc::new(text_column(tasks, |t| t.assignee.as_str())),
            Arc::new(Date32Array::from(
                tasks
                    .iter()
                    .map(|t| t.due_date.map(Date32Type::from_naive_date))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(Date32Array::from(
                tasks
                    .iter()
                    .map(|t| t.completed_date.map(Date32Type::from_naive_date))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(text_column(tasks, |t| t.source_tool.id())),
            Arc::new(StringArray::from(
                tasks
                    .iter()
                    .map(|t| t.category.map(|c| c.as_str()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                tasks
                    .iter()
                    .map(|t| t.deadline_status().map(|s| s.as_str()))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(UInt32Array::from(
                tasks.iter().map(CanonicalTask::delay_days).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                months.iter().map(Option::as_deref).collect::<Vec<_>>(),
            )),
        ],
    )
    .context("building tasks record batch")
}

/// CSV export of a task set; absent values are empty cells.
pub fn tasks_csv_bytes(tasks: &[CanonicalTask]) -> Result<Vec<u8>> {
    let batch = tasks_record_batch(tasks)?;
    let mut writer = WriterBuilder::new().with_header(true).build(Vec::new());
    writer.write(&batch).context("writing tasks CSV")?;
    Ok(writer.into_inner())
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn percent(rate: f64) -> String {
    format!("{rate:.1}%")
}

fn describe_filter(filter: &TaskFilter) -> String {
    let part = |label: &str, values: &Option<std::collections::BTreeSet<String>>| match values {
        None => format!("all {label}"),
        Some(values) if values.is_empty() => format!("no {label}"),
        Some(values) => format!(
            "{label}: {}",
            values.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
        ),
    };
    format!("{}; {}", part("clients", &filter.clients), part("assignees", &filter.assignees))
}

pub fn render_brief(batch: &TaskBatch, analysis: &Analysis) -> String {
    let summary = &analysis.summary;
    let counts = summary.status_counts;
    let mean_delay = summary
        .mean_delay_days
        .map(|d| format!("{d:.1} days"))
        .unwrap_or_else(|| "N/A".to_string());

    let mut lines = vec![
        "# Task Punctuality Brief".to_string(),
        String::new(),
        format!("- Batch ID: `{}`", batch.batch_id),
        format!("- Source tool: {}", batch.source_tool),
        format!("- Ingested: {}", batch.ingested_at.to_rfc3339()),
        format!("- Filter: {}", describe_filter(&analysis.filter)),
        format!("- Tasks: {}", summary.total),
        format!("- On time: {} ({})", counts.on_time, percent(summary.on_time_rate)),
        format!("- Late: {}", counts.late),
        format!("- Pending: {}", counts.pending),
        format!("- Mean delay: {mean_delay}"),
        String::new(),
        "## By Assignee".to_string(),
    ];

    if summary.by_assignee.is_empty() {
        lines.push("- none".to_string());
    } else {
        lines.push("| Assignee | Tasks | On-time rate |".to_string());
        lines.push("|---|---|---|".to_string());
        for row in &summary.by_assignee {
            lines.push(format!(
                "| {} | {} | {} |",
                row.assignee,
                row.task_count,
                row.on_time_rate.map(percent).unwrap_or_else(|| "N/A".to_string())
            ));
        }
    }

    lines.push(String::new());
    lines.push("## Late Tasks by Category".to_string());
    if summary.late_by_category.is_empty() {
        lines.push("- none".to_string());
    }
    for row in &summary.late_by_category {
        lines.push(format!("- {}: {}", row.category, row.late_count));
    }

    lines.push(String::new());
    lines.push("## Monthly On-time Rate".to_string());
    if summary.time_series.is_empty() {
        lines.push("- none".to_string());
    } else {
        lines.push("| Month | Completed | On-time rate |".to_string());
        lines.push("|---|---|---|".to_string());
        for row in &summary.time_series {
            lines.push(format!(
                "| {} | {} | {} |",
                row.month,
                row.settled_count,
                percent(row.on_time_rate)
            ));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

fn manifest_entry(name: &str, report_dir: &Path, path: &Path) -> Result<ReportManifestFile> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(report_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ReportManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

fn write_file(path: &Path, bytes: impl AsRef<[u8]>) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

/// Writes `<reports_root>/<batch_id>/` and returns the paths written.
pub fn write_reports(
    reports_root: &Path,
    batch: &TaskBatch,
    analysis: &Analysis,
    prompt: &DiagnosisPrompt,
) -> Result<ReportPaths> {
    let span = info_span!("write_reports", batch_id = %batch.batch_id);
    let _guard = span.enter();

    let dir = reports_root.join(batch.batch_id.to_string());
    let snapshot_dir = dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let paths = ReportPaths {
        tasks_csv: dir.join("tasks.csv"),
        summary_json: dir.join("summary.json"),
        brief_md: dir.join("brief.md"),
        diagnosis_prompt_md: dir.join("diagnosis_prompt.md"),
        tasks_parquet: snapshot_dir.join("tasks.parquet"),
        manifest: snapshot_dir.join("manifest.json"),
        dir,
    };

    write_file(&paths.tasks_csv, tasks_csv_bytes(&analysis.tasks)?)?;
    let summary = serde_json::to_vec_pretty(&analysis.summary).context("serializing summary")?;
    write_file(&paths.summary_json, summary)?;
    write_file(&paths.brief_md, render_brief(batch, analysis))?;
    write_file(&paths.diagnosis_prompt_md, prompt.render_markdown())?;
    write_parquet(&paths.tasks_parquet, tasks_record_batch(&analysis.tasks)?)?;

    let manifest = ReportManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        batch_id: batch.batch_id,
        source_tool: batch.source_tool.id().to_string(),
        task_count: analysis.tasks.len(),
        files: vec![
            manifest_entry("tasks_csv", &paths.dir, &paths.tasks_csv)?,
            manifest_entry("summary", &paths.dir, &paths.summary_json)?,
            manifest_entry("brief", &paths.dir, &paths.brief_md)?,
            manifest_entry("diagnosis_prompt", &paths.dir, &paths.diagnosis_prompt_md)?,
            manifest_entry("tasks", &paths.dir, &paths.tasks_parquet)?,
        ],
    };
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing report manifest")?;
    write_file(&paths.manifest, bytes)?;

    info!(dir = %paths.dir.display(), tasks = analysis.tasks.len(), "reports written");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::enrich;
    use crate::summary::{filter_tasks, summarize, FilterOptions};
    use crate::test_support::{date, task_for};
    use crate::KeywordClassifier;
    use crate::EnrichmentHook;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use taskpulse_core::SourceTool;

    fn analysed(tasks: Vec<CanonicalTask>, filter: TaskFilter) -> (TaskBatch, Analysis) {
        let tasks = KeywordClassifier::default()
            .apply(tasks.into_iter().map(enrich).collect())
            .unwrap();
        let filtered = filter_tasks(&tasks, &filter);
        let analysis = Analysis {
            options: FilterOptions::from_tasks(&tasks),
            summary: summarize(&filtered, &TaskFilter::all()),
            filter,
            tasks: filtered,
        };
        let batch = TaskBatch::new(SourceTool::GClick, tasks);
        (batch, analysis)
    }

    fn sample() -> Vec<CanonicalTask> {
        vec![
            task_for("T1", "Envio DCTF", "Acme", "Ana", Some(date(2024, 1, 10)), Some(date(2024, 1, 15))),
            task_for("T2", "Folha", "Beta", "Bruno", None, None),
        ]
    }

    #[test]
    fn csv_uses_canonical_columns_and_empty_cells() {
        let (_, analysis) = analysed(sample(), TaskFilter::all());
        let csv = String::from_utf8(tasks_csv_bytes(&analysis.tasks).unwrap()).unwrap();
        let lines = csv.lines().collect::<Vec<_>>();
        assert_eq!(
            lines[0],
            "task_id,task_name,client,assignee,due_date,completed_date,source_tool,category,deadline_status,delay_days,completion_month"
        );
        assert_eq!(
            lines[1],
            "T1,Envio DCTF,Acme,Ana,2024-01-10,2024-01-15,g-click,fiscal,late,5,2024-01"
        );
        assert_eq!(lines[2], "T2,Folha,Beta,Bruno,,,g-click,payroll,pending,0,");
    }

    #[test]
    fn brief_reports_na_without_late_tasks() {
        let (batch, analysis) = analysed(sample(), TaskFilter::all().with_assignees(["Bruno"]));
        assert_eq!(analysis.tasks.len(), 1);
        assert_eq!(analysis.tasks[0].assignee, "Bruno");
        assert_eq!(batch.tasks.len(), 2);
        let brief = render_brief(&batch, &analysis);
        assert!(brief.contains("- Tasks: 1"));
        assert!(brief.contains("- Mean delay: N/A"));
        assert!(brief.contains("| Bruno | 1 | N/A |"));
        assert!(brief.contains("- Filter: all clients; assignees: Bruno"));
    }

    #[test]
    fn brief_lists_groups_and_months() {
        let (batch, analysis) = analysed(sample(), TaskFilter::all());
        let brief = render_brief(&batch, &analysis);
        assert!(brief.contains("- Mean delay: 5.0 days"));
        assert!(brief.contains("- On time: 0 (0.0%)"));
        assert!(brief.contains("- Fiscal: 1"));
        assert!(brief.contains("| 2024-01 | 1 | 0.0% |"));
    }

    #[test]
    fn write_reports_emits_files_and_hashed_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let (batch, analysis) = analysed(sample(), TaskFilter::all());
        let prompt = DiagnosisPrompt::from_tasks(&analysis.tasks, 50).unwrap();
        let paths = write_reports(dir.path(), &batch, &analysis, &prompt).unwrap();

        assert_eq!(paths.dir, dir.path().join(batch.batch_id.to_string()));
        for path in [
            &paths.tasks_csv,
            &paths.summary_json,
            &paths.brief_md,
            &paths.diagnosis_prompt_md,
            &paths.tasks_parquet,
            &paths.manifest,
        ] {
            assert!(path.is_file(), "missing {}", path.display());
        }

        let manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(&paths.manifest).unwrap()).unwrap();
        assert_eq!(manifest["task_count"], 2);
        assert_eq!(manifest["source_tool"], "g-click");
        let files = manifest["files"].as_array().unwrap();
        assert_eq!(files.len(), 5);
        let csv_entry = &files[0];
        assert_eq!(csv_entry["path"], "tasks.csv");
        let expected = hex::encode(Sha256::digest(fs::read(&paths.tasks_csv).unwrap()));
        assert_eq!(csv_entry["sha256"], expected.as_str());
        assert_eq!(files[4]["path"], "snapshots/tasks.parquet");

        let summary: serde_json::Value =
            serde_json::from_slice(&fs::read(&paths.summary_json).unwrap()).unwrap();
        assert_eq!(summary["total"], 2);
        assert_eq!(summary["status_counts"]["late"], 1);
    }

    #[test]
    fn parquet_snapshot_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let (batch, analysis) = analysed(sample(), TaskFilter::all());
        let prompt = DiagnosisPrompt::from_tasks(&analysis.tasks, 50).unwrap();
        let paths = write_reports(dir.path(), &batch, &analysis, &prompt).unwrap();

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&paths.tasks_parquet).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let mut rows = 0;
        for batch in reader {
            let batch = batch.unwrap();
            assert_eq!(batch.num_columns(), 11);
            rows += batch.num_rows();
        }
        assert_eq!(rows, 2);
    }
}
