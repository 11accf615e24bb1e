//! Hand-off to an external diagnosis generator.
//!
//! The pipeline only prepares the prompt. Generating prose is left to a
//! [`DiagnosisProvider`] supplied by the caller, and a provider failure never
//! aborts a run.

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{RecordBatch, StringArray, UInt32Array};
use arrow_csv::WriterBuilder;
use arrow_schema::{DataType, Field, Schema};
use serde::Serialize;
use taskpulse_core::{CanonicalTask, Category, DeadlineStatus};
use tracing::{info, warn};

use crate::classify::classify;
use crate::metrics::metrics_for;

pub const DEFAULT_SAMPLE_ROWS: usize = 50;

const SYSTEM_PROMPT: &str = "You are an accounting analyst who specializes in team productivity.";

const USER_PREAMBLE: &str = "Review the task sample below and write a diagnosis of bottlenecks, \
delays and opportunities for improvement. Each row is one task: client, assignee, deadline \
status, task category and days late.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosisRow {
    pub client: String,
    pub assignee: String,
    pub deadline_status: DeadlineStatus,
    pub category: Category,
    pub delay_days: u32,
}

impl DiagnosisRow {
    fn from_task(task: &CanonicalTask) -> Self {
        let metrics = metrics_for(task);
        Self {
            client: task.client.clone(),
            assignee: task.assignee.clone(),
            deadline_status: metrics.status,
            category: task.category.unwrap_or_else(|| classify(&task.task_name)),
            delay_days: metrics.delay_days,
        }
    }
}

/// The first `limit` tasks, reduced to the columns the generator sees.
pub fn diagnosis_sample(tasks: &[CanonicalTask], limit: usize) -> Vec<DiagnosisRow> {
    tasks.iter().take(limit).map(DiagnosisRow::from_task).collect()
}

fn sample_csv(rows: &[DiagnosisRow]) -> Result<String> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("client", DataType::Utf8, false),
        Field::new("assignee", DataType::Utf8, false),
        Field::new("deadline_status", DataType::Utf8, false),
        Field::new("category", DataType::Utf8, false),
        Field::new("delay_days", DataType::UInt32, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.client.as_str()))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.assignee.as_str()))),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.deadline_status.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.category.as_str()))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.delay_days))),
        ],
    )
    .context("building diagnosis sample batch")?;

    let mut writer = WriterBuilder::new().with_header(true).build(Vec::new());
    writer.write(&batch).context("writing diagnosis sample CSV")?;
    String::from_utf8(writer.into_inner()).context("diagnosis sample CSV is not UTF-8")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosisPrompt {
    pub system: String,
    pub user: String,
    pub sample_rows: usize,
}

impl DiagnosisPrompt {
    pub fn from_rows(rows: &[DiagnosisRow]) -> Result<Self> {
        let csv = sample_csv(rows)?;
        Ok(Self {
            system: SYSTEM_PROMPT.to_string(),
            user: format!("{USER_PREAMBLE}\n\n{csv}"),
            sample_rows: rows.len(),
        })
    }

    pub fn from_tasks(tasks: &[CanonicalTask], limit: usize) -> Result<Self> {
        Self::from_rows(&diagnosis_sample(tasks, limit))
    }

    pub fn render_markdown(&self) -> String {
        format!(
            "# Diagnosis prompt\n\n- Sample rows: {}\n\n## System\n\n{}\n\n## User\n\n```text\n{}```\n",
            self.sample_rows, self.system, self.user
        )
    }
}

pub trait DiagnosisProvider: Send + Sync {
    fn diagnose(&self, prompt: &DiagnosisPrompt) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "text", rename_all = "snake_case")]
pub enum DiagnosisOutcome {
    Generated(String),
    Failed(String),
}

impl DiagnosisOutcome {
    pub fn is_generated(&self) -> bool {
        matches!(self, DiagnosisOutcome::Generated(_))
    }
}

/// Calls the provider; failures become [`DiagnosisOutcome::Failed`].
pub fn request_diagnosis(provider: &dyn DiagnosisProvider, prompt: &DiagnosisPrompt) -> DiagnosisOutcome {
    match provider.diagnose(prompt) {
        Ok(text) => {
            info!(sample_rows = prompt.sample_rows, "diagnosis generated");
            DiagnosisOutcome::Generated(text)
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "diagnosis generation failed; continuing without it");
            DiagnosisOutcome::Failed(format!("{err:#}"))
        }
    }
}
