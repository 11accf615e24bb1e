//! Deadline metrics: status, delay and completion-month bucket per task.

use anyhow::Result;
use chrono::NaiveDate;
use taskpulse_core::{CanonicalTask, CompletionMonth, DeadlineMetrics, DeadlineStatus};

use crate::EnrichmentHook;

/// Derives punctuality fields from a due date and a completion date.
///
/// A task completed on its due date is on time. When the completion date is
/// known but the due date is not, nothing can prove the task late, so it is
/// on time with zero delay.
pub fn evaluate(due_date: Option<NaiveDate>, completed_date: Option<NaiveDate>) -> DeadlineMetrics {
    let Some(completed) = completed_date else {
        return DeadlineMetrics {
            status: DeadlineStatus::Pending,
            delay_days: 0,
            completion_month: None,
        };
    };
    let delay = due_date
        .map(|due| completed.signed_duration_since(due).num_days())
        .unwrap_or(0);
    let status = if delay > 0 {
        DeadlineStatus::Late
    } else {
        DeadlineStatus::OnTime
    };
    DeadlineMetrics {
        status,
        delay_days: u32::try_from(delay.max(0)).unwrap_or(u32::MAX),
        completion_month: Some(CompletionMonth::from_date(completed)),
    }
}

/// Fills `metrics` on a task that has none yet.
pub fn enrich(mut task: CanonicalTask) -> CanonicalTask {
    if task.metrics.is_none() {
        task.metrics = Some(evaluate(task.due_date, task.completed_date));
    }
    task
}

/// Stored metrics when enriched, otherwise derived on the fly.
pub fn metrics_for(task: &CanonicalTask) -> DeadlineMetrics {
    task.metrics
        .unwrap_or_else(|| evaluate(task.due_date, task.completed_date))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeadlineMetricsHook;

impl EnrichmentHook for DeadlineMetricsHook {
    fn name(&self) -> &'static str {
        "deadline-metrics"
    }

    fn apply(&self, tasks: Vec<CanonicalTask>) -> Result<Vec<CanonicalTask>> {
        Ok(tasks.into_iter().map(enrich).collect())
    }
}
