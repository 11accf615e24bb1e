//! Filtering and grouped punctuality statistics over canonical tasks.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use taskpulse_core::{CanonicalTask, Category, CompletionMonth, DeadlineStatus};

use crate::classify::classify;
use crate::metrics::metrics_for;

/// Allowed clients and assignees; `None` admits every value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub clients: Option<BTreeSet<String>>,
    pub assignees: Option<BTreeSet<String>>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_clients<I, S>(mut self, clients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clients = Some(clients.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_assignees<I, S>(mut self, assignees: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assignees = Some(assignees.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        self.clients.is_none() && self.assignees.is_none()
    }

    pub fn matches(&self, task: &CanonicalTask) -> bool {
        let client_ok = self
            .clients
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&task.client));
        let assignee_ok = self
            .assignees
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&task.assignee));
        client_ok && assignee_ok
    }
}

/// Distinct filter values in first-appearance order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub clients: Vec<String>,
    pub assignees: Vec<String>,
}

impl FilterOptions {
    pub fn from_tasks(tasks: &[CanonicalTask]) -> Self {
        let mut options = Self::default();
        let mut seen_clients = BTreeSet::new();
        let mut seen_assignees = BTreeSet::new();
        for task in tasks {
            if seen_clients.insert(task.client.as_str()) {
                options.clients.push(task.client.clone());
            }
            if seen_assignees.insert(task.assignee.as_str()) {
                options.assignees.push(task.assignee.clone());
            }
        }
        options
    }
}

pub fn filter_tasks(tasks: &[CanonicalTask], filter: &TaskFilter) -> Vec<CanonicalTask> {
    tasks
        .iter()
        .filter(|task| filter.matches(task))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub on_time: usize,
    pub late: usize,
    pub pending: usize,
}

impl StatusCounts {
    pub fn settled(&self) -> usize {
        self.on_time + self.late
    }

    fn record(&mut self, status: DeadlineStatus) {
        match status {
            DeadlineStatus::OnTime => self.on_time += 1,
            DeadlineStatus::Late => self.late += 1,
            DeadlineStatus::Pending => self.pending += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssigneeStats {
    pub assignee: String,
    pub task_count: usize,
    pub settled_count: usize,
    /// Over settled tasks only; absent when every task is still pending.
    pub on_time_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLateCount {
    pub category: Category,
    pub late_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRate {
    pub month: CompletionMonth,
    pub settled_count: usize,
    pub on_time_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub status_counts: StatusCounts,
    /// On-time tasks over all tasks, pending included; 0 for an empty set.
    pub on_time_rate: f64,
    /// Mean delay of late tasks; absent when nothing is late.
    pub mean_delay_days: Option<f64>,
    pub by_assignee: Vec<AssigneeStats>,
    pub late_by_category: Vec<CategoryLateCount>,
    pub time_series: Vec<MonthlyRate>,
}

fn percentage(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64 * 100.0)
}

/// Filters `tasks` and summarizes the survivors.
pub fn summarize(tasks: &[CanonicalTask], filter: &TaskFilter) -> Summary {
    let filtered = tasks.iter().filter(|task| filter.matches(task));
    summarize_iter(filtered)
}

fn summarize_iter<'a>(tasks: impl Iterator<Item = &'a CanonicalTask>) -> Summary {
    let mut total = 0usize;
    let mut counts = StatusCounts::default();
    let mut late_delay_sum = 0u64;
    let mut assignee_order: Vec<&str> = Vec::new();
    let mut per_assignee: HashMap<&str, (usize, StatusCounts)> = HashMap::new();
    let mut late_per_category: BTreeMap<Category, usize> = BTreeMap::new();
    let mut per_month: BTreeMap<CompletionMonth, StatusCounts> = BTreeMap::new();

    for task in tasks {
        let metrics = metrics_for(task);
        total += 1;
        counts.record(metrics.status);

        let entry = per_assignee.entry(task.assignee.as_str()).or_insert_with(|| {
            assignee_order.push(task.assignee.as_str());
            (0, StatusCounts::default())
        });
        entry.0 += 1;
        entry.1.record(metrics.status);

        if metrics.status == DeadlineStatus::Late {
            late_delay_sum += u64::from(metrics.delay_days);
            let category = task.category.unwrap_or_else(|| classify(&task.task_name));
            *late_per_category.entry(category).or_default() += 1;
        }

        if metrics.status.is_settled() {
            if let Some(month) = metrics.completion_month {
                per_month.entry(month).or_default().record(metrics.status);
            }
        }
    }

    let mut by_assignee = assignee_order
        .into_iter()
        .filter_map(|name| {
            per_assignee.get(name).map(|(count, status)| AssigneeStats {
                assignee: name.to_string(),
                task_count: *count,
                settled_count: status.settled(),
                on_time_rate: percentage(status.on_time, status.settled()),
            })
        })
        .collect::<Vec<_>>();
    by_assignee.sort_by(|a, b| {
        b.task_count
            .cmp(&a.task_count)
            .then_with(|| a.assignee.cmp(&b.assignee))
    });

    let mut late_by_category = late_per_category
        .into_iter()
        .map(|(category, late_count)| CategoryLateCount {
            category,
            late_count,
        })
        .collect::<Vec<_>>();
    late_by_category.sort_by(|a, b| b.late_count.cmp(&a.late_count).then(a.category.cmp(&b.category)));

    let time_series = per_month
        .into_iter()
        .map(|(month, status)| MonthlyRate {
            month,
            settled_count: status.settled(),
            on_time_rate: percentage(status.on_time, status.settled()).unwrap_or(0.0),
        })
        .collect();

    Summary {
        total,
        status_counts: counts,
        on_time_rate: percentage(counts.on_time, total).unwrap_or(0.0),
        mean_delay_days: (counts.late > 0).then(|| late_delay_sum as f64 / counts.late as f64),
        by_assignee,
        late_by_category,
        time_series,
    }
}
