//! Core domain model for task punctuality diagnostics.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "taskpulse-core";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid completion month `{0}` (expected YYYY-MM)")]
    InvalidMonth(String),
}

/// Practice-management tool a raw export came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceTool {
    #[serde(rename = "g-click")]
    GClick,
    #[serde(rename = "onvio")]
    Onvio,
}

impl SourceTool {
    pub const ALL: [SourceTool; 2] = [SourceTool::GClick, SourceTool::Onvio];

    pub fn id(self) -> &'static str {
        match self {
            SourceTool::GClick => "g-click",
            SourceTool::Onvio => "onvio",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SourceTool::GClick => "G-Click",
            SourceTool::Onvio => "Onvio Processos",
        }
    }

    /// Resolves a tool from its id or display name, ignoring case.
    pub fn from_id(input: &str) -> Option<Self> {
        let needle = input.trim();
        Self::ALL.into_iter().find(|tool| {
            tool.id().eq_ignore_ascii_case(needle) || tool.display_name().eq_ignore_ascii_case(needle)
        })
    }
}

impl fmt::Display for SourceTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Untyped scalar cell from a raw export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum RawValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

static NULL_VALUE: RawValue = RawValue::Null;

impl RawValue {
    pub fn is_blank(&self) -> bool {
        match self {
            RawValue::Null => true,
            RawValue::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    /// Renders the cell as free text; blanks become the empty string.
    pub fn as_text(&self) -> String {
        match self {
            RawValue::Null => String::new(),
            RawValue::Bool(b) => b.to_string(),
            RawValue::Integer(i) => i.to_string(),
            RawValue::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", *f as i64)
                } else {
                    f.to_string()
                }
            }
            RawValue::Text(text) => text.trim().to_string(),
            RawValue::Date(date) => date.format("%Y-%m-%d").to_string(),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<NaiveDate> for RawValue {
    fn from(value: NaiveDate) -> Self {
        RawValue::Date(value)
    }
}

/// One raw row keyed by the source tool's own column names.
pub type RawRecord = BTreeMap<String, RawValue>;

/// Tabular raw export: header row plus records.
///
/// Headers are kept apart from the rows so that an export with zero rows can
/// still be checked for required columns. Header text and row keys are
/// whitespace-trimmed on construction, and rows whose cells are all blank
/// (spreadsheet padding such as `,,,,,`) are dropped.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRecord>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<RawRecord>) -> Self {
        let headers = headers.into_iter().map(|h| h.trim().to_string()).collect();
        let rows = rows
            .into_iter()
            .filter(|row| !row.values().all(RawValue::is_blank))
            .map(|row| {
                row.into_iter()
                    .map(|(key, value)| (key.trim().to_string(), value))
                    .collect::<RawRecord>()
            })
            .collect();
        Self { headers, rows }
    }

    /// Builds a table whose headers are every key seen across the rows, in
    /// first-seen order.
    pub fn from_records(rows: Vec<RawRecord>) -> Self {
        let mut headers: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !headers.iter().any(|h| h == key) {
                    headers.push(key.clone());
                }
            }
        }
        Self::new(headers, rows)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell<'a>(row: &'a RawRecord, column: &str) -> &'a RawValue {
        row.get(column).unwrap_or(&NULL_VALUE)
    }
}

/// Coerces a raw cell into a calendar date.
///
/// Unparseable or blank values are `None`, never an error: open tasks routinely
/// carry empty completion cells. Only four-digit years are accepted.
pub fn parse_calendar_date(value: &RawValue) -> Option<NaiveDate> {
    match value {
        RawValue::Date(date) => Some(*date).filter(has_four_digit_year),
        RawValue::Text(text) => parse_date_text(text),
        _ => None,
    }
}

const FOUR_DIGIT_YEARS: std::ops::RangeInclusive<i32> = 1000..=9999;

// chrono's `%Y` also takes two-digit years, so `10/01/24` would parse as year 10.
fn has_four_digit_year(date: &NaiveDate) -> bool {
    FOUR_DIGIT_YEARS.contains(&date.year())
}

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];

pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let rfc3339 = DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive());
    rfc3339
        .into_iter()
        .chain(
            DATETIME_FORMATS
                .iter()
                .filter_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date()),
        )
        .chain(
            DATE_FORMATS
                .iter()
                .filter_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok()),
        )
        .find(has_four_digit_year)
}

/// Task category derived from its free-text name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Fiscal,
    Accounting,
    Payroll,
    Other,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Fiscal,
        Category::Accounting,
        Category::Payroll,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Fiscal => "fiscal",
            Category::Accounting => "accounting",
            Category::Payroll => "payroll",
            Category::Other => "other",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Fiscal => "Fiscal",
            Category::Accounting => "Accounting",
            Category::Payroll => "Payroll",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Punctuality outcome of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineStatus {
    OnTime,
    Late,
    Pending,
}

impl DeadlineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeadlineStatus::OnTime => "on_time",
            DeadlineStatus::Late => "late",
            DeadlineStatus::Pending => "pending",
        }
    }

    /// True once the task has a completion outcome.
    pub fn is_settled(self) -> bool {
        !matches!(self, DeadlineStatus::Pending)
    }
}

impl fmt::Display for DeadlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeadlineStatus::OnTime => "On time",
            DeadlineStatus::Late => "Late",
            DeadlineStatus::Pending => "Pending",
        })
    }
}

/// Year-month bucket, ordered chronologically and rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompletionMonth {
    year: i32,
    month: u32,
}

impl CompletionMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, CoreError> {
        if !(0..=9999).contains(&year) || !(1..=12).contains(&month) {
            return Err(CoreError::InvalidMonth(format!("{year:04}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    /// Years outside `0..=9999` are clamped so the `YYYY-MM` text stays parseable.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year().clamp(0, 9999),
            month: date.month(),
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }
}

impl fmt::Display for CompletionMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for CompletionMonth {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidMonth(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl Serialize for CompletionMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CompletionMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Derived punctuality fields filled in by the metrics stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineMetrics {
    pub status: DeadlineStatus,
    pub delay_days: u32,
    pub completion_month: Option<CompletionMonth>,
}

/// Tool-agnostic representation of one tracked work item.
///
/// `category` and `metrics` stay `None` until the classifier and metrics
/// stages run; each stage only fills its own unset field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTask {
    pub task_id: String,
    pub task_name: String,
    pub client: String,
    pub assignee: String,
    pub due_date: Option<NaiveDate>,
    pub completed_date: Option<NaiveDate>,
    pub source_tool: SourceTool,
    pub category: Option<Category>,
    pub metrics: Option<DeadlineMetrics>,
}

impl CanonicalTask {
    pub fn deadline_status(&self) -> Option<DeadlineStatus> {
        self.metrics.map(|m| m.status)
    }

    pub fn delay_days(&self) -> Option<u32> {
        self.metrics.map(|m| m.delay_days)
    }

    pub fn completion_month(&self) -> Option<CompletionMonth> {
        self.metrics.and_then(|m| m.completion_month)
    }

    pub fn is_enriched(&self) -> bool {
        self.category.is_some() && self.metrics.is_some()
    }
}

/// One ingested export; scopes the `task_id` + `source_tool` uniqueness rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBatch {
    pub batch_id: Uuid,
    pub source_tool: SourceTool,
    pub ingested_at: DateTime<Utc>,
    pub tasks: Vec<CanonicalTask>,
}

impl TaskBatch {
    pub fn new(source_tool: SourceTool, tasks: Vec<CanonicalTask>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            source_tool,
            ingested_at: Utc::now(),
            tasks,
        }
    }
}
