//! Source schema adapters: raw export rows into canonical tasks.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;
use strsim::jaro_winkler;
use taskpulse_core::{parse_calendar_date, CanonicalTask, RawTable, RawValue, SourceTool};
use thiserror::Error;
use tracing::debug;

mod load;

pub use load::{load_raw_table, parse_csv_bytes, parse_json_records};

pub const CRATE_NAME: &str = "taskpulse-adapters";

const SUGGESTION_THRESHOLD: f64 = 0.85;

/// Fixed mapping from a tool's export headers to canonical task fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnMap {
    pub task_id: &'static str,
    pub task_name: &'static str,
    pub client: &'static str,
    pub assignee: &'static str,
    pub due_date: &'static str,
    pub completed_date: &'static str,
}

impl ColumnMap {
    /// `(canonical field, source header)` pairs in canonical field order.
    pub fn pairs(&self) -> [(&'static str, &'static str); 6] {
        [
            ("task_id", self.task_id),
            ("task_name", self.task_name),
            ("client", self.client),
            ("assignee", self.assignee),
            ("due_date", self.due_date),
            ("completed_date", self.completed_date),
        ]
    }
}

pub const G_CLICK_COLUMNS: ColumnMap = ColumnMap {
    task_id: "Task ID",
    task_name: "Task Name",
    client: "Client Name",
    assignee: "Assignee",
    due_date: "Due Date",
    completed_date: "Completion Date",
};

pub const ONVIO_COLUMNS: ColumnMap = ColumnMap {
    task_id: "ProcessoID",
    task_name: "Descricao",
    client: "NomeCliente",
    assignee: "Executor",
    due_date: "PrazoFatal",
    completed_date: "DataFinalizacao",
};

pub fn column_map_for(tool: SourceTool) -> &'static ColumnMap {
    match tool {
        SourceTool::GClick => &G_CLICK_COLUMNS,
        SourceTool::Onvio => &ONVIO_COLUMNS,
    }
}

/// Closest header present in the export for a missing required column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSuggestion {
    pub missing: String,
    pub closest: String,
    pub score: f64,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("schema mismatch for {tool} export: missing required column(s): {}", .missing.join(", "))]
    SchemaMismatch {
        tool: SourceTool,
        missing: Vec<String>,
        suggestions: Vec<ColumnSuggestion>,
    },
    #[error("unsupported source tool `{name}` (supported: {supported})")]
    UnsupportedSourceTool { name: String, supported: String },
    #[error("duplicate task id `{task_id}` in {tool} export (rows {first_row} and {second_row})")]
    DuplicateTaskId {
        tool: SourceTool,
        task_id: String,
        first_row: usize,
        second_row: usize,
    },
}

pub trait SchemaAdapter: Send + Sync {
    fn source_tool(&self) -> SourceTool;
    fn column_map(&self) -> &ColumnMap;

    /// Maps every raw row to one canonical task with derived fields unset.
    fn adapt(&self, table: &RawTable) -> Result<Vec<CanonicalTask>, AdapterError>;
}

#[derive(Debug, Clone, Copy)]
struct ColumnMapAdapter {
    tool: SourceTool,
    columns: &'static ColumnMap,
}

impl ColumnMapAdapter {
    fn check_required_columns(&self, table: &RawTable) -> Result<(), AdapterError> {
        let missing = self
            .columns
            .pairs()
            .iter()
            .map(|(_, header)| *header)
            .filter(|header| !table.has_column(header))
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        if missing.is_empty() {
            return Ok(());
        }
        let suggestions = missing
            .iter()
            .filter_map(|column| closest_header(column, &table.headers))
            .collect();
        Err(AdapterError::SchemaMismatch {
            tool: self.tool,
            missing,
            suggestions,
        })
    }
}

fn closest_header(missing: &str, headers: &[String]) -> Option<ColumnSuggestion> {
    let wanted = missing.to_lowercase();
    headers
        .iter()
        .map(|header| {
            let candidate = header.to_lowercase();
            let score = if candidate == wanted {
                1.0
            } else {
                jaro_winkler(&wanted, &candidate)
            };
            (header, score)
        })
        .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(header, score)| ColumnSuggestion {
            missing: missing.to_string(),
            closest: header.clone(),
            score,
        })
}

fn coerced_date(raw: &RawValue, coerced: &mut usize) -> Option<NaiveDate> {
    let parsed = parse_calendar_date(raw);
    if parsed.is_none() && !raw.is_blank() {
        *coerced += 1;
    }
    parsed
}

impl SchemaAdapter for ColumnMapAdapter {
    fn source_tool(&self) -> SourceTool {
        self.tool
    }

    fn column_map(&self) -> &ColumnMap {
        self.columns
    }

    fn adapt(&self, table: &RawTable) -> Result<Vec<CanonicalTask>, AdapterError> {
        self.check_required_columns(table)?;

        let columns = self.columns;
        let mut seen: HashMap<String, usize> = HashMap::with_capacity(table.len());
        let mut coerced = 0usize;
        let mut tasks = Vec::with_capacity(table.len());

        for (index, row) in table.rows.iter().enumerate() {
            let row_no = index + 1;
            let task_id = RawTable::cell(row, columns.task_id).as_text();
            if let Some(first_row) = seen.insert(task_id.clone(), row_no) {
                return Err(AdapterError::DuplicateTaskId {
                    tool: self.tool,
                    task_id,
                    first_row,
                    second_row: row_no,
                });
            }
            tasks.push(CanonicalTask {
                task_id,
                task_name: RawTable::cell(row, columns.task_name).as_text(),
                client: RawTable::cell(row, columns.client).as_text(),
                assignee: RawTable::cell(row, columns.assignee).as_text(),
                due_date: coerced_date(RawTable::cell(row, columns.due_date), &mut coerced),
                completed_date: coerced_date(RawTable::cell(row, columns.completed_date), &mut coerced),
                source_tool: self.tool,
                category: None,
                metrics: None,
            });
        }

        if coerced > 0 {
            debug!(tool = self.tool.id(), coerced, "unparseable date cells coerced to absent");
        }
        Ok(tasks)
    }
}

pub fn g_click_adapter() -> impl SchemaAdapter {
    ColumnMapAdapter {
        tool: SourceTool::GClick,
        columns: &G_CLICK_COLUMNS,
    }
}

pub fn onvio_adapter() -> impl SchemaAdapter {
    ColumnMapAdapter {
        tool: SourceTool::Onvio,
        columns: &ONVIO_COLUMNS,
    }
}

pub fn adapter_for(tool: SourceTool) -> Box<dyn SchemaAdapter> {
    Box::new(ColumnMapAdapter {
        tool,
        columns: column_map_for(tool),
    })
}

/// Looks up the adapter for a tool id or display name.
pub fn adapter_for_tool(name: &str) -> Result<Box<dyn SchemaAdapter>, AdapterError> {
    SourceTool::from_id(name)
        .map(adapter_for)
        .ok_or_else(|| AdapterError::UnsupportedSourceTool {
            name: name.trim().to_string(),
            supported: SourceTool::ALL
                .iter()
                .map(|tool| tool.id())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

pub fn adapt(table: &RawTable, tool: SourceTool) -> Result<Vec<CanonicalTask>, AdapterError> {
    adapter_for(tool).adapt(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use taskpulse_core::RawRecord;

    fn g_click_row(pairs: &[(&str, &str)]) -> RawRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), RawValue::from(*v)))
            .collect()
    }

    fn scenario_row() -> RawRecord {
        g_click_row(&[
            ("Task ID", "T1"),
            ("Task Name", "Envio DCTF"),
            ("Client Name", "Acme"),
            ("Assignee", "Ana"),
            ("Due Date", "2024-01-10"),
            ("Completion Date", "2024-01-15"),
        ])
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn g_click_row_maps_to_canonical_task_with_derived_fields_unset() {
        let table = RawTable::from_records(vec![scenario_row()]);
        let tasks = g_click_adapter().adapt(&table).unwrap();
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.task_id, "T1");
        assert_eq!(task.task_name, "Envio DCTF");
        assert_eq!(task.client, "Acme");
        assert_eq!(task.assignee, "Ana");
        assert_eq!(task.due_date, Some(date(2024, 1, 10)));
        assert_eq!(task.completed_date, Some(date(2024, 1, 15)));
        assert_eq!(task.source_tool, SourceTool::GClick);
        assert_eq!(task.category, None);
        assert_eq!(task.metrics, None);
    }

    #[test]
    fn blank_completion_cell_is_absent() {
        let mut row = scenario_row();
        row.insert("Completion Date".into(), RawValue::Null);
        let tasks = adapt(&RawTable::from_records(vec![row]), SourceTool::GClick).unwrap();
        assert_eq!(tasks[0].completed_date, None);
    }

    #[test]
    fn unparseable_due_date_is_absent_not_an_error() {
        let mut row = scenario_row();
        row.insert("Due Date".into(), "a definir".into());
        let tasks = adapt(&RawTable::from_records(vec![row]), SourceTool::GClick).unwrap();
        assert_eq!(tasks[0].due_date, None);
        assert_eq!(tasks[0].completed_date, Some(date(2024, 1, 15)));
    }

    #[test]
    fn missing_required_column_is_schema_mismatch() {
        let mut row = scenario_row();
        row.remove("Assignee");
        row.remove("Due Date");
        let table = RawTable::from_records(vec![row]);
        let err = g_click_adapter().adapt(&table).unwrap_err();
        match err {
            AdapterError::SchemaMismatch { tool, missing, .. } => {
                assert_eq!(tool, SourceTool::GClick);
                assert_eq!(missing, vec!["Assignee".to_string(), "Due Date".to_string()]);
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn schema_mismatch_suggests_near_miss_headers() {
        let mut row = scenario_row();
        let value = row.remove("Due Date").unwrap();
        row.insert("due date".into(), value);
        let value = row.remove("Completion Date").unwrap();
        row.insert("Completion Dt".into(), value);
        let err = adapt(&RawTable::from_records(vec![row]), SourceTool::GClick).unwrap_err();
        let AdapterError::SchemaMismatch { suggestions, .. } = err else {
            panic!("expected SchemaMismatch");
        };
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].missing, "Due Date");
        assert_eq!(suggestions[0].closest, "due date");
        assert_eq!(suggestions[0].score, 1.0);
        assert_eq!(suggestions[1].closest, "Completion Dt");
    }

    #[test]
    fn g_click_export_against_onvio_adapter_is_rejected() {
        let table = RawTable::from_records(vec![scenario_row()]);
        let err = onvio_adapter().adapt(&table).unwrap_err();
        assert!(err.to_string().contains("ProcessoID"));
        assert!(matches!(err, AdapterError::SchemaMismatch { missing, .. } if missing.len() == 6));
    }

    #[test]
    fn header_only_export_yields_no_tasks() {
        let headers = G_CLICK_COLUMNS
            .pairs()
            .iter()
            .map(|(_, h)| h.to_string())
            .collect();
        let table = RawTable::new(headers, Vec::new());
        assert!(adapt(&table, SourceTool::GClick).unwrap().is_empty());
    }

    #[test]
    fn empty_export_without_headers_is_schema_mismatch() {
        let err = adapt(&RawTable::default(), SourceTool::Onvio).unwrap_err();
        assert!(matches!(err, AdapterError::SchemaMismatch { .. }));
    }

    #[test]
    fn duplicate_task_ids_fail_the_batch() {
        let table = RawTable::from_records(vec![scenario_row(), scenario_row()]);
        let err = adapt(&table, SourceTool::GClick).unwrap_err();
        match err {
            AdapterError::DuplicateTaskId {
                task_id,
                first_row,
                second_row,
                ..
            } => {
                assert_eq!(task_id, "T1");
                assert_eq!((first_row, second_row), (1, 2));
            }
            other => panic!("expected DuplicateTaskId, got {other:?}"),
        }
    }

    #[test]
    fn trailing_blank_csv_rows_do_not_fail_the_batch() {
        let csv = "Task ID,Task Name,Client Name,Assignee,Due Date,Completion Date\n\
                   T1,Envio DCTF,Acme,Ana,2024-01-10,2024-01-15\n\
                   ,,,,,\n\
                   ,,,,,\n";
        let table = crate::parse_csv_bytes(csv.as_bytes()).unwrap();
        let tasks = adapt(&table, SourceTool::GClick).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, "T1");
    }

    #[test]
    fn two_digit_year_cells_are_absent() {
        let mut row = scenario_row();
        row.insert("Due Date".into(), "10/01/24".into());
        row.insert("Completion Date".into(), "15/01/2024".into());
        let tasks = adapt(&RawTable::from_records(vec![row]), SourceTool::GClick).unwrap();
        assert_eq!(tasks[0].due_date, None);
        assert_eq!(tasks[0].completed_date, Some(date(2024, 1, 15)));
    }

    #[test]
    fn numeric_ids_render_as_plain_text() {
        let mut row = scenario_row();
        row.insert("Task ID".into(), RawValue::Float(1042.0));
        let tasks = adapt(&RawTable::from_records(vec![row]), SourceTool::GClick).unwrap();
        assert_eq!(tasks[0].task_id, "1042");
    }

    #[test]
    fn registry_resolves_supported_tools() {
        assert_eq!(adapter_for_tool("g-click").unwrap().source_tool(), SourceTool::GClick);
        assert_eq!(
            adapter_for_tool("Onvio Processos").unwrap().source_tool(),
            SourceTool::Onvio
        );
        assert_eq!(
            adapter_for_tool("onvio").unwrap().column_map(),
            &ONVIO_COLUMNS
        );
    }

    #[test]
    fn registry_rejects_unsupported_tool() {
        let err = adapter_for_tool("Acessórias").err().unwrap();
        match err {
            AdapterError::UnsupportedSourceTool { name, supported } => {
                assert_eq!(name, "Acessórias");
                assert_eq!(supported, "g-click, onvio");
            }
            other => panic!("expected UnsupportedSourceTool, got {other:?}"),
        }
    }
}
