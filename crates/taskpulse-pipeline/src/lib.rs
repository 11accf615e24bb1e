//! Analysis pipeline: classification, deadline metrics, summaries and reports.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use taskpulse_adapters::{adapter_for_tool, load_raw_table};
use taskpulse_core::{CanonicalTask, RawTable, TaskBatch};
use tracing::{debug, info, info_span};

mod classify;
mod diagnosis;
mod metrics;
mod report;
mod summary;

pub use classify::{classify, KeywordClassifier, KeywordRule, KeywordTable, RulesError};
pub use diagnosis::{
    diagnosis_sample, request_diagnosis, DiagnosisOutcome, DiagnosisPrompt, DiagnosisProvider,
    DiagnosisRow, DEFAULT_SAMPLE_ROWS,
};
pub use metrics::{enrich, evaluate, metrics_for, DeadlineMetricsHook};
pub use report::{
    render_brief, tasks_csv_bytes, tasks_record_batch, write_reports, ReportManifest,
    ReportManifestFile, ReportPaths,
};
pub use summary::{
    filter_tasks, summarize, AssigneeStats, CategoryLateCount, FilterOptions, MonthlyRate,
    StatusCounts, Summary, TaskFilter,
};
pub use taskpulse_adapters::adapt;

pub const CRATE_NAME: &str = "taskpulse-pipeline";

const DEFAULT_RULES_FILE: &str = "rules/categories.yaml";

/// One enrichment stage; stages fill derived fields and never overwrite set ones.
pub trait EnrichmentHook: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, tasks: Vec<CanonicalTask>) -> Result<Vec<CanonicalTask>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub workspace_root: PathBuf,
    /// Explicit keyword rules file; must load when set.
    pub rules_path: Option<PathBuf>,
    pub reports_dir: PathBuf,
    pub diagnosis_sample: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_workspace(".")
    }
}

impl PipelineConfig {
    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        let workspace_root = root.into();
        Self {
            reports_dir: workspace_root.join("reports"),
            workspace_root,
            rules_path: None,
            diagnosis_sample: DEFAULT_SAMPLE_ROWS,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let workspace_root = var("TASKPULSE_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            rules_path: var("TASKPULSE_RULES_PATH").map(PathBuf::from),
            reports_dir: var("TASKPULSE_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| workspace_root.join("reports")),
            diagnosis_sample: var("TASKPULSE_DIAGNOSIS_SAMPLE")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_SAMPLE_ROWS),
            workspace_root,
        }
    }

    pub fn default_rules_path(&self) -> PathBuf {
        self.workspace_root.join(DEFAULT_RULES_FILE)
    }

    /// Explicit rules file, else the workspace default, else the built-in table.
    pub fn load_keyword_table(&self) -> Result<KeywordTable> {
        if let Some(path) = &self.rules_path {
            return KeywordTable::from_path(path)
                .with_context(|| format!("loading keyword rules {}", path.display()));
        }
        let default_path = self.default_rules_path();
        if default_path.is_file() {
            return KeywordTable::from_path(&default_path)
                .with_context(|| format!("loading keyword rules {}", default_path.display()));
        }
        debug!(path = %default_path.display(), "no keyword rules file; using built-in table");
        Ok(KeywordTable::builtin())
    }
}

/// Filtered view of one batch plus its summary.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub filter: TaskFilter,
    pub options: FilterOptions,
    pub tasks: Vec<CanonicalTask>,
    pub summary: Summary,
}

pub struct AnalysisPipeline {
    config: PipelineConfig,
    hooks: Vec<Box<dyn EnrichmentHook>>,
}

fn default_hooks(table: KeywordTable) -> Vec<Box<dyn EnrichmentHook>> {
    vec![
        Box::new(KeywordClassifier::new(table)),
        Box::new(DeadlineMetricsHook),
    ]
}

impl AnalysisPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let table = config.load_keyword_table()?;
        Ok(Self {
            config,
            hooks: default_hooks(table),
        })
    }

    pub fn with_keyword_table(mut self, table: KeywordTable) -> Self {
        self.hooks = default_hooks(table);
        self
    }

    pub fn with_hooks(mut self, hooks: Vec<Box<dyn EnrichmentHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn hook_names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|hook| hook.name()).collect()
    }

    /// Adapts a raw export for `tool` and runs every enrichment stage.
    pub fn ingest(&self, table: &RawTable, tool: &str) -> Result<TaskBatch> {
        let span = info_span!("ingest", tool = tool.trim(), rows = table.len());
        let _guard = span.enter();

        let adapter = adapter_for_tool(tool)?;
        let mut tasks = adapter.adapt(table)?;
        for hook in &self.hooks {
            tasks = hook
                .apply(tasks)
                .with_context(|| format!("running enrichment stage {}", hook.name()))?;
        }
        let batch = TaskBatch::new(adapter.source_tool(), tasks);
        info!(batch_id = %batch.batch_id, tasks = batch.tasks.len(), "ingested batch");
        Ok(batch)
    }

    pub fn ingest_file(&self, path: impl AsRef<Path>, tool: &str) -> Result<TaskBatch> {
        let path = path.as_ref();
        let table = load_raw_table(path)?;
        self.ingest(&table, tool)
            .with_context(|| format!("ingesting {}", path.display()))
    }

    pub fn analyze(&self, batch: &TaskBatch, filter: &TaskFilter) -> Analysis {
        let tasks = filter_tasks(&batch.tasks, filter);
        let summary = summarize(&tasks, &TaskFilter::all());
        Analysis {
            filter: filter.clone(),
            options: FilterOptions::from_tasks(&batch.tasks),
            tasks,
            summary,
        }
    }

    pub fn diagnosis_prompt(&self, analysis: &Analysis) -> Result<DiagnosisPrompt> {
        DiagnosisPrompt::from_tasks(&analysis.tasks, self.config.diagnosis_sample)
    }

    /// Writes the report set for one analysis under the configured reports dir.
    pub fn write_reports(&self, batch: &TaskBatch, analysis: &Analysis) -> Result<ReportPaths> {
        let prompt = self.diagnosis_prompt(analysis)?;
        write_reports(&self.config.reports_dir, batch, analysis, &prompt)
    }
}
