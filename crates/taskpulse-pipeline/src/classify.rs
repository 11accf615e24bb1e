//! Keyword-table task classifier.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use taskpulse_core::{CanonicalTask, Category};
use thiserror::Error;
use tracing::debug;

use crate::EnrichmentHook;

const RULES_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("reading keyword rules {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing keyword rules: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unsupported keyword rules version {0} (expected 1)")]
    UnsupportedVersion(u32),
    #[error("rule {index} targets `other`, the fallback category, which cannot carry keywords")]
    FallbackRule { index: usize },
    #[error("rule {index} ({category}) has no keywords")]
    EmptyRule { index: usize, category: Category },
    #[error("rule {index} ({category}) contains a blank keyword")]
    BlankKeyword { index: usize, category: Category },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub category: Category,
    pub contains_any: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct KeywordRulesFile {
    version: u32,
    #[serde(default)]
    rules: Vec<KeywordRule>,
}

/// Ordered keyword rules; the first rule with a matching keyword wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordTable {
    rules: Vec<KeywordRule>,
}

fn rule(category: Category, keywords: &[&str]) -> KeywordRule {
    KeywordRule {
        category,
        contains_any: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

impl KeywordTable {
    /// Validates the rules and lowercases their keywords.
    pub fn new(rules: Vec<KeywordRule>) -> Result<Self, RulesError> {
        let mut normalized = Vec::with_capacity(rules.len());
        for (index, rule) in rules.into_iter().enumerate() {
            if rule.category == Category::Other {
                return Err(RulesError::FallbackRule { index });
            }
            if rule.contains_any.is_empty() {
                return Err(RulesError::EmptyRule {
                    index,
                    category: rule.category,
                });
            }
            let mut keywords = Vec::with_capacity(rule.contains_any.len());
            for keyword in rule.contains_any {
                let keyword = keyword.trim().to_lowercase();
                if keyword.is_empty() {
                    return Err(RulesError::BlankKeyword {
                        index,
                        category: rule.category,
                    });
                }
                keywords.push(keyword);
            }
            normalized.push(KeywordRule {
                category: rule.category,
                contains_any: keywords,
            });
        }
        Ok(Self { rules: normalized })
    }

    /// Default table for Brazilian accounting practices.
    pub fn builtin() -> Self {
        Self {
            rules: vec![
                rule(Category::Fiscal, &["dctf", "sped", "fiscal", "imposto", "das"]),
                rule(Category::Accounting, &["balancete", "contábil", "conciliação"]),
                rule(Category::Payroll, &["folha", "admissão", "rescisão", "esocial"]),
            ],
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, RulesError> {
        let file: KeywordRulesFile = serde_yaml::from_str(text)?;
        if file.version != RULES_VERSION {
            return Err(RulesError::UnsupportedVersion(file.version));
        }
        Self::new(file.rules)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RulesError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_yaml_str(&text)?;
        debug!(path = %path.display(), rules = table.rules.len(), "loaded keyword rules");
        Ok(table)
    }

    pub fn to_yaml(&self) -> Result<String, RulesError> {
        Ok(serde_yaml::to_string(&KeywordRulesFile {
            version: RULES_VERSION,
            rules: self.rules.clone(),
        })?)
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    pub fn classify(&self, task_name: &str) -> Category {
        let name = task_name.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.contains_any.iter().any(|k| name.contains(k.as_str())))
            .map(|rule| rule.category)
            .unwrap_or(Category::Other)
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_table() -> &'static KeywordTable {
    static TABLE: OnceLock<KeywordTable> = OnceLock::new();
    TABLE.get_or_init(KeywordTable::builtin)
}

/// Classifies a task name with the built-in keyword table.
pub fn classify(task_name: &str) -> Category {
    builtin_table().classify(task_name)
}

/// Enrichment stage filling `category` on tasks that lack one.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    table: KeywordTable,
}

impl KeywordClassifier {
    pub fn new(table: KeywordTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &KeywordTable {
        &self.table
    }
}

impl EnrichmentHook for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keyword-classifier"
    }

    fn apply(&self, mut tasks: Vec<CanonicalTask>) -> Result<Vec<CanonicalTask>> {
        for task in &mut tasks {
            if task.category.is_none() {
                task.category = Some(self.table.classify(&task.task_name));
            }
        }
        Ok(tasks)
    }
}
