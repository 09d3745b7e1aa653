use anyhow::Result;
use hypo_lib::io::{read_rows, RowTable};
use hypo_lib::{group_by_subject, RawSeries};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::SourceSpec;

/// Anything that can deliver canonical rows for one study.
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;
    fn load(&self) -> Result<RowTable>;
}

#[derive(Debug, Clone)]
pub struct CanonicalCsv {
    pub name: String,
    pub path: PathBuf,
    pub delimiter: u8,
    pub tag: Option<String>,
}

impl From<&SourceSpec> for CanonicalCsv {
    fn from(spec: &SourceSpec) -> Self {
        Self {
            name: spec.name.clone(),
            path: spec.path.clone(),
            delimiter: spec.delimiter as u8,
            tag: spec.tag.clone(),
        }
    }
}

impl SourceAdapter for CanonicalCsv {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<RowTable> {
        read_rows(&self.path, self.delimiter, self.tag.as_deref())
    }
}

/// Result of one adapter. A failed source does not stop the others.
#[derive(Debug)]
pub enum SourceOutcome {
    Loaded { name: String, table: RowTable },
    Failed { name: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub name: String,
    pub rows: usize,
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn summary(&self) -> SourceSummary {
        match self {
            SourceOutcome::Loaded { name, table } => SourceSummary {
                name: name.clone(),
                rows: table.rows.len(),
                error: None,
            },
            SourceOutcome::Failed { name, error } => SourceSummary {
                name: name.clone(),
                rows: 0,
                error: Some(error.clone()),
            },
        }
    }
}

pub fn load_sources(adapters: &[Box<dyn SourceAdapter>]) -> Vec<SourceOutcome> {
    adapters
        .par_iter()
        .map(|adapter| match adapter.load() {
            Ok(table) => {
                info!("{}: {} rows", adapter.name(), table.rows.len());
                SourceOutcome::Loaded {
                    name: adapter.name().to_string(),
                    table,
                }
            }
            Err(err) => {
                warn!("{}: {:#}", adapter.name(), err);
                SourceOutcome::Failed {
                    name: adapter.name().to_string(),
                    error: format!("{:#}", err),
                }
            }
        })
        .collect()
}

/// Rows of a subject seen in several sources are concatenated in source order.
pub fn collect_subjects(outcomes: Vec<SourceOutcome>) -> Vec<RawSeries> {
    let mut subjects: BTreeMap<String, RawSeries> = BTreeMap::new();
    for outcome in outcomes {
        let SourceOutcome::Loaded { table, .. } = outcome else {
            continue;
        };
        for group in group_by_subject(table.rows, table.has_paired) {
            match subjects.get_mut(&group.subject_id) {
                Some(existing) => {
                    existing.has_paired |= group.has_paired;
                    existing.rows.extend(group.rows);
                }
                None => {
                    subjects.insert(group.subject_id.clone(), group);
                }
            }
        }
    }
    subjects.into_values().collect()
}
