use anyhow::{Context, Result};
use hypo_lib::{FlatArrays, FlatSplits, LabelRequest, MinMax};
use ndarray_npy::WriteNpyExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::batch::{SubjectFailure, SubjectStats};
use crate::sources::SourceSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitCounts {
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

impl From<&FlatSplits> for SplitCounts {
    fn from(splits: &FlatSplits) -> Self {
        Self {
            train: splits.train.len(),
            val: splits.val.len(),
            test: splits.test.len(),
        }
    }
}

/// Scaling applied before windowing. `strategy` is `full-column`: ranges are
/// taken over every subject and every split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationRecord {
    pub strategy: String,
    pub ranges: BTreeMap<String, MinMax>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub name: String,
    pub frequency_minutes: i64,
    pub resample_mode: String,
    pub outlier_mode: String,
    pub lower_limit: usize,
    pub upper_limit: usize,
    pub labels: Vec<LabelRequest>,
    pub sample_count: usize,
    pub duration_minutes: i64,
    pub features: Vec<String>,
    pub normalization: Option<NormalizationRecord>,
    pub splits: SplitCounts,
    #[serde(default)]
    pub sources: Vec<SourceSummary>,
    pub subjects: Vec<SubjectStats>,
    pub failures: Vec<SubjectFailure>,
    pub created_unix: f64,
}

pub fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_secs_f64())
        .unwrap_or(0.0)
}

fn write_pair(dir: &Path, split: &str, arrays: &FlatArrays) -> Result<()> {
    let x_path = dir.join(format!("X_{}.npy", split));
    let file = File::create(&x_path).with_context(|| format!("creating {}", x_path.display()))?;
    arrays
        .x
        .write_npy(file)
        .with_context(|| format!("writing {}", x_path.display()))?;
    let y_path = dir.join(format!("Y_{}.npy", split));
    let file = File::create(&y_path).with_context(|| format!("creating {}", y_path.display()))?;
    arrays
        .y
        .write_npy(file)
        .with_context(|| format!("writing {}", y_path.display()))?;
    Ok(())
}

pub fn write_splits(dir: &Path, splits: &FlatSplits) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    write_pair(dir, "train", &splits.train)?;
    write_pair(dir, "val", &splits.val)?;
    write_pair(dir, "test", &splits.test)?;
    Ok(())
}

pub fn write_manifest(path: &Path, manifest: &RunManifest) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, manifest)?;
    Ok(())
}

pub fn read_manifest(path: &Path) -> Result<RunManifest> {
    let file = File::open(path).with_context(|| format!("opening manifest {}", path.display()))?;
    let manifest = serde_json::from_reader::<_, RunManifest>(file)
        .with_context(|| format!("parsing manifest {}", path.display()))?;
    Ok(manifest)
}
