use anyhow::{Context, Result};
use chrono::TimeDelta;
use hypo_lib::{GapLimits, LabelRequest, OutlierMode, PrepError, ResampleMode, WindowConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub resample: ResampleSection,
    pub outliers: OutlierSection,
    #[serde(default)]
    pub paired: Option<PairedSection>,
    #[serde(default)]
    pub impute: ImputeSection,
    #[serde(default)]
    pub events: EventSection,
    #[serde(default)]
    pub labels: Vec<LabelRequest>,
    #[serde(default)]
    pub windows: WindowSection,
    #[serde(default)]
    pub normalize: NormalizeSection,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResampleSection {
    pub frequency_minutes: i64,
    pub mode: String,
    /// Native rate of undersampled sources; enables segment forward-fill.
    #[serde(default)]
    pub native_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierSection {
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairedSection {
    pub resample_mode: String,
    pub outlier_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImputeSection {
    #[serde(default = "default_lower_limit")]
    pub lower_limit: usize,
    #[serde(default = "default_upper_limit")]
    pub upper_limit: usize,
}

fn default_lower_limit() -> usize {
    GapLimits::default().lower
}

fn default_upper_limit() -> usize {
    GapLimits::default().upper
}

impl Default for ImputeSection {
    fn default() -> Self {
        Self {
            lower_limit: default_lower_limit(),
            upper_limit: default_upper_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSection {
    /// Readings below this many mg/dL are marked as events.
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSection {
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: i64,
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_val_fraction")]
    pub val_fraction: f64,
}

fn default_sample_count() -> usize {
    WindowConfig::default().sample_count
}

fn default_duration_minutes() -> i64 {
    WindowConfig::default().duration.num_minutes()
}

fn default_test_fraction() -> f64 {
    WindowConfig::default().test_fraction
}

fn default_val_fraction() -> f64 {
    WindowConfig::default().val_fraction
}

impl Default for WindowSection {
    fn default() -> Self {
        Self {
            sample_count: default_sample_count(),
            duration_minutes: default_duration_minutes(),
            test_fraction: default_test_fraction(),
            val_fraction: default_val_fraction(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NormalizeSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub frequency: TimeDelta,
    pub native: Option<TimeDelta>,
    pub resample_mode: ResampleMode,
    pub outlier_mode: OutlierMode,
    pub paired: Option<PairedSettings>,
    pub gap_limits: GapLimits,
    pub event_threshold: Option<f64>,
    pub labels: Vec<LabelRequest>,
    pub windows: WindowConfig,
    pub normalize: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairedSettings {
    pub resample_mode: ResampleMode,
    pub outlier_mode: OutlierMode,
}

fn positive_minutes(what: &str, minutes: i64) -> Result<TimeDelta, PrepError> {
    if minutes <= 0 {
        return Err(PrepError::config(format!(
            "{} must be a positive number of minutes, got {}",
            what, minutes
        )));
    }
    TimeDelta::try_minutes(minutes)
        .ok_or_else(|| PrepError::config(format!("{} of {} minutes is out of range", what, minutes)))
}

impl PipelineConfig {
    /// Parse mode strings and check every parameter. Any problem here is a
    /// configuration error for the whole run.
    pub fn validate(&self) -> Result<PipelineSettings, PrepError> {
        let frequency = positive_minutes("resample.frequency_minutes", self.resample.frequency_minutes)?;
        let native = self
            .resample
            .native_minutes
            .map(|m| positive_minutes("resample.native_minutes", m))
            .transpose()?;
        let paired = self
            .paired
            .as_ref()
            .map(|p| -> Result<PairedSettings, PrepError> {
                Ok(PairedSettings {
                    resample_mode: p.resample_mode.parse()?,
                    outlier_mode: p.outlier_mode.parse()?,
                })
            })
            .transpose()?;
        let gap_limits = GapLimits::new(self.impute.lower_limit, self.impute.upper_limit)?;
        for request in &self.labels {
            request.validate()?;
        }
        if let Some(threshold) = self.events.threshold {
            if !threshold.is_finite() {
                return Err(PrepError::config("events.threshold must be finite"));
            }
        }
        let windows = WindowConfig {
            sample_count: self.windows.sample_count,
            duration: positive_minutes("windows.duration_minutes", self.windows.duration_minutes)?,
            test_fraction: self.windows.test_fraction,
            val_fraction: self.windows.val_fraction,
        };
        windows.validate()?;
        for source in &self.sources {
            if !source.delimiter.is_ascii() {
                return Err(PrepError::config(format!(
                    "source '{}' delimiter must be a single ASCII character",
                    source.name
                )));
            }
        }
        Ok(PipelineSettings {
            frequency,
            native,
            resample_mode: self.resample.mode.parse()?,
            outlier_mode: self.outliers.mode.parse()?,
            paired,
            gap_limits,
            event_threshold: self.events.threshold,
            labels: self.labels.clone(),
            windows,
            normalize: self.normalize.enabled,
        })
    }
}

pub fn read_config(path: &Path) -> Result<PipelineConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let mut config: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for source in &mut config.sources {
        if source.path.is_relative() {
            source.path = base.join(&source.path);
        }
    }
    Ok(config)
}
