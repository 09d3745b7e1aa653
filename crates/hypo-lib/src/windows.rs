use crate::error::{PrepError, PrepResult};
use crate::signal::{Column, Series};
use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    pub sample_count: usize,
    pub duration: TimeDelta,
    pub test_fraction: f64,
    pub val_fraction: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            sample_count: 25,
            duration: TimeDelta::hours(2),
            test_fraction: 0.15,
            val_fraction: 0.1765,
        }
    }
}

impl WindowConfig {
    pub fn validate(&self) -> PrepResult<()> {
        if self.sample_count == 0 {
            return Err(PrepError::config("window sample count must be positive"));
        }
        if self.duration <= TimeDelta::zero() {
            return Err(PrepError::config("window duration must be positive"));
        }
        for (name, fraction) in [("test", self.test_fraction), ("val", self.val_fraction)] {
            if !(0.0..1.0).contains(&fraction) {
                return Err(PrepError::config(format!(
                    "{} fraction must lie in [0, 1), got {}",
                    name, fraction
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub subject_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub features: Vec<Vec<f64>>,
    pub label: u8,
}

impl Window {
    pub fn sample_count(&self) -> usize {
        self.features.len()
    }

    pub fn feature_count(&self) -> usize {
        self.features.first().map_or(0, Vec::len)
    }
}

fn slice_features(columns: &[&[Option<f64>]], lo: usize, hi: usize) -> Option<Vec<Vec<f64>>> {
    (lo..=hi)
        .map(|idx| columns.iter().map(|col| col[idx]).collect::<Option<Vec<f64>>>())
        .collect()
}

/// Scan `series` with a trailing and a leading index and emit every slice of
/// exactly `sample_count` points spanning at least `duration` whose tracked
/// columns are fully present and whose last point carries a label.
///
/// Slices failing any check are skipped silently.
pub fn extract_windows(
    series: &Series,
    columns: &[Column],
    config: &WindowConfig,
) -> PrepResult<Vec<Window>> {
    config.validate()?;
    if columns.is_empty() {
        return Err(PrepError::config("at least one tracked column is required"));
    }
    let tracked = columns
        .iter()
        .map(|&c| series.column(c))
        .collect::<PrepResult<Vec<_>>>()?;
    if series.timestamps.windows(2).any(|w| w[1] < w[0]) {
        return Err(PrepError::Shape(format!(
            "series '{}' is not in chronological order",
            series.subject_id
        )));
    }

    let ts = &series.timestamps;
    let mut windows = Vec::new();
    let mut trailing = 0;
    for leading in 0..ts.len() {
        while ts[leading] - ts[trailing] > config.duration {
            trailing += 1;
        }
        let count = leading - trailing + 1;
        if count != config.sample_count || ts[leading] - ts[trailing] < config.duration {
            continue;
        }
        let Some(label) = series.class[leading].target() else {
            continue;
        };
        let Some(features) = slice_features(&tracked, trailing, leading) else {
            continue;
        };
        windows.push(Window {
            subject_id: series.subject_id.clone(),
            start: ts[trailing],
            end: ts[leading],
            features,
            label,
        });
    }
    Ok(windows)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitPartition {
    pub train: Vec<Window>,
    pub val: Vec<Window>,
    pub test: Vec<Window>,
}

impl SplitPartition {
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reassemble(&self) -> Vec<Window> {
        self.train
            .iter()
            .chain(self.val.iter())
            .chain(self.test.iter())
            .cloned()
            .collect()
    }
}

fn held_out(n: usize, fraction: f64) -> usize {
    ((fraction * n as f64).ceil() as usize).min(n)
}

/// Chronological split without shuffling. The latest `ceil(test_fraction * n)`
/// windows become test; of the rest the latest `ceil(val_fraction * r)`
/// become validation.
pub fn split_chronological(mut windows: Vec<Window>, config: &WindowConfig) -> SplitPartition {
    let n_test = held_out(windows.len(), config.test_fraction);
    let test = windows.split_off(windows.len() - n_test);
    let n_val = held_out(windows.len(), config.val_fraction);
    let val = windows.split_off(windows.len() - n_val);
    SplitPartition {
        train: windows,
        val,
        test,
    }
}

pub fn windows_for_subject(
    series: &Series,
    columns: &[Column],
    config: &WindowConfig,
) -> PrepResult<Option<SplitPartition>> {
    let windows = extract_windows(series, columns, config)?;
    if windows.is_empty() {
        return Ok(None);
    }
    Ok(Some(split_chronological(windows, config)))
}
