use crate::error::{PrepError, PrepResult};
use crate::signal::{Column, Series};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMode {
    /// CGM glucose in mg/dL.
    Glucose,
    /// Vital signs such as heart rate.
    Vitals,
}

impl OutlierMode {
    /// Absolute plausibility band `(floor, ceiling)`.
    pub fn band(self) -> (f64, Option<f64>) {
        match self {
            OutlierMode::Glucose => (40.0, Some(500.0)),
            OutlierMode::Vitals => (30.0, None),
        }
    }

    fn implausible(self, v: f64) -> bool {
        let (floor, ceiling) = self.band();
        v < floor || ceiling.is_some_and(|c| v > c)
    }
}

impl FromStr for OutlierMode {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "glucose" => Ok(OutlierMode::Glucose),
            "vitals" => Ok(OutlierMode::Vitals),
            other => Err(PrepError::config(format!(
                "unknown outlier mode '{}' (expected glucose or vitals)",
                other
            ))),
        }
    }
}

impl fmt::Display for OutlierMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutlierMode::Glucose => write!(f, "glucose"),
            OutlierMode::Vitals => write!(f, "vitals"),
        }
    }
}

/// Linearly interpolated quantile of already sorted data.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// Censor zeros, IQR outliers and physiologically implausible readings to
/// missing. Rows are never removed. Returns how many readings were censored.
pub fn remove_outliers(series: &mut Series, column: Column, mode: OutlierMode) -> PrepResult<usize> {
    let values = series.column_mut(column)?;
    let mut censored = 0;
    for value in values.iter_mut() {
        if *value == Some(0.0) {
            *value = None;
            censored += 1;
        }
    }

    let mut present: Vec<f64> = values.iter().flatten().copied().collect();
    present.sort_by(f64::total_cmp);
    let fences = match (quantile(&present, 0.25), quantile(&present, 0.75)) {
        (Some(q1), Some(q3)) => {
            let iqr = q3 - q1;
            Some((q1 - 1.5 * iqr, q3 + 1.5 * iqr))
        }
        _ => None,
    };

    for value in values.iter_mut() {
        let Some(v) = *value else { continue };
        let statistical = fences.is_some_and(|(lower, upper)| v < lower || v > upper);
        if statistical || mode.implausible(v) {
            *value = None;
            censored += 1;
        }
    }
    debug!(
        "{}: censored {} {} readings ({} mode)",
        series.subject_id,
        censored,
        column.name(),
        mode
    );
    Ok(censored)
}
