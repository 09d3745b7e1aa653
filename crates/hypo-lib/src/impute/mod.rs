pub mod runs;
pub mod stineman;

use crate::error::{PrepError, PrepResult};
use crate::signal::{seconds_since, Column, Series};
use log::debug;
use runs::missing_runs;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapLimits {
    pub lower: usize,
    pub upper: usize,
}

impl Default for GapLimits {
    fn default() -> Self {
        Self { lower: 6, upper: 24 }
    }
}

impl GapLimits {
    pub fn new(lower: usize, upper: usize) -> PrepResult<Self> {
        let limits = Self { lower, upper };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> PrepResult<()> {
        if self.lower == 0 || self.lower >= self.upper {
            return Err(PrepError::config(format!(
                "gap limits need 0 < lower < upper, got lower={} upper={}",
                self.lower, self.upper
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImputeSummary {
    pub linear: usize,
    pub stineman: usize,
    pub remaining: usize,
}

/// Fill runs shorter than `lower_limit` linearly. A trailing run holds the last reading.
pub fn fill_linear(series: &mut Series, column: Column, lower_limit: usize) -> PrepResult<usize> {
    let times: Vec<f64> = match series.timestamps.first() {
        Some(&origin) => series
            .timestamps
            .iter()
            .map(|&t| seconds_since(origin, t))
            .collect(),
        None => return Ok(0),
    };
    let values = series.column_mut(column)?;
    let total = values.len();
    let mut filled = 0;
    for run in missing_runs(values) {
        if run.len >= lower_limit {
            continue;
        }
        let Some(left) = run.left() else { continue };
        let Some(a) = values[left] else { continue };
        match run.right(total).and_then(|right| values[right].map(|b| (right, b))) {
            Some((right, b)) => {
                let (t0, t1) = (times[left], times[right]);
                for idx in run.start..run.end() {
                    values[idx] = Some(a + (b - a) * (times[idx] - t0) / (t1 - t0));
                }
            }
            None => {
                for value in &mut values[run.start..run.end()] {
                    *value = Some(a);
                }
            }
        }
        filled += run.len;
    }
    Ok(filled)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round_ties_even() / 100.0
}

/// Fill runs whose length lies in `[lower, upper)` with Stineman's
/// interpolant through every known reading, then round the column to two
/// decimals.
///
/// With fewer than two known readings the column is returned untouched.
/// Interpolated values that are not finite stay missing.
pub fn fill_stineman(series: &mut Series, column: Column, limits: GapLimits) -> PrepResult<usize> {
    limits.validate()?;
    let times: Vec<f64> = match series.timestamps.first() {
        Some(&origin) => series
            .timestamps
            .iter()
            .map(|&t| seconds_since(origin, t))
            .collect(),
        None => return Ok(0),
    };
    let values = series.column_mut(column)?;

    let (x_known, y_known): (Vec<f64>, Vec<f64>) = values
        .iter()
        .zip(times.iter())
        .filter_map(|(v, t)| v.map(|y| (*t, y)))
        .unzip();
    if x_known.len() < 2 {
        return Ok(0);
    }

    let targets: Vec<usize> = missing_runs(values)
        .into_iter()
        .filter(|run| run.len >= limits.lower && run.len < limits.upper)
        .flat_map(|run| run.start..run.end())
        .collect();
    let queries: Vec<f64> = targets.iter().map(|&idx| times[idx]).collect();
    let estimates = stineman::interpolate(&queries, &x_known, &y_known, None);

    let mut filled = 0;
    for (&idx, &estimate) in targets.iter().zip(estimates.iter()) {
        if estimate.is_finite() {
            values[idx] = Some(estimate);
            filled += 1;
        }
    }
    for value in values.iter_mut() {
        *value = value.map(round2);
    }
    Ok(filled)
}

pub fn impute(series: &mut Series, column: Column, limits: GapLimits) -> PrepResult<ImputeSummary> {
    limits.validate()?;
    let linear = fill_linear(series, column, limits.lower)?;
    let stineman = fill_stineman(series, column, limits)?;
    let remaining = series.column(column)?.iter().filter(|v| v.is_none()).count();
    debug!(
        "{}: imputed {} linear + {} stineman {} values, {} still missing",
        series.subject_id,
        linear,
        stineman,
        column.name(),
        remaining
    );
    Ok(ImputeSummary {
        linear,
        stineman,
        remaining,
    })
}
