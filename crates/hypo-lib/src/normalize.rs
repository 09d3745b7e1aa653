use crate::error::{PrepError, PrepResult};
use crate::signal::{Column, Series};
use crate::windows::{SplitPartition, Window};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Observed range of one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

impl MinMax {
    /// Range over the present values of `column` in every series.
    pub fn observe(series: &[Series], column: Column) -> PrepResult<Option<Self>> {
        let mut range: Option<MinMax> = None;
        for s in series {
            for v in s.column(column)?.iter().flatten() {
                range = Some(match range {
                    Some(r) => MinMax {
                        min: r.min.min(*v),
                        max: r.max.max(*v),
                    },
                    None => MinMax { min: *v, max: *v },
                });
            }
        }
        Ok(range)
    }

    /// `None` when the range is empty, the 0/0 case.
    pub fn scale(&self, v: f64) -> Option<f64> {
        let width = self.max - self.min;
        (width > 0.0).then(|| (v - self.min) / width)
    }
}

/// Scale `column` of every series to [0, 1] with statistics taken over all
/// of them together. Returns the range used, `None` if no value was present.
pub fn min_max_scale(series: &mut [Series], column: Column) -> PrepResult<Option<MinMax>> {
    let Some(range) = MinMax::observe(series, column)? else {
        return Ok(None);
    };
    for s in series.iter_mut() {
        for value in s.column_mut(column)?.iter_mut() {
            *value = value.and_then(|v| range.scale(v));
        }
    }
    Ok(Some(range))
}

/// Features `[windows, samples, features]` and labels `[windows, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatArrays {
    pub x: Array3<f64>,
    pub y: Array2<i64>,
}

impl FlatArrays {
    pub fn len(&self) -> usize {
        self.y.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Concatenate window lists in order and reshape into arrays. Every window
/// must have `sample_count` rows of `feature_count` values.
pub fn flatten<'a, I>(windows: I, sample_count: usize, feature_count: usize) -> PrepResult<FlatArrays>
where
    I: IntoIterator<Item = &'a Window>,
{
    let mut x = Vec::new();
    let mut y = Vec::new();
    for window in windows {
        if window.sample_count() != sample_count
            || window.features.iter().any(|row| row.len() != feature_count)
        {
            return Err(PrepError::Shape(format!(
                "window of {} at {} is {}x{}, expected {}x{}",
                window.subject_id,
                window.end,
                window.sample_count(),
                window.feature_count(),
                sample_count,
                feature_count
            )));
        }
        x.extend(window.features.iter().flatten().copied());
        y.push(window.label as i64);
    }
    let n = y.len();
    let x = Array3::from_shape_vec((n, sample_count, feature_count), x)
        .map_err(|e| PrepError::Shape(e.to_string()))?;
    let y = Array2::from_shape_vec((n, 1), y).map_err(|e| PrepError::Shape(e.to_string()))?;
    Ok(FlatArrays { x, y })
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatSplits {
    pub train: FlatArrays,
    pub val: FlatArrays,
    pub test: FlatArrays,
}

/// Flatten per-subject partitions split by split, subjects in the given order.
pub fn flatten_splits(
    partitions: &[SplitPartition],
    sample_count: usize,
    feature_count: usize,
) -> PrepResult<FlatSplits> {
    Ok(FlatSplits {
        train: flatten(partitions.iter().flat_map(|p| &p.train), sample_count, feature_count)?,
        val: flatten(partitions.iter().flat_map(|p| &p.val), sample_count, feature_count)?,
        test: flatten(partitions.iter().flat_map(|p| &p.test), sample_count, feature_count)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn series(id: &str, values: Vec<Option<f64>>) -> Series {
        let ts = (0..values.len())
            .map(|i| t0() + TimeDelta::minutes(5 * i as i64))
            .collect();
        Series::from_values(id, ts, values).unwrap()
    }

    fn window(id: &str, base: f64, label: u8) -> Window {
        Window {
            subject_id: id.into(),
            start: t0(),
            end: t0() + TimeDelta::hours(2),
            features: (0..3).map(|i| vec![base + i as f64, -base]).collect(),
            label,
        }
    }

    #[test]
    fn scaling_uses_statistics_across_subjects() {
        let mut all = vec![
            series("a", vec![Some(50.0), None, Some(100.0)]),
            series("b", vec![Some(150.0), Some(250.0)]),
        ];
        let range = min_max_scale(&mut all, Column::Value).unwrap().unwrap();
        assert_eq!(range, MinMax { min: 50.0, max: 250.0 });
        assert_eq!(all[0].value, vec![Some(0.0), None, Some(0.25)]);
        assert_eq!(all[1].value, vec![Some(0.5), Some(1.0)]);
    }

    #[test]
    fn constant_column_becomes_missing() {
        let mut all = vec![series("a", vec![Some(7.0), Some(7.0)])];
        min_max_scale(&mut all, Column::Value).unwrap();
        assert_eq!(all[0].value, vec![None, None]);
        let mut empty = vec![series("a", vec![None])];
        assert_eq!(min_max_scale(&mut empty, Column::Value).unwrap(), None);
    }

    #[test]
    fn flatten_keeps_window_order() {
        let windows = vec![window("a", 1.0, 2), window("b", 10.0, 0)];
        let flat = flatten(&windows, 3, 2).unwrap();
        assert_eq!(flat.x.shape(), &[2, 3, 2]);
        assert_eq!(flat.y.shape(), &[2, 1]);
        assert_eq!(flat.x[[0, 2, 0]], 3.0);
        assert_eq!(flat.x[[1, 0, 1]], -10.0);
        assert_eq!(flat.y[[1, 0]], 0);
    }

    #[test]
    fn splits_concatenate_subjects() {
        let partitions = vec![
            SplitPartition {
                train: vec![window("a", 1.0, 1), window("a", 2.0, 1)],
                val: vec![],
                test: vec![window("a", 3.0, 0)],
            },
            SplitPartition {
                train: vec![window("b", 4.0, 4)],
                val: vec![window("b", 5.0, 3)],
                test: vec![window("b", 6.0, 2)],
            },
        ];
        let flat = flatten_splits(&partitions, 3, 2).unwrap();
        assert_eq!(flat.train.len(), 3);
        assert_eq!(flat.val.len(), 1);
        assert_eq!(flat.test.y.column(0).to_vec(), vec![0, 2]);
        assert_eq!(flat.train.x[[2, 0, 0]], 4.0);
        assert!(flatten_splits(&[], 3, 2).unwrap().train.is_empty());
    }

    #[test]
    fn inconsistent_windows_are_shape_errors() {
        let windows = vec![window("a", 1.0, 2)];
        assert!(matches!(flatten(&windows, 25, 2), Err(PrepError::Shape(_))));
        assert!(matches!(flatten(&windows, 3, 1), Err(PrepError::Shape(_))));
    }
}
