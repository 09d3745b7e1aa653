use anyhow::{Context, Result};
use hypo_lib::{
    impute, label_buckets, mark_threshold_events, merge_paired, min_max_scale, remove_outliers,
    resample::{fill_sampling_gaps, resample},
    windows_for_subject, Column, ImputeSummary, MinMax, OutlierMode, PrepError, RawRow, RawSeries,
    Series, SplitPartition,
};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::PipelineSettings;

/// Why one subject dropped out of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFailure {
    pub subject_id: String,
    pub stage: String,
    pub message: String,
}

impl SubjectFailure {
    fn new(subject_id: &str, stage: &str, err: impl std::fmt::Display) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            stage: stage.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectStats {
    pub subject_id: String,
    pub raw_rows: usize,
    pub points: usize,
    pub censored: usize,
    pub imputed: ImputeSummary,
    pub events: usize,
    pub labeled: usize,
    pub windows: usize,
}

#[derive(Debug, Clone)]
pub struct CleanedSubject {
    pub series: Series,
    pub stats: SubjectStats,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub series: Vec<Series>,
    pub partitions: Vec<SplitPartition>,
    pub columns: Vec<Column>,
    pub ranges: BTreeMap<String, MinMax>,
    pub stats: Vec<SubjectStats>,
    pub failures: Vec<SubjectFailure>,
}

fn split_streams(raw: &RawSeries) -> (RawSeries, RawSeries) {
    let primary = raw
        .rows
        .iter()
        .filter(|row| row.value.is_some())
        .map(|row| RawRow {
            paired: None,
            ..row.clone()
        })
        .collect();
    let vitals = raw
        .rows
        .iter()
        .filter(|row| row.paired.is_some())
        .map(|row| RawRow {
            value: row.paired.clone(),
            paired: None,
            class: None,
            ..row.clone()
        })
        .collect();
    (
        RawSeries {
            subject_id: raw.subject_id.clone(),
            has_paired: false,
            rows: primary,
        },
        RawSeries {
            subject_id: raw.subject_id.clone(),
            has_paired: false,
            rows: vitals,
        },
    )
}

fn grid(raw: &RawSeries, settings: &PipelineSettings) -> Result<Series, PrepError> {
    match settings.native {
        Some(native) => fill_sampling_gaps(raw, settings.frequency, native),
        None => resample(raw, settings.frequency, settings.resample_mode),
    }
}

fn align(raw: &RawSeries, settings: &PipelineSettings) -> Result<Series, PrepError> {
    match (&settings.paired, raw.has_paired) {
        (Some(paired), true) => {
            let (primary, vitals) = split_streams(raw);
            let mut series = grid(&primary, settings)?;
            // a subject without any paired reading still gets the column
            match resample(&vitals, settings.frequency, paired.resample_mode) {
                Ok(vitals) => merge_paired(&mut series, &vitals),
                Err(PrepError::EmptySeries { .. }) => series.paired = Some(vec![None; series.len()]),
                Err(err) => return Err(err),
            }
            Ok(series)
        }
        _ => grid(raw, settings),
    }
}

/// Resample, censor, impute and label one subject.
pub fn clean_subject(raw: &RawSeries, settings: &PipelineSettings) -> Result<CleanedSubject, SubjectFailure> {
    let id = raw.subject_id.as_str();
    let mut series = align(raw, settings).map_err(|e| SubjectFailure::new(id, "resample", e))?;

    // the paired column carries a vital sign even without a [paired] section
    let paired_outliers = settings
        .paired
        .map_or(OutlierMode::Vitals, |p| p.outlier_mode);
    let mut censored = remove_outliers(&mut series, Column::Value, settings.outlier_mode)
        .map_err(|e| SubjectFailure::new(id, "outliers", e))?;
    if series.has_column(Column::Paired) {
        censored += remove_outliers(&mut series, Column::Paired, paired_outliers)
            .map_err(|e| SubjectFailure::new(id, "outliers", e))?;
    }

    let mut imputed = impute(&mut series, Column::Value, settings.gap_limits)
        .map_err(|e| SubjectFailure::new(id, "impute", e))?;
    if series.has_column(Column::Paired) {
        let paired = impute(&mut series, Column::Paired, settings.gap_limits)
            .map_err(|e| SubjectFailure::new(id, "impute", e))?;
        imputed.linear += paired.linear;
        imputed.stineman += paired.stineman;
        imputed.remaining += paired.remaining;
    }

    if series.present_count(Column::Value).unwrap_or(0) == 0 {
        return Err(SubjectFailure::new(id, "clean", "no glucose reading survived cleaning"));
    }

    if let Some(threshold) = settings.event_threshold {
        mark_threshold_events(&mut series, Column::Value, threshold)
            .map_err(|e| SubjectFailure::new(id, "label", e))?;
    }
    let events = series
        .class
        .iter()
        .filter(|c| **c == hypo_lib::ClassLabel::Event)
        .count();
    let labeled = label_buckets(&mut series, &settings.labels)
        .map_err(|e| SubjectFailure::new(id, "label", e))?;

    let stats = SubjectStats {
        subject_id: raw.subject_id.clone(),
        raw_rows: raw.rows.len(),
        points: series.len(),
        censored,
        imputed,
        events,
        labeled,
        windows: 0,
    };
    debug!("{}: {:?}", id, stats);
    Ok(CleanedSubject { series, stats })
}

pub fn tracked_columns(series: &[Series]) -> Vec<Column> {
    let all_paired = !series.is_empty() && series.iter().all(|s| s.has_column(Column::Paired));
    if all_paired {
        vec![Column::Value, Column::Paired]
    } else {
        if series.iter().any(|s| s.has_column(Column::Paired)) {
            warn!("paired column missing for some subjects, windows use the value column only");
        }
        vec![Column::Value]
    }
}

/// Run the whole per-subject pipeline. `threads == None` lets rayon decide.
pub fn run_batch(
    subjects: &[RawSeries],
    settings: &PipelineSettings,
    threads: Option<usize>,
) -> Result<BatchOutput> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.unwrap_or(0))
        .build()
        .context("building worker pool")?;

    let cleaned: Vec<Result<CleanedSubject, SubjectFailure>> =
        pool.install(|| subjects.par_iter().map(|raw| clean_subject(raw, settings)).collect());

    let mut output = BatchOutput::default();
    let mut kept = Vec::new();
    for result in cleaned {
        match result {
            Ok(subject) => kept.push(subject),
            Err(failure) => {
                warn!("{} failed at {}: {}", failure.subject_id, failure.stage, failure.message);
                output.failures.push(failure);
            }
        }
    }
    let (series, mut stats): (Vec<Series>, Vec<SubjectStats>) =
        kept.into_iter().map(|c| (c.series, c.stats)).unzip();

    output.columns = tracked_columns(&series);
    // windows see scaled values, the kept series stays in original units
    let mut scaled = series.clone();
    if settings.normalize {
        for &column in &output.columns {
            if let Some(range) = min_max_scale(&mut scaled, column)? {
                info!("{}: min-max over [{}, {}]", column.name(), range.min, range.max);
                output.ranges.insert(column.name().to_string(), range);
            }
        }
    }

    let columns = output.columns.clone();
    let windowed: Vec<Result<Option<SplitPartition>, PrepError>> = pool.install(|| {
        scaled
            .par_iter()
            .map(|s| windows_for_subject(s, &columns, &settings.windows))
            .collect()
    });
    for ((s, stat), result) in series.iter().zip(stats.iter_mut()).zip(windowed) {
        match result {
            Ok(Some(partition)) => {
                stat.windows = partition.len();
                output.partitions.push(partition);
            }
            Ok(None) => debug!("{}: no valid windows", s.subject_id),
            Err(err) => output
                .failures
                .push(SubjectFailure::new(&s.subject_id, "windows", err)),
        }
    }

    info!(
        "{} subjects cleaned, {} with windows, {} failed",
        series.len(),
        output.partitions.len(),
        output.failures.len()
    );
    output.series = series;
    output.stats = stats;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PairedSettings;
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
    use hypo_lib::{ClassLabel, GapLimits, LabelRequest, OutlierMode, ResampleMode, WindowConfig};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            frequency: TimeDelta::minutes(5),
            native: None,
            resample_mode: ResampleMode::ContinuousMonitoring,
            outlier_mode: OutlierMode::Glucose,
            paired: None,
            gap_limits: GapLimits::default(),
            event_threshold: Some(70.0),
            labels: vec![
                LabelRequest::new(30, 0, 1).unwrap(),
                LabelRequest::new(60, 30, 2).unwrap(),
                LabelRequest::new(90, 60, 3).unwrap(),
                LabelRequest::new(120, 90, 4).unwrap(),
            ],
            windows: WindowConfig::default(),
            normalize: true,
        }
    }

    fn subject(id: &str, jitter_s: i64) -> RawSeries {
        let rows = (0..72)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * i as f64 / 36.0;
                let value = if i >= 70 { 65.0 } else { (140.0 + 60.0 * phase.sin()).round() };
                RawRow::new(
                    id,
                    Some(t0() + TimeDelta::minutes(5 * i) + TimeDelta::seconds(jitter_s)),
                    &value.to_string(),
                )
            })
            .collect();
        RawSeries {
            subject_id: id.into(),
            has_paired: false,
            rows,
        }
    }

    #[test]
    fn subjects_are_processed_in_order() {
        let subjects = vec![subject("a", 0), subject("b", 40)];
        let out = run_batch(&subjects, &settings(), Some(2)).unwrap();
        assert!(out.failures.is_empty());
        assert_eq!(out.series.len(), 2);
        assert_eq!(out.series[1].subject_id, "b");
        assert_eq!(out.columns, vec![Column::Value]);
        assert!(out.series.iter().all(|s| s.is_regular(TimeDelta::minutes(5))));
        assert_eq!(out.partitions.len(), 2);
        let w = &out.partitions[0].reassemble()[0];
        assert_eq!(w.subject_id, "a");
        assert!(w.features.iter().all(|f| (0.0..=1.0).contains(&f[0])));
        assert!(out.ranges.contains_key("value"));
        assert_eq!(out.stats[0].events, 2);
    }

    #[test]
    fn kept_series_stay_in_reading_units() {
        let out = run_batch(&[subject("a", 0)], &settings(), Some(1)).unwrap();
        let values: Vec<f64> = out.series[0].value.iter().flatten().copied().collect();
        assert!(values.iter().any(|v| *v > 1.0));
        assert_eq!(values.last().copied(), Some(65.0));
        let range = out.ranges["value"];
        assert_eq!(range.min, 65.0);
        let w = &out.partitions[0].reassemble()[0];
        assert!(w.features.iter().all(|f| (0.0..=1.0).contains(&f[0])));
    }

    #[test]
    fn broken_subject_does_not_stop_the_batch() {
        let mut broken = subject("broken", 0);
        for row in &mut broken.rows {
            row.timestamp = None;
        }
        let mut blank = subject("blank", 0);
        for row in &mut blank.rows {
            row.value = Some("0".into());
        }
        let subjects = vec![blank, broken, subject("ok", 0)];
        let out = run_batch(&subjects, &settings(), None).unwrap();
        assert_eq!(out.series.len(), 1);
        let stages: Vec<(&str, &str)> = out
            .failures
            .iter()
            .map(|f| (f.subject_id.as_str(), f.stage.as_str()))
            .collect();
        assert_eq!(stages, vec![("blank", "clean"), ("broken", "resample")]);
    }

    #[test]
    fn separate_paired_stream_is_aligned_to_the_grid() {
        let mut raw = subject("p", 0);
        raw.has_paired = true;
        for i in 0..72 {
            raw.rows.push(RawRow {
                subject_id: "p".into(),
                timestamp: Some(t0() + TimeDelta::minutes(5 * i) + TimeDelta::seconds(62)),
                value: None,
                paired: Some("72".into()),
                class: None,
            });
        }
        let mut s = settings();
        s.paired = Some(PairedSettings {
            resample_mode: ResampleMode::Vitals,
            outlier_mode: OutlierMode::Vitals,
        });
        let cleaned = clean_subject(&raw, &s).unwrap();
        assert_eq!(cleaned.series.len(), 72);
        let paired = cleaned.series.paired.as_ref().unwrap();
        assert!(paired.iter().all(|v| *v == Some(72.0)));
        assert_eq!(cleaned.series.class[71], ClassLabel::Event);
        assert_eq!(tracked_columns(&[cleaned.series]), vec![Column::Value, Column::Paired]);
    }

    #[test]
    fn inline_heart_rate_uses_the_vitals_band() {
        let mut raw = subject("hr", 0);
        raw.has_paired = true;
        for (i, row) in raw.rows.iter_mut().enumerate() {
            row.paired = Some(if i % 2 == 0 { "36" } else { "38" }.into());
        }
        let cleaned = clean_subject(&raw, &settings()).unwrap();
        let paired = cleaned.series.paired.as_ref().unwrap();
        assert_eq!(paired.iter().flatten().count(), 72);
        assert_eq!(paired[0], Some(36.0));
        assert_eq!(paired[1], Some(38.0));
    }

    #[test]
    fn labels_follow_threshold_events() {
        let cleaned = clean_subject(&subject("a", 0), &settings()).unwrap();
        let class = &cleaned.series.class;
        assert_eq!(class[70], ClassLabel::Event);
        assert_eq!(class[69], ClassLabel::Bucket(1));
        // 05:15 is 35 minutes before the first event
        assert_eq!(class[63], ClassLabel::Bucket(2));
        assert_eq!(class[45], ClassLabel::Unassigned);
    }
}
