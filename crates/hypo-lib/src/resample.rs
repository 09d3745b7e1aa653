use crate::error::{PrepError, PrepResult};
use crate::signal::{coerce_numeric, ClassLabel, RawRow, RawSeries, Series};
use chrono::{DateTime, NaiveDateTime, TimeDelta};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

const NANOS_PER_SEC: i64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResampleMode {
    ContinuousMonitoring,
    Vitals,
}

impl FromStr for ResampleMode {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continuous-monitoring" | "glucose" => Ok(ResampleMode::ContinuousMonitoring),
            "vitals" => Ok(ResampleMode::Vitals),
            other => Err(PrepError::config(format!(
                "unknown resample mode '{}' (expected continuous-monitoring or vitals)",
                other
            ))),
        }
    }
}

impl fmt::Display for ResampleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResampleMode::ContinuousMonitoring => write!(f, "continuous-monitoring"),
            ResampleMode::Vitals => write!(f, "vitals"),
        }
    }
}

/// Round `ts` to the nearest multiple of `freq` since the Unix epoch.
///
/// Exact halves go to the even tick. Returns `None` when the instant cannot be
/// represented in nanoseconds or `freq` is not positive.
pub fn round_to_grid(ts: NaiveDateTime, freq: TimeDelta) -> Option<NaiveDateTime> {
    let unit = freq.num_nanoseconds().filter(|n| *n > 0)?;
    let nanos = ts.and_utc().timestamp_nanos_opt()?;
    let mut quotient = nanos.div_euclid(unit);
    let twice_rem = 2 * nanos.rem_euclid(unit);
    if twice_rem > unit || (twice_rem == unit && quotient % 2 != 0) {
        quotient += 1;
    }
    let rounded = quotient.checked_mul(unit)?;
    DateTime::from_timestamp(
        rounded.div_euclid(NANOS_PER_SEC),
        rounded.rem_euclid(NANOS_PER_SEC) as u32,
    )
    .map(|dt| dt.naive_utc())
}

#[derive(Debug, Clone, Copy)]
struct Tick {
    at: NaiveDateTime,
    value: Option<f64>,
    paired: Option<f64>,
    class: ClassLabel,
}

impl Tick {
    fn from_row(at: NaiveDateTime, row: &RawRow) -> PrepResult<Self> {
        let class = match row.class {
            Some(code) => ClassLabel::from_code(code)?,
            None => ClassLabel::Unassigned,
        };
        Ok(Tick {
            at,
            value: coerce_numeric(row.value.as_deref()),
            paired: coerce_numeric(row.paired.as_deref()),
            class,
        })
    }
}

fn check_frequency(freq: TimeDelta) -> PrepResult<()> {
    if freq <= TimeDelta::zero() {
        return Err(PrepError::config(format!(
            "resample frequency must be positive, got {}s",
            freq.num_seconds()
        )));
    }
    Ok(())
}

fn dedupe_ticks<'a>(
    rows: impl IntoIterator<Item = &'a RawRow>,
    freq: TimeDelta,
) -> PrepResult<Vec<Tick>> {
    let mut seen = HashSet::new();
    let mut ticks = Vec::new();
    for row in rows {
        let Some(at) = row.timestamp.and_then(|ts| round_to_grid(ts, freq)) else {
            continue;
        };
        if seen.insert(at) {
            ticks.push(Tick::from_row(at, row)?);
        }
    }
    Ok(ticks)
}

fn sorted_rows(rows: &[RawRow]) -> Vec<&RawRow> {
    let mut sorted: Vec<&RawRow> = rows.iter().collect();
    sorted.sort_by_key(|row| (row.timestamp.is_none(), row.timestamp));
    sorted
}

fn materialize_grid(
    subject_id: &str,
    ticks: &[Tick],
    freq: TimeDelta,
    with_paired: bool,
) -> PrepResult<Series> {
    let (Some(first), Some(last)) = (ticks.first(), ticks.last()) else {
        return Err(PrepError::EmptySeries {
            subject: subject_id.to_string(),
        });
    };
    let mut series = Series::new(subject_id, with_paired);
    let mut observed = ticks.iter().peekable();
    let mut at = first.at;
    while at <= last.at {
        match observed.next_if(|tick| tick.at == at) {
            Some(tick) => series.push(at, tick.value, tick.paired, tick.class),
            None => series.push(at, None, None, ClassLabel::Unassigned),
        }
        at = match at.checked_add_signed(freq) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(series)
}

/// Resample one subject's raw rows. Unobserved ticks become explicit missing rows.
pub fn resample(raw: &RawSeries, freq: TimeDelta, mode: ResampleMode) -> PrepResult<Series> {
    check_frequency(freq)?;
    let series = match mode {
        ResampleMode::ContinuousMonitoring => {
            let ticks = dedupe_ticks(sorted_rows(&raw.rows), freq)?;
            materialize_grid(&raw.subject_id, &ticks, freq, raw.has_paired)?
        }
        ResampleMode::Vitals => {
            let mut ticks = dedupe_ticks(&raw.rows, freq)?;
            if ticks.is_empty() {
                return Err(PrepError::EmptySeries {
                    subject: raw.subject_id.clone(),
                });
            }
            ticks.sort_by_key(|tick| tick.at);
            let mut series = Series::new(&raw.subject_id, raw.has_paired);
            for tick in ticks {
                series.push(tick.at, tick.value, tick.paired, tick.class);
            }
            series
        }
    };
    debug!(
        "resampled {} ({}): {} raw rows -> {} points",
        raw.subject_id,
        mode,
        raw.rows.len(),
        series.len()
    );
    Ok(series)
}

/// Resample a source whose native rate is coarser than the grid.
///
/// Raw rows are split wherever two consecutive readings are more than
/// `native` apart. Inside each segment the grid is forward-filled from the
/// last reading, so only the undersampling holes are closed; the gaps between
/// segments stay missing.
pub fn fill_sampling_gaps(raw: &RawSeries, freq: TimeDelta, native: TimeDelta) -> PrepResult<Series> {
    check_frequency(freq)?;
    let sorted: Vec<&RawRow> = sorted_rows(&raw.rows)
        .into_iter()
        .filter(|row| row.timestamp.is_some())
        .collect();

    let mut segments: Vec<Vec<&RawRow>> = Vec::new();
    let mut previous: Option<NaiveDateTime> = None;
    for row in sorted {
        let Some(ts) = row.timestamp else { continue };
        let split = previous.map_or(true, |prev| ts - prev > native);
        if split {
            segments.push(Vec::new());
        }
        if let Some(segment) = segments.last_mut() {
            segment.push(row);
        }
        previous = Some(ts);
    }

    let mut ticks = Vec::new();
    let mut seen = HashSet::new();
    for segment in &segments {
        let segment_ticks = dedupe_ticks(segment.iter().copied(), freq)?;
        if segment_ticks.is_empty() {
            continue;
        }
        let mut filled = materialize_grid(&raw.subject_id, &segment_ticks, freq, raw.has_paired)?;
        forward_fill(&mut filled.value);
        for idx in 0..filled.len() {
            let at = filled.timestamps[idx];
            if seen.insert(at) {
                ticks.push(Tick {
                    at,
                    value: filled.value[idx],
                    paired: filled.paired.as_ref().and_then(|col| col[idx]),
                    class: filled.class[idx],
                });
            }
        }
    }
    ticks.sort_by_key(|tick| tick.at);
    materialize_grid(&raw.subject_id, &ticks, freq, raw.has_paired)
}

fn forward_fill(values: &mut [Option<f64>]) {
    let mut last = None;
    for value in values.iter_mut() {
        match value {
            Some(v) => last = Some(*v),
            None => *value = last,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRate {
    Minutes(u32),
    Unknown,
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleRate::Minutes(m) => write!(f, "{} min", m),
            SampleRate::Unknown => write!(f, "Unknown"),
        }
    }
}

pub const EXPECTED_RATES: [u32; 3] = [5, 10, 15];

/// Most common inter-sample interval, rounded to whole minutes, if it is one
/// of [`EXPECTED_RATES`].
pub fn detect_sample_rate(timestamps: &[NaiveDateTime]) -> SampleRate {
    let mut sorted = timestamps.to_vec();
    sorted.sort();
    let mut counts: Vec<(i64, usize)> = Vec::new();
    for pair in sorted.windows(2) {
        let minutes = ((pair[1] - pair[0]).num_milliseconds() as f64 / 60_000.0).round_ties_even() as i64;
        match counts.iter_mut().find(|(delta, _)| *delta == minutes) {
            Some((_, count)) => *count += 1,
            None => counts.push((minutes, 1)),
        }
    }
    // ties resolve to the interval seen first
    let mut best: Option<(i64, usize)> = None;
    for &(delta, count) in &counts {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((delta, count));
        }
    }
    match best {
        Some((delta, _)) if EXPECTED_RATES.iter().any(|r| *r as i64 == delta) => {
            SampleRate::Minutes(delta as u32)
        }
        _ => SampleRate::Unknown,
    }
}

/// Left-join a separately resampled vitals stream onto `primary` by exact
/// timestamp. The vitals `value` column becomes the primary's paired column.
pub fn merge_paired(primary: &mut Series, vitals: &Series) {
    let lookup: HashMap<NaiveDateTime, Option<f64>> = vitals
        .timestamps
        .iter()
        .copied()
        .zip(vitals.value.iter().copied())
        .collect();
    let paired = primary
        .timestamps
        .iter()
        .map(|ts| lookup.get(ts).copied().flatten())
        .collect();
    primary.paired = Some(paired);
}
