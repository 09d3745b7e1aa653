use crate::error::{PrepError, PrepResult};
use crate::signal::{ClassLabel, Column, Series};
use chrono::{NaiveDateTime, TimeDelta};
use log::debug;
use serde::{Deserialize, Serialize};

/// One bucket to paint before every event: points whose timestamp `t`
/// satisfies `T - start < t <= T - end` for some event time `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRequest {
    pub start_minutes: i64,
    pub end_minutes: i64,
    pub class: u8,
}

impl LabelRequest {
    pub fn new(start_minutes: i64, end_minutes: i64, class: u8) -> PrepResult<Self> {
        let request = Self {
            start_minutes,
            end_minutes,
            class,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> PrepResult<()> {
        if self.start_minutes <= self.end_minutes {
            return Err(PrepError::config(format!(
                "label window start ({}) must exceed end ({})",
                self.start_minutes, self.end_minutes
            )));
        }
        for (what, minutes) in [("start", self.start_minutes), ("end", self.end_minutes)] {
            if TimeDelta::try_minutes(minutes).is_none() {
                return Err(PrepError::config(format!(
                    "label window {} ({} min) is out of range",
                    what, minutes
                )));
            }
        }
        if !(1..=ClassLabel::MAX_BUCKET).contains(&self.class) {
            return Err(PrepError::config(format!(
                "label class {} is outside 1..={}",
                self.class,
                ClassLabel::MAX_BUCKET
            )));
        }
        Ok(())
    }

    fn label(&self) -> ClassLabel {
        ClassLabel::Bucket(self.class)
    }
}

fn event_times(series: &Series) -> Vec<NaiveDateTime> {
    let mut events: Vec<NaiveDateTime> = series
        .timestamps
        .iter()
        .zip(series.class.iter())
        .filter(|(_, class)| **class == ClassLabel::Event)
        .map(|(t, _)| *t)
        .collect();
    events.sort();
    events
}

/// Paint `request.class` onto every unassigned point that falls in the
/// request's window before an event. Points already labeled keep their label,
/// so the first request to cover a point wins. Returns the number of points
/// newly labeled.
pub fn label_events(series: &mut Series, request: &LabelRequest) -> PrepResult<usize> {
    request.validate()?;
    let events = event_times(series);
    if events.is_empty() {
        return Ok(0);
    }
    let (Some(start), Some(end)) = (
        TimeDelta::try_minutes(request.start_minutes),
        TimeDelta::try_minutes(request.end_minutes),
    ) else {
        return Err(PrepError::config("label window is out of range"));
    };
    let incoming = request.label();

    let mut labeled = 0;
    for (t, class) in series.timestamps.iter().zip(series.class.iter_mut()) {
        if class.is_assigned() {
            continue;
        }
        // an event T covers t when t + end <= T < t + start; past the
        // calendar range a bound saturates
        let first = match t.checked_add_signed(end) {
            Some(lo) => events.partition_point(|&e| e < lo),
            None if end > TimeDelta::zero() => events.len(),
            None => 0,
        };
        let below_hi = |e: NaiveDateTime| {
            t.checked_add_signed(start)
                .map_or(start > TimeDelta::zero(), |hi| e < hi)
        };
        if events.get(first).is_some_and(|&e| below_hi(e)) {
            *class = class.merge(incoming);
            labeled += 1;
        }
    }
    Ok(labeled)
}

/// Apply `requests` in order. Overlaps resolve to the earliest request.
pub fn label_buckets(series: &mut Series, requests: &[LabelRequest]) -> PrepResult<usize> {
    let mut total = 0;
    for request in requests {
        let n = label_events(series, request)?;
        debug!(
            "{}: ({}, {}] min before events -> class {}: {} points",
            series.subject_id, request.start_minutes, request.end_minutes, request.class, n
        );
        total += n;
    }
    Ok(total)
}

/// Mark unassigned points whose `column` reading is below `threshold` as
/// events. Existing labels are kept.
pub fn mark_threshold_events(series: &mut Series, column: Column, threshold: f64) -> PrepResult<usize> {
    if !threshold.is_finite() {
        return Err(PrepError::config(format!(
            "event threshold must be finite, got {}",
            threshold
        )));
    }
    let values = match column {
        Column::Value => &series.value,
        Column::Paired => series
            .paired
            .as_ref()
            .ok_or_else(|| PrepError::missing_column(column.name()))?,
    };
    let mut marked = 0;
    for (value, class) in values.iter().zip(series.class.iter_mut()) {
        if value.is_some_and(|v| v < threshold) && !class.is_assigned() {
            *class = ClassLabel::Event;
            marked += 1;
        }
    }
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    /// 08:00..=12:00 every 5 minutes, event at 12:00.
    fn morning() -> Series {
        let ts: Vec<NaiveDateTime> = (0..=48)
            .map(|i| at(8, 0) + TimeDelta::minutes(5 * i))
            .collect();
        let mut s = Series::from_values("s", ts.clone(), vec![Some(100.0); ts.len()]).unwrap();
        if let Some(last) = s.class.last_mut() {
            *last = ClassLabel::Event;
        }
        s
    }

    fn index_of(s: &Series, t: NaiveDateTime) -> usize {
        s.timestamps.iter().position(|&x| x == t).unwrap()
    }

    #[test]
    fn bucket_window_is_open_on_the_left() {
        let mut s = morning();
        let preset = index_of(&s, at(10, 15));
        s.class[preset] = ClassLabel::Bucket(4);

        let n = label_events(&mut s, &LabelRequest::new(120, 90, 2).unwrap()).unwrap();
        // 10:05, 10:10, 10:20, 10:25, 10:30
        assert_eq!(n, 5);
        assert_eq!(s.class[index_of(&s, at(10, 0))], ClassLabel::Unassigned);
        assert_eq!(s.class[index_of(&s, at(10, 5))], ClassLabel::Bucket(2));
        assert_eq!(s.class[index_of(&s, at(10, 30))], ClassLabel::Bucket(2));
        assert_eq!(s.class[index_of(&s, at(10, 35))], ClassLabel::Unassigned);
        assert_eq!(s.class[preset], ClassLabel::Bucket(4));
        assert_eq!(s.class[index_of(&s, at(12, 0))], ClassLabel::Event);
    }

    #[test]
    fn first_request_wins_on_overlap() {
        let mut s = morning();
        label_buckets(
            &mut s,
            &[
                LabelRequest::new(60, 30, 1).unwrap(),
                LabelRequest::new(120, 60, 2).unwrap(),
            ],
        )
        .unwrap();
        assert_eq!(s.class[index_of(&s, at(11, 5))], ClassLabel::Bucket(1));
        assert_eq!(s.class[index_of(&s, at(11, 30))], ClassLabel::Bucket(1));
        assert_eq!(s.class[index_of(&s, at(11, 0))], ClassLabel::Bucket(2));
        assert_eq!(s.class[index_of(&s, at(10, 5))], ClassLabel::Bucket(2));
        assert_eq!(s.class[index_of(&s, at(11, 35))], ClassLabel::Unassigned);
    }

    #[test]
    fn overlapping_event_windows_keep_the_earlier_class() {
        let mut s = morning();
        let second = index_of(&s, at(11, 30));
        s.class[second] = ClassLabel::Event;
        label_events(&mut s, &LabelRequest::new(60, 30, 1).unwrap()).unwrap();
        label_events(&mut s, &LabelRequest::new(120, 60, 2).unwrap()).unwrap();
        // 10:45 is 45 min before 11:30 and 75 min before 12:00
        assert_eq!(s.class[index_of(&s, at(10, 45))], ClassLabel::Bucket(1));
        assert_eq!(s.class[index_of(&s, at(10, 30))], ClassLabel::Bucket(2));
        assert_eq!(s.class[index_of(&s, at(11, 30))], ClassLabel::Event);
    }

    #[test]
    fn events_are_never_overwritten() {
        let mut s = morning();
        let earlier = index_of(&s, at(11, 0));
        s.class[earlier] = ClassLabel::Event;
        label_events(&mut s, &LabelRequest::new(120, 0, 1).unwrap()).unwrap();
        assert_eq!(s.class[index_of(&s, at(11, 0))], ClassLabel::Event);
        assert_eq!(s.class[index_of(&s, at(12, 0))], ClassLabel::Event);
        assert_eq!(s.class[index_of(&s, at(10, 30))], ClassLabel::Bucket(1));
    }

    #[test]
    fn no_events_means_no_labels() {
        let mut s = morning();
        s.class.iter_mut().for_each(|c| *c = ClassLabel::Unassigned);
        assert_eq!(
            label_events(&mut s, &LabelRequest::new(30, 0, 1).unwrap()).unwrap(),
            0
        );
    }

    #[test]
    fn threshold_marks_low_readings() {
        let mut s = Series::from_values(
            "s",
            vec![at(0, 0), at(0, 5), at(0, 10), at(0, 15)],
            vec![Some(90.0), Some(65.0), None, Some(69.9)],
        )
        .unwrap();
        s.class[3] = ClassLabel::Bucket(1);
        assert_eq!(mark_threshold_events(&mut s, Column::Value, 70.0).unwrap(), 1);
        assert_eq!(
            s.class,
            vec![
                ClassLabel::Unassigned,
                ClassLabel::Event,
                ClassLabel::Unassigned,
                ClassLabel::Bucket(1)
            ]
        );
    }

    #[test]
    fn malformed_requests_are_configuration_errors() {
        assert!(LabelRequest::new(30, 30, 1).unwrap_err().is_fatal());
        assert!(LabelRequest::new(60, 30, 0).is_err());
        assert!(LabelRequest::new(60, 30, 5).is_err());
    }

    #[test]
    fn oversized_windows_are_rejected_or_saturate() {
        assert!(LabelRequest::new(i64::MAX, 0, 1).unwrap_err().is_fatal());
        assert!(LabelRequest::new(30, i64::MIN, 1).is_err());

        // in range for a duration, far past the calendar: covers every point before the event
        let mut s = morning();
        let wide = LabelRequest::new(i64::MAX / 120_000, 0, 3).unwrap();
        let n = label_events(&mut s, &wide).unwrap();
        assert_eq!(n, s.len() - 1);
        assert_eq!(s.class[0], ClassLabel::Bucket(3));

        let mut s = morning();
        let late = LabelRequest::new(i64::MAX / 120_000, i64::MAX / 240_000, 3).unwrap();
        assert_eq!(label_events(&mut s, &late).unwrap(), 0);
    }
}
