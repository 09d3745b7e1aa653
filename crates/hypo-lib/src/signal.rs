use crate::error::{PrepError, PrepResult};
use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label attached to every point of a series.
///
/// `Unassigned` is the only state that accepts a new label: an `Event` or a
/// `Bucket` is final once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClassLabel {
    #[default]
    Unassigned,
    Event,
    Bucket(u8),
}

impl ClassLabel {
    pub const MAX_BUCKET: u8 = 4;

    pub fn code(self) -> i8 {
        match self {
            ClassLabel::Unassigned => -1,
            ClassLabel::Event => 0,
            ClassLabel::Bucket(n) => n as i8,
        }
    }

    pub fn from_code(code: i64) -> PrepResult<Self> {
        match code {
            -1 => Ok(ClassLabel::Unassigned),
            0 => Ok(ClassLabel::Event),
            1..=4 => Ok(ClassLabel::Bucket(code as u8)),
            _ => Err(PrepError::InvalidClass { code }),
        }
    }

    pub fn bucket(n: u8) -> PrepResult<Self> {
        if (1..=Self::MAX_BUCKET).contains(&n) {
            Ok(ClassLabel::Bucket(n))
        } else {
            Err(PrepError::InvalidClass { code: n as i64 })
        }
    }

    pub fn is_assigned(self) -> bool {
        !matches!(self, ClassLabel::Unassigned)
    }

    /// First assignment wins: only an unassigned point takes `incoming`.
    pub fn merge(self, incoming: ClassLabel) -> ClassLabel {
        match self {
            ClassLabel::Unassigned => incoming,
            settled => settled,
        }
    }

    pub fn target(self) -> Option<u8> {
        match self {
            ClassLabel::Unassigned => None,
            ClassLabel::Event => Some(0),
            ClassLabel::Bucket(n) => Some(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Value,
    Paired,
}

impl Column {
    pub fn name(self) -> &'static str {
        match self {
            Column::Value => "value",
            Column::Paired => "paired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub subject_id: String,
    /// `None` when the adapter could not parse the instant.
    pub timestamp: Option<NaiveDateTime>,
    pub value: Option<String>,
    pub paired: Option<String>,
    pub class: Option<i64>,
}

impl RawRow {
    pub fn new(subject_id: impl Into<String>, timestamp: Option<NaiveDateTime>, value: &str) -> Self {
        Self {
            subject_id: subject_id.into(),
            timestamp,
            value: Some(value.to_string()),
            paired: None,
            class: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawSeries {
    pub subject_id: String,
    pub has_paired: bool,
    pub rows: Vec<RawRow>,
}

/// Partition rows by subject id. Subjects come out sorted by id, rows keep
/// their input order.
pub fn group_by_subject(rows: Vec<RawRow>, has_paired: bool) -> Vec<RawSeries> {
    let mut groups: BTreeMap<String, Vec<RawRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.subject_id.clone()).or_default().push(row);
    }
    groups
        .into_iter()
        .map(|(subject_id, rows)| RawSeries {
            subject_id,
            has_paired,
            rows,
        })
        .collect()
}

/// Lenient numeric coercion: anything unparsable or non-finite is missing.
pub fn coerce_numeric(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimePoint {
    pub subject_id: String,
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
    pub paired: Option<f64>,
    pub class: ClassLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub subject_id: String,
    pub timestamps: Vec<NaiveDateTime>,
    pub value: Vec<Option<f64>>,
    /// `None` when the series has no paired column.
    pub paired: Option<Vec<Option<f64>>>,
    pub class: Vec<ClassLabel>,
}

impl Series {
    pub fn new(subject_id: impl Into<String>, with_paired: bool) -> Self {
        Self {
            subject_id: subject_id.into(),
            timestamps: Vec::new(),
            value: Vec::new(),
            paired: with_paired.then(Vec::new),
            class: Vec::new(),
        }
    }

    pub fn from_values(
        subject_id: impl Into<String>,
        timestamps: Vec<NaiveDateTime>,
        value: Vec<Option<f64>>,
    ) -> PrepResult<Self> {
        if timestamps.len() != value.len() {
            return Err(PrepError::Shape(format!(
                "{} timestamps for {} values",
                timestamps.len(),
                value.len()
            )));
        }
        let class = vec![ClassLabel::Unassigned; timestamps.len()];
        Ok(Self {
            subject_id: subject_id.into(),
            timestamps,
            value,
            paired: None,
            class,
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn has_column(&self, column: Column) -> bool {
        match column {
            Column::Value => true,
            Column::Paired => self.paired.is_some(),
        }
    }

    pub fn push(
        &mut self,
        timestamp: NaiveDateTime,
        value: Option<f64>,
        paired: Option<f64>,
        class: ClassLabel,
    ) {
        self.timestamps.push(timestamp);
        self.value.push(value);
        if let Some(col) = self.paired.as_mut() {
            col.push(paired);
        }
        self.class.push(class);
    }

    pub fn column(&self, column: Column) -> PrepResult<&[Option<f64>]> {
        match column {
            Column::Value => Ok(&self.value),
            Column::Paired => self
                .paired
                .as_deref()
                .ok_or_else(|| PrepError::missing_column(column.name())),
        }
    }

    pub fn column_mut(&mut self, column: Column) -> PrepResult<&mut [Option<f64>]> {
        match column {
            Column::Value => Ok(&mut self.value),
            Column::Paired => self
                .paired
                .as_deref_mut()
                .ok_or_else(|| PrepError::missing_column(column.name())),
        }
    }

    pub fn point(&self, idx: usize) -> Option<TimePoint> {
        let timestamp = *self.timestamps.get(idx)?;
        Some(TimePoint {
            subject_id: self.subject_id.clone(),
            timestamp,
            value: self.value[idx],
            paired: self.paired.as_ref().and_then(|col| col[idx]),
            class: self.class[idx],
        })
    }

    pub fn present_count(&self, column: Column) -> PrepResult<usize> {
        Ok(self.column(column)?.iter().filter(|v| v.is_some()).count())
    }

    pub fn span(&self) -> Option<TimeDelta> {
        Some(*self.timestamps.last()? - *self.timestamps.first()?)
    }

    pub fn is_strictly_increasing(&self) -> bool {
        self.timestamps.windows(2).all(|w| w[0] < w[1])
    }

    pub fn is_regular(&self, freq: TimeDelta) -> bool {
        self.timestamps.windows(2).all(|w| w[1] - w[0] == freq)
    }
}

/// Seconds elapsed from `origin` to `t`, millisecond resolution.
pub fn seconds_since(origin: NaiveDateTime, t: NaiveDateTime) -> f64 {
    (t - origin).num_milliseconds() as f64 / 1000.0
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

    #[test]
    fn class_codes_roundtrip_through_labels() {
        for code in -1..=4 {
            assert_eq!(ClassLabel::from_code(code).unwrap().code() as i64, code);
        }
        assert!(matches!(
            ClassLabel::from_code(5),
            Err(PrepError::InvalidClass { code: 5 })
        ));
    }

    #[test]
    fn merge_only_overwrites_unassigned() {
        let b1 = ClassLabel::Bucket(1);
        let b2 = ClassLabel::Bucket(2);
        assert_eq!(ClassLabel::Unassigned.merge(b2), b2);
        assert_eq!(b1.merge(b2), b1);
        assert_eq!(ClassLabel::Event.merge(b2), ClassLabel::Event);
    }

    #[test]
    fn missing_paired_column_is_reported() {
        let series = Series::from_values("s", vec![at(0, 0)], vec![Some(1.0)]).unwrap();
        assert_eq!(
            series.column(Column::Paired),
            Err(PrepError::missing_column("paired"))
        );
    }

    #[test]
    fn groups_sorted_by_subject_preserving_row_order() {
        let rows = vec![
            RawRow::new("b", Some(at(0, 5)), "1"),
            RawRow::new("a", Some(at(0, 0)), "2"),
            RawRow::new("b", Some(at(0, 0)), "3"),
        ];
        let groups = group_by_subject(rows, false);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].subject_id, "a");
        assert_eq!(groups[1].rows[0].value.as_deref(), Some("1"));
        assert_eq!(groups[1].rows[1].value.as_deref(), Some("3"));
    }

    #[test]
    fn coercion_treats_garbage_as_missing() {
        assert_eq!(coerce_numeric(Some(" 101.5 ")), Some(101.5));
        assert_eq!(coerce_numeric(Some("HIGH")), None);
        assert_eq!(coerce_numeric(Some("nan")), None);
        assert_eq!(coerce_numeric(None), None);
    }
}
