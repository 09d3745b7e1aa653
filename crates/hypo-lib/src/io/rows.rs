use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::fs::File;
use std::path::Path;

use crate::error::PrepError;
use crate::signal::{RawRow, Series};

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Clone, PartialEq)]
pub struct RowTable {
    pub rows: Vec<RawRow>,
    /// Whether the header carried a `paired` column.
    pub has_paired: bool,
}

/// Parse `YYYY-MM-DD HH:MM[:SS[.fff]]`, with a space or `T` separator.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn parse_class(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

fn locate_column(headers: &StringRecord, requested: &str) -> Option<usize> {
    headers
        .iter()
        .position(|name| name.trim().eq_ignore_ascii_case(requested))
}

fn require_column(headers: &StringRecord, requested: &str) -> Result<usize> {
    locate_column(headers, requested).ok_or_else(|| PrepError::missing_column(requested).into())
}

fn non_empty(record: &StringRecord, idx: Option<usize>) -> Option<&str> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Read a canonical CSV. When `tag` is given every subject id becomes `{id}_{tag}`.
pub fn read_rows(path: &Path, delimiter: u8, tag: Option<&str>) -> Result<RowTable> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(file);
    let headers = reader.headers().context("reading header")?.clone();

    let id_idx = require_column(&headers, "subject_id")?;
    let ts_idx = require_column(&headers, "timestamp")?;
    let value_idx = require_column(&headers, "value")?;
    let paired_idx = locate_column(&headers, "paired");
    let class_idx = locate_column(&headers, "class");

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("reading record {}", line + 1))?;
        let Some(id) = non_empty(&record, Some(id_idx)) else {
            log::warn!("{}: record {} has no subject id, skipped", path.display(), line + 1);
            continue;
        };
        let subject_id = match tag {
            Some(tag) => format!("{}_{}", id, tag),
            None => id.to_string(),
        };
        rows.push(RawRow {
            subject_id,
            timestamp: non_empty(&record, Some(ts_idx)).and_then(parse_timestamp),
            value: non_empty(&record, Some(value_idx)).map(str::to_string),
            paired: non_empty(&record, paired_idx).map(str::to_string),
            class: non_empty(&record, class_idx).and_then(parse_class),
        });
    }
    Ok(RowTable {
        rows,
        has_paired: paired_idx.is_some(),
    })
}

pub fn write_rows_csv(path: &Path, rows: &[RawRow]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["subject_id", "timestamp", "value", "paired", "class"])?;
    for row in rows {
        writer.write_record([
            row.subject_id.clone(),
            row.timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            row.value.clone().unwrap_or_default(),
            row.paired.clone().unwrap_or_default(),
            row.class.map(|c| c.to_string()).unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn fmt_value(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// Write processed series, one row per grid point, in subject order.
pub fn write_series_csv(path: &Path, series: &[Series]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let with_paired = series.iter().any(|s| s.paired.is_some());
    let mut header = vec!["subject_id", "timestamp", "value"];
    if with_paired {
        header.push("paired");
    }
    header.push("class");
    writer.write_record(&header)?;

    for s in series {
        for idx in 0..s.len() {
            let mut record = vec![
                s.subject_id.clone(),
                s.timestamps[idx].format("%Y-%m-%d %H:%M:%S").to_string(),
                fmt_value(s.value[idx]),
            ];
            if with_paired {
                record.push(fmt_value(s.paired.as_ref().and_then(|col| col[idx])));
            }
            record.push(s.class[idx].code().to_string());
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn read_series_csv(path: &Path) -> Result<Vec<Series>> {
    let table = read_rows(path, b',', None)?;
    let mut out: Vec<Series> = Vec::new();
    for row in table.rows {
        let timestamp = row
            .timestamp
            .with_context(|| format!("unparsable timestamp for {}", row.subject_id))?;
        let class = crate::signal::ClassLabel::from_code(row.class.unwrap_or(-1))?;
        if out.last().map_or(true, |s| s.subject_id != row.subject_id) {
            out.push(Series::new(row.subject_id.clone(), table.has_paired));
        }
        if let Some(series) = out.last_mut() {
            series.push(
                timestamp,
                crate::signal::coerce_numeric(row.value.as_deref()),
                crate::signal::coerce_numeric(row.paired.as_deref()),
                class,
            );
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ClassLabel;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn sample_path(rel: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .and_then(|p| p.parent())
            .expect("workspace")
            .join(rel)
    }

    #[test]
    fn parses_supported_timestamp_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(7, 5, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2024-03-01 07:05"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T07:05:00"), Some(expected));
        assert_eq!(parse_timestamp(" 2024-03-01 07:05:00.000 "), Some(expected));
        assert_eq!(parse_timestamp("03/01/2024 07:05"), None);
    }

    #[test]
    fn reads_fixture_with_tag() {
        let table = read_rows(&sample_path("test_data/cgm_small.csv"), b',', Some("demo")).unwrap();
        assert!(!table.has_paired);
        assert!(!table.rows.is_empty());
        assert!(table.rows.iter().all(|r| r.subject_id.ends_with("_demo")));
    }

    #[test]
    fn missing_header_is_a_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "subject_id;when;value\na;2024-01-01 00:00;100\n").unwrap();
        let err = read_rows(&path, b';', None).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PrepError>(),
            Some(&PrepError::missing_column("timestamp"))
        );
    }

    #[test]
    fn blanks_and_garbage_become_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        std::fs::write(
            &path,
            "subject_id,timestamp,value,paired,class\n\
             a,2024-01-01 00:00,101,,\n\
             a,yesterday,HIGH,72,0.0\n\
             ,2024-01-01 00:10,99,,\n",
        )
        .unwrap();
        let table = read_rows(&path, b',', None).unwrap();
        assert!(table.has_paired);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].paired, None);
        assert_eq!(table.rows[0].class, None);
        assert_eq!(table.rows[1].timestamp, None);
        assert_eq!(table.rows[1].value.as_deref(), Some("HIGH"));
        assert_eq!(table.rows[1].class, Some(0));
    }

    #[test]
    fn processed_series_survive_a_file_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.csv");
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut a = Series::new("a", true);
        a.push(start, Some(101.25), Some(70.0), ClassLabel::Bucket(2));
        a.push(start + chrono::TimeDelta::minutes(5), None, None, ClassLabel::Event);
        let mut b = Series::new("b", true);
        b.push(start, Some(90.0), None, ClassLabel::Unassigned);
        write_series_csv(&path, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(read_series_csv(&path).unwrap(), vec![a, b]);
    }
}
