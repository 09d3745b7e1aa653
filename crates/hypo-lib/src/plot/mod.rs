use crate::error::PrepResult;
use crate::signal::{seconds_since, ClassLabel, Column, Series};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub dash: Option<[f32; 2]>,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineTrace {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerTrace {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Trace {
    Line(LineTrace),
    Markers(MarkerTrace),
}

impl Trace {
    pub fn points(&self) -> &[[f64; 2]] {
        match self {
            Trace::Line(line) => &line.points,
            Trace::Markers(markers) => &markers.points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub traces: Vec<Trace>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            traces: Vec::new(),
        }
    }

    pub fn add_trace(&mut self, trace: Trace) {
        self.traces.push(trace);
    }

    /// `(x_min, x_max, y_min, y_max)` over every trace, `None` when empty.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut points = self.traces.iter().flat_map(|t| t.points().iter());
        let first = points.next()?;
        Some(points.fold(
            (first[0], first[0], first[1], first[1]),
            |(x0, x1, y0, y1), p| (x0.min(p[0]), x1.max(p[0]), y0.min(p[1]), y1.max(p[1])),
        ))
    }
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points || max_points == 0 {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    (0..max_points)
        .map(|i| (i as f64 * bucket_size).floor() as usize)
        .take_while(|&idx| idx < points.len())
        .map(|idx| points[idx])
        .collect()
}

/// Break a polyline into dashes of `on` x-units separated by `off` x-units.
/// Segments running backwards in x are dropped.
pub fn dash_segments(points: &[[f64; 2]], on: f64, off: f64) -> Vec<Vec<[f64; 2]>> {
    if on <= 0.0 || off < 0.0 || points.len() < 2 {
        return vec![points.to_vec()];
    }
    let mut dashes = Vec::new();
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let span = b[0] - a[0];
        if span <= 0.0 {
            continue;
        }
        let at = |t: f64| [a[0] + t, a[1] + (b[1] - a[1]) * t / span];
        let mut x = 0.0;
        while x < span {
            dashes.push(vec![at(x), at((x + on).min(span))]);
            x += on + off;
        }
    }
    dashes
}

/// Contiguous present stretches of `values`, x in hours from `origin`.
fn segments(series: &Series, values: &[Option<f64>]) -> Vec<Vec<[f64; 2]>> {
    let Some(&origin) = series.timestamps.first() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut current = Vec::new();
    for (t, v) in series.timestamps.iter().zip(values.iter()) {
        match v {
            Some(v) => current.push([seconds_since(origin, *t) / 3600.0, *v]),
            None if !current.is_empty() => out.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Trace of one column of a processed series. Gaps break the line; event
/// points are overlaid as markers and `threshold`, if given, as a dashed line.
pub fn figure_from_series(
    series: &Series,
    column: Column,
    threshold: Option<f64>,
    max_points: usize,
) -> PrepResult<Figure> {
    let values = series.column(column)?;
    let mut fig = Figure::new(Some(format!("{} ({})", series.subject_id, column.name())));
    fig.x.label = Some("hours".into());
    fig.y.label = Some(column.name().into());

    let pieces = segments(series, values);
    let per_piece = (max_points / pieces.len().max(1)).max(2);
    for (i, piece) in pieces.iter().enumerate() {
        fig.add_trace(Trace::Line(LineTrace {
            name: format!("{} #{}", column.name(), i),
            points: decimate_points(piece, per_piece),
            style: Style {
                width: 1.4,
                dash: None,
                color: Color(0x1F77B4),
            },
        }));
    }

    let Some(&origin) = series.timestamps.first() else {
        return Ok(fig);
    };
    let events: Vec<[f64; 2]> = series
        .timestamps
        .iter()
        .zip(values.iter())
        .zip(series.class.iter())
        .filter(|(_, class)| **class == ClassLabel::Event)
        .filter_map(|((t, v), _)| v.map(|v| [seconds_since(origin, *t) / 3600.0, v]))
        .collect();
    if !events.is_empty() {
        fig.add_trace(Trace::Markers(MarkerTrace {
            name: "events".into(),
            points: events,
            color: Color(0xD62728),
        }));
    }

    if let (Some(level), Some(span)) = (threshold, series.span()) {
        let end = span.num_seconds() as f64 / 3600.0;
        fig.add_trace(Trace::Line(LineTrace {
            name: "threshold".into(),
            points: vec![[0.0, level], [end, level]],
            style: Style {
                width: 1.0,
                dash: Some([0.25, 0.25]),
                color: Color(0x7F7F7F),
            },
        }));
    }
    Ok(fig)
}
