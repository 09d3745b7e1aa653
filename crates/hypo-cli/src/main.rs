use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use hypo_lib::{
    detect_sample_rate, group_by_subject,
    io::{parse_timestamp, read_rows, read_series_csv, write_rows_csv, write_series_csv},
    plot::{dash_segments, figure_from_series, Color as TraceColor, Figure, Trace},
    Column, SampleRate,
};
use hypo_run::{clean_subject, read_config, simulate_cgm, SimulationSpec};
use log::info;
use plotters::prelude::*;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "hypo",
    version,
    about = "Temporal normalization and windowing of CGM recordings"
)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PlotColumn {
    #[value(name = "value")]
    Value,
    #[value(name = "paired")]
    Paired,
}

impl From<PlotColumn> for Column {
    fn from(column: PlotColumn) -> Self {
        match column {
            PlotColumn::Value => Column::Value,
            PlotColumn::Paired => Column::Paired,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write train/val/test arrays plus a manifest
    Prepare {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Worker threads for per-subject stages (default: all cores)
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Resample, censor, impute and label one CSV without windowing
    Process {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = ',')]
        delimiter: char,
        /// Suffix appended to every subject id
        #[arg(long)]
        tag: Option<String>,
    },
    /// Report the native sampling interval of every subject in a CSV
    DetectRate {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = ',')]
        delimiter: char,
    },
    /// Write a synthetic CGM cohort in the canonical CSV layout
    Simulate {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 3)]
        subjects: usize,
        #[arg(long, default_value_t = 48)]
        hours: i64,
        #[arg(long, default_value_t = 5)]
        interval_minutes: i64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 0.01)]
        dropout_rate: f64,
        #[arg(long, default_value_t = 0.005)]
        zero_rate: f64,
        /// Also emit heart-rate rows in the paired column
        #[arg(long)]
        heart_rate: bool,
        #[arg(long, default_value = "2024-01-01 00:00")]
        start: String,
    },
    /// Render one subject of a processed series CSV to a PNG via plotters
    Plot {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "value")]
        column: PlotColumn,
        /// Draw a dashed reference line at this level
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long, default_value_t = 2048)]
        max_points: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();
    match cli.command {
        Commands::Prepare {
            config,
            out,
            threads,
        } => cmd_prepare(&config, &out, threads)?,
        Commands::Process {
            config,
            input,
            out,
            delimiter,
            tag,
        } => cmd_process(&config, &input, &out, delimiter, tag.as_deref())?,
        Commands::DetectRate { input, delimiter } => cmd_detect_rate(&input, delimiter)?,
        Commands::Simulate {
            out,
            subjects,
            hours,
            interval_minutes,
            seed,
            dropout_rate,
            zero_rate,
            heart_rate,
            start,
        } => {
            let start = parse_timestamp(&start)
                .ok_or_else(|| anyhow!("cannot parse start time '{}'", start))?;
            let spec = SimulationSpec {
                subjects,
                hours,
                interval_minutes,
                seed,
                dropout_rate,
                zero_rate,
                heart_rate,
                start,
            };
            cmd_simulate(&out, &spec)?
        }
        Commands::Plot {
            input,
            subject,
            out,
            column,
            threshold,
            max_points,
        } => cmd_plot(&input, &subject, &out, column.into(), threshold, max_points)?,
    }
    Ok(())
}

fn delimiter_byte(delimiter: char) -> Result<u8> {
    if !delimiter.is_ascii() {
        bail!("delimiter '{}' is not a single ASCII character", delimiter);
    }
    Ok(delimiter as u8)
}

fn cmd_prepare(config: &Path, out: &Path, threads: Option<usize>) -> Result<()> {
    let config = read_config(config)?;
    let run = hypo_run::prepare(&config, out, threads)?;
    info!(
        "{}: wrote {} windows to {}",
        config.name,
        run.manifest.splits.train + run.manifest.splits.val + run.manifest.splits.test,
        out.display()
    );
    let summary = json!({
        "name": run.manifest.name,
        "out": out.display().to_string(),
        "features": run.manifest.features,
        "splits": run.manifest.splits,
        "subjects": run.manifest.subjects.len(),
        "failures": run.manifest.failures,
    });
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_process(config: &Path, input: &Path, out: &Path, delimiter: char, tag: Option<&str>) -> Result<()> {
    let settings = read_config(config)?.validate()?;
    let table = read_rows(input, delimiter_byte(delimiter)?, tag)?;
    let mut series = Vec::new();
    let mut stats = Vec::new();
    let mut failures = Vec::new();
    for raw in group_by_subject(table.rows, table.has_paired) {
        match clean_subject(&raw, &settings) {
            Ok(cleaned) => {
                series.push(cleaned.series);
                stats.push(cleaned.stats);
            }
            Err(failure) => failures.push(failure),
        }
    }
    write_series_csv(out, &series).with_context(|| format!("writing {}", out.display()))?;
    println!(
        "{}",
        serde_json::to_string(&json!({ "subjects": stats, "failures": failures }))?
    );
    Ok(())
}

#[derive(Serialize)]
struct RateReport {
    subject_id: String,
    rate: SampleRate,
    label: String,
}

fn cmd_detect_rate(input: &Path, delimiter: char) -> Result<()> {
    let table = read_rows(input, delimiter_byte(delimiter)?, None)?;
    let reports: Vec<RateReport> = group_by_subject(table.rows, table.has_paired)
        .into_iter()
        .map(|raw| {
            let timestamps: Vec<_> = raw
                .rows
                .iter()
                .filter(|row| row.value.is_some())
                .filter_map(|row| row.timestamp)
                .collect();
            let rate = detect_sample_rate(&timestamps);
            RateReport {
                subject_id: raw.subject_id,
                rate,
                label: rate.to_string(),
            }
        })
        .collect();
    println!("{}", serde_json::to_string(&reports)?);
    Ok(())
}

fn cmd_simulate(out: &Path, spec: &SimulationSpec) -> Result<()> {
    let rows = simulate_cgm(spec);
    write_rows_csv(out, &rows)?;
    println!(
        "{}",
        serde_json::to_string(&json!({
            "rows": rows.len(),
            "subjects": spec.subjects,
            "seed": spec.seed,
        }))?
    );
    Ok(())
}

fn cmd_plot(
    input: &Path,
    subject: &str,
    out: &Path,
    column: Column,
    threshold: Option<f64>,
    max_points: usize,
) -> Result<()> {
    let series = read_series_csv(input)?;
    let Some(selected) = series.iter().find(|s| s.subject_id == subject) else {
        bail!("subject '{}' not found in {}", subject, input.display());
    };
    let fig = figure_from_series(selected, column, threshold, max_points)?;
    draw_plotters_figure(out, &fig)?;
    Ok(())
}

fn rgb(color: TraceColor) -> RGBColor {
    let (r, g, b) = color.rgb();
    RGBColor(r, g, b)
}

fn draw_plotters_figure(path: &Path, fig: &Figure) -> Result<()> {
    let Some((x_min, mut x_max, mut y_min, mut y_max)) = fig.bounds() else {
        bail!("nothing to plot: no present readings");
    };
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }
    if y_max <= y_min {
        y_min -= 1.0;
        y_max += 1.0;
    }
    let backend = BitMapBackend::new(path, (800, 480));
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "Plot".into()),
            ("sans-serif", 24),
        )
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart
        .configure_mesh()
        .x_desc(fig.x.label.clone().unwrap_or_default())
        .y_desc(fig.y.label.clone().unwrap_or_default())
        .draw()?;
    for trace in &fig.traces {
        match trace {
            Trace::Line(line) => {
                let style = ShapeStyle::from(&rgb(line.style.color))
                    .stroke_width(line.style.width.round().max(1.0) as u32);
                let pieces = match line.style.dash {
                    Some([on, off]) => dash_segments(&line.points, on as f64, off as f64),
                    None => vec![line.points.clone()],
                };
                for piece in pieces {
                    chart.draw_series(LineSeries::new(
                        piece.into_iter().map(|p| (p[0], p[1])),
                        style,
                    ))?;
                }
            }
            Trace::Markers(markers) => {
                let color = rgb(markers.color);
                chart.draw_series(
                    markers
                        .points
                        .iter()
                        .map(|p| Circle::new((p[0], p[1]), 3, color.filled())),
                )?;
            }
        }
    }
    root.present()?;
    Ok(())
}
