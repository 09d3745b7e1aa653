pub mod batch;
pub mod config;
pub mod export;
pub mod simulate;
pub mod sources;

use anyhow::{Context, Result};
use hypo_lib::normalize::flatten_splits;
use log::info;
use std::path::Path;

pub use batch::{clean_subject, run_batch, BatchOutput, SubjectFailure, SubjectStats};
pub use config::{read_config, PipelineConfig, PipelineSettings};
pub use export::{read_manifest, write_manifest, write_splits, RunManifest};
pub use simulate::{simulate_cgm, SimulationSpec};
pub use sources::{collect_subjects, load_sources, CanonicalCsv, SourceAdapter, SourceOutcome};

#[derive(Debug)]
pub struct PreparedRun {
    pub manifest: RunManifest,
    pub output: BatchOutput,
}

/// Load every configured source, run the batch and write arrays, the
/// processed series and `manifest.json` into `out_dir`.
pub fn prepare(config: &PipelineConfig, out_dir: &Path, threads: Option<usize>) -> Result<PreparedRun> {
    let settings = config.validate()?;
    let adapters: Vec<Box<dyn SourceAdapter>> = config
        .sources
        .iter()
        .map(|spec| Box::new(CanonicalCsv::from(spec)) as Box<dyn SourceAdapter>)
        .collect();
    let outcomes = load_sources(&adapters);
    let source_summaries: Vec<_> = outcomes.iter().map(SourceOutcome::summary).collect();
    let subjects = collect_subjects(outcomes);
    info!("{}: {} subjects from {} sources", config.name, subjects.len(), adapters.len());

    let output = run_batch(&subjects, &settings, threads)?;
    let splits = flatten_splits(
        &output.partitions,
        settings.windows.sample_count,
        output.columns.len(),
    )?;

    std::fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    write_splits(out_dir, &splits)?;
    hypo_lib::io::write_series_csv(&out_dir.join("series.csv"), &output.series)?;

    let manifest = RunManifest {
        name: config.name.clone(),
        frequency_minutes: settings.frequency.num_minutes(),
        resample_mode: settings.resample_mode.to_string(),
        outlier_mode: settings.outlier_mode.to_string(),
        lower_limit: settings.gap_limits.lower,
        upper_limit: settings.gap_limits.upper,
        labels: settings.labels.clone(),
        sample_count: settings.windows.sample_count,
        duration_minutes: settings.windows.duration.num_minutes(),
        features: output.columns.iter().map(|c| c.name().to_string()).collect(),
        normalization: settings.normalize.then(|| export::NormalizationRecord {
            strategy: "full-column".into(),
            ranges: output.ranges.clone(),
        }),
        splits: export::SplitCounts::from(&splits),
        sources: source_summaries,
        subjects: output.stats.clone(),
        failures: output.failures.clone(),
        created_unix: export::now_unix(),
    };
    write_manifest(&out_dir.join("manifest.json"), &manifest)?;
    Ok(PreparedRun { manifest, output })
}
