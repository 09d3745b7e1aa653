pub mod error;
pub mod impute;
pub mod io;
pub mod labels;
pub mod normalize;
pub mod outliers;
pub mod plot;
pub mod resample;
pub mod signal;
pub mod windows;

pub use error::{PrepError, PrepResult};
pub use impute::{impute, GapLimits, ImputeSummary};
pub use labels::{label_buckets, label_events, mark_threshold_events, LabelRequest};
pub use normalize::{flatten, flatten_splits, min_max_scale, FlatArrays, FlatSplits, MinMax};
pub use outliers::{remove_outliers, OutlierMode};
pub use resample::{detect_sample_rate, fill_sampling_gaps, merge_paired, resample, ResampleMode, SampleRate};
pub use signal::*;
pub use windows::{extract_windows, split_chronological, windows_for_subject, SplitPartition, Window, WindowConfig};
