use chrono::{NaiveDateTime, TimeDelta};
use hypo_lib::RawRow;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSpec {
    pub subjects: usize,
    pub hours: i64,
    pub interval_minutes: i64,
    pub seed: u64,
    /// Chance per reading that a sensor dropout starts.
    pub dropout_rate: f64,
    /// Chance per reading of a spurious zero.
    pub zero_rate: f64,
    /// Also emit a heart-rate stream on its own timestamps.
    pub heart_rate: bool,
    pub start: NaiveDateTime,
}

/// Identical specs give identical rows.
pub fn simulate_cgm(spec: &SimulationSpec) -> Vec<RawRow> {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let steps = (spec.hours * 60 / spec.interval_minutes.max(1)).max(0);
    let mut rows = Vec::new();
    for subject in 0..spec.subjects {
        let id = format!("sim{:02}", subject + 1);
        let baseline = rng.gen_range(110.0..150.0);
        let mut drift = 0.0;
        let mut dropout_left = 0;
        let mut dip_left = 0;
        for step in 0..steps {
            let minutes = step * spec.interval_minutes;
            let jitter = rng.gen_range(-30..=30);
            let at = spec.start + TimeDelta::minutes(minutes) + TimeDelta::seconds(jitter);

            drift = (drift + rng.gen_range(-3.0..3.0)) * 0.97;
            let hour = minutes as f64 / 60.0;
            let meal = 45.0 * (-((hour % 6.0) - 1.0).powi(2)).exp();
            let mut glucose = baseline + meal + drift;
            if dip_left == 0 && rng.gen_bool(0.004) {
                dip_left = rng.gen_range(3..8);
            }
            if dip_left > 0 {
                glucose = rng.gen_range(52.0..68.0);
                dip_left -= 1;
            }

            if dropout_left == 0 && rng.gen_bool(spec.dropout_rate.clamp(0.0, 1.0)) {
                dropout_left = rng.gen_range(1..30);
            }
            if dropout_left > 0 {
                dropout_left -= 1;
            } else {
                let value = if rng.gen_bool(spec.zero_rate.clamp(0.0, 1.0)) {
                    "0".to_string()
                } else {
                    format!("{:.0}", glucose)
                };
                rows.push(RawRow {
                    subject_id: id.clone(),
                    timestamp: Some(at),
                    value: Some(value),
                    paired: None,
                    class: None,
                });
            }

            if spec.heart_rate {
                let bpm = 68.0 + 10.0 * (hour / 24.0 * std::f64::consts::TAU).sin() + rng.gen_range(-4.0..4.0);
                rows.push(RawRow {
                    subject_id: id.clone(),
                    timestamp: Some(at + TimeDelta::seconds(rng.gen_range(40..80))),
                    value: None,
                    paired: Some(format!("{:.0}", bpm)),
                    class: None,
                });
            }
        }
    }
    rows
}
