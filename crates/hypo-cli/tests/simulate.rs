use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::fs;
use tempfile::tempdir;

fn simulate(out: &std::path::Path, seed: &str) -> Value {
    let mut cmd = cargo_bin_cmd!("hypo");
    cmd.args([
        "simulate",
        "--out",
        out.to_str().unwrap(),
        "--subjects",
        "2",
        "--hours",
        "6",
        "--seed",
        seed,
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn simulate_is_deterministic_per_seed() {
    let temp = tempdir().unwrap();
    let first = temp.path().join("first.csv");
    let second = temp.path().join("second.csv");
    let other = temp.path().join("other.csv");

    let summary = simulate(&first, "5");
    simulate(&second, "5");
    simulate(&other, "6");

    assert_eq!(summary["subjects"], 2);
    let a = fs::read_to_string(&first).unwrap();
    assert_eq!(a, fs::read_to_string(&second).unwrap());
    assert_ne!(a, fs::read_to_string(&other).unwrap());
    assert!(a.starts_with("subject_id,timestamp,value"));
    assert_eq!(a.lines().count() as u64, summary["rows"].as_u64().unwrap() + 1);
}

#[test]
fn simulate_rejects_bad_start() {
    let temp = tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("hypo");
    cmd.args([
        "simulate",
        "--out",
        temp.path().join("x.csv").to_str().unwrap(),
        "--start",
        "tomorrow",
    ]);
    cmd.assert().failure();
}
