use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::{error::Error, fs, path::PathBuf};
use tempfile::tempdir;

#[test]
fn prepare_writes_arrays_and_manifest() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let out = temp.path().join("run");
    let config = workspace_root().join("test_data/pipeline.toml");

    let mut cmd = cargo_bin_cmd!("hypo");
    cmd.args([
        "prepare",
        "--config",
        config.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
        "--threads",
        "2",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let summary: Value = serde_json::from_slice(&output)?;
    assert_eq!(summary["name"], "cgm-small");
    assert_eq!(summary["features"], serde_json::json!(["value"]));
    assert_eq!(summary["subjects"], 2);

    for name in ["X_train", "X_val", "X_test", "Y_train", "Y_val", "Y_test"] {
        assert!(out.join(format!("{}.npy", name)).exists(), "{} missing", name);
    }
    assert!(out.join("series.csv").exists());

    let manifest: Value = serde_json::from_str(&fs::read_to_string(out.join("manifest.json"))?)?;
    assert_eq!(manifest["sample_count"], 25);
    assert_eq!(manifest["normalization"]["strategy"], "full-column");
    let splits = &manifest["splits"];
    let total = ["train", "val", "test"]
        .iter()
        .map(|k| splits[*k].as_u64().unwrap())
        .sum::<u64>();
    let windows = manifest["subjects"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["windows"].as_u64().unwrap())
        .sum::<u64>();
    assert!(total > 0);
    assert_eq!(total, windows);
    assert!(splits["test"].as_u64().unwrap() >= 2);
    Ok(())
}

#[test]
fn unknown_mode_fails_before_writing() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let out = temp.path().join("run");
    let config = workspace_root().join("test_data/bad_mode.toml");

    let mut cmd = cargo_bin_cmd!("hypo");
    cmd.args([
        "prepare",
        "--config",
        config.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
    ]);
    let assert = cmd.assert().failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("unknown resample mode"), "stderr: {}", stderr);
    assert!(!out.join("manifest.json").exists());
    Ok(())
}

fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}
