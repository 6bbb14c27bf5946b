use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;

const ATLAS: &str = r#"{
    "frames": {
        "images/slides/1.jpg": {"frame": {"x": 0, "y": 0, "w": 640, "h": 360}, "rotated": false, "trimmed": false},
        "images/slides/2.jpg": {"frame": {"x": 640, "y": 0, "w": 320, "h": 180}, "rotated": true, "trimmed": false}
    },
    "meta": {"image": "slides.png", "size": {"w": 1024, "h": 512}, "scale": "1"}
}"#;

fn stdout_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout should contain valid json")
}

#[test]
fn simulate_reports_clean_teardown() {
    let output = cargo_bin_cmd!("carousel-cli")
        .args(["simulate", "--slides", "20", "--steps", "10"])
        .env_remove("CAROUSEL_WINDOW_RADIUS")
        .env_remove("CAROUSEL_THROTTLE")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    assert_eq!(value["slides"], 20);
    assert_eq!(value["radius"], 2);
    assert_eq!(value["steps"].as_array().map(Vec::len), Some(10));
    assert_eq!(value["steps"][0]["active"], 1);

    assert_eq!(value["mounted"]["resources"]["active"], true);
    assert_eq!(value["unmounted"]["disposed"], true);
    assert_eq!(value["unmounted"]["textures"], 0);
    assert_eq!(value["unmounted"]["display_objects"], 0);
    assert_eq!(value["shader_pool"]["instances"], 0);

    let backend = &value["backend"];
    assert_eq!(backend["sprites_destroyed"], backend["sprites_detached"]);
}

#[test]
fn simulate_reads_config_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = temp.path().join("carousel.toml");
    fs::write(&path, "[window]\nradius = 1\n\n[throttle]\nstrategy = \"none\"\n").unwrap();

    let output = cargo_bin_cmd!("carousel-cli")
        .args(["simulate", "--slides", "6", "--steps", "2", "--config"])
        .arg(&path)
        .env_remove("CAROUSEL_WINDOW_RADIUS")
        .env_remove("CAROUSEL_THROTTLE")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    assert_eq!(value["radius"], 1);
    assert_eq!(value["mounted"]["performance"]["strategy"], "none");
}

#[test]
fn simulate_rejects_bad_strategy() {
    cargo_bin_cmd!("carousel-cli")
        .args(["simulate", "--strategy", "turbo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown throttle strategy"));
}

#[test]
fn atlas_resolves_frames_by_file_name() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = temp.path().join("slides.json");
    fs::write(&path, ATLAS).unwrap();

    let output = cargo_bin_cmd!("carousel-cli")
        .arg("atlas")
        .arg(&path)
        .args(["--frame", "1.jpg", "--frame", "images/slides/2.jpg", "--frame", "9.jpg"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    assert_eq!(value["image"], "slides.png");
    assert_eq!(value["frame_count"], 2);
    assert_eq!(value["frames"][0]["key"], "images/slides/1.jpg");
    assert_eq!(value["frames"][0]["width"], 640);
    assert_eq!(value["frames"][0]["height"], 360);
    assert_eq!(value["frames"][1]["rotated"], true);
    assert!(value["frames"][2]["key"].is_null());
}

#[test]
fn atlas_fails_for_malformed_json() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = temp.path().join("broken.json");
    fs::write(&path, "{\"frames\": ").unwrap();

    cargo_bin_cmd!("carousel-cli")
        .arg("atlas")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse atlas"));
}

#[test]
fn atlas_fails_for_missing_file() {
    cargo_bin_cmd!("carousel-cli")
        .args(["atlas", "does-not-exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn version_prints_package_version() {
    cargo_bin_cmd!("carousel-cli")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
