use assert_cmd::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("basic.svg")
}

fn png_size(path: &Path) -> (u32, u32) {
    let decoder = png::Decoder::new(fs::File::open(path).expect("open png"));
    let reader = decoder.read_info().expect("png header");
    let info = reader.info();
    (info.width, info.height)
}

#[test]
fn cli_exports_png_with_margin_and_scale() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let exe = assert_cmd::cargo_bin!("narwhal-cli");
    let output = Command::new(exe)
        .args([
            "export",
            "--title",
            "Basic flow",
            "--out-dir",
            tmp.path().to_string_lossy().as_ref(),
            fixture().to_string_lossy().as_ref(),
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let out = tmp.path().join("Basic flow.png");
    assert!(out.exists(), "missing {}", out.display());
    assert!(String::from_utf8_lossy(&output).contains("Basic flow.png"));
    // viewBox 200x100, default margin 16, default scale 2.
    assert_eq!(png_size(&out), (464, 264));
}

#[test]
fn cli_defaults_to_input_stem_next_to_the_input() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let input = tmp.path().join("login.svg");
    fs::copy(fixture(), &input).expect("copy fixture");

    let exe = assert_cmd::cargo_bin!("narwhal-cli");
    Command::new(exe)
        .args([
            "--scale",
            "1",
            "--margin",
            "0",
            input.to_string_lossy().as_ref(),
        ])
        .assert()
        .success();

    assert_eq!(png_size(&tmp.path().join("login.png")), (200, 100));
}

#[test]
fn cli_reads_stdin_and_falls_back_to_the_default_stem() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let exe = assert_cmd::cargo_bin!("narwhal-cli");
    assert_cmd::Command::new(exe)
        .args(["export", "--out-dir", tmp.path().to_string_lossy().as_ref(), "-"])
        .write_stdin(fs::read_to_string(fixture()).expect("read fixture"))
        .assert()
        .success();

    assert!(tmp.path().join("diagram.png").exists());
}

#[test]
fn cli_prints_resolved_size() {
    let exe = assert_cmd::cargo_bin!("narwhal-cli");
    let output = Command::new(exe)
        .args(["size", fixture().to_string_lossy().as_ref()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value = serde_json::from_slice(&output).expect("size JSON");
    assert_eq!(json["width"], 200.0);
    assert_eq!(json["height"], 100.0);
    assert_eq!(json["viewport"], "0 0 200 100");
    assert_eq!(json["fallback"], false);
}

#[test]
fn cli_rejects_invalid_markup_and_bad_arguments() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let exe = assert_cmd::cargo_bin!("narwhal-cli");
    assert_cmd::Command::new(exe)
        .args(["export", "--out-dir", tmp.path().to_string_lossy().as_ref(), "-"])
        .write_stdin("flowchart A --> B")
        .assert()
        .code(1);
    assert!(fs::read_dir(tmp.path()).expect("read dir").next().is_none());

    let exe = assert_cmd::cargo_bin!("narwhal-cli");
    Command::new(exe).args(["--scale", "abc"]).assert().code(2);
}
