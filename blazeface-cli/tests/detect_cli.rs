use std::error::Error;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use serde::Deserialize;
use serde_json::Value;
use tempfile::tempdir;

use blazeface_utils::normalize_path;

const MODEL_REL_PATH: &str = "../models/blazeface_128.onnx";
const BOGUS_MODEL_PATH: &str = "does/not/exist/blazeface.onnx";

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    faces: Vec<Value>,
    count: usize,
}

#[test]
fn invalid_base64_is_rejected_with_a_failure_envelope() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("blazeface-cli");
    cmd.arg("--image")
        .arg("!!!not-base64!!!")
        .arg("--model")
        .arg(BOGUS_MODEL_PATH);

    let output = cmd.output()?;
    assert!(
        !output.status.success(),
        "invalid base64 must exit nonzero"
    );

    // The request is rejected before the model path matters.
    let envelope = parse_envelope(&output.stdout)?;
    assert!(!envelope.success);
    assert!(
        envelope
            .error
            .as_deref()
            .is_some_and(|e| e.contains("invalid base64")),
        "unexpected error message: {:?}",
        envelope.error
    );
    assert!(envelope.faces.is_empty());
    assert_eq!(envelope.count, 0);

    Ok(())
}

#[test]
fn missing_model_fails_without_stdout_output() -> Result<(), Box<dyn Error>> {
    let encoded = STANDARD.encode(png_image_bytes(32, 32)?);

    let mut cmd = cargo_bin_cmd!("blazeface-cli");
    cmd.arg("--image")
        .arg(&encoded)
        .arg("--model")
        .arg(BOGUS_MODEL_PATH);

    let output = cmd.output()?;
    assert!(!output.status.success(), "missing model must exit nonzero");
    assert!(
        output.stdout.is_empty(),
        "stdout must stay empty so the caller never parses a broken install as a payload"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("model file not found"),
        "stderr should name the missing model: {stderr}"
    );

    Ok(())
}

#[test]
fn unreadable_image_file_is_rejected_with_a_failure_envelope() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("blazeface-cli");
    cmd.arg("--image-file")
        .arg("does/not/exist/photo.png")
        .arg("--model")
        .arg(BOGUS_MODEL_PATH);

    let output = cmd.output()?;
    assert!(!output.status.success());

    let envelope = parse_envelope(&output.stdout)?;
    assert!(!envelope.success);
    assert!(
        envelope
            .error
            .as_deref()
            .is_some_and(|e| e.contains("failed to read image file")),
        "unexpected error message: {:?}",
        envelope.error
    );
    assert_eq!(envelope.count, 0);

    Ok(())
}

#[test]
fn missing_image_arguments_are_a_usage_error() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("blazeface-cli");
    cmd.arg("--model").arg(BOGUS_MODEL_PATH);

    let output = cmd.output()?;
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("--image"),
        "usage error should mention --image: {stderr}"
    );

    Ok(())
}

#[test]
fn conflicting_image_arguments_are_a_usage_error() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("blazeface-cli");
    cmd.arg("--image")
        .arg("aGVsbG8=")
        .arg("--image-file")
        .arg("photo.png");

    let output = cmd.output()?;
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("cannot be used with"),
        "conflict error expected: {stderr}"
    );

    Ok(())
}

#[test]
fn invalid_resize_quality_is_a_usage_error() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("blazeface-cli");
    cmd.arg("--image")
        .arg("aGVsbG8=")
        .arg("--resize-quality")
        .arg("fast");

    let output = cmd.output()?;
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("invalid resize quality"),
        "parse error expected: {stderr}"
    );

    Ok(())
}

#[test]
fn unreadable_config_is_fatal_without_stdout() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("blazeface-cli");
    cmd.arg("--image")
        .arg("aGVsbG8=")
        .arg("--config")
        .arg("does/not/exist/settings.json");

    let output = cmd.output()?;
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("path does not exist"),
        "stderr should name the missing settings file: {stderr}"
    );

    Ok(())
}

#[test]
fn valid_config_file_is_accepted() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let config_path = work_dir.path().join("settings.json");
    fs::write(
        &config_path,
        r#"{ "detection": { "conf_threshold": 0.9 } }"#,
    )?;

    // The bad base64 keeps the test model-free; reaching the envelope at all
    // proves the settings file parsed.
    let mut cmd = cargo_bin_cmd!("blazeface-cli");
    cmd.arg("--image")
        .arg("!!!not-base64!!!")
        .arg("--config")
        .arg(&config_path);

    let output = cmd.output()?;
    assert!(!output.status.success());
    let envelope = parse_envelope(&output.stdout)?;
    assert!(!envelope.success);

    Ok(())
}

#[test]
fn detect_on_synthetic_image_produces_a_success_envelope() -> Result<(), Box<dyn Error>> {
    let Some(model) = ensure_model_path() else {
        return Ok(());
    };
    let encoded = STANDARD.encode(png_image_bytes(64, 64)?);

    let mut cmd = cargo_bin_cmd!("blazeface-cli");
    cmd.arg("--image").arg(&encoded).arg("--model").arg(&model);

    let output = cmd.output()?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let envelope = parse_envelope(&output.stdout)?;
    assert!(envelope.success);
    assert!(envelope.error.is_none());
    assert_eq!(envelope.count, envelope.faces.len());
    for face in &envelope.faces {
        for key in ["id", "confidence", "bounding_box", "landmarks"] {
            assert!(face.get(key).is_some(), "face entry missing key {key}");
        }
    }

    Ok(())
}

#[test]
fn undecodable_image_bytes_yield_an_empty_success_envelope() -> Result<(), Box<dyn Error>> {
    let Some(model) = ensure_model_path() else {
        return Ok(());
    };
    let encoded = STANDARD.encode(b"these bytes are not an image");

    let mut cmd = cargo_bin_cmd!("blazeface-cli");
    cmd.arg("--image").arg(&encoded).arg("--model").arg(&model);

    let output = cmd.output()?;
    assert!(
        output.status.success(),
        "a preprocessing failure is reported as zero faces, not as a process failure"
    );

    let envelope = parse_envelope(&output.stdout)?;
    assert!(envelope.success);
    assert!(envelope.faces.is_empty());
    assert_eq!(envelope.count, 0);

    Ok(())
}

#[test]
fn annotate_writes_an_image_copy() -> Result<(), Box<dyn Error>> {
    let Some(model) = ensure_model_path() else {
        return Ok(());
    };
    let image_bytes = png_image_bytes(48, 36)?;
    let encoded = STANDARD.encode(&image_bytes);

    let work_dir = tempdir()?;
    let annotate_path = work_dir.path().join("annotated.png");

    let mut cmd = cargo_bin_cmd!("blazeface-cli");
    cmd.arg("--image")
        .arg(&encoded)
        .arg("--model")
        .arg(&model)
        .arg("--annotate")
        .arg(&annotate_path);

    let output = cmd.output()?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(
        annotate_path.exists(),
        "annotated image missing at {}",
        annotate_path.display()
    );

    let original = image::load_from_memory(&image_bytes)?.into_rgba8();
    let annotated = image::open(&annotate_path)?.into_rgba8();
    assert_eq!(annotated.dimensions(), original.dimensions());

    Ok(())
}

fn ensure_model_path() -> Option<PathBuf> {
    let path = Path::new(MODEL_REL_PATH);
    if !path.exists() {
        eprintln!(
            "skipping test because BlazeFace model is missing at {}",
            path.display()
        );
        return None;
    }
    Some(normalize_path(path).expect("normalize_path should succeed"))
}

fn parse_envelope(stdout: &[u8]) -> Result<Envelope, Box<dyn Error>> {
    let text = String::from_utf8(stdout.to_vec())?;
    assert_eq!(
        text.trim_end().lines().count(),
        1,
        "the envelope must be a single JSON line, got: {text:?}"
    );
    Ok(serde_json::from_str(text.trim())?)
}

fn png_image_bytes(width: u32, height: u32) -> Result<Vec<u8>, Box<dyn Error>> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        let r = ((x + y) % 255) as u8;
        Rgb([r, 128, 255u8.saturating_sub(r)])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}
