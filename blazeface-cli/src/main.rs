use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    str::FromStr,
};

use anyhow::{Context, Result};
use base64::Engine;
use clap::Parser;
use log::{debug, info, warn};
use serde::Serialize;

use blazeface_core::{
    BlazeFaceDetector, DecodeConfig, FaceRecord, InferenceParams, PixelBox, PreprocessConfig,
};
use blazeface_utils::{
    config::{AppSettings, ResizeQuality},
    decode_image, init_logging, normalize_path,
};

/// Detect faces in an image and print them as a single JSON line on stdout.
///
/// Built to run as a subprocess: the caller passes the image as base64, reads
/// one line of JSON back, and treats stderr as diagnostics only.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct DetectArgs {
    /// Base64-encoded image data (standard alphabet, any common codec).
    #[arg(long, conflicts_with = "image_file", required_unless_present = "image_file")]
    image: Option<String>,

    /// Read the raw image from a file instead of a base64 argument.
    #[arg(long)]
    image_file: Option<PathBuf>,

    /// Minimum confidence for a detection to be kept (defaults to 0.5).
    #[arg(long)]
    conf: Option<f32>,

    /// IoU threshold for the model's built-in suppression (defaults to 0.3).
    #[arg(long)]
    iou: Option<f32>,

    /// Maximum number of detections the model may return (defaults to 25).
    #[arg(long)]
    max_det: Option<usize>,

    /// Resize filter preference, 'quality' or 'speed' (defaults to quality).
    #[arg(long, value_parser = ResizeQuality::from_str)]
    resize_quality: Option<ResizeQuality>,

    /// Path to the BlazeFace ONNX model (defaults to models/blazeface_128.onnx).
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Optional settings JSON (defaults to built-in BlazeFace parameters).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a copy of the image with boxes and landmarks overlaid.
    #[arg(long)]
    annotate: Option<PathBuf>,
}

/// The stdout contract: exactly one of these is printed per invocation.
#[derive(Debug, Serialize)]
struct DetectionEnvelope {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    faces: Vec<FaceRecord>,
    count: usize,
}

impl DetectionEnvelope {
    fn success(faces: Vec<FaceRecord>) -> Self {
        let count = faces.len();
        Self {
            success: true,
            error: None,
            faces,
            count,
        }
    }

    fn failure(message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
            faces: Vec::new(),
            count: 0,
        }
    }
}

fn main() -> ExitCode {
    if let Err(err) = init_logging(log::LevelFilter::Info) {
        eprintln!("failed to initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }

    let args = DetectArgs::parse();
    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            // Operator-level failures (model, settings) stay off stdout so the
            // caller never mistakes them for a detection payload.
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &DetectArgs) -> Result<ExitCode> {
    let mut settings = load_settings(args.config.as_ref())?;
    apply_cli_overrides(&mut settings, args);

    // The image bytes are resolved before the model loads: a malformed request
    // is answered on stdout, while a broken installation never is.
    let bytes = match load_image_bytes(args) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("rejecting request: {err:#}");
            print_envelope(&DetectionEnvelope::failure(format!("{err:#}")))?;
            return Ok(ExitCode::FAILURE);
        }
    };

    let model_path = args
        .model
        .clone()
        .unwrap_or_else(|| settings.resolved_model_path());
    let preprocess_config = PreprocessConfig {
        resize_quality: settings.resize_quality,
    };
    let params: InferenceParams = (&settings.detection).into();
    let decode_config: DecodeConfig = (&settings.detection).into();

    info!("Loading BlazeFace model from {}", model_path.display());
    debug!(
        "detection parameters: conf {}, iou {}, max {}, resize {}",
        params.conf_threshold, params.iou_threshold, params.max_detections, settings.resize_quality
    );
    let detector = BlazeFaceDetector::new(&model_path, preprocess_config, params, decode_config)?;

    let faces = match detector.detect_bytes(&bytes) {
        Ok(faces) => faces,
        Err(err) => {
            // A bad image or a failed run is not the caller's problem; the
            // contract answer is simply zero faces.
            warn!("{err}");
            print_envelope(&DetectionEnvelope::success(Vec::new()))?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    info!("{} face(s) detected", faces.len());
    if let Some(annotate_path) = args.annotate.as_ref() {
        match annotate_image(&bytes, &faces, annotate_path) {
            Ok(()) => info!("Annotated image saved to {}", annotate_path.display()),
            Err(err) => warn!("Failed to annotate image: {err}"),
        }
    }

    print_envelope(&DetectionEnvelope::success(faces))?;
    Ok(ExitCode::SUCCESS)
}

fn load_settings(config_path: Option<&PathBuf>) -> Result<AppSettings> {
    if let Some(path) = config_path {
        let resolved = normalize_path(path)?;
        AppSettings::load_from_path(&resolved)
    } else {
        Ok(AppSettings::default())
    }
}

fn apply_cli_overrides(settings: &mut AppSettings, args: &DetectArgs) {
    if let Some(conf) = args.conf {
        settings.detection.conf_threshold = conf;
    }
    if let Some(iou) = args.iou {
        settings.detection.iou_threshold = iou;
    }
    if let Some(max_det) = args.max_det {
        settings.detection.max_detections = max_det;
    }
    if let Some(quality) = args.resize_quality {
        settings.resize_quality = quality;
    }
}

fn load_image_bytes(args: &DetectArgs) -> Result<Vec<u8>> {
    match (args.image.as_deref(), args.image_file.as_ref()) {
        (Some(encoded), _) => base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .context("invalid base64 image data"),
        (None, Some(path)) => fs::read(path)
            .with_context(|| format!("failed to read image file {}", path.display())),
        (None, None) => anyhow::bail!("either --image or --image-file is required"),
    }
}

fn print_envelope(envelope: &DetectionEnvelope) -> Result<()> {
    let json =
        serde_json::to_string(envelope).context("failed to serialize detection envelope")?;
    println!("{json}");
    Ok(())
}

fn annotate_image(bytes: &[u8], faces: &[FaceRecord], output_path: &Path) -> Result<()> {
    use image::Rgba;
    use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};

    let mut image = decode_image(bytes)?.to_rgba8();
    let (img_w, img_h) = image.dimensions();

    let rect_color = Rgba([255, 0, 0, 255]);
    let landmark_color = Rgba([0, 255, 0, 255]);

    for face in faces {
        let rect = rect_from_box(&face.bounding_box, img_w, img_h);
        draw_hollow_rect_mut(&mut image, rect, rect_color);
        for lm in face.landmarks.points() {
            let cx = clamp_to_i32(lm.x, img_w);
            let cy = clamp_to_i32(lm.y, img_h);
            draw_filled_circle_mut(&mut image, (cx, cy), 2, landmark_color);
        }
    }

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    image
        .save(output_path)
        .with_context(|| format!("failed to save annotated image {}", output_path.display()))?;

    Ok(())
}

fn rect_from_box(bbox: &PixelBox, img_w: u32, img_h: u32) -> imageproc::rect::Rect {
    use imageproc::rect::Rect;

    let max_x = img_w.saturating_sub(1) as i64;
    let max_y = img_h.saturating_sub(1) as i64;

    let x1 = bbox.x.clamp(0, max_x);
    let y1 = bbox.y.clamp(0, max_y);
    let x2 = (bbox.x + bbox.width).clamp(0, max_x);
    let y2 = (bbox.y + bbox.height).clamp(0, max_y);

    let width = (x2 - x1).max(1) as u32;
    let height = (y2 - y1).max(1) as u32;

    Rect::at(x1 as i32, y1 as i32).of_size(width, height)
}

fn clamp_to_i32(value: f32, max_extent: u32) -> i32 {
    if max_extent == 0 {
        return 0;
    }
    let max = (max_extent - 1) as f32;
    value.clamp(0.0, max).round() as i32
}
