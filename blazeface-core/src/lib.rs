//! Core BlazeFace inference primitives.
//!
//! This crate loads the BlazeFace ONNX model, runs inference with
//! `tract-onnx`, and provides preprocessing and decode helpers.

/// High-level face detection runner.
pub mod detector;
/// ONNX model loading and execution.
pub mod model;
/// Detection decoding (score filtering, denormalization).
pub mod postprocess;
/// Image pre-processing (resizing, tensor conversion).
pub mod preprocess;

pub use detector::{BlazeFaceDetector, DetectError};
pub use model::{BlazeFaceModel, InferenceParams, RawDetections};
pub use postprocess::{
    DecodeConfig, FaceRecord, LandmarkPoint, Landmarks, PixelBox, decode_detections,
};
pub use preprocess::{
    INPUT_SIZE, PreprocessConfig, PreprocessOutput, preprocess_dynamic_image,
    preprocess_image_bytes,
};

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
