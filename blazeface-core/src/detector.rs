use std::path::Path;

use anyhow::Result;
use image::DynamicImage;
use thiserror::Error;

use crate::model::{BlazeFaceModel, InferenceParams};
use crate::postprocess::{DecodeConfig, FaceRecord, decode_detections};
use crate::preprocess::{
    PreprocessConfig, PreprocessOutput, preprocess_dynamic_image, preprocess_image_bytes,
};
use blazeface_utils::timing_guard;

/// Why a detection attempt produced no faces.
///
/// A broken model file is surfaced by [`BlazeFaceDetector::new`] instead; this
/// type only covers per-image failures, so callers can tell a bad input image
/// apart from a misbehaving engine without parsing message strings.
#[derive(Debug, Error)]
pub enum DetectError {
    /// The image could not be decoded or converted into an input tensor.
    #[error("image preprocessing failed: {0}")]
    Preprocess(#[source] anyhow::Error),
    /// The engine rejected the input, or its outputs could not be decoded.
    #[error("BlazeFace inference failed: {0}")]
    Inference(#[source] anyhow::Error),
}

/// Convenience wrapper that couples the BlazeFace model with preprocessing,
/// inference, and decode settings.
///
/// This is the main entry point for running face detection.
#[derive(Debug)]
pub struct BlazeFaceDetector {
    model: BlazeFaceModel,
    preprocess: PreprocessConfig,
    params: InferenceParams,
    decode: DecodeConfig,
}

impl BlazeFaceDetector {
    /// Construct a detector from a model path and configuration.
    ///
    /// # Arguments
    ///
    /// * `model_path` - The path to the ONNX model file.
    /// * `preprocess` - The configuration for image preprocessing.
    /// * `params` - The thresholds handed to the engine on every run.
    /// * `decode` - The configuration for decoding raw detections.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        preprocess: PreprocessConfig,
        params: InferenceParams,
        decode: DecodeConfig,
    ) -> Result<Self> {
        let model = BlazeFaceModel::load(model_path)?;
        Ok(Self {
            model,
            preprocess,
            params,
            decode,
        })
    }

    /// Run detection on encoded image bytes (any codec the `image` crate reads).
    ///
    /// # Arguments
    ///
    /// * `bytes` - The encoded image bytes to process.
    pub fn detect_bytes(&self, bytes: &[u8]) -> Result<Vec<FaceRecord>, DetectError> {
        let _guard = timing_guard("blazeface_core::detect_bytes", log::Level::Debug);
        let prep =
            preprocess_image_bytes(bytes, &self.preprocess).map_err(DetectError::Preprocess)?;
        self.run_preprocessed(prep)
    }

    /// Run detection on an in-memory dynamic image.
    ///
    /// # Arguments
    ///
    /// * `image` - The dynamic image to process.
    pub fn detect_image(&self, image: &DynamicImage) -> Result<Vec<FaceRecord>, DetectError> {
        let _guard = timing_guard("blazeface_core::detect_image", log::Level::Debug);
        let prep =
            preprocess_dynamic_image(image, &self.preprocess).map_err(DetectError::Preprocess)?;
        self.run_preprocessed(prep)
    }

    /// Access the preprocessing configuration.
    pub fn preprocess_config(&self) -> &PreprocessConfig {
        &self.preprocess
    }

    /// Access the thresholds handed to the engine on every run.
    pub fn params(&self) -> &InferenceParams {
        &self.params
    }

    /// Access the decode configuration.
    pub fn decode_config(&self) -> &DecodeConfig {
        &self.decode
    }

    /// Run the model on a preprocessed tensor and decode the final faces.
    fn run_preprocessed(&self, prep: PreprocessOutput) -> Result<Vec<FaceRecord>, DetectError> {
        let raw = {
            let _guard = timing_guard("blazeface_core::onnx_inference", log::Level::Debug);
            self.model
                .run(prep.tensor, &self.params)
                .map_err(DetectError::Inference)?
        };

        let _guard = timing_guard("blazeface_core::decode", log::Level::Debug);
        decode_detections(&raw, prep.original_size, &self.decode).map_err(DetectError::Inference)
    }
}
