use anyhow::Result;
use serde::Serialize;
use tract_onnx::prelude::{
    Tensor,
    tract_ndarray::{ArrayView1, ArrayView2},
};

use blazeface_utils::config::DetectionSettings;

use crate::model::RawDetections;

/// Minimum emitted box side length in pixels; smaller detections are noise.
const MIN_BOX_SIDE: i64 = 5;

/// Configuration for decoding raw detections into face records.
#[derive(Debug, Clone, Copy)]
pub struct DecodeConfig {
    /// Minimum confidence score for a detection to be kept. The model already
    /// received this value; the decoder re-checks it on the returned rows.
    pub conf_threshold: f32,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.5,
        }
    }
}

impl From<DetectionSettings> for DecodeConfig {
    fn from(settings: DetectionSettings) -> Self {
        DecodeConfig {
            conf_threshold: settings.conf_threshold,
        }
    }
}

impl From<&DetectionSettings> for DecodeConfig {
    fn from(settings: &DetectionSettings) -> Self {
        settings.clone().into()
    }
}

/// Axis-aligned bounding box in absolute source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelBox {
    /// The x-coordinate of the top-left corner.
    pub x: i64,
    /// The y-coordinate of the top-left corner.
    pub y: i64,
    /// The width of the box.
    pub width: i64,
    /// The height of the box.
    pub height: i64,
}

/// A landmark coordinate (x, y) in absolute source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LandmarkPoint {
    /// The x-coordinate of the landmark.
    pub x: f32,
    /// The y-coordinate of the landmark.
    pub y: f32,
}

/// The six named BlazeFace landmarks, in the row order the artifact emits them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Landmarks {
    pub left_eye: LandmarkPoint,
    pub right_eye: LandmarkPoint,
    pub nose: LandmarkPoint,
    pub mouth: LandmarkPoint,
    pub left_cheek: LandmarkPoint,
    pub right_cheek: LandmarkPoint,
}

impl Landmarks {
    /// All six points in wire order.
    pub fn points(&self) -> [LandmarkPoint; 6] {
        [
            self.left_eye,
            self.right_eye,
            self.nose,
            self.mouth,
            self.left_cheek,
            self.right_cheek,
        ]
    }
}

/// A single detected face, ready for serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceRecord {
    /// Position in the unfiltered engine-output enumeration. Gaps appear when
    /// earlier rows were skipped; they are expected and correct.
    pub id: usize,
    /// The confidence score of the detection.
    pub confidence: f32,
    /// The bounding box in absolute pixels, truncated toward zero.
    pub bounding_box: PixelBox,
    /// The six named landmark points, kept as floats.
    pub landmarks: Landmarks,
}

/// Decode normalized raw detections into face records in source-image pixels.
///
/// Rows are paired with scores in engine order (pairing stops at the shorter
/// of the two sequences). A row is skipped when its score is non-finite or
/// strictly below the configured threshold, or when its denormalized box is
/// narrower or shorter than 5 pixels. The surviving records keep the engine's
/// ordering; non-maximum suppression already happened inside the graph and is
/// not re-run here.
pub fn decode_detections(
    raw: &RawDetections,
    original_size: (u32, u32),
    config: &DecodeConfig,
) -> Result<Vec<FaceRecord>> {
    let rows = detection_rows(&raw.boxes)?;
    let scores = score_column(&raw.scores)?;

    let (orig_w, orig_h) = original_size;
    let width_f = orig_w as f32;
    let height_f = orig_h as f32;

    let mut faces = Vec::with_capacity(rows.nrows().min(scores.len()));
    for (index, (row, score)) in rows.rows().into_iter().zip(scores.iter()).enumerate() {
        let score = *score;
        if !score.is_finite() || score < config.conf_threshold {
            continue;
        }

        let top_y = row[0];
        let top_x = row[1];
        let bot_y = row[2];
        let bot_x = row[3];

        let x1 = (top_x * width_f) as i64;
        let y1 = (top_y * height_f) as i64;
        let x2 = (bot_x * width_f) as i64;
        let y2 = (bot_y * height_f) as i64;

        let box_width = x2 - x1;
        let box_height = y2 - y1;
        if box_width < MIN_BOX_SIDE || box_height < MIN_BOX_SIDE {
            continue;
        }

        let point = |offset: usize| LandmarkPoint {
            x: row[offset] * width_f,
            y: row[offset + 1] * height_f,
        };

        faces.push(FaceRecord {
            id: index,
            confidence: score,
            bounding_box: PixelBox {
                x: x1,
                y: y1,
                width: box_width,
                height: box_height,
            },
            landmarks: Landmarks {
                left_eye: point(4),
                right_eye: point(6),
                nose: point(8),
                mouth: point(10),
                left_cheek: point(12),
                right_cheek: point(14),
            },
        });
    }

    Ok(faces)
}

/// Extract the detection rows from the boxes tensor.
fn detection_rows<'a>(boxes: &'a Tensor) -> Result<ArrayView2<'a, f32>> {
    let shape = boxes.shape();
    let rows = match shape {
        [rows, 16] => *rows,
        [1, rows, 16] => *rows,
        other => anyhow::bail!(
            "boxes tensor must have shape [N, 16] or [1, N, 16] (got {:?})",
            other
        ),
    };

    let slice = boxes
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("boxes tensor is not f32: {e}"))?;

    ArrayView2::from_shape((rows, 16), slice)
        .map_err(|_| anyhow::anyhow!("boxes tensor data is not contiguous"))
}

/// Extract the per-row confidence values from the scores tensor.
fn score_column<'a>(scores: &'a Tensor) -> Result<ArrayView1<'a, f32>> {
    let shape = scores.shape();
    let len = match shape {
        [len] => *len,
        [1, len] => *len,
        other => anyhow::bail!(
            "scores tensor must have shape [N] or [1, N] (got {:?})",
            other
        ),
    };

    let slice = scores
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("scores tensor is not f32: {e}"))?;

    ArrayView1::from_shape(len, slice)
        .map_err(|_| anyhow::anyhow!("scores tensor data is not contiguous"))
}
