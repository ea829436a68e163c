use std::{fmt::Write, path::Path};

use anyhow::{Context, Result};
use log::{debug, warn};
use tract_onnx::prelude::{
    Framework, Graph, InferenceModel, InferenceModelExt, IntoTensor, SimplePlan, TValue, TVec,
    Tensor, TypedFact, TypedOp,
};

use blazeface_utils::config::DetectionSettings;

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Column count of one raw detection row: 4 box corners followed by 6 landmark pairs.
pub const DETECTION_COLS: usize = 16;

const INPUT_IMAGE: &str = "image";
const INPUT_CONF: &str = "conf_threshold";
const INPUT_MAX_DET: &str = "max_detections";
const INPUT_IOU: &str = "iou_threshold";

/// Scalar parameters fed to the graph alongside the image tensor.
///
/// The graph applies its own score filtering and non-maximum suppression using
/// these values, so they shape what the model returns, not only what the
/// decoder keeps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceParams {
    /// Minimum confidence for the graph's internal filtering.
    pub conf_threshold: f32,
    /// IoU threshold for the graph's internal non-maximum suppression.
    pub iou_threshold: f32,
    /// Maximum detection count the graph may emit.
    pub max_detections: i64,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            conf_threshold: 0.5,
            iou_threshold: 0.3,
            max_detections: 25,
        }
    }
}

impl From<&DetectionSettings> for InferenceParams {
    fn from(settings: &DetectionSettings) -> Self {
        Self {
            conf_threshold: settings.conf_threshold,
            iou_threshold: settings.iou_threshold,
            max_detections: settings.max_detections as i64,
        }
    }
}

/// Raw engine outputs, normalized to a fixed shape contract.
#[derive(Debug)]
pub struct RawDetections {
    /// Boxes-and-landmarks tensor of shape `[N, 16]`.
    pub boxes: Tensor,
    /// Confidence tensor of shape `[N]`. Synthesized as all-ones when the
    /// graph produced a single output.
    pub scores: Tensor,
}

/// Position of each named graph input, resolved once at load time.
#[derive(Debug, Clone, Copy)]
struct InputBinding {
    image: usize,
    conf: usize,
    max_det: usize,
    iou: usize,
}

/// Wrapper around the BlazeFace ONNX runnable model.
///
/// This struct handles loading the ONNX graph, preparing it for execution, and
/// running inference with the four named inputs the artifact expects.
#[derive(Debug)]
pub struct BlazeFaceModel {
    runnable: RunnableModel,
    binding: InputBinding,
}

impl BlazeFaceModel {
    /// Load and optimize the BlazeFace ONNX graph.
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();
        anyhow::ensure!(path.exists(), "model file not found: {}", path.display());

        let (runnable, binding) = match load_runnable_model(path, true) {
            Ok(loaded) => {
                debug!("BlazeFace model {} optimized successfully", path.display());
                loaded
            }
            Err(opt_err) => {
                let optimize_msg = format!("{opt_err}");
                let mut chain_msg = String::new();
                for cause in opt_err.chain() {
                    let _ = writeln!(&mut chain_msg, "  - {cause}");
                }
                warn!(
                    "BlazeFace model {} failed optimized load ({}); falling back to decluttered graph (~2x slower).\nError chain:\n{}",
                    path.display(),
                    optimize_msg,
                    chain_msg.trim_end()
                );
                let decluttered = load_runnable_model(path, false).with_context(|| {
                    format!(
                        "fallback to decluttered BlazeFace graph failed after optimize error: {optimize_msg}"
                    )
                })?;
                debug!("BlazeFace model {} running in decluttered mode", path.display());
                decluttered
            }
        };

        Ok(Self { runnable, binding })
    }

    /// Execute BlazeFace with a preprocessed image tensor and scalar parameters.
    ///
    /// Returns the boxes tensor (`[N, 16]` rows of normalized coordinates) and
    /// the matching scores tensor (`[N]`), after applying the output contract:
    /// a missing scores output is synthesized as all-ones, leading batch
    /// dimensions are stripped, and a flat 16-value boxes output is treated as
    /// a single detection row.
    pub fn run(&self, image: Tensor, params: &InferenceParams) -> Result<RawDetections> {
        let conf = Tensor::from_shape(&[1], &[params.conf_threshold])
            .map_err(|e| anyhow::anyhow!("failed to build conf_threshold tensor: {e}"))?;
        let max_det = Tensor::from_shape(&[1], &[params.max_detections])
            .map_err(|e| anyhow::anyhow!("failed to build max_detections tensor: {e}"))?;
        let iou = Tensor::from_shape(&[1], &[params.iou_threshold])
            .map_err(|e| anyhow::anyhow!("failed to build iou_threshold tensor: {e}"))?;

        let mut slots: [Option<TValue>; 4] = [None, None, None, None];
        slots[self.binding.image] = Some(image.into());
        slots[self.binding.conf] = Some(conf.into());
        slots[self.binding.max_det] = Some(max_det.into());
        slots[self.binding.iou] = Some(iou.into());
        let inputs = slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| anyhow::anyhow!("input binding left a slot unbound")))
            .collect::<Result<TVec<TValue>>>()?;

        let outputs = self
            .runnable
            .run(inputs)
            .map_err(|e| anyhow::anyhow!("BlazeFace execution failed: {e}"))?;

        let tensors: Vec<Tensor> = outputs
            .into_iter()
            .map(|value| value.into_tensor())
            .collect();

        normalize_outputs(tensors)
    }
}

fn load_runnable_model(path: &Path, optimized: bool) -> Result<(RunnableModel, InputBinding)> {
    // The artifact declares its own input shapes; nothing is overridden here.
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to parse ONNX graph from {}", path.display()))?;

    let binding = resolve_input_binding(&model)?;

    let runnable = if optimized {
        model
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("unable to optimize BlazeFace graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make BlazeFace graph runnable: {e}"))?
    } else {
        model
            .into_typed()
            .map_err(|e| anyhow::anyhow!("unable to type-check BlazeFace graph: {e}"))?
            .into_decluttered()
            .map_err(|e| anyhow::anyhow!("unable to declutter BlazeFace graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make BlazeFace graph runnable: {e}"))?
    };

    Ok((runnable, binding))
}

/// Map the artifact's named inputs to graph positions.
///
/// The four input names are a versioned contract with the shipped model file;
/// a graph missing any of them is rejected at load time.
fn resolve_input_binding(model: &InferenceModel) -> Result<InputBinding> {
    let outlets = model
        .input_outlets()
        .map_err(|e| anyhow::anyhow!("unable to enumerate graph inputs: {e}"))?;
    let names: Vec<String> = outlets
        .iter()
        .map(|outlet| model.node(outlet.node).name.clone())
        .collect();

    anyhow::ensure!(
        names.len() == 4,
        "expected 4 graph inputs ({INPUT_IMAGE}, {INPUT_CONF}, {INPUT_MAX_DET}, {INPUT_IOU}), found {}: {}",
        names.len(),
        names.join(", ")
    );

    let position = |wanted: &str| {
        names.iter().position(|name| name == wanted).ok_or_else(|| {
            anyhow::anyhow!(
                "model is missing input '{}'; found inputs: {}",
                wanted,
                names.join(", ")
            )
        })
    };

    Ok(InputBinding {
        image: position(INPUT_IMAGE)?,
        conf: position(INPUT_CONF)?,
        max_det: position(INPUT_MAX_DET)?,
        iou: position(INPUT_IOU)?,
    })
}

fn normalize_outputs(mut tensors: Vec<Tensor>) -> Result<RawDetections> {
    match tensors.len() {
        0 => anyhow::bail!("BlazeFace model produced no outputs"),
        1 => {
            let boxes = normalize_boxes(
                tensors
                    .pop()
                    .ok_or_else(|| anyhow::anyhow!("BlazeFace model produced no outputs"))?,
            )?;
            let rows = boxes.shape()[0];
            let scores = Tensor::from_shape(&[rows], &vec![1.0f32; rows])
                .map_err(|e| anyhow::anyhow!("failed to synthesize scores tensor: {e}"))?;
            Ok(RawDetections { boxes, scores })
        }
        2 => {
            let scores = normalize_scores(
                tensors
                    .pop()
                    .ok_or_else(|| anyhow::anyhow!("BlazeFace scores output missing"))?,
            )?;
            let boxes = normalize_boxes(
                tensors
                    .pop()
                    .ok_or_else(|| anyhow::anyhow!("BlazeFace boxes output missing"))?,
            )?;
            Ok(RawDetections { boxes, scores })
        }
        other => anyhow::bail!(
            "unexpected number of BlazeFace outputs: expected 1 or 2, got {other}"
        ),
    }
}

fn normalize_boxes(tensor: Tensor) -> Result<Tensor> {
    let shape = tensor.shape().to_vec();
    match shape.as_slice() {
        [1, rows, cols] => {
            let (rows, cols) = (*rows, *cols);
            tensor
                .into_shape(&[rows, cols])
                .map_err(|e| anyhow::anyhow!("failed to strip boxes batch dimension: {e}"))
        }
        [_, _] => Ok(tensor),
        [len] => {
            anyhow::ensure!(
                *len == DETECTION_COLS,
                "flat boxes output has {} values, expected {}",
                len,
                DETECTION_COLS
            );
            tensor
                .into_shape(&[1, DETECTION_COLS])
                .map_err(|e| anyhow::anyhow!("failed to reshape flat boxes output: {e}"))
        }
        other => anyhow::bail!("unexpected boxes output shape {:?}", other),
    }
}

fn normalize_scores(tensor: Tensor) -> Result<Tensor> {
    let shape = tensor.shape().to_vec();
    match shape.as_slice() {
        [1, rows] => {
            let rows = *rows;
            tensor
                .into_shape(&[rows])
                .map_err(|e| anyhow::anyhow!("failed to strip scores batch dimension: {e}"))
        }
        [_] => Ok(tensor),
        other => anyhow::bail!("unexpected scores output shape {:?}", other),
    }
}
