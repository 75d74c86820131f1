//! Typed parsing of `GET /history/{prompt_id}` responses.
//!
//! ComfyUI answers with `{ "<prompt_id>": { "prompt": [...], "outputs":
//! {...}, "status": {...} } }`. The echoed job graph sits at index 2 of
//! the `prompt` tuple. Generation metadata is read from fixed node ids
//! (see [`crate::workflow`]); a missing or malformed node leaves the
//! corresponding metadata fields at zero instead of failing the poll.

use std::collections::HashMap;

use atelier_core::asset::{AssetDescriptor, ImageMetadata};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::api::ComfyUIApiError;
use crate::workflow::{
    LATENT_NODE, NEGATIVE_PROMPT_NODE, OUTPUT_NODE, POSITIVE_PROMPT_NODE, SAMPLER_NODE,
};

/// Index of the job graph inside the echoed `prompt` tuple.
const PROMPT_GRAPH_INDEX: usize = 2;

/// `status_str` value ComfyUI reports for a failed execution.
const STATUS_ERROR: &str = "error";

/// Backend-side view of a job, derived from its history record.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryStatus {
    /// No history record yet: the job is queued or unknown.
    Pending,
    /// Recorded, but the output node has produced nothing yet.
    Processing,
    /// The output node lists one or more produced assets.
    Ready(Vec<AssetDescriptor>),
    /// The backend reports the execution as failed.
    Failed(String),
}

/// One entry of the history response.
#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub prompt: Option<serde_json::Value>,
    #[serde(default)]
    pub outputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

/// Execution status block of a history entry.
#[derive(Debug, Default, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, data]` pairs.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// Output block of a single node.
#[derive(Debug, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputImage>,
}

/// One produced file as listed in a node output.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_image_kind")]
    pub kind: String,
}

fn default_image_kind() -> String {
    "output".to_string()
}

/// A node of the echoed job graph. Only `inputs` is read.
#[derive(Debug, Default, Deserialize)]
pub struct GraphNode {
    #[serde(default)]
    pub inputs: serde_json::Value,
    #[serde(default)]
    pub class_type: Option<String>,
}

/// Sampler node inputs. Linked (non-literal) inputs decode as `None`.
#[derive(Debug, Default, Deserialize)]
struct SamplerInputs {
    #[serde(default, deserialize_with = "lenient")]
    seed: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    steps: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    cfg: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct TextInputs {
    #[serde(default, deserialize_with = "lenient")]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LatentInputs {
    #[serde(default, deserialize_with = "lenient")]
    width: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    height: Option<u32>,
}

/// Accept any JSON value, keeping it only if it converts to `T`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Decode a node's inputs, falling back to defaults when absent or malformed.
fn node_inputs<T: DeserializeOwned + Default>(graph: &HashMap<String, GraphNode>, id: &str) -> T {
    graph
        .get(id)
        .and_then(|node| serde_json::from_value(node.inputs.clone()).ok())
        .unwrap_or_default()
}

/// Pull the job graph out of the echoed `prompt` tuple.
///
/// Returns an empty graph if the tuple is missing or malformed.
pub fn extract_graph(prompt: Option<&serde_json::Value>) -> HashMap<String, GraphNode> {
    prompt
        .and_then(|p| p.get(PROMPT_GRAPH_INDEX))
        .and_then(|graph| serde_json::from_value(graph.clone()).ok())
        .unwrap_or_default()
}

/// Extract generation metadata from the well-known graph nodes.
pub fn extract_metadata(graph: &HashMap<String, GraphNode>) -> ImageMetadata {
    let sampler: SamplerInputs = node_inputs(graph, SAMPLER_NODE);
    let positive: TextInputs = node_inputs(graph, POSITIVE_PROMPT_NODE);
    let negative: TextInputs = node_inputs(graph, NEGATIVE_PROMPT_NODE);
    let latent: LatentInputs = node_inputs(graph, LATENT_NODE);

    ImageMetadata {
        prompt: positive.text.unwrap_or_default(),
        negative_prompt: negative.text.unwrap_or_default(),
        seed: sampler.seed.unwrap_or_default(),
        steps: sampler.steps.unwrap_or_default(),
        cfg: sampler.cfg.unwrap_or_default(),
        width: latent.width.unwrap_or_default(),
        height: latent.height.unwrap_or_default(),
    }
}

/// Find the backend's error message in the status `messages` list.
fn execution_error_message(status: &ExecutionStatus) -> String {
    status
        .messages
        .iter()
        .filter_map(|m| m.as_array())
        .filter(|pair| pair.first().and_then(|n| n.as_str()) == Some("execution_error"))
        .filter_map(|pair| pair.get(1))
        .find_map(|data| data.get("exception_message").and_then(|m| m.as_str()))
        .map(|m| m.trim().to_string())
        .unwrap_or_else(|| "Execution failed on backend".to_string())
}

/// Classify a raw history response for `prompt_id`.
///
/// * No entry for `prompt_id` → [`HistoryStatus::Pending`].
/// * Entry with status `error` → [`HistoryStatus::Failed`].
/// * Output node lists zero images → [`HistoryStatus::Processing`].
/// * Otherwise → [`HistoryStatus::Ready`] with metadata attached to every asset.
///
/// A body that is not an object, or an entry whose output node is
/// malformed, is a [`ComfyUIApiError::Parse`].
pub fn classify_history(
    prompt_id: &str,
    history: &serde_json::Value,
) -> Result<HistoryStatus, ComfyUIApiError> {
    let records = history
        .as_object()
        .ok_or_else(|| ComfyUIApiError::Parse("history response is not an object".into()))?;

    let Some(raw_entry) = records.get(prompt_id) else {
        return Ok(HistoryStatus::Pending);
    };

    let entry: HistoryEntry = serde_json::from_value(raw_entry.clone())
        .map_err(|e| ComfyUIApiError::Parse(format!("history entry for {prompt_id}: {e}")))?;

    if let Some(status) = &entry.status {
        if status.status_str.as_deref() == Some(STATUS_ERROR) {
            return Ok(HistoryStatus::Failed(execution_error_message(status)));
        }
    }

    let output: NodeOutput = match entry.outputs.get(OUTPUT_NODE) {
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
            ComfyUIApiError::Parse(format!("output node {OUTPUT_NODE} for {prompt_id}: {e}"))
        })?,
        None => NodeOutput::default(),
    };

    if output.images.is_empty() {
        return Ok(HistoryStatus::Processing);
    }

    let metadata = extract_metadata(&extract_graph(entry.prompt.as_ref()));
    let assets = output
        .images
        .into_iter()
        .map(|image| AssetDescriptor {
            filename: image.filename,
            subfolder: image.subfolder,
            kind: image.kind,
            metadata: metadata.clone(),
        })
        .collect();

    Ok(HistoryStatus::Ready(assets))
}
