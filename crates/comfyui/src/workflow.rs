//! Text-to-image job graph template.
//!
//! The template fixes every structural parameter (checkpoint, sampler,
//! scheduler, upscaler, saver). Per submission only the seed, the step
//! count, the guidance scale, the latent size and the two prompt texts
//! change.

use atelier_core::job::JobParams;
use serde_json::{json, Value};

/// KSampler node: seed, steps, cfg.
pub const SAMPLER_NODE: &str = "3";
/// Checkpoint loader node.
pub const CHECKPOINT_NODE: &str = "4";
/// Empty latent image node: width, height.
pub const LATENT_NODE: &str = "5";
/// Positive prompt text encoder.
pub const POSITIVE_PROMPT_NODE: &str = "6";
/// Negative prompt text encoder.
pub const NEGATIVE_PROMPT_NODE: &str = "7";
/// Final image saver whose outputs are the job's assets.
pub const OUTPUT_NODE: &str = "17";

/// Checkpoint referenced by the template.
pub const DEFAULT_CHECKPOINT: &str = "illustrious-unholy-nswf.safetensors";

/// The fixed template with zeroed per-job fields.
pub fn base_workflow() -> Value {
    json!({
        "3": {
            "inputs": {
                "seed": 0,
                "steps": 20,
                "cfg": 7,
                "sampler_name": "dpmpp_2m_sde",
                "scheduler": "karras",
                "denoise": 1,
                "model": ["4", 0],
                "positive": ["6", 0],
                "negative": ["7", 0],
                "latent_image": ["5", 0]
            },
            "class_type": "KSampler",
            "_meta": { "title": "KSampler" }
        },
        "4": {
            "inputs": { "ckpt_name": DEFAULT_CHECKPOINT },
            "class_type": "CheckpointLoaderSimple",
            "_meta": { "title": "Load Checkpoint" }
        },
        "5": {
            "inputs": { "width": 1216, "height": 832, "batch_size": 1 },
            "class_type": "EmptyLatentImage",
            "_meta": { "title": "Empty Latent Image" }
        },
        "6": {
            "inputs": { "text": "", "clip": ["4", 1] },
            "class_type": "CLIPTextEncode",
            "_meta": { "title": "CLIP Text Encode (Prompt)" }
        },
        "7": {
            "inputs": { "text": "", "clip": ["4", 1] },
            "class_type": "CLIPTextEncode",
            "_meta": { "title": "CLIP Text Encode (Prompt)" }
        },
        "8": {
            "inputs": { "samples": ["3", 0], "vae": ["4", 2] },
            "class_type": "VAEDecode",
            "_meta": { "title": "VAE Decode" }
        },
        "17": {
            "inputs": {
                "filename": "%time_%basemodelname_%seed",
                "path": "",
                "extension": "webp",
                "lossless_webp": false,
                "quality_jpeg_or_webp": 90,
                "optimize_png": false,
                "embed_workflow": false,
                "save_workflow_as_json": false,
                "counter": 0,
                "time_format": "%Y-%m-%d-%H%M%S",
                "show_preview": true,
                "images": ["18", 0]
            },
            "class_type": "Image Saver Simple",
            "_meta": { "title": "Image Saver Simple" }
        },
        "18": {
            "inputs": { "upscale_method": "lanczos", "scale_by": 2, "image": ["8", 0] },
            "class_type": "ImageScaleBy",
            "_meta": { "title": "Upscale Image By" }
        }
    })
}

/// Write `value` into `graph[node].inputs[field]`.
fn set_input(graph: &mut Value, node: &str, field: &str, value: Value) {
    graph[node]["inputs"][field] = value;
}

/// Build the job graph for one backend, using `seed` for its sampler.
pub fn build_workflow(params: &JobParams, seed: u64) -> Value {
    let mut graph = base_workflow();

    set_input(&mut graph, SAMPLER_NODE, "seed", json!(seed));
    set_input(&mut graph, SAMPLER_NODE, "steps", json!(params.steps));
    set_input(&mut graph, SAMPLER_NODE, "cfg", json!(params.cfg));
    set_input(&mut graph, LATENT_NODE, "width", json!(params.width));
    set_input(&mut graph, LATENT_NODE, "height", json!(params.height));
    set_input(&mut graph, POSITIVE_PROMPT_NODE, "text", json!(params.prompt));
    set_input(
        &mut graph,
        NEGATIVE_PROMPT_NODE,
        "text",
        json!(params.negative_prompt),
    );

    graph
}
