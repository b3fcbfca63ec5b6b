use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::cache::PreviewCache;
use crate::core::color::{apply_mix, MixMatrix};
use crate::core::tensor::ImageTensor;
use crate::registry::NodeDefinition;

pub const NODE_CLASS: &str = "OlmChannelMixer";
pub const DISPLAY_NAME: &str = "Olm Channel Mixer";
pub const CATEGORY: &str = "image/color";
pub const DEFAULT_VERSION: &str = "init";

pub const PARAM_MIN: f64 = -2.0;
pub const PARAM_MAX: f64 = 2.0;
pub const PARAM_STEP: f64 = 0.01;

const UNKNOWN_WORKFLOW: &str = "unknown";
const UNKNOWN_NODE: &str = "0";

/// The nine mixing weights as the host passes them, named
/// `<input>_in_<output>`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixParams {
    pub red_in_red: f32,
    pub green_in_red: f32,
    pub blue_in_red: f32,
    pub red_in_green: f32,
    pub green_in_green: f32,
    pub blue_in_green: f32,
    pub red_in_blue: f32,
    pub green_in_blue: f32,
    pub blue_in_blue: f32,
}

impl Default for MixParams {
    fn default() -> Self {
        Self::from_matrix(&MixMatrix::IDENTITY)
    }
}

impl MixParams {
    pub fn from_matrix(m: &MixMatrix) -> Self {
        let m = &m.0;
        Self {
            red_in_red: m[0][0],
            green_in_red: m[0][1],
            blue_in_red: m[0][2],
            red_in_green: m[1][0],
            green_in_green: m[1][1],
            blue_in_green: m[1][2],
            red_in_blue: m[2][0],
            green_in_blue: m[2][1],
            blue_in_blue: m[2][2],
        }
    }

    /// One row per output channel.
    pub fn matrix(&self) -> MixMatrix {
        MixMatrix([
            [self.red_in_red, self.green_in_red, self.blue_in_red],
            [self.red_in_green, self.green_in_green, self.blue_in_green],
            [self.red_in_blue, self.green_in_blue, self.blue_in_blue],
        ])
    }

    pub fn named(&self) -> [(&'static str, f32); 9] {
        [
            ("red_in_red", self.red_in_red),
            ("green_in_red", self.green_in_red),
            ("blue_in_red", self.blue_in_red),
            ("red_in_green", self.red_in_green),
            ("green_in_green", self.green_in_green),
            ("blue_in_green", self.blue_in_green),
            ("red_in_blue", self.red_in_blue),
            ("green_in_blue", self.green_in_blue),
            ("blue_in_blue", self.blue_in_blue),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.named() {
            if !value.is_finite() || !(PARAM_MIN..=PARAM_MAX).contains(&(value as f64)) {
                return Err(anyhow!(
                    "{} = {} is outside [{}, {}]",
                    name,
                    value,
                    PARAM_MIN,
                    PARAM_MAX
                ));
            }
        }
        Ok(())
    }
}

/// One invocation's inputs, including the host's hidden fields.
#[derive(Debug, Clone)]
pub struct NodeInputs {
    pub version: String,
    pub image: ImageTensor,
    pub params: MixParams,
    /// Per-execution metadata; the workflow id is read from `workflow.id`.
    pub extra_pnginfo: Option<Value>,
    pub unique_id: Option<String>,
}

impl NodeInputs {
    pub fn new(image: ImageTensor, params: MixParams) -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            image,
            params,
            extra_pnginfo: None,
            unique_id: None,
        }
    }
}

/// Payload handed to the editor UI after execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeUi {
    pub message: String,
    pub cache_key: String,
}

#[derive(Debug, Clone)]
pub struct NodeOutput {
    pub image: ImageTensor,
    pub ui: NodeUi,
}

pub fn workflow_id(extra_pnginfo: Option<&Value>) -> String {
    extra_pnginfo
        .and_then(|info| info.get("workflow"))
        .and_then(|wf| wf.get("id"))
        .and_then(|id| match id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| UNKNOWN_WORKFLOW.to_string())
}

/// The channel mixer node. Holds the preview cache it shares with the
/// preview endpoint.
#[derive(Clone)]
pub struct ChannelMixerNode {
    cache: Arc<PreviewCache>,
}

impl ChannelMixerNode {
    pub fn new(cache: Arc<PreviewCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<PreviewCache> {
        &self.cache
    }

    /// Cache the source image for previews, then mix it.
    pub fn execute(&self, inputs: NodeInputs) -> Result<NodeOutput> {
        inputs.params.validate()?;
        let matrix = inputs.params.matrix();
        debug!("{} matrix={}", NODE_CLASS, matrix);

        let workflow = workflow_id(inputs.extra_pnginfo.as_ref());
        let node = inputs
            .unique_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(UNKNOWN_NODE);
        let cache_key = self
            .cache
            .store(&workflow, node, &inputs.version, &inputs.image);

        let image = apply_mix(&inputs.image, &matrix);
        Ok(NodeOutput {
            image,
            ui: NodeUi {
                message: "Processing complete!".to_string(),
                cache_key,
            },
        })
    }

    pub fn definition() -> NodeDefinition {
        NodeDefinition {
            class_name: NODE_CLASS.to_string(),
            display_name: DISPLAY_NAME.to_string(),
            category: CATEGORY.to_string(),
            function: "mix_channels".to_string(),
            return_types: vec!["IMAGE".to_string()],
            input_types: input_types(),
        }
    }
}

/// Parameter schema in the host's `INPUT_TYPES` layout.
pub fn input_types() -> Value {
    let defaults = MixParams::default();
    let mut required = Map::new();
    required.insert(
        "version".to_string(),
        json!(["STRING", { "default": DEFAULT_VERSION }]),
    );
    required.insert("image".to_string(), json!(["IMAGE"]));
    for (name, default) in defaults.named() {
        required.insert(
            name.to_string(),
            json!(["FLOAT", {
                "default": default as f64,
                "min": PARAM_MIN,
                "max": PARAM_MAX,
                "step": PARAM_STEP,
            }]),
        );
    }
    json!({
        "required": required,
        "optional": {},
        "hidden": {
            "extra_pnginfo": "EXTRA_PNGINFO",
            "unique_id": "UNIQUE_ID",
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> ChannelMixerNode {
        ChannelMixerNode::new(Arc::new(PreviewCache::default()))
    }

    #[test]
    fn test_default_params_are_identity() {
        assert_eq!(MixParams::default().matrix(), MixMatrix::IDENTITY);
    }

    #[test]
    fn test_params_map_to_rows() {
        let params = MixParams {
            green_in_red: 0.25,
            red_in_blue: -1.0,
            ..MixParams::default()
        };
        let m = params.matrix();
        assert_eq!(m.0[0], [1.0, 0.25, 0.0]);
        assert_eq!(m.0[2], [-1.0, 0.0, 1.0]);
        assert_eq!(MixParams::from_matrix(&m), params);
    }

    #[test]
    fn test_validate_range() {
        let ok = MixParams {
            blue_in_green: 2.0,
            ..MixParams::default()
        };
        assert!(ok.validate().is_ok());
        let bad = MixParams {
            blue_in_green: 2.5,
            ..MixParams::default()
        };
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("blue_in_green"));
    }

    #[test]
    fn test_workflow_id_from_metadata() {
        let info = json!({ "workflow": { "id": "abc-123", "nodes": [] } });
        assert_eq!(workflow_id(Some(&info)), "abc-123");
        assert_eq!(workflow_id(Some(&json!({ "workflow": {} }))), "unknown");
        assert_eq!(workflow_id(None), "unknown");
    }

    #[test]
    fn test_execute_caches_and_mixes() {
        let node = node();
        let img = ImageTensor::filled(2, 2, [1.0, 0.0, 0.0]);
        let mut inputs = NodeInputs::new(
            img.clone(),
            MixParams::from_matrix(&MixMatrix([[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]])),
        );
        inputs.extra_pnginfo = Some(json!({ "workflow": { "id": "wf" } }));
        inputs.unique_id = Some("5".to_string());

        let out = node.execute(inputs).unwrap();
        assert_eq!(out.ui.cache_key, "wf_5_init");
        assert_eq!(out.ui.message, "Processing complete!");
        assert_eq!(out.image.pixel(0, 1, 1).unwrap(), [0.0, 1.0, 0.0]);
        assert_eq!(*node.cache().fetch("wf_5_init").unwrap(), img);
    }

    #[test]
    fn test_reexecution_replaces_entry() {
        let node = node();
        let img = ImageTensor::filled(1, 1, [0.1, 0.2, 0.3]);
        for version in ["1", "2", "3"] {
            let mut inputs = NodeInputs::new(img.clone(), MixParams::default());
            inputs.version = version.to_string();
            inputs.unique_id = Some("9".to_string());
            node.execute(inputs).unwrap();
        }
        assert_eq!(node.cache().keys(), vec!["unknown_9_3".to_string()]);
    }

    #[test]
    fn test_execute_rejects_out_of_range() {
        let node = node();
        let params = MixParams {
            red_in_red: -3.0,
            ..MixParams::default()
        };
        let inputs = NodeInputs::new(ImageTensor::filled(1, 1, [0.0, 0.0, 0.0]), params);
        assert!(node.execute(inputs).is_err());
        assert!(node.cache().is_empty());
    }

    #[test]
    fn test_input_types_schema() {
        let schema = input_types();
        let red = &schema["required"]["red_in_red"];
        assert_eq!(red[0], "FLOAT");
        assert_eq!(red[1]["default"], 1.0);
        assert_eq!(red[1]["min"], -2.0);
        assert_eq!(schema["required"]["green_in_red"][1]["default"], 0.0);
        assert_eq!(schema["required"]["version"][1]["default"], "init");
        assert_eq!(schema["hidden"]["unique_id"], "UNIQUE_ID");
    }
}
