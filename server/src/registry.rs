use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::node::ChannelMixerNode;

/// What the host needs to list and wire a node class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDefinition {
    pub class_name: String,
    pub display_name: String,
    pub category: String,
    pub function: String,
    pub return_types: Vec<String>,
    pub input_types: Value,
}

/// Node classes known to the host, registered explicitly at startup.
#[derive(Debug, Default, Clone)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, NodeDefinition>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every node this crate provides.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let def = ChannelMixerNode::definition();
        registry.nodes.insert(def.class_name.clone(), def);
        registry
    }

    pub fn register(&mut self, def: NodeDefinition) -> Result<()> {
        if self.nodes.contains_key(&def.class_name) {
            return Err(anyhow!("node class '{}' already registered", def.class_name));
        }
        info!(
            "registered node class={} display_name=\"{}\" category={}",
            def.class_name, def.display_name, def.category
        );
        self.nodes.insert(def.class_name.clone(), def);
        Ok(())
    }

    pub fn get(&self, class_name: &str) -> Option<&NodeDefinition> {
        self.nodes.get(class_name)
    }

    /// Class name to display name, for the host's node menu.
    pub fn display_names(&self) -> BTreeMap<String, String> {
        self.nodes
            .values()
            .map(|d| (d.class_name.clone(), d.display_name.clone()))
            .collect()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &NodeDefinition> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
