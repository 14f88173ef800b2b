//! Builtin plugin registering the node-target build configuration.

use anyhow::Result;
use serde_json::{json, Value};

use packflow_core::{ChainableConfig, Plugin, PluginApi};

pub const CONFIG_NAME: &str = "node";

#[derive(Debug, Default)]
pub struct NodePlugin;

impl NodePlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for NodePlugin {
    fn apply(&self, api: &mut PluginApi<'_>, options: Option<&Value>) -> Result<()> {
        let entry = options
            .and_then(|opts| opts.get("entry"))
            .cloned()
            .unwrap_or_else(|| json!("src/server.js"));

        let config = ChainableConfig::from_value(json!({
            "entry": entry,
            "target": "node",
            "output": {"path": "build/node", "libraryTarget": "commonjs2"},
        }));
        api.register_config(CONFIG_NAME, config)?;

        Ok(())
    }
}
