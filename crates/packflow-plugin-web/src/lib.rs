//! Builtin plugin registering the browser-target build configuration.

use anyhow::Result;
use serde_json::{json, Value};

use packflow_core::{ChainableConfig, Command, Plugin, PluginApi};

pub const CONFIG_NAME: &str = "web";

#[derive(Debug, Default)]
pub struct WebPlugin;

impl WebPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for WebPlugin {
    fn apply(&self, api: &mut PluginApi<'_>, options: Option<&Value>) -> Result<()> {
        let entry = options
            .and_then(|opts| opts.get("entry"))
            .cloned()
            .unwrap_or_else(|| json!("src/index.js"));

        let config = ChainableConfig::from_value(json!({
            "entry": entry,
            "output": {"path": "build/web", "publicPath": "/"},
            "devServer": {},
        }));
        api.register_config(CONFIG_NAME, config)?;

        api.chain_config(|config, ctx| {
            let mode = match ctx.command {
                Command::Build => "production",
                Command::Dev => "development",
            };
            config.set("mode", json!(mode));
            Ok(())
        });

        Ok(())
    }
}
