use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::command::CommandArgs;
use crate::constants::{PROJECT_MANIFEST, USER_CONFIG_FILE};

/// A plugin declaration from the user configuration: either a bare module
/// specifier or a `[specifier, options]` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginSpec {
    Bare(String),
    WithOptions(String, Value),
}

impl PluginSpec {
    pub fn specifier(&self) -> &str {
        match self {
            Self::Bare(specifier) => specifier,
            Self::WithOptions(specifier, _) => specifier,
        }
    }

    pub fn options(&self) -> Option<&Value> {
        match self {
            Self::Bare(_) => None,
            Self::WithOptions(_, options) => Some(options),
        }
    }
}

/// User configuration, read once at Context construction.
///
/// Only `plugins` is interpreted by the engine; every other top-level key
/// is retained verbatim and queryable by collaborators via [`Self::section`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserConfig {
    /// Loads the user configuration for a command invocation.
    ///
    /// An absent file yields the empty configuration; an unreadable or
    /// malformed file is fatal to the whole invocation.
    pub fn load(root_dir: &Path, args: &CommandArgs) -> Result<Self> {
        let path = resolve_config_path(root_dir, args);
        if !path.exists() {
            debug!("no user config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = serde_json::from_str::<Self>(&text)
            .with_context(|| format!("failed to parse JSON config: {}", path.display()))?;
        Ok(config)
    }

    /// Deserializes a retained top-level section, e.g. the `bundler` block.
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.extra.get(key) {
            Some(value) => {
                let section = serde_json::from_value(value.clone())
                    .with_context(|| format!("malformed '{key}' section in user config"))?;
                Ok(Some(section))
            }
            None => Ok(None),
        }
    }
}

fn resolve_config_path(root_dir: &Path, args: &CommandArgs) -> PathBuf {
    match &args.config {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => root_dir.join(path),
        None => root_dir.join(USER_CONFIG_FILE),
    }
}

/// Reads the project manifest (`package.json`).
///
/// Unlike the user configuration, a broken manifest is not fatal: the
/// invocation proceeds with an empty object.
pub fn load_project_manifest(root_dir: &Path) -> Value {
    let path = root_dir.join(PROJECT_MANIFEST);
    let Ok(text) = std::fs::read_to_string(&path) else {
        debug!("no project manifest at {}", path.display());
        return Value::Object(Map::new());
    };
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(err) => {
            warn!(
                "failed to parse {}, using empty manifest: {}",
                path.display(),
                err
            );
            Value::Object(Map::new())
        }
    }
}
