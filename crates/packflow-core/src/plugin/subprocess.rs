use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::chain::ChainableConfig;
use crate::command::CommandArgs;
use crate::config::UserConfig;
use crate::context::PluginApi;
use crate::hooks::HookOpts;
use crate::plugin::Plugin;

/// Flag passed to a plugin executable to request its registrations.
pub const REGISTER_FLAG: &str = "--register";

/// A plugin that runs as an external executable speaking JSON over stdio.
///
/// On invocation the executable receives the invocation payload on stdin
/// and answers with a [`RegistrationManifest`] on stdout. Its declarative
/// registrations are then replayed through the same capability surface a
/// compiled-in plugin uses, so ordering semantics are identical.
#[derive(Debug)]
pub struct SubprocessPlugin {
    name: String,
    binary_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct InvocationPayload<'a> {
    command: &'a str,
    command_args: &'a CommandArgs,
    root_dir: &'a Path,
    user_config: &'a UserConfig,
    project_manifest: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a Value>,
}

/// Everything a plugin executable registers, in declaration order.
#[derive(Debug, Default, Deserialize)]
pub struct RegistrationManifest {
    #[serde(default)]
    pub configs: Vec<ConfigRegistration>,
    #[serde(default)]
    pub chain: Vec<ChainOp>,
    #[serde(default)]
    pub hooks: Vec<HookRegistration>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigRegistration {
    pub name: String,
    #[serde(default)]
    pub config: Value,
}

/// One declarative chain mutation. Each op becomes one registered
/// chain-mutator, so accumulation order matches a compiled-in plugin
/// calling `chain_config` once per op.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ChainOp {
    Set { path: String, value: Value },
    Merge { value: Value },
    Remove { path: String },
}

impl ChainOp {
    fn apply(&self, config: &ChainableConfig) {
        match self {
            Self::Set { path, value } => {
                config.set(path, value.clone());
            }
            Self::Merge { value } => {
                config.merge(value.clone());
            }
            Self::Remove { path } => {
                config.remove(path);
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HookRegistration {
    pub key: String,
    pub run: HookAction,
}

/// The child process a hook registration executes when its key fires.
/// The hook opts bag is written to the child's stdin as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookAction {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl HookAction {
    pub fn run(&self, opts: &HookOpts) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn hook action '{}'", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_string(opts)?;
            write_ignoring_closed_stdin(&mut stdin, payload.as_bytes())
                .with_context(|| format!("failed to write opts to hook action '{}'", self.program))?;
        }

        let status = child
            .wait()
            .with_context(|| format!("failed to wait for hook action '{}'", self.program))?;
        if !status.success() {
            bail!("hook action '{}' exited with {}", self.program, status);
        }
        Ok(())
    }
}

/// A child that exits without reading its stdin closes the pipe early;
/// that is its prerogative, not a write failure.
fn write_ignoring_closed_stdin(stdin: &mut std::process::ChildStdin, bytes: &[u8]) -> std::io::Result<()> {
    match stdin.write_all(bytes) {
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

impl SubprocessPlugin {
    pub fn new(name: impl Into<String>, binary_path: PathBuf) -> Self {
        Self {
            name: name.into(),
            binary_path,
        }
    }

    fn collect_manifest(&self, payload: &InvocationPayload<'_>) -> Result<RegistrationManifest> {
        let serialized = serde_json::to_string(payload)?;

        let mut child = Command::new(&self.binary_path)
            .arg(REGISTER_FLAG)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| {
                format!("failed to spawn plugin executable {}", self.binary_path.display())
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            write_ignoring_closed_stdin(&mut stdin, serialized.as_bytes())
                .context("failed to write invocation payload to plugin stdin")?;
        }

        let output = child
            .wait_with_output()
            .context("failed to read plugin output")?;
        if !output.status.success() {
            bail!("plugin executable exited with {}", output.status);
        }

        serde_json::from_slice(&output.stdout)
            .context("failed to parse registration manifest from plugin stdout")
    }
}

impl Plugin for SubprocessPlugin {
    fn apply(&self, api: &mut PluginApi<'_>, options: Option<&Value>) -> Result<()> {
        let payload = InvocationPayload {
            command: api.command().as_str(),
            command_args: api.command_args(),
            root_dir: api.root_dir(),
            user_config: api.user_config(),
            project_manifest: api.project_manifest(),
            options,
        };
        let manifest = self.collect_manifest(&payload)?;
        debug!(
            "plugin '{}' declared {} config(s), {} chain op(s), {} hook(s)",
            self.name,
            manifest.configs.len(),
            manifest.chain.len(),
            manifest.hooks.len()
        );

        for registration in manifest.configs {
            api.register_config(
                &registration.name,
                ChainableConfig::from_value(registration.config),
            )?;
        }
        for op in manifest.chain {
            api.chain_config(move |config, _ctx| {
                op.apply(config);
                Ok(())
            });
        }
        for hook in manifest.hooks {
            let action = hook.run;
            api.on_hook(&hook.key, move |opts| action.run(opts));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn manifest_fields_all_default() {
        let manifest: RegistrationManifest = serde_json::from_str("{}").unwrap();
        assert!(manifest.configs.is_empty());
        assert!(manifest.chain.is_empty());
        assert!(manifest.hooks.is_empty());
    }

    #[test]
    fn chain_ops_deserialize_tagged() {
        let ops: Vec<ChainOp> = serde_json::from_value(json!([
            {"op": "set", "path": "mode", "value": "production"},
            {"op": "merge", "value": {"devServer": {"port": 3000}}},
            {"op": "remove", "path": "output.clean"},
        ]))
        .expect("ops should parse");
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], ChainOp::Set { path, .. } if path == "mode"));
    }

    #[test]
    fn chain_ops_apply_in_place() {
        let config = ChainableConfig::from_value(json!({"output": {"clean": true}}));
        ChainOp::Set {
            path: "mode".to_string(),
            value: json!("production"),
        }
        .apply(&config);
        ChainOp::Remove {
            path: "output.clean".to_string(),
        }
        .apply(&config);
        assert_eq!(
            config.to_config(),
            json!({"mode": "production", "output": {}})
        );
    }

    #[test]
    fn hook_action_success_and_failure() {
        let ok = HookAction {
            program: "true".to_string(),
            args: vec![],
            env: HashMap::new(),
        };
        ok.run(&json!({})).expect("true should succeed");

        let failing = HookAction {
            program: "false".to_string(),
            args: vec![],
            env: HashMap::new(),
        };
        let err = failing.run(&json!({})).expect_err("false must fail");
        assert!(format!("{err:#}").contains("exited with"));
    }
}
