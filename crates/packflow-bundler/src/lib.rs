//! Adapter for the external bundler and dev-server collaborators.
//!
//! The orchestrator never interprets bundler internals: it hands the
//! engine a `to_config()` snapshot over stdio and reads back a stats
//! object, checking nothing beyond the error and warning lists.

use std::io::Write;
use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use packflow_core::constants::{DEFAULT_DEV_HOST, DEFAULT_DEV_PORT};
use packflow_core::UserConfig;

fn default_program() -> String {
    "webpack".to_string()
}

/// The `bundler` section of the user configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
        }
    }
}

/// What the engine reported for one build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildStats {
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub assets: Vec<AssetStat>,
}

impl BuildStats {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetStat {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

fn default_port() -> u16 {
    DEFAULT_DEV_PORT
}

fn default_host() -> String {
    DEFAULT_DEV_HOST.to_string()
}

/// Dev-server settings, built by deep-merging every configuration's
/// `devServer` block over the defaults. Unrecognized keys are forwarded
/// to the server process untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            extra: serde_json::Map::new(),
        }
    }
}

impl ServerConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Handle on the external bundling engine.
#[derive(Debug, Clone, Default)]
pub struct BundlerEngine {
    config: EngineConfig,
}

impl BundlerEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Reads the engine settings from the user configuration's `bundler`
    /// section, falling back to the defaults.
    pub fn from_user_config(user_config: &UserConfig) -> Result<Self> {
        let config = user_config.section::<EngineConfig>("bundler")?.unwrap_or_default();
        Ok(Self::new(config))
    }

    pub fn program(&self) -> &str {
        &self.config.program
    }

    /// Runs one build for a configuration snapshot and parses the stats
    /// the engine reports. Engine-reported errors are the caller's to
    /// surface; a broken engine invocation is an error here.
    pub fn build(&self, config: &Value) -> Result<BuildStats> {
        let stdout = self.invoke("build", config)?;
        serde_json::from_slice(&stdout).with_context(|| {
            format!("failed to parse build stats from '{}'", self.config.program)
        })
    }

    /// Starts the engine's dev server for a configuration snapshot.
    pub fn serve(&self, config: &Value, server: &ServerConfig) -> Result<DevServer> {
        let payload = json!({"config": config, "devServer": server});
        debug!("starting dev server via '{}'", self.config.program);

        let mut child = Command::new(&self.config.program)
            .arg("serve")
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start dev server '{}'", self.config.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            let serialized = serde_json::to_string(&payload)?;
            write_ignoring_closed_stdin(&mut stdin, serialized.as_bytes())
                .context("failed to write server config to dev server stdin")?;
        }

        info!("dev server listening at {}", server.url());
        Ok(DevServer {
            child,
            url: server.url(),
        })
    }

    fn invoke(&self, mode: &str, payload: &Value) -> Result<Vec<u8>> {
        debug!("invoking bundler '{}' ({})", self.config.program, mode);
        let mut child = Command::new(&self.config.program)
            .arg(mode)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start bundler '{}'", self.config.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            let serialized = serde_json::to_string(payload)?;
            write_ignoring_closed_stdin(&mut stdin, serialized.as_bytes())
                .context("failed to write config to bundler stdin")?;
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("failed to read output of '{}'", self.config.program))?;
        if !output.status.success() {
            bail!(
                "bundler '{}' exited with {}",
                self.config.program,
                output.status
            );
        }
        Ok(output.stdout)
    }
}

/// A running dev-server child process.
#[derive(Debug)]
pub struct DevServer {
    child: Child,
    url: String,
}

impl DevServer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Blocks until the server process exits on its own.
    pub fn wait(&mut self) -> Result<()> {
        let status = self.child.wait().context("failed to wait for dev server")?;
        if !status.success() {
            bail!("dev server exited with {}", status);
        }
        Ok(())
    }

    /// Stops the server process.
    pub fn close(&mut self) -> Result<()> {
        self.child.kill().context("failed to stop dev server")?;
        self.child.wait().context("failed to reap dev server")?;
        Ok(())
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn write_ignoring_closed_stdin(stdin: &mut std::process::ChildStdin, bytes: &[u8]) -> std::io::Result<()> {
    match stdin.write_all(bytes) {
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}
