use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::chain::{ChainableConfig, ConfigEntry, ConfigRegistry};
use crate::command::{Command, CommandArgs};
use crate::config::{load_project_manifest, UserConfig};
use crate::hooks::{HookOpts, HookRegistry};
use crate::plugin::{load_plugins, BuiltinPlugins, PluginRecord};

/// Context handed to every chain-mutator.
#[derive(Debug, Clone, Copy)]
pub struct MutationCtx {
    pub command: Command,
}

type ChainMutator = Box<dyn Fn(&ChainableConfig, &MutationCtx) -> Result<()>>;

/// Chain-mutators accumulated by one plugin, applied as a unit.
struct ChainGroup {
    plugin_name: String,
    mutators: Vec<ChainMutator>,
}

impl fmt::Debug for ChainGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainGroup")
            .field("plugin_name", &self.plugin_name)
            .field("mutators", &self.mutators.len())
            .finish()
    }
}

/// One command invocation's orchestration state.
///
/// The Context exclusively owns the configuration registry, the hook
/// registry and the loaded plugin list. Plugins only ever see the
/// restricted [`PluginApi`] surface; command implementations get the
/// broader surface (`get_config`, `apply_hook`). Created at command start,
/// discarded at command end, never shared across commands.
#[derive(Debug)]
pub struct Context {
    command: Command,
    command_args: CommandArgs,
    root_dir: PathBuf,
    project_manifest: Value,
    user_config: UserConfig,
    plugins: Vec<PluginRecord>,
    configs: ConfigRegistry,
    hooks: HookRegistry,
    chain_groups: Vec<ChainGroup>,
    resolved: bool,
}

impl Context {
    /// Builds the Context for one invocation: reads the project manifest
    /// and user configuration once, then loads every declared plugin.
    /// Plugin resolution failure is fatal here, before any phase runs.
    pub fn new(
        command: Command,
        command_args: CommandArgs,
        root_dir: impl Into<PathBuf>,
        builtins: &BuiltinPlugins,
    ) -> Result<Self> {
        let root_dir = root_dir.into();
        let project_manifest = load_project_manifest(&root_dir);
        let user_config = UserConfig::load(&root_dir, &command_args)?;
        let plugins = load_plugins(&user_config.plugins, &root_dir, builtins)?;
        debug!(
            "context ready: command={}, {} plugin(s)",
            command,
            plugins.len()
        );

        Ok(Self {
            command,
            command_args,
            root_dir,
            project_manifest,
            user_config,
            plugins,
            configs: ConfigRegistry::new(),
            hooks: HookRegistry::new(),
            chain_groups: Vec::new(),
            resolved: false,
        })
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn command_args(&self) -> &CommandArgs {
        &self.command_args
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn user_config(&self) -> &UserConfig {
        &self.user_config
    }

    pub fn project_manifest(&self) -> &Value {
        &self.project_manifest
    }

    /// Registers a hook callback from command code.
    pub fn on_hook(&mut self, key: &str, callback: impl Fn(&HookOpts) -> Result<()> + 'static) {
        self.hooks.on(key, Box::new(callback));
    }

    /// Runs every callback registered for `key`, sequentially and in
    /// registration order. Absent keys are a no-op.
    pub fn apply_hook(&self, key: &str, opts: &HookOpts) -> Result<()> {
        self.hooks.apply(key, opts)
    }

    /// The two-phase config-build protocol.
    ///
    /// Phase 1 runs every plugin to completion, in declaration order, so
    /// all configurations and hooks exist before any mutation logic runs.
    /// Phase 2 then applies the accumulated chain-mutators. Returns the
    /// named configurations in registration order; the registries are
    /// read-only from the caller's perspective afterwards.
    #[instrument(skip(self), fields(command = %self.command))]
    pub fn get_config(&mut self) -> Result<Vec<ConfigEntry>> {
        if !self.resolved {
            self.run_plugins()?;
            self.apply_chain_mutations()?;
            self.resolved = true;
        }
        Ok(self.configs.entries())
    }

    fn run_plugins(&mut self) -> Result<()> {
        let plugins = std::mem::take(&mut self.plugins);
        let result = self.run_plugin_records(&plugins);
        self.plugins = plugins;
        result
    }

    fn run_plugin_records(&mut self, plugins: &[PluginRecord]) -> Result<()> {
        for record in plugins {
            debug!("running plugin '{}'", record.name);
            let mut api = PluginApi {
                command: self.command,
                command_args: &self.command_args,
                root_dir: &self.root_dir,
                user_config: &self.user_config,
                project_manifest: &self.project_manifest,
                plugin_name: &record.name,
                configs: self.configs.clone(),
                hooks: &mut self.hooks,
                chain_groups: &mut self.chain_groups,
            };
            record
                .plugin
                .apply(&mut api, record.options.as_ref())
                .with_context(|| format!("plugin '{}' failed", record.name))?;
        }
        Ok(())
    }

    /// Applies every chain-mutator group in plugin-declaration order, and
    /// within a group in call order.
    ///
    /// All mutators target the first-registered configuration regardless
    /// of how many configurations exist; plugins are authored against that
    /// contract.
    fn apply_chain_mutations(&mut self) -> Result<()> {
        if self.chain_groups.is_empty() {
            return Ok(());
        }
        let Some(target) = self.configs.first() else {
            bail!("chain mutations were registered but no configuration exists");
        };

        let ctx = MutationCtx {
            command: self.command,
        };
        for group in &self.chain_groups {
            debug!(
                "applying {} chain mutation(s) from '{}'",
                group.mutators.len(),
                group.plugin_name
            );
            for mutator in &group.mutators {
                mutator(&target, &ctx).with_context(|| {
                    format!("chain mutation from plugin '{}' failed", group.plugin_name)
                })?;
            }
        }
        Ok(())
    }
}

/// The restricted capability surface exposed to plugin code.
///
/// Read-only invocation fields plus the three registration primitives;
/// the registries themselves stay out of reach. The running plugin's
/// identity is bound in by the plugin loop, so mutators group correctly
/// without any ambient engine state.
pub struct PluginApi<'ctx> {
    command: Command,
    command_args: &'ctx CommandArgs,
    root_dir: &'ctx Path,
    user_config: &'ctx UserConfig,
    project_manifest: &'ctx Value,
    plugin_name: &'ctx str,
    configs: ConfigRegistry,
    hooks: &'ctx mut HookRegistry,
    chain_groups: &'ctx mut Vec<ChainGroup>,
}

impl PluginApi<'_> {
    pub fn command(&self) -> Command {
        self.command
    }

    pub fn command_args(&self) -> &CommandArgs {
        self.command_args
    }

    pub fn root_dir(&self) -> &Path {
        self.root_dir
    }

    pub fn user_config(&self) -> &UserConfig {
        self.user_config
    }

    pub fn project_manifest(&self) -> &Value {
        self.project_manifest
    }

    /// Registers a named configuration. Names are unique within a Context;
    /// the entry also gains the sibling-lookup accessor.
    pub fn register_config(&mut self, name: &str, chain_config: ChainableConfig) -> Result<()> {
        self.configs.register(name, chain_config).with_context(|| {
            format!(
                "plugin '{}' could not register config '{}'",
                self.plugin_name, name
            )
        })
    }

    /// Registers a chain-mutator under the running plugin's identity.
    /// Repeated calls accumulate in call order; groups from different
    /// plugins apply in plugin-declaration order.
    pub fn chain_config(
        &mut self,
        mutator: impl Fn(&ChainableConfig, &MutationCtx) -> Result<()> + 'static,
    ) {
        let mutator: ChainMutator = Box::new(mutator);
        match self
            .chain_groups
            .iter_mut()
            .find(|group| group.plugin_name == self.plugin_name)
        {
            Some(group) => group.mutators.push(mutator),
            None => self.chain_groups.push(ChainGroup {
                plugin_name: self.plugin_name.to_string(),
                mutators: vec![mutator],
            }),
        }
    }

    /// Registers a lifecycle hook callback.
    pub fn on_hook(&mut self, key: &str, callback: impl Fn(&HookOpts) -> Result<()> + 'static) {
        self.hooks.on(key, Box::new(callback));
    }
}

impl fmt::Debug for PluginApi<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginApi")
            .field("command", &self.command)
            .field("plugin_name", &self.plugin_name)
            .finish()
    }
}
