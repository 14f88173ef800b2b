//! Core orchestration engine for the Packflow build tool.
//!
//! This crate defines the per-invocation [`Context`], the plugin loading
//! and capability model, the named-configuration and hook registries, and
//! the chainable configuration builder shared with plugins.

pub mod chain;
pub mod command;
pub mod config;
pub mod constants;
pub mod context;
pub mod hooks;
pub mod merge;
pub mod plugin;

pub use chain::{ChainableConfig, ConfigEntry, ConfigRegistry, RegistryError};
pub use command::{Command, CommandArgs};
pub use config::{PluginSpec, UserConfig};
pub use context::{Context, MutationCtx, PluginApi};
pub use hooks::{HookOpts, HookRegistry};
pub use plugin::{BuiltinPlugins, Plugin, PluginRecord};
