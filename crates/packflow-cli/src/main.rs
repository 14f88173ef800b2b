use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;

use packflow_core::{BuiltinPlugins, Command, CommandArgs};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod build;
mod dev;
mod init;
mod styles;

use styles as s;

/// The command-line interface for Packflow.
#[derive(Debug, Parser)]
#[command(name = "pkf")]
#[command(version)]
#[command(styles = s::get_clap_styles())]
#[command(
    help_template = "{bin} {version}\n\n{about-with-newline}{usage-heading} {usage}\n\n{all-args}{after-help}"
)]
#[command(about = "Pluggable build-command orchestrator")]
#[command(
    long_about = "Packflow loads the plugins declared in build.json, lets them register
named build configurations and lifecycle hooks, and drives an external
bundling engine through the before/after lifecycle for every
configuration.

Common Commands:
  init              Write a starter build.json in the project root
  build             Run every registered configuration through the bundler
  dev               Start the bundler dev server for every configuration
"
)]
#[command(
    after_help = "\x1b[1;32mExamples:\x1b[0m\n  \x1b[36mpkf init\x1b[0m                  \x1b[2m# Bootstrap a new project\x1b[0m\n  \x1b[36mpkf build\x1b[0m                 \x1b[2m# Production build of all configurations\x1b[0m\n  \x1b[36mpkf dev --port 3000\x1b[0m       \x1b[2m# Dev server with a port override\x1b[0m\n\n\x1b[1;32mGitHub Repository:\x1b[0m https://github.com/packflow/packflow"
)]
pub(crate) struct Cli {
    /// Command to run: `build`, `dev` or `init`
    command: Option<String>,
    /// Path to the user configuration file (default: build.json in the root)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Project root directory
    #[arg(long, default_value = ".")]
    root_dir: PathBuf,
    /// Dev-server port override
    #[arg(long)]
    port: Option<u16>,
    /// Dev-server host override
    #[arg(long)]
    host: Option<String>,
    /// Overwrite generated files if they already exist (init)
    #[arg(long, default_value_t = false)]
    force: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    debug!("parsed cli arguments: {:?}", cli);

    let Some(command_name) = cli.command.as_deref() else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    if command_name == "init" {
        return init::run(&cli);
    }

    let command = Command::from_str(command_name)
        .map_err(|e| anyhow!("failed to parse command '{}': {e}", command_name))?;

    let root_dir = cli
        .root_dir
        .canonicalize()
        .with_context(|| format!("invalid project root '{}'", cli.root_dir.display()))?;
    let args = CommandArgs {
        config: cli.config.clone(),
        port: cli.port,
        host: cli.host.clone(),
        extra: serde_json::Map::new(),
    };

    let builtins = builtin_plugins();
    match command {
        Command::Build => build::run(args, root_dir, &builtins),
        Command::Dev => dev::run(args, root_dir, &builtins),
    }
}

/// Compiled-in plugins, available without any project-local executable.
fn builtin_plugins() -> BuiltinPlugins {
    let mut builtins = BuiltinPlugins::new();
    builtins.register("packflow-plugin-web", || {
        Box::new(packflow_plugin_web::WebPlugin::new())
    });
    builtins.register("packflow-plugin-node", || {
        Box::new(packflow_plugin_node::NodePlugin::new())
    });
    builtins
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_the_shipped_plugins() {
        let builtins = builtin_plugins();
        assert!(builtins.contains("packflow-plugin-web"));
        assert!(builtins.contains("packflow-plugin-node"));
        assert!(!builtins.contains("packflow-plugin-weex"));
    }
}
