use std::path::PathBuf;

use anyhow::{Context as _, Result};
use serde_json::json;
use tracing::{info, instrument};

use packflow_bundler::{BundlerEngine, ServerConfig};
use packflow_core::merge::deep_merge;
use packflow_core::{BuiltinPlugins, Command, CommandArgs, ConfigEntry, Context};

/// Runs the `dev` command: one dev-server child per configuration, all
/// sharing the merged server settings.
#[instrument(skip_all)]
pub fn run(args: CommandArgs, root_dir: PathBuf, builtins: &BuiltinPlugins) -> Result<()> {
    let command = Command::Dev;
    let mut context = Context::new(command, args, root_dir, builtins)?;

    context.apply_hook(&command.before_hook(), &json!({}))?;

    let configs = context.get_config()?;
    let engine = BundlerEngine::from_user_config(context.user_config())?;
    let server = merged_server_config(&configs, context.command_args())?;

    let mut servers = Vec::new();
    for entry in &configs {
        context.apply_hook(&command.before_config_hook(&entry.name), &json!({}))?;

        let config = entry.chain_config.to_config();
        let dev_server = engine
            .serve(&config, &server)
            .with_context(|| format!("failed to start dev server for '{}'", entry.name))?;
        info!("[{}] development server at {}", entry.name, dev_server.url());
        servers.push(dev_server);

        context.apply_hook(&command.after_config_hook(&entry.name), &json!({}))?;
    }

    context.apply_hook(&command.after_hook(), &json!({}))?;

    // Block until the children exit; an interrupt reaches the whole
    // process group, so the servers die with us.
    for mut server in servers {
        server.wait()?;
    }
    Ok(())
}

/// Folds every configuration's `devServer` block over the defaults, later
/// configurations overriding earlier ones, then applies CLI overrides.
fn merged_server_config(configs: &[ConfigEntry], args: &CommandArgs) -> Result<ServerConfig> {
    let mut merged = serde_json::to_value(ServerConfig::default())?;
    for entry in configs {
        if let Some(dev_server) = entry.chain_config.value_at("devServer") {
            deep_merge(&mut merged, &dev_server);
        }
    }
    let mut server: ServerConfig =
        serde_json::from_value(merged).context("malformed devServer configuration")?;

    if let Some(port) = args.port {
        server.port = port;
    }
    if let Some(host) = &args.host {
        server.host = host.clone();
    }
    Ok(server)
}
