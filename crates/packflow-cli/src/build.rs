use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use packflow_bundler::{BuildStats, BundlerEngine};
use packflow_core::{BuiltinPlugins, Command, CommandArgs, ConfigEntry, Context};

/// Runs the `build` command: lifecycle hooks around one engine invocation
/// per registered configuration.
#[instrument(skip_all)]
pub fn run(args: CommandArgs, root_dir: PathBuf, builtins: &BuiltinPlugins) -> Result<()> {
    let command = Command::Build;
    let mut context = Context::new(command, args, root_dir, builtins)?;

    context.apply_hook(&command.before_hook(), &json!({}))?;

    let configs = context.get_config()?;
    let engine = BundlerEngine::from_user_config(context.user_config())?;

    clean_first_output(&configs, context.root_dir())?;

    for entry in &configs {
        context.apply_hook(&command.before_config_hook(&entry.name), &json!({}))?;

        let config = entry.chain_config.to_config();
        let stats = engine
            .build(&config)
            .with_context(|| format!("build failed for configuration '{}'", entry.name))?;
        report_stats(&entry.name, &stats)?;

        context.apply_hook(&command.after_config_hook(&entry.name), &json!({}))?;
    }

    context.apply_hook(&command.after_hook(), &json!({}))?;
    info!("build completed for {} configuration(s)", configs.len());
    Ok(())
}

/// The first-registered configuration is canonical for output cleanup.
fn clean_first_output(configs: &[ConfigEntry], root_dir: &Path) -> Result<()> {
    let Some(first) = configs.first() else {
        return Ok(());
    };
    let Some(output) = first.chain_config.value_at("output.path") else {
        return Ok(());
    };
    let Some(output) = output.as_str() else {
        return Ok(());
    };

    let path = root_dir.join(output);
    if path == root_dir {
        bail!("refusing to clean the project root itself");
    }
    if path.exists() {
        debug!("cleaning output directory {}", path.display());
        std::fs::remove_dir_all(&path)
            .with_context(|| format!("failed to clean output directory {}", path.display()))?;
    }
    Ok(())
}

fn report_stats(name: &str, stats: &BuildStats) -> Result<()> {
    for warning in &stats.warnings {
        warn!("[{}] {}", name, warning);
    }
    if stats.has_errors() {
        for message in &stats.errors {
            error!("[{}] {}", name, message);
        }
        bail!(
            "bundler reported {} error(s) for configuration '{}'",
            stats.errors.len(),
            name
        );
    }
    for asset in &stats.assets {
        info!("[{}] emitted {} ({} bytes)", name, asset.name, asset.size);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write_engine_script(dir: &Path, stats_json: &str) -> String {
        let path = dir.join("engine.sh");
        let body = format!(
            "#!/usr/bin/env sh\ncat > /dev/null\necho '{stats_json}'\nexit 0\n"
        );
        fs::write(&path, body).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().to_string()
    }

    fn write_build_config(dir: &Path, engine: &str) {
        fs::write(
            dir.join("build.json"),
            format!(
                r#"{{"plugins": ["packflow-plugin-web"], "bundler": {{"program": "{engine}"}}}}"#
            ),
        )
        .unwrap();
    }

    #[test]
    fn build_runs_the_engine_and_cleans_the_output() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let engine = write_engine_script(&root, r#"{"errors":[],"warnings":[],"assets":[]}"#);
        write_build_config(&root, &engine);

        let stale = root.join("build/web");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("old.js"), "stale").unwrap();

        run(CommandArgs::default(), root.clone(), &crate::builtin_plugins())
            .expect("build should succeed");
        assert!(!stale.exists());
    }

    #[test]
    fn engine_errors_fail_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let engine = write_engine_script(
            &root,
            r#"{"errors":["module not found"],"warnings":[],"assets":[]}"#,
        );
        write_build_config(&root, &engine);

        let err = run(CommandArgs::default(), root, &crate::builtin_plugins())
            .expect_err("must fail");
        assert!(format!("{err:#}").contains("error(s) for configuration 'web'"));
    }

    #[test]
    fn warnings_are_surfaced_but_non_fatal() {
        let stats = BuildStats {
            errors: vec![],
            warnings: vec!["big chunk".to_string()],
            assets: vec![],
        };
        report_stats("web", &stats).expect("warnings alone should not fail");
    }

    #[test]
    fn build_without_plugins_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("build.json"), r#"{"plugins": []}"#).unwrap();

        run(CommandArgs::default(), root, &crate::builtin_plugins())
            .expect("no configurations should still succeed");
    }
}
