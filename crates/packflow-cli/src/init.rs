use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use tracing::{info, instrument};

use packflow_core::constants::USER_CONFIG_FILE;

use crate::Cli;

const STARTER_CONFIG: &str = r#"{
  "plugins": [
    "packflow-plugin-web"
  ]
}
"#;

/// Runs the `init` command to bootstrap a new Packflow project.
#[instrument(skip(cli))]
pub fn run(cli: &Cli) -> Result<()> {
    let path = config_path(cli);
    if path.exists() && !cli.force {
        bail!(
            "refusing to overwrite existing '{}' (use --force)",
            path.display()
        );
    }

    fs::write(&path, STARTER_CONFIG)
        .with_context(|| format!("failed to write '{}'", path.display()))?;
    info!("init complete: config={}", path.display());
    println!("next: run 'pkf build'");
    Ok(())
}

fn config_path(cli: &Cli) -> PathBuf {
    match &cli.config {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => cli.root_dir.join(path),
        None => cli.root_dir.join(USER_CONFIG_FILE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_for(root: &std::path::Path, force: bool) -> Cli {
        Cli {
            command: Some("init".to_string()),
            config: None,
            root_dir: root.to_path_buf(),
            port: None,
            host: None,
            force,
        }
    }

    #[test]
    fn writes_a_parsable_starter_config() {
        let dir = tempfile::tempdir().unwrap();
        run(&cli_for(dir.path(), false)).expect("init should succeed");

        let text = fs::read_to_string(dir.path().join(USER_CONFIG_FILE)).unwrap();
        let config: packflow_core::UserConfig =
            serde_json::from_str(&text).expect("starter config should parse");
        assert_eq!(config.plugins.len(), 1);
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(USER_CONFIG_FILE), "{}").unwrap();

        let err = run(&cli_for(dir.path(), false)).expect_err("must fail");
        assert!(format!("{err:#}").contains("use --force"));

        run(&cli_for(dir.path(), true)).expect("force should overwrite");
    }
}
