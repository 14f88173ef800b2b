use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::config::PluginSpec;
use crate::context::PluginApi;

pub mod subprocess;

/// The contract for all plugins connecting to Packflow.
///
/// A plugin is invoked exactly once per Context, during phase 1 of
/// `get_config`. It is expected, as a side effect, to register
/// configurations, chain-mutators and hooks through the capability
/// surface — nothing else of the engine is reachable from here.
pub trait Plugin: fmt::Debug {
    fn apply(&self, api: &mut PluginApi<'_>, options: Option<&Value>) -> Result<()>;
}

pub type PluginFactory = Box<dyn Fn() -> Box<dyn Plugin>>;

/// Compiled-in plugins, wired by the host binary before any loading runs.
#[derive(Default)]
pub struct BuiltinPlugins {
    factories: HashMap<String, PluginFactory>,
}

impl BuiltinPlugins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, factory: impl Fn() -> Box<dyn Plugin> + 'static) {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    fn instantiate(&self, name: &str) -> Option<Box<dyn Plugin>> {
        self.factories.get(name).map(|factory| factory())
    }
}

impl fmt::Debug for BuiltinPlugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

/// A loaded plugin, immutable once resolution succeeded.
#[derive(Debug)]
pub struct PluginRecord {
    /// Builtin name, or the resolved executable path.
    pub name: String,
    pub plugin: Box<dyn Plugin>,
    pub options: Option<Value>,
}

/// Resolves and loads every declared plugin, preserving declaration order.
///
/// Any resolution failure is fatal to the invocation: a broken plugin
/// cannot be skipped because later plugins may depend on its
/// registrations.
pub fn load_plugins(
    specs: &[PluginSpec],
    root_dir: &Path,
    builtins: &BuiltinPlugins,
) -> Result<Vec<PluginRecord>> {
    specs
        .iter()
        .map(|spec| {
            load_one(spec, root_dir, builtins)
                .with_context(|| format!("failed to load plugin '{}'", spec.specifier()))
        })
        .collect()
}

fn load_one(spec: &PluginSpec, root_dir: &Path, builtins: &BuiltinPlugins) -> Result<PluginRecord> {
    let specifier = spec.specifier();

    if let Some(plugin) = builtins.instantiate(specifier) {
        debug!("resolved plugin '{}' as builtin", specifier);
        return Ok(PluginRecord {
            name: specifier.to_string(),
            plugin,
            options: spec.options().cloned(),
        });
    }

    let path = resolve_executable(specifier, root_dir)?;
    debug!("resolved plugin '{}' to {}", specifier, path.display());
    Ok(PluginRecord {
        name: path.display().to_string(),
        plugin: Box::new(subprocess::SubprocessPlugin::new(specifier, path)),
        options: spec.options().cloned(),
    })
}

/// Resolves a non-builtin specifier to a plugin executable: explicit paths
/// against the project root, bare names against the root first and then
/// the `PATH` directories.
fn resolve_executable(specifier: &str, root_dir: &Path) -> Result<PathBuf> {
    if looks_like_path(specifier) {
        let raw = Path::new(specifier);
        let candidate = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            root_dir.join(raw)
        };
        if !candidate.is_file() {
            bail!("no plugin executable at {}", candidate.display());
        }
        if !is_executable(&candidate) {
            bail!("plugin file {} is not executable", candidate.display());
        }
        return Ok(candidate);
    }

    let local = root_dir.join(specifier);
    if local.is_file() && is_executable(&local) {
        return Ok(local);
    }

    search_path(specifier)
        .ok_or_else(|| anyhow!("'{specifier}' is not a builtin and was not found on PATH"))
}

fn looks_like_path(specifier: &str) -> bool {
    specifier.starts_with('.') || specifier.contains(std::path::MAIN_SEPARATOR) || specifier.contains('/')
}

fn search_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() && is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match path.metadata() {
            Ok(meta) => meta.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PluginApi;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[derive(Debug)]
    struct NoopPlugin;

    impl Plugin for NoopPlugin {
        fn apply(&self, _api: &mut PluginApi<'_>, _options: Option<&Value>) -> Result<()> {
            Ok(())
        }
    }

    fn write_executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/usr/bin/env sh\nexit 0\n").unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn builtin_specifier_wins_over_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        write_executable(dir.path(), "my-plugin");

        let mut builtins = BuiltinPlugins::new();
        builtins.register("my-plugin", || Box::new(NoopPlugin));

        let specs = vec![PluginSpec::Bare("my-plugin".to_string())];
        let records = load_plugins(&specs, dir.path(), &builtins).expect("load should succeed");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "my-plugin");
    }

    #[test]
    fn relative_path_specifier_resolves_against_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_executable(dir.path(), "local-plugin.sh");

        let specs = vec![PluginSpec::Bare("./local-plugin.sh".to_string())];
        let records =
            load_plugins(&specs, dir.path(), &BuiltinPlugins::new()).expect("load should succeed");
        assert_eq!(records[0].name, path.display().to_string());
    }

    #[test]
    fn unresolved_specifier_is_fatal_and_names_the_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let specs = vec![PluginSpec::Bare("definitely-not-a-plugin".to_string())];

        let err = load_plugins(&specs, dir.path(), &BuiltinPlugins::new()).expect_err("must fail");
        assert!(format!("{err:#}").contains("definitely-not-a-plugin"));
    }

    #[test]
    fn non_executable_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        fs::write(&path, "not a plugin").unwrap();

        let specs = vec![PluginSpec::Bare("./plain.txt".to_string())];
        let err = load_plugins(&specs, dir.path(), &BuiltinPlugins::new()).expect_err("must fail");
        assert!(format!("{err:#}").contains("not executable"));
    }

    #[test]
    fn declaration_order_is_preserved() {
        let mut builtins = BuiltinPlugins::new();
        builtins.register("a", || Box::new(NoopPlugin));
        builtins.register("b", || Box::new(NoopPlugin));

        let specs = vec![
            PluginSpec::WithOptions("b".to_string(), serde_json::json!({"x": 1})),
            PluginSpec::Bare("a".to_string()),
        ];
        let records = load_plugins(&specs, Path::new("/"), &builtins).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(records[0].options, Some(serde_json::json!({"x": 1})));
    }
}
