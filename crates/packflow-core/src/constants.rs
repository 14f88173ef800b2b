//! Constants used across the Packflow workspace.

/// The filename for Packflow's user configuration.
pub const USER_CONFIG_FILE: &str = "build.json";

/// The project metadata manifest read once per invocation.
pub const PROJECT_MANIFEST: &str = "package.json";

/// Default dev-server port, overridable per configuration.
pub const DEFAULT_DEV_PORT: u16 = 9999;

/// Default dev-server bind host.
pub const DEFAULT_DEV_HOST: &str = "127.0.0.1";
