use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// The build command driving the current invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Build,
    Dev,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Dev => "dev",
        }
    }

    /// Hook key fired before any configuration is processed.
    pub fn before_hook(self) -> String {
        format!("before.{}", self.as_str())
    }

    /// Hook key fired after every configuration has been processed.
    pub fn after_hook(self) -> String {
        format!("after.{}", self.as_str())
    }

    /// Per-configuration hook key fired before the bundler runs for `name`.
    pub fn before_config_hook(self, name: &str) -> String {
        format!("before.{}.{}", self.as_str(), name)
    }

    /// Per-configuration hook key fired after the bundler ran for `name`.
    pub fn after_config_hook(self, name: &str) -> String {
        format!("after.{}.{}", self.as_str(), name)
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("unknown command '{0}'")]
    Unknown(String),
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "build" => Ok(Self::Build),
            "dev" => Ok(Self::Dev),
            other => Err(CommandParseError::Unknown(other.to_string())),
        }
    }
}

/// Parsed CLI arguments, exposed to plugins as an opaque key-value bag.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandArgs {
    /// Override for the user configuration path, absolute or root-relative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,
    /// Dev-server port override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Dev-server host override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Remaining free-form arguments, forwarded to plugins verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        let cmd = Command::from_str("build").expect("build should parse");
        assert_eq!(cmd, Command::Build);
        let cmd = Command::from_str("dev").expect("dev should parse");
        assert_eq!(cmd, Command::Dev);
    }

    #[test]
    fn rejects_unknown_command() {
        let err = Command::from_str("serve").expect_err("must fail");
        assert!(matches!(err, CommandParseError::Unknown(_)));
    }

    #[test]
    fn hook_keys_follow_convention() {
        assert_eq!(Command::Build.before_hook(), "before.build");
        assert_eq!(Command::Dev.after_hook(), "after.dev");
        assert_eq!(Command::Build.before_config_hook("web"), "before.build.web");
        assert_eq!(Command::Dev.after_config_hook("node"), "after.dev.node");
    }
}
