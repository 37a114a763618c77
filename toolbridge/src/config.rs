//! Configuration for a single tool-server connection.

use std::collections::HashMap;
use std::time::Duration;

/// Maximum consecutive automatic restarts per crash episode.
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Fixed delay between automatic restart attempts.
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_millis(1000);

/// Configuration for spawning and talking to one stdio tool server.
///
/// # Example
///
/// ```rust
/// use toolbridge::BridgeConfig;
///
/// let config = BridgeConfig::new("my-tool-server")
///     .arg("--verbose")
///     .env("TOOL_SERVER_MODE", "local");
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Path or name of the tool server executable to spawn.
    pub command: String,

    /// Command-line arguments passed to the tool server.
    pub args: Vec<String>,

    /// Environment overlay applied on top of the ambient environment.
    /// Overrides win on key collision.
    pub env: HashMap<String, String>,

    /// Client name reported during the protocol handshake.
    pub client_name: String,

    /// Client version reported during the protocol handshake.
    pub client_version: String,

    /// Maximum consecutive automatic restarts attempted after an
    /// unexpected tool-server exit. Reset on every successful handshake.
    pub max_restarts: u32,

    /// Fixed (non-exponential) delay between automatic restart attempts.
    pub restart_backoff: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_backoff: DEFAULT_RESTART_BACKOFF,
        }
    }
}

impl BridgeConfig {
    /// Create a configuration for the given launch command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Append one command-line argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment override for the spawned process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_recovery_policy() {
        let config = BridgeConfig::default();
        assert_eq!(config.max_restarts, 3);
        assert_eq!(config.restart_backoff, Duration::from_millis(1000));
        assert_eq!(config.client_name, "toolbridge");
        assert!(!config.client_version.is_empty());
    }

    #[test]
    fn builder_accumulates_args_and_env() {
        let config = BridgeConfig::new("server")
            .arg("--flag")
            .arg("value")
            .env("A", "1")
            .env("A", "2");
        assert_eq!(config.command, "server");
        assert_eq!(config.args, vec!["--flag", "value"]);
        // Later overrides win.
        assert_eq!(config.env.get("A").map(String::as_str), Some("2"));
    }
}
