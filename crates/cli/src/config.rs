//! Configuration loading from switchboard.toml and the environment.

use policy::QueryPolicy;
use runtime::{CommandSettings, DatabaseSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable holding the session credential.
pub const CREDENTIAL_VAR: &str = "SWITCHBOARD_API_KEY";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Data store connection and pool.
    #[serde(default)]
    pub database: DatabaseSettings,

    /// Shell command execution.
    #[serde(default)]
    pub commands: CommandSettings,

    /// Agent session settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Dispatch journal and command history.
    #[serde(default)]
    pub journal: JournalConfig,

    /// Where rendered chart specifications are handed off.
    #[serde(default)]
    pub charts: ChartsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Query safety rules.
    #[serde(default)]
    pub policy: QueryPolicy,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionConfig {
    /// Credential for the agent session. `SWITCHBOARD_API_KEY` overrides it.
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Database file. Defaults to `<data dir>/journal.db`.
    pub path: Option<PathBuf>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChartsConfig {
    /// Output directory. Defaults to `<data dir>/charts`.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment overrides.
    ///
    /// Read once at startup: `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`,
    /// `DB_PASSWORD`, `DB_SSL`, and the session credential.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let db = &mut self.database;
        if let Some(host) = var("DB_HOST") {
            db.host = host;
        }
        if let Some(port) = var("DB_PORT") {
            db.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "DB_PORT",
                value: port,
            })?;
        }
        if let Some(name) = var("DB_NAME") {
            db.database = name;
        }
        if let Some(user) = var("DB_USER") {
            db.user = user;
        }
        if let Some(password) = var("DB_PASSWORD") {
            db.password = password;
        }
        if let Some(ssl) = var("DB_SSL") {
            db.ssl = parse_flag(&ssl).ok_or(ConfigError::InvalidEnv {
                var: "DB_SSL",
                value: ssl,
            })?;
        }
        if let Some(key) = var(CREDENTIAL_VAR) {
            self.session.api_key = Some(key);
        }
        Ok(())
    }

    /// The session credential. Serving without one is a fatal error.
    pub fn credential(&self) -> Result<&str, ConfigError> {
        self.session
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingCredential)
    }

    pub fn journal_path(&self, data_dir: &Path) -> PathBuf {
        self.journal
            .path
            .clone()
            .unwrap_or_else(|| data_dir.join("journal.db"))
    }

    pub fn charts_dir(&self, data_dir: &Path) -> PathBuf {
        self.charts
            .dir
            .clone()
            .unwrap_or_else(|| data_dir.join("charts"))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("session credential not configured: set {CREDENTIAL_VAR} or session.api_key")]
    MissingCredential,

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime::ShellKind;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.commands.default_timeout_ms, 30_000);
        assert_eq!(config.policy, QueryPolicy::default());
        assert!(config.journal.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parses_sections() {
        let config = Config::parse(
            r#"
[database]
host = "db.internal"
max_connections = 4
ssl = true

[commands]
default_shell = "powershell"

[commands.shells]
gitbash = ["/usr/bin/bash", "-lc"]

[session]
api_key = "from-file"

[policy]
forbidden_keywords = ["drop", "truncate", "grant"]
"#,
        )
        .unwrap();

        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.max_connections, 4);
        assert!(config.database.ssl);
        assert_eq!(config.commands.default_shell, ShellKind::Powershell);
        assert_eq!(config.commands.shells.gitbash, vec!["/usr/bin/bash", "-lc"]);
        assert_eq!(config.credential().unwrap(), "from-file");
        assert_eq!(config.policy.forbidden_keywords.len(), 3);
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = Config::parse("[database]\nhost = \"file\"").unwrap();
        config
            .apply_env(env(&[
                ("DB_HOST", "env-host"),
                ("DB_PORT", "6543"),
                ("DB_SSL", "true"),
                ("SWITCHBOARD_API_KEY", "secret"),
            ]))
            .unwrap();

        assert_eq!(config.database.host, "env-host");
        assert_eq!(config.database.port, 6543);
        assert!(config.database.ssl);
        assert_eq!(config.credential().unwrap(), "secret");
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("DB_PORT", "abc")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "DB_PORT", .. }));
    }

    #[test]
    fn missing_credential_is_an_error() {
        let config = Config::default();
        assert!(matches!(
            config.credential(),
            Err(ConfigError::MissingCredential)
        ));

        let mut blank = Config::default();
        blank.session.api_key = Some("  ".to_string());
        assert!(blank.credential().is_err());
    }

    #[test]
    fn default_paths_live_in_data_dir() {
        let config = Config::default();
        let dir = Path::new("/data/switchboard");
        assert_eq!(config.journal_path(dir), dir.join("journal.db"));
        assert_eq!(config.charts_dir(dir), dir.join("charts"));
    }
}
