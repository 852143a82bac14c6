use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Server configuration, loaded from a TOML file and overridable from the
/// command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database: PathBuf,
    /// Directory for rotated log files; stdout when unset.
    pub log_dir: Option<PathBuf>,
    /// Session inactivity expiry, days.
    pub session_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database: PathBuf::from("database/lms.db"),
            log_dir: None,
            session_days: 5,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load from `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_partial_config() {
        let config: Config = toml::from_str(r#"port = 9000"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.session_days, 5);
    }
}
