use engram_core::EngramConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Server-side settings: where to listen and where the data lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub http_addr: SocketAddr,
    pub data_dir: PathBuf,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:7171".parse().unwrap(),
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// The full `engram.toml`: server section plus the service
/// configuration schema.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    #[serde(flatten)]
    pub engram: EngramConfig,
}

impl ServerConfig {
    /// Load from a toml file; a missing file yields defaults, a broken
    /// one is an error worth stopping for.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.server.data_dir.join("engram.redb")
    }

    pub fn ensure_data_dir(&self) -> anyhow::Result<()> {
        if !self.server.data_dir.exists() {
            std::fs::create_dir_all(&self.server.data_dir)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Vec<String> {
        self.engram.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = ServerConfig::load_or_default(Path::new("/nonexistent/engram.toml")).unwrap();
        assert_eq!(config.server.data_dir, PathBuf::from("./data"));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let raw = r#"
            [server]
            data_dir = "/tmp/engram-test"

            [probing]
            max_per_day = 5
        "#;
        let config: ServerConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.server.data_dir, PathBuf::from("/tmp/engram-test"));
        assert_eq!(config.engram.probing.max_per_day, 5);
        // Untouched sections keep their defaults.
        assert_eq!(config.engram.probing.max_per_conversation, 1);
    }
}
