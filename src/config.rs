use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration for the API server.
///
/// Defaults can be overlaid by an optional `sge.toml` file and then by CLI
/// flags (applied in `main.rs`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    /// Origins the browser frontend calls from. Ignored in dev mode,
    /// which uses a permissive CORS layer.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            db_path: PathBuf::from("sge.db"),
            dev_mode: false,
            allowed_origins: vec![
                "http://localhost:4200".to_string(),
                "http://127.0.0.1:4200".to_string(),
            ],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server: Option<FileServer>,
    cors: Option<FileCors>,
}

#[derive(Debug, Default, Deserialize)]
struct FileServer {
    port: Option<u16>,
    db: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct FileCors {
    allowed_origins: Option<Vec<String>>,
}

impl ServerConfig {
    /// Load defaults overlaid with `sge.toml` when present. An explicitly
    /// given path must exist; the implicit `./sge.toml` may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let contents = match path {
            Some(p) => Some(
                std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?,
            ),
            None => std::fs::read_to_string("sge.toml").ok(),
        };

        if let Some(contents) = contents {
            let file: FileConfig =
                toml::from_str(&contents).context("Failed to parse config file")?;
            if let Some(server) = file.server {
                if let Some(port) = server.port {
                    config.port = port;
                }
                if let Some(db) = server.db {
                    config.db_path = db;
                }
            }
            if let Some(cors) = file.cors {
                if let Some(origins) = cors.allowed_origins {
                    config.allowed_origins = origins;
                }
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_angular_dev_server() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.db_path, PathBuf::from("sge.db"));
        assert!(!config.dev_mode);
        assert!(
            config
                .allowed_origins
                .iter()
                .any(|o| o == "http://localhost:4200")
        );
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sge.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9100\ndb = \"data/sge.db\"\n\n[cors]\nallowed_origins = [\"https://sge.example.org\"]\n",
        )
        .unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.db_path, PathBuf::from("data/sge.db"));
        assert_eq!(config.allowed_origins, vec!["https://sge.example.org"]);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = ServerConfig::load(Some(Path::new("/nonexistent/sge.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sge.toml");
        std::fs::write(&path, "[server]\nport = 9200\n").unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.port, 9200);
        assert_eq!(config.db_path, PathBuf::from("sge.db"));
    }
}
