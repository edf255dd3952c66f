use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Host override for the asset server, checked at load time.
pub const HOST_ENV: &str = "ASSET_HOST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// In-process document store; full replay with no server.
    Memory,
    /// JSON-over-HTTP asset server client.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub base_path: String,
    #[serde(default = "default_mode")]
    pub mode: ServiceMode,
}

fn default_mode() -> ServiceMode {
    ServiceMode::Memory
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    pub topic: String,
    pub content_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub replay: ReplayConfig,
}

impl AppConfig {
    pub fn load_default() -> anyhow::Result<Self> {
        let default = include_str!("../config/default.toml");
        let cfg: AppConfig = toml::from_str(default)?;
        Ok(cfg.apply_env())
    }

    pub fn load_from(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let p = path.into();
        let s = fs::read_to_string(&p)?;
        let cfg: AppConfig = toml::from_str(&s)?;
        Ok(cfg.apply_env())
    }

    fn apply_env(mut self) -> Self {
        if let Ok(host) = env::var(HOST_ENV) {
            if !host.is_empty() {
                self.connection.host = host;
            }
        }
        self
    }
}
