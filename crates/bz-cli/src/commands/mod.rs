pub mod config;
pub mod db;
pub mod server;

use std::path::PathBuf;

use anyhow::Context;
use bz_server::auth::AuthConfig;
use bz_server::state::DEFAULT_LIVE_CHANNEL_CAPACITY;
use bz_server::{shellexpand, ServerConfig, IN_MEMORY_DATA_DIR};
use bz_storage::DATABASE_FILE_NAME;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    pub bind_host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".into(),
            port: 8080,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub server: ServerRuntimeConfig,
    pub data_dir: String,
    pub live_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server: ServerRuntimeConfig::default(),
            data_dir: shellexpand("~/.bazaar/data"),
            live_channel_capacity: DEFAULT_LIVE_CHANNEL_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    pub fn is_in_memory(&self) -> bool {
        self.data_dir == IN_MEMORY_DATA_DIR
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(DATABASE_FILE_NAME)
    }

    pub fn into_server_config(self, auth: AuthConfig) -> ServerConfig {
        ServerConfig {
            bind_host: self.server.bind_host,
            port: self.server.port,
            cors_allowed_origins: self.server.cors_allowed_origins,
            data_dir: self.data_dir,
            live_channel_capacity: self.live_channel_capacity,
            auth,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server: Option<FileServerConfig>,
    storage: Option<FileStorageConfig>,
    live: Option<FileLiveConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct FileServerConfig {
    bind_host: Option<String>,
    port: Option<u16>,
    cors_allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct FileStorageConfig {
    data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLiveConfig {
    channel_capacity: Option<usize>,
}

/// Defaults, then the TOML file if it exists, then `BAZAAR_*` environment
/// overrides.
pub fn load_runtime_config(config_path: &str) -> anyhow::Result<RuntimeConfig> {
    let path = shellexpand(config_path);
    let mut runtime = RuntimeConfig::default();

    if std::path::Path::new(&path).exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {path}"))?;
        let file_config: FileConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse TOML config {path}"))?;
        apply_file_config(&mut runtime, file_config);
    }

    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    Ok(runtime)
}

fn apply_file_config(runtime: &mut RuntimeConfig, file_config: FileConfig) {
    if let Some(server) = file_config.server {
        if let Some(bind_host) = server.bind_host {
            runtime.server.bind_host = bind_host;
        }
        if let Some(port) = server.port {
            runtime.server.port = port;
        }
        if let Some(origins) = server.cors_allowed_origins {
            runtime.server.cors_allowed_origins = origins;
        }
    }

    if let Some(storage) = file_config.storage {
        if let Some(data_dir) = storage.data_dir {
            runtime.data_dir = shellexpand(&data_dir);
        }
    }

    if let Some(live) = file_config.live {
        if let Some(capacity) = live.channel_capacity {
            runtime.live_channel_capacity = capacity.max(1);
        }
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(value) = non_empty("BAZAAR_BIND_HOST") {
        runtime.server.bind_host = value.trim().to_string();
    }

    if let Some(port) = non_empty("BAZAAR_PORT").and_then(|raw| raw.trim().parse::<u16>().ok()) {
        runtime.server.port = port;
    }

    if let Some(value) = non_empty("BAZAAR_DATA_DIR") {
        runtime.data_dir = shellexpand(value.trim());
    }

    if let Some(value) = non_empty("BAZAAR_CORS_ORIGINS") {
        runtime.server.cors_allowed_origins = value
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> String {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).expect("write temp config");
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        let runtime = load_runtime_config(path.to_str().unwrap()).unwrap();
        assert_eq!(runtime.live_channel_capacity, DEFAULT_LIVE_CHANNEL_CAPACITY);
        assert!(runtime.database_path().ends_with(DATABASE_FILE_NAME));
    }

    #[test]
    fn file_sections_override_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
bind_host = "0.0.0.0"
port = 9000
cors_allowed_origins = ["https://shop.example.com"]

[storage]
data_dir = ":memory:"

[live]
channel_capacity = 0
"#,
        );

        let mut runtime = RuntimeConfig::default();
        let file_config: FileConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        apply_file_config(&mut runtime, file_config);

        assert_eq!(runtime.server.bind_host, "0.0.0.0");
        assert_eq!(runtime.server.port, 9000);
        assert_eq!(
            runtime.server.cors_allowed_origins,
            vec!["https://shop.example.com".to_string()]
        );
        assert!(runtime.is_in_memory());
        assert_eq!(runtime.live_channel_capacity, 1);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[server\nport = ");
        let err = load_runtime_config(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse TOML config"));
    }

    #[test]
    fn env_overrides_win_and_ignore_garbage() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BAZAAR_BIND_HOST", " 10.0.0.5 "),
            ("BAZAAR_PORT", "not-a-port"),
            ("BAZAAR_DATA_DIR", "/srv/bazaar"),
            ("BAZAAR_CORS_ORIGINS", "https://a.example, ,https://b.example"),
        ]);
        let mut runtime = RuntimeConfig::default();
        apply_env_overrides(&mut runtime, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(runtime.server.bind_host, "10.0.0.5");
        assert_eq!(runtime.server.port, 8080);
        assert_eq!(runtime.data_dir, "/srv/bazaar");
        assert_eq!(
            runtime.server.cors_allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );

        let mut runtime = RuntimeConfig::default();
        apply_env_overrides(&mut runtime, |key| {
            (key == "BAZAAR_PORT").then(|| "9471".to_string())
        });
        assert_eq!(runtime.server.port, 9471);
    }
}
