pub mod auth;
pub mod error;
pub mod rest;
pub mod state;
pub mod validation;
pub mod websocket;

use std::net::{IpAddr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::Arc;

use bz_storage::{SqliteRecordStore, DATABASE_FILE_NAME};
use tokio::sync::broadcast;

use auth::AuthConfig;
use state::{AppState, DEFAULT_LIVE_CHANNEL_CAPACITY};

/// `data_dir` value that keeps everything in memory.
pub const IN_MEMORY_DATA_DIR: &str = ":memory:";

const DEFAULT_LOG_FILTER: &str = "info,bz_server=debug,bz_storage=debug";

pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub data_dir: String,
    pub live_channel_capacity: usize,
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".into(),
            port: 8080,
            cors_allowed_origins: Vec::new(),
            data_dir: "~/.bazaar/data".into(),
            live_channel_capacity: DEFAULT_LIVE_CHANNEL_CAPACITY,
            auth: AuthConfig::default(),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the built-in filter.
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Open the store, wire its change feed and build the shared state.
pub fn build_state(config: &ServerConfig) -> Result<Arc<AppState>, bz_core::BzError> {
    let (live_tx, _) = broadcast::channel(config.live_channel_capacity.max(1));
    let store = if config.data_dir == IN_MEMORY_DATA_DIR {
        tracing::info!("using in-memory database");
        SqliteRecordStore::open_in_memory()?
    } else {
        let data_dir = PathBuf::from(shellexpand(&config.data_dir));
        std::fs::create_dir_all(&data_dir).map_err(|err| {
            bz_core::BzError::Config(format!(
                "cannot create data directory {}: {err}",
                data_dir.display()
            ))
        })?;
        let path = data_dir.join(DATABASE_FILE_NAME);
        tracing::info!(path = %path.display(), "opening database");
        SqliteRecordStore::open(&path)?
    };
    let store = store.with_change_feed(live_tx.clone());
    Ok(Arc::new(AppState::new(
        Arc::new(store),
        live_tx,
        config.auth.clone(),
    )))
}

/// Start the REST and live-feed server and run until Ctrl-C.
pub async fn start_server(
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    check_bind_safety(&config.bind_host, &config.auth)?;
    if !config.auth.is_enabled() {
        tracing::warn!("no BAZAAR_AUTH_TOKEN or BAZAAR_JWT_SECRET set; admin routes are disabled");
    }

    let state = build_state(&config)?;
    let app = rest::create_router_with_cors(Arc::clone(&state), &config.cors_allowed_origins)
        .merge(websocket::live_router(Arc::clone(&state)));

    let addr = bind_address(&config.bind_host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("REST API listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {err}");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down...");
            state.shutdown();
        })
        .await?;

    Ok(())
}

/// `host:port` for the listener. IPv6 literals are bracketed.
pub fn bind_address(bind_host: &str, port: u16) -> String {
    let host = bind_host.trim();
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<Ipv6Addr>().is_ok() {
        format!("[{bare}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Whether `BAZAAR_ALLOW_INSECURE_BIND` is set to a truthy value.
pub fn allow_insecure_bind_from_env() -> bool {
    allow_insecure_bind_value(std::env::var("BAZAAR_ALLOW_INSECURE_BIND").ok().as_deref())
}

/// Refuse a public bind without auth unless explicitly overridden.
pub fn check_bind_safety(bind_host: &str, auth: &AuthConfig) -> Result<(), String> {
    validate_bind_safety(bind_host, auth.is_enabled(), allow_insecure_bind_from_env())
}

fn allow_insecure_bind_value(raw: Option<&str>) -> bool {
    let value = raw.unwrap_or("").trim().to_ascii_lowercase();
    matches!(value.as_str(), "1" | "true" | "yes" | "on")
}

fn is_local_bind_host(bind_host: &str) -> bool {
    let host = bind_host.trim();
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    match host.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback(),
        Err(_) => false,
    }
}

fn validate_bind_safety(
    bind_host: &str,
    auth_enabled: bool,
    allow_insecure_bind: bool,
) -> Result<(), String> {
    if is_local_bind_host(bind_host) || auth_enabled || allow_insecure_bind {
        return Ok(());
    }

    Err(format!(
        "refusing to bind to '{bind_host}' without auth; set BAZAAR_AUTH_TOKEN or BAZAAR_JWT_SECRET, or override with BAZAAR_ALLOW_INSECURE_BIND=true"
    ))
}

/// Expand a leading `~/` to `$HOME`.
pub fn shellexpand(s: &str) -> String {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bz_core::{RecordId, Table};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn bind_safety_detects_local_hosts() {
        assert!(is_local_bind_host("127.0.0.1"));
        assert!(is_local_bind_host("127.12.34.56"));
        assert!(is_local_bind_host("::1"));
        assert!(is_local_bind_host("localhost"));
        assert!(!is_local_bind_host("0.0.0.0"));
        assert!(!is_local_bind_host("::"));
        assert!(!is_local_bind_host("192.168.1.10"));
    }

    #[test]
    fn bind_safety_rejects_public_without_auth_or_override() {
        let err = validate_bind_safety("0.0.0.0", false, false).unwrap_err();
        assert!(err.contains("BAZAAR_ALLOW_INSECURE_BIND"));
        assert!(validate_bind_safety("0.0.0.0", true, false).is_ok());
        assert!(validate_bind_safety("0.0.0.0", false, true).is_ok());
    }

    #[test]
    fn allow_insecure_bind_value_parses_truthy() {
        assert!(allow_insecure_bind_value(Some("true")));
        assert!(allow_insecure_bind_value(Some("1")));
        assert!(allow_insecure_bind_value(Some("yes")));
        assert!(allow_insecure_bind_value(Some("on")));
        assert!(!allow_insecure_bind_value(Some("false")));
        assert!(!allow_insecure_bind_value(None));
    }

    #[test]
    fn bind_address_brackets_ipv6_hosts() {
        assert_eq!(bind_address("127.0.0.1", 8080), "127.0.0.1:8080");
        assert_eq!(bind_address("localhost", 80), "localhost:80");
        assert_eq!(bind_address("::1", 8080), "[::1]:8080");
        assert_eq!(bind_address("[::]", 9000), "[::]:9000");
        assert!(bind_address("::1", 8080).parse::<std::net::SocketAddr>().is_ok());
        assert!(is_local_bind_host("[::1]"));
    }

    #[test]
    fn shellexpand_only_touches_home_prefix() {
        assert_eq!(shellexpand("/var/lib/bazaar"), "/var/lib/bazaar");
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(shellexpand("~/data"), format!("{home}/data"));
        }
    }

    #[tokio::test]
    async fn file_backed_state_persists_between_opens() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().join("nested").to_string_lossy().into_owned(),
            ..ServerConfig::default()
        };

        let id = RecordId::generate(Table::BlogTag);
        {
            let state = build_state(&config).unwrap();
            let doc = json!({ "name": "rust", "slug": "rust" });
            state
                .store
                .create(&id, doc.as_object().cloned().unwrap())
                .await
                .unwrap();
        }
        assert!(dir.path().join("nested").join(DATABASE_FILE_NAME).exists());

        let state = build_state(&config).unwrap();
        let stored = state.store.select(&id).await.unwrap().unwrap();
        assert_eq!(stored["name"], "rust");
    }
}
