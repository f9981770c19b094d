//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.taskhub/config.json`) and environment.
//! The hub endpoint has no compiled-in default; it must come from the file or `TASKHUB_HUB_ENDPOINT`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::gate::Route;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Real-time hub connection settings.
    #[serde(default)]
    pub hub: HubConfig,

    /// Where the current identity is read from and how it is validated.
    #[serde(default)]
    pub session: SessionConfig,

    /// Paths for the two gate destinations.
    #[serde(default)]
    pub routes: RoutesConfig,
}

/// Hub endpoint, handshake override, and reconnect policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    /// WebSocket address of the hub (e.g. "wss://hub.example"). Overridden by TASKHUB_HUB_ENDPOINT env.
    pub endpoint: Option<String>,

    /// Frame sent right after the connection opens. When absent, the default test greeting is used.
    #[serde(default)]
    pub handshake: Option<serde_json::Value>,

    /// Opt-in reconnect after failures. Disabled by default.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Exponential backoff settings for reconnecting after the channel fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(default)]
    pub enabled: bool,

    /// First delay after a failure (default 500 ms). Doubles per attempt.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for the delay (default 30 s).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Give up after this many consecutive attempts. Unlimited when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
        }
    }
}

/// How the gate consults the session store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolveStrategy {
    /// Use the local cached identity when present; only ask the store when the cache is empty.
    #[default]
    CacheFirst,
    /// Always ask the store (e.g. a remote validation round trip), ignoring the cache.
    AlwaysValidate,
}

/// Session source settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Persisted identity file. Relative paths are resolved against the config file's parent. Default: `session.json` beside the config file.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// When set, sessions are validated by GET on this URL (bearer token from TASKHUB_SESSION_TOKEN).
    #[serde(default)]
    pub validate_url: Option<String>,

    #[serde(default)]
    pub strategy: ResolveStrategy,
}

/// Destination paths for the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutesConfig {
    #[serde(default = "default_authenticated_route")]
    pub authenticated: String,

    #[serde(default = "default_unauthenticated_route")]
    pub unauthenticated: String,
}

fn default_authenticated_route() -> String {
    "/dashboard".to_string()
}

fn default_unauthenticated_route() -> String {
    "/login".to_string()
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            authenticated: default_authenticated_route(),
            unauthenticated: default_unauthenticated_route(),
        }
    }
}

impl RoutesConfig {
    /// Configured path for a logical destination.
    pub fn path(&self, route: Route) -> &str {
        match route {
            Route::Authenticated => &self.authenticated,
            Route::Unauthenticated => &self.unauthenticated,
        }
    }

    /// Logical destination for a path, if it is one of the two configured ones.
    pub fn route_for(&self, path: &str) -> Option<Route> {
        let p = path.trim();
        if p == self.authenticated {
            Some(Route::Authenticated)
        } else if p == self.unauthenticated {
            Some(Route::Unauthenticated)
        } else {
            None
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the hub endpoint: env TASKHUB_HUB_ENDPOINT overrides config. None when neither is set.
pub fn resolve_hub_endpoint(config: &Config) -> Option<String> {
    non_empty_env("TASKHUB_HUB_ENDPOINT").or_else(|| {
        config
            .hub
            .endpoint
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Bearer token for remote session validation (env TASKHUB_SESSION_TOKEN).
pub fn resolve_session_token() -> Option<String> {
    non_empty_env("TASKHUB_SESSION_TOKEN")
}

/// Resolve the persisted identity file: env TASKHUB_SESSION_PATH, then `session.path`, then `session.json` beside the config file.
pub fn resolve_session_path(config: &Config, config_path: &Path) -> PathBuf {
    if let Some(p) = non_empty_env("TASKHUB_SESSION_PATH") {
        return PathBuf::from(p);
    }
    session_path_from_config(config, config_path)
}

fn session_path_from_config(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.session.path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                config_parent.join(p)
            }
        }
        _ => config_parent.join("session.json"),
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TASKHUB_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".taskhub").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or TASKHUB_CONFIG_PATH / default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_endpoint_and_standard_routes() {
        let config = Config::default();
        assert!(config.hub.endpoint.is_none());
        assert!(!config.hub.reconnect.enabled);
        assert_eq!(config.session.strategy, ResolveStrategy::CacheFirst);
        assert_eq!(config.routes.path(Route::Authenticated), "/dashboard");
        assert_eq!(config.routes.path(Route::Unauthenticated), "/login");
    }

    #[test]
    fn parses_camel_case_file() {
        let json = r#"{
            "hub": { "endpoint": " wss://hub.example ", "reconnect": { "enabled": true, "maxAttempts": 3 } },
            "session": { "validateUrl": "https://id.example/me", "strategy": "alwaysValidate" },
            "routes": { "authenticated": "/home" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.hub.endpoint.as_deref(), Some(" wss://hub.example "));
        assert!(config.hub.reconnect.enabled);
        assert_eq!(config.hub.reconnect.max_attempts, Some(3));
        assert_eq!(config.hub.reconnect.initial_delay_ms, 500);
        assert_eq!(config.session.strategy, ResolveStrategy::AlwaysValidate);
        assert_eq!(config.routes.authenticated, "/home");
        assert_eq!(config.routes.unauthenticated, "/login");
    }

    #[test]
    fn route_for_matches_configured_paths() {
        let routes = RoutesConfig::default();
        assert_eq!(routes.route_for("/dashboard"), Some(Route::Authenticated));
        assert_eq!(routes.route_for("/login"), Some(Route::Unauthenticated));
        assert_eq!(routes.route_for("/settings"), None);
    }

    #[test]
    fn session_path_default_is_beside_config() {
        let config = Config::default();
        let path = Path::new("/home/user/.taskhub/config.json");
        assert_eq!(
            session_path_from_config(&config, path),
            PathBuf::from("/home/user/.taskhub/session.json")
        );
    }

    #[test]
    fn session_path_override_relative_and_absolute() {
        let mut config = Config::default();
        let path = Path::new("/home/user/.taskhub/config.json");
        config.session.path = Some(PathBuf::from("ids/me.json"));
        assert_eq!(
            session_path_from_config(&config, path),
            PathBuf::from("/home/user/.taskhub/ids/me.json")
        );
        config.session.path = Some(PathBuf::from("/var/lib/taskhub/me.json"));
        assert_eq!(
            session_path_from_config(&config, path),
            PathBuf::from("/var/lib/taskhub/me.json")
        );
    }

    #[test]
    fn load_config_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("taskhub-config-does-not-exist.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert!(config.hub.endpoint.is_none());
    }

    #[test]
    fn load_config_rejects_invalid_json() {
        let path = std::env::temp_dir().join(format!("taskhub-bad-config-{}.json", std::process::id()));
        std::fs::write(&path, b"{ not json").unwrap();
        let err = load_config(Some(path.clone())).unwrap_err();
        assert!(format!("{:#}", err).contains("parsing config"));
        let _ = std::fs::remove_file(&path);
    }
}
