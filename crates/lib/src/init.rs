//! Initialize the configuration directory: create ~/.taskhub and a default config file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Create the config directory and default config if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing. The hub endpoint still has to be set before `listen`.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_dir_and_default_config_once() {
        let dir = std::env::temp_dir().join(format!("taskhub-init-{}", std::process::id()));
        let config_path = dir.join("nested").join("config.json");
        let created = init_config_dir(&config_path).unwrap();
        assert_eq!(created, dir.join("nested"));
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "{}");

        std::fs::write(&config_path, r#"{"hub":{"endpoint":"wss://hub.example"}}"#).unwrap();
        init_config_dir(&config_path).unwrap();
        assert!(std::fs::read_to_string(&config_path).unwrap().contains("hub.example"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
