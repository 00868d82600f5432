use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::{sanitize_config, Config};

const APP_DIR_NAME: &str = "card-image-review";

/// Default config location under the platform config directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|path| path.join(APP_DIR_NAME).join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

pub fn persist_config_file(config: &Config, path: &Path) {
    let config_text = match toml::to_string(config) {
        Ok(text) => text,
        Err(err) => {
            log::error!("Failed to serialize config for {}: {}", path.display(), err);
            return;
        }
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                log::error!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    err
                );
                return;
            }
        }
    }

    if let Err(err) = std::fs::write(path, config_text) {
        log::error!("Failed to persist config to {}: {}", path.display(), err);
    }
}

/// Reads the config at `path`, writing defaults first when the file is missing.
/// Unreadable or invalid files fall back to defaults so a batch can still run.
pub fn load_or_create_config_file(path: &Path) -> Config {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        let default_config = Config::default();
        persist_config_file(&default_config, path);
        return default_config;
    }

    let config_content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(
                "Failed to read config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            return Config::default();
        }
    };

    match toml::from_str::<Config>(&config_content) {
        Ok(config) => sanitize_config(config),
        Err(err) => {
            warn!(
                "Failed to parse config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{load_or_create_config_file, persist_config_file};
    use crate::config::Config;

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let config = load_or_create_config_file(&path);
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_persisted_config_is_loaded_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.similarity.max_distance = 12;
        config.review.open_browser = false;

        persist_config_file(&config, &path);
        assert_eq!(load_or_create_config_file(&path), config);
    }

    #[test]
    fn test_invalid_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[search\nquery_delay_ms = ").expect("write broken config");

        assert_eq!(load_or_create_config_file(&path), Config::default());
    }
}
