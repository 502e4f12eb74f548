//! Initialize the configuration directory: create `~/.parley` and a default `config.json`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{self, Config};

/// Create the config directory and a default config file if they do not exist.
/// An existing config file is left untouched. Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        config::save_config(config_path, &Config::default())
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
    fn writes_default_config_once() {
        let dir = std::env::temp_dir().join(format!("parley-init-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        assert_eq!(init_config_dir(&path).expect("init"), dir);
        let written = config::read_config_file(&path).expect("read");
        assert_eq!(written.gateway.port, 8787);

        std::fs::write(&path, r#"{"gateway":{"port":9000}}"#).expect("overwrite");
        init_config_dir(&path).expect("second init");
        assert_eq!(config::read_config_file(&path).expect("read").gateway.port, 9000);
        let _ = std::fs::remove_dir_all(dir);
    }
}
