use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment override for the cache root
pub const CACHE_DIR_ENV: &str = "RENDERCACHE_CACHE_DIR";
/// Environment override for the config directory
pub const CONFIG_DIR_ENV: &str = "RENDERCACHE_CONFIG_DIR";

const APP_DIR: &str = "rendercache";

/// Directory overrides from the command line and environment
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    pub cache_dir: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV vars → None (platform defaults)
    pub fn from_env_and_cli(cli_cache: Option<PathBuf>, cli_config: Option<PathBuf>) -> Self {
        let cache_dir = cli_cache.or_else(|| std::env::var(CACHE_DIR_ENV).ok().map(PathBuf::from));
        let config_dir = cli_config.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { cache_dir, config_dir }
    }
}

/// Root of the content cache.
///
/// Priority:
/// 1. CLI `--cache-dir`
/// 2. `RENDERCACHE_CACHE_DIR`
/// 3. `settings_override` from the settings file
/// 4. Platform cache directory from dirs-next
///
/// Platform paths:
/// - Linux: ~/.cache/rendercache
/// - macOS: ~/Library/Caches/rendercache
/// - Windows: %LOCALAPPDATA%\rendercache
pub fn cache_root(config: &PathConfig, settings_override: Option<&PathBuf>) -> PathBuf {
    if let Some(dir) = config.cache_dir.as_ref().or(settings_override) {
        return dir.clone();
    }
    if let Some(dir) = dirs_next::cache_dir() {
        return dir.join(APP_DIR);
    }
    std::env::temp_dir().join(APP_DIR)
}

/// Path to a configuration file.
///
/// Priority: custom directory (CLI or ENV), then the platform config
/// directory (~/.config/rendercache on Linux).
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    get_config_dir(config).join(name)
}

/// Create the cache root and config directory if missing.
pub fn ensure_dirs(config: &PathConfig, cache_root: &PathBuf) -> Result<()> {
    let config_dir = get_config_dir(config);
    for dir in [&config_dir, cache_root] {
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
    }
    Ok(())
}

fn get_config_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(dir) = dirs_next::config_dir() {
        return dir.join(APP_DIR);
    }
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_wins() {
        let config = PathConfig { cache_dir: Some(PathBuf::from("/cli")), config_dir: None };
        let from_settings = PathBuf::from("/settings");
        assert_eq!(cache_root(&config, Some(&from_settings)), PathBuf::from("/cli"));
    }

    #[test]
    fn test_settings_override_before_platform() {
        let config = PathConfig::default();
        let from_settings = PathBuf::from("/settings");
        assert_eq!(cache_root(&config, Some(&from_settings)), PathBuf::from("/settings"));
    }

    #[test]
    fn test_platform_default() {
        let path = cache_root(&PathConfig::default(), None);
        assert!(path.to_string_lossy().contains("rendercache"));
    }

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig { cache_dir: None, config_dir: Some(PathBuf::from("/custom")) };
        assert_eq!(config_file("settings.json", &config), PathBuf::from("/custom/settings.json"));
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = PathConfig { cache_dir: None, config_dir: Some(dir.path().join("cfg")) };
        let cache = dir.path().join("cache");
        ensure_dirs(&config, &cache).unwrap();
        assert!(cache.is_dir());
        assert!(dir.path().join("cfg").is_dir());
    }
}
