//! Configuration for the collector.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (GIP_TEMP_DIR, GIP_PROVIDER_DIR, ...)
//! 2. Config file (YAML, `--config` or ./gip.yaml)
//! 3. Defaults
//!
//! The resolved config is an owned value passed into the per-run collector
//! context; nothing is memoized process-wide.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("cannot create temp directory {path}: {source}")]
    TempDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("configured {role} directory does not exist: {path}")]
    MissingDir { role: &'static str, path: PathBuf },
}

/// Raw config file schema (matches YAML structure).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub overrides: OverridesConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Cache read-staleness threshold in seconds.
    pub freshness: Option<u64>,
    /// Expiration budget stamped on fresh records, in seconds.
    pub cache_ttl: Option<u64>,
    /// Discard all cache files before running.
    pub flush_cache: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecConfig {
    /// Max wait for module responses, in seconds.
    pub response: Option<u64>,
    /// Hard cap on the collection cycle wait, in seconds.
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    pub temp_dir: Option<String>,
    pub provider_dir: Option<String>,
    pub plugin_dir: Option<String>,
    pub static_dir: Option<String>,
    pub lock_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LockConfig {
    /// Age in seconds beyond which a lock holder is forcibly reclaimed.
    pub kill_timeout: Option<u64>,
    /// Base delay between lock retries, in milliseconds.
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverridesConfig {
    pub add_attributes: Option<String>,
    pub alter_attributes: Option<String>,
    pub remove_attributes: Option<String>,
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct GipConfig {
    pub freshness: Duration,
    pub cache_ttl: Duration,
    pub response: Duration,
    pub timeout: Duration,
    pub flush_cache: bool,

    pub temp_dir: PathBuf,
    pub provider_dir: Option<PathBuf>,
    pub plugin_dir: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub lock_file: PathBuf,

    pub kill_timeout: Duration,
    pub lock_retry_delay: Duration,

    pub add_attributes: Option<PathBuf>,
    pub alter_attributes: Option<PathBuf>,
    pub remove_attributes: Option<PathBuf>,
}

impl GipConfig {
    /// Effective deadline for one collection cycle.
    pub fn deadline(&self) -> Duration {
        self.response.min(self.timeout)
    }

    /// Canonical path of the previous-cycle snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.temp_dir.join("gip_output.ldif")
    }

    /// Validate at startup, before any module runs: the temp dir is created
    /// if absent; configured module directories must exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.temp_dir).map_err(|source| ConfigError::TempDir {
            path: self.temp_dir.clone(),
            source,
        })?;

        for (role, dir) in [
            ("provider", &self.provider_dir),
            ("plugin", &self.plugin_dir),
            ("static", &self.static_dir),
        ] {
            if let Some(dir) = dir {
                if !dir.is_dir() {
                    return Err(ConfigError::MissingDir {
                        role,
                        path: dir.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Load configuration from an explicit file, ./gip.yaml, or defaults, then
/// apply environment overrides.
pub fn load(config_path: Option<&Path>) -> Result<GipConfig, ConfigError> {
    let file = match config_path {
        Some(path) => Some(load_config_file(path)?),
        None => {
            let default_path = PathBuf::from("gip.yaml");
            if default_path.exists() {
                Some(load_config_file(&default_path)?)
            } else {
                None
            }
        }
    };
    let file = file.unwrap_or_default();

    let temp_dir = env_path("GIP_TEMP_DIR")
        .or_else(|| file.paths.temp_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| std::env::temp_dir().join("gip"));

    let lock_file = env_path("GIP_LOCK_FILE")
        .or_else(|| file.paths.lock_file.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| temp_dir.join("gip.lock"));

    Ok(GipConfig {
        freshness: Duration::from_secs(file.cache.freshness.unwrap_or(300)),
        cache_ttl: Duration::from_secs(file.cache.cache_ttl.unwrap_or(600)),
        response: Duration::from_secs(file.exec.response.unwrap_or(240)),
        timeout: Duration::from_secs(file.exec.timeout.unwrap_or(240)),
        flush_cache: file.cache.flush_cache.unwrap_or(false),
        provider_dir: env_path("GIP_PROVIDER_DIR")
            .or_else(|| file.paths.provider_dir.as_ref().map(PathBuf::from)),
        plugin_dir: env_path("GIP_PLUGIN_DIR")
            .or_else(|| file.paths.plugin_dir.as_ref().map(PathBuf::from)),
        static_dir: env_path("GIP_STATIC_DIR")
            .or_else(|| file.paths.static_dir.as_ref().map(PathBuf::from)),
        temp_dir,
        lock_file,
        kill_timeout: Duration::from_secs(file.lock.kill_timeout.unwrap_or(1800)),
        lock_retry_delay: Duration::from_millis(file.lock.retry_delay_ms.unwrap_or(1000)),
        add_attributes: file.overrides.add_attributes.map(PathBuf::from),
        alter_attributes: file.overrides.alter_attributes.map(PathBuf::from),
        remove_attributes: file.overrides.remove_attributes.map(PathBuf::from),
    })
}

fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var).ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gip.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
cache:
  freshness: 60
  cache_ttl: 120
  flush_cache: true
exec:
  response: 30
  timeout: 45
paths:
  temp_dir: /var/tmp/gip
  provider_dir: /usr/libexec/gip/providers
lock:
  kill_timeout: 900
"#
        )
        .unwrap();

        let config = load(Some(&config_path)).unwrap();
        assert_eq!(config.freshness, Duration::from_secs(60));
        assert_eq!(config.cache_ttl, Duration::from_secs(120));
        assert!(config.flush_cache);
        assert_eq!(config.deadline(), Duration::from_secs(30));
        assert_eq!(config.temp_dir, PathBuf::from("/var/tmp/gip"));
        assert_eq!(
            config.provider_dir,
            Some(PathBuf::from("/usr/libexec/gip/providers"))
        );
        assert_eq!(config.kill_timeout, Duration::from_secs(900));
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/var/tmp/gip/gip_output.ldif")
        );
    }

    #[test]
    fn test_empty_config_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gip.yaml");
        std::fs::write(&config_path, "{}").unwrap();

        let config = load(Some(&config_path)).unwrap();
        assert_eq!(config.freshness, Duration::from_secs(300));
        assert_eq!(config.cache_ttl, Duration::from_secs(600));
        assert_eq!(config.deadline(), Duration::from_secs(240));
        assert!(!config.flush_cache);
        assert!(config.provider_dir.is_none());
        assert_eq!(config.lock_file, config.temp_dir.join("gip.lock"));
    }

    #[test]
    fn test_validate_rejects_missing_module_dir() {
        let temp = TempDir::new().unwrap();
        let config = GipConfig {
            freshness: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(1),
            response: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            flush_cache: false,
            temp_dir: temp.path().join("cache"),
            provider_dir: Some(temp.path().join("missing")),
            plugin_dir: None,
            static_dir: None,
            lock_file: temp.path().join("gip.lock"),
            kill_timeout: Duration::from_secs(1),
            lock_retry_delay: Duration::from_millis(10),
            add_attributes: None,
            alter_attributes: None,
            remove_attributes: None,
        };

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingDir {
                role: "provider",
                ..
            }
        ));
        // The temp dir itself was still created.
        assert!(temp.path().join("cache").is_dir());
    }
}
