//! YAML configuration with environment variable expansion.
//!
//! Values may reference the environment as `${VAR}` or `${VAR:-default}`;
//! expansion happens over the raw file before parsing, so it works in any
//! field. Unresolvable placeholders without a default are left in place and
//! caught by validation where they matter.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::processor::{validate_thumbnail_sizes, ThumbnailSize};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

fn expand_env_vars(s: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}").unwrap();
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let full_match = cap.get(0).unwrap();
        let var_name = cap.get(1).unwrap().as_str();

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub thumbnails: Vec<ThumbnailSize>,
}

/// Which backend to run against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    Fs {
        root: PathBuf,
        #[serde(default)]
        url_prefix: Option<String>,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        base_path: Option<String>,
        /// When set, objects are mirrored to this directory and reads prefer
        /// the mirror.
        #[serde(default)]
        local_mirror: Option<PathBuf>,
    },
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_chunk_part_size")]
    pub chunk_part_size: u64,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_max_file_size() -> u64 {
    crate::validation::DEFAULT_MAX_FILE_SIZE
}

fn default_chunk_part_size() -> u64 {
    crate::manager::DEFAULT_CHUNK_PART_SIZE
}

fn default_session_ttl_secs() -> u64 {
    crate::session::DEFAULT_SESSION_TTL.as_secs()
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            chunk_part_size: default_chunk_part_size(),
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.storage {
            StorageConfig::Fs { root, .. } => {
                if root.as_os_str().is_empty() {
                    return Err(ConfigError::ValidationError(
                        "storage.root must not be empty".into(),
                    ));
                }
            }
            StorageConfig::S3 { bucket, .. } => {
                if bucket.is_empty() || bucket.contains("${") {
                    return Err(ConfigError::ValidationError(
                        "storage.bucket must be set (check environment variables)".into(),
                    ));
                }
            }
            StorageConfig::Memory => {}
        }

        if self.limits.max_file_size == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_file_size must be greater than zero".into(),
            ));
        }
        if self.limits.chunk_part_size == 0 {
            return Err(ConfigError::ValidationError(
                "limits.chunk_part_size must be greater than zero".into(),
            ));
        }
        if self.limits.session_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "limits.session_ttl_secs must be greater than zero".into(),
            ));
        }

        if !self.thumbnails.is_empty() {
            validate_thumbnail_sizes(&self.thumbnails)
                .map_err(|err| ConfigError::ValidationError(err.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TSUMIKI_TEST_BUCKET", "media");
        let content = "bucket: ${TSUMIKI_TEST_BUCKET}";
        assert_eq!(expand_env_vars(content), "bucket: media");
        std::env::remove_var("TSUMIKI_TEST_BUCKET");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        std::env::remove_var("TSUMIKI_TEST_MISSING");
        assert_eq!(
            expand_env_vars("region: ${TSUMIKI_TEST_MISSING:-us-east-1}"),
            "region: us-east-1"
        );
        // No default: placeholder stays.
        assert_eq!(
            expand_env_vars("bucket: ${TSUMIKI_TEST_MISSING}"),
            "bucket: ${TSUMIKI_TEST_MISSING}"
        );
    }

    #[test]
    fn test_parse_fs_config() {
        let yaml = r#"
storage:
  kind: fs
  root: /var/lib/uploads
  url_prefix: https://cdn.example.test
limits:
  max_file_size: 1048576
thumbnails:
  - name: small
    width: 64
    height: 64
    fit: cover
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert!(matches!(config.storage, StorageConfig::Fs { .. }));
        assert_eq!(config.limits.max_file_size, 1048576);
        assert_eq!(config.limits.chunk_part_size, 5 * 1024 * 1024);
        assert_eq!(config.thumbnails.len(), 1);
    }

    #[test]
    fn test_parse_s3_config() {
        let yaml = r#"
storage:
  kind: s3
  bucket: media
  region: eu-west-1
  base_path: uploads
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        match config.storage {
            StorageConfig::S3 { bucket, region, .. } => {
                assert_eq!(bucket, "media");
                assert_eq!(region.as_deref(), Some("eu-west-1"));
            }
            other => panic!("unexpected storage config: {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_bucket_placeholder_fails_validation() {
        let yaml = "storage:\n  kind: s3\n  bucket: ${TSUMIKI_TEST_NO_SUCH_VAR}\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_thumbnails_fail_validation() {
        let yaml = r#"
storage:
  kind: memory
thumbnails:
  - name: small
    width: 0
    height: 64
    fit: cover
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "storage:\n  kind: memory\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert!(matches!(config.storage, StorageConfig::Memory));
    }
}
