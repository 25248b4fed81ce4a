use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches the `SUDO_COMMAND` of an invocation whose output should be handed
/// back to the invoking user.
pub const DEFAULT_OWNERSHIP_PATTERN: &str = "sifbuild";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to open config {path:?}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create config {path:?}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize config {path:?}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid ownership pattern {pattern:?}")]
    OwnershipPattern {
        pattern: String,
        source: regex::Error,
    },
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Tunables of the external tools the assembler drives
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Explicit mksquashfs binary. Looked up in PATH when unset.
    pub mksquashfs_path: Option<PathBuf>,
    pub mksquashfs_procs: Option<u32>,
    /// Memory limit in mksquashfs syntax, e.g. `512M`
    pub mksquashfs_mem: Option<String>,
    pub gzip: bool,
    pub cryptsetup_path: Option<PathBuf>,
    /// Where the encrypted backing file is staged. System temp dir when unset.
    pub crypt_dir: Option<PathBuf>,
    pub ownership_pattern: String,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            mksquashfs_path: None,
            mksquashfs_procs: None,
            mksquashfs_mem: None,
            gzip: false,
            cryptsetup_path: None,
            crypt_dir: None,
            ownership_pattern: DEFAULT_OWNERSHIP_PATTERN.to_owned(),
        }
    }
}

impl AssemblerConfig {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = fs::File::create(path).map_err(|err| {
            tracing::error!(?path, ?err, "failed to create config");
            ConfigError::Create {
                path: path.to_owned(),
                source: err,
            }
        })?;
        serde_json::to_writer_pretty(&file, self).map_err(|err| ConfigError::Serialize {
            path: path.to_owned(),
            source: err,
        })?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|err| {
            tracing::error!(?path, ?err, "failed to open config");
            ConfigError::Open {
                path: path.to_owned(),
                source: err,
            }
        })?;
        serde_json::from_reader(&file).map_err(|err| {
            tracing::error!(?path, ?err, "failed to parse config");
            ConfigError::Parse {
                path: path.to_owned(),
                source: err,
            }
        })
    }

    pub fn ownership_regex(&self) -> Result<Regex> {
        Regex::new(&self.ownership_pattern).map_err(|err| {
            tracing::error!(pattern = %self.ownership_pattern, ?err, "invalid ownership pattern");
            ConfigError::OwnershipPattern {
                pattern: self.ownership_pattern.clone(),
                source: err,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn test_config_save_and_load() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("sifbuild.json");
        let config = AssemblerConfig {
            mksquashfs_procs: Some(4),
            mksquashfs_mem: Some("1G".to_owned()),
            gzip: true,
            ..Default::default()
        };
        config.save(&path)?;
        assert_eq!(AssemblerConfig::load(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_config_partial_file_uses_defaults() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("sifbuild.json");
        fs::write(&path, r#"{"gzip": true}"#)?;
        let config = AssemblerConfig::load(&path)?;
        assert!(config.gzip);
        assert_eq!(config.ownership_pattern, DEFAULT_OWNERSHIP_PATTERN);
        assert!(config.mksquashfs_path.is_none());
        Ok(())
    }

    #[test]
    fn test_config_load_errors() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let missing = tmp.path().join("missing.json");
        assert!(matches!(
            AssemblerConfig::load(&missing),
            Err(ConfigError::Open { .. })
        ));

        let broken = tmp.path().join("broken.json");
        fs::write(&broken, "{")?;
        assert!(matches!(
            AssemblerConfig::load(&broken),
            Err(ConfigError::Parse { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_ownership_regex() {
        let config = AssemblerConfig {
            ownership_pattern: "(".to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            config.ownership_regex(),
            Err(ConfigError::OwnershipPattern { .. })
        ));
        assert!(AssemblerConfig::default()
            .ownership_regex()
            .map(|re| re.is_match("/usr/bin/sifbuild build"))
            .unwrap_or(false));
    }
}
