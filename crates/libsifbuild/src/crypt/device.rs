use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::AssemblerConfig;
use crate::crypt::PlaintextKey;
use crate::utils::{run_command, CommandError};

/// Room reserved for the LUKS2 header and keyslots
pub const LUKS_HEADER_SIZE: u64 = 16 * 1024 * 1024;
const BLOCK_SIZE: u64 = 4096;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CryptStage {
    Format,
    Open,
    Close,
}

impl fmt::Display for CryptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let print = match self {
            Self::Format => "format",
            Self::Open => "open",
            Self::Close => "close",
        };
        write!(f, "{print}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FilesystemEncryptionError {
    #[error("cryptsetup not found in PATH")]
    NotFound(#[source] which::Error),
    #[error("failed to stat filesystem {path:?}")]
    Stat { path: PathBuf, source: io::Error },
    #[error("failed to allocate encrypted backing file in {dir:?}")]
    Allocate { dir: PathBuf, source: io::Error },
    #[error("cryptsetup failed to {stage} {path:?}")]
    Command {
        stage: CryptStage,
        path: PathBuf,
        source: CommandError,
    },
    #[error("failed to copy {path:?} into device mapping {mapping}")]
    Copy {
        path: PathBuf,
        mapping: String,
        source: io::Error,
    },
    #[error("failed to keep encrypted backing file {path:?}")]
    Keep { path: PathBuf, source: io::Error },
}

type Result<T> = std::result::Result<T, FilesystemEncryptionError>;

/// Turns a filesystem image into an encrypted block image
pub trait CryptDevice {
    /// Returns the path of the encrypted image. The caller owns that file.
    fn encrypt_filesystem(&self, fs_path: &Path, key: &PlaintextKey) -> Result<PathBuf>;
}

/// LUKS2 encryption through cryptsetup and the device mapper
#[derive(Clone, Debug, Default)]
pub struct CryptSetup {
    path: Option<PathBuf>,
    dir: Option<PathBuf>,
}

impl CryptSetup {
    pub fn new(config: &AssemblerConfig) -> Self {
        Self {
            path: config.cryptsetup_path.clone(),
            dir: config.crypt_dir.clone(),
        }
    }

    fn binary(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => which::which("cryptsetup").map_err(|err| {
                tracing::error!(?err, "cryptsetup not found");
                FilesystemEncryptionError::NotFound(err)
            }),
        }
    }

    fn run(
        &self,
        binary: &Path,
        stage: CryptStage,
        path: &Path,
        args: &[&std::ffi::OsStr],
        key: Option<&PlaintextKey>,
    ) -> Result<()> {
        let mut cmd = Command::new(binary);
        cmd.args(args);
        run_command(&mut cmd, key.map(|k| k.as_bytes())).map_err(|err| {
            tracing::error!(?path, %stage, ?err, "cryptsetup failed");
            FilesystemEncryptionError::Command {
                stage,
                path: path.to_owned(),
                source: err,
            }
        })?;
        Ok(())
    }
}

pub fn backing_file_size(fs_size: u64) -> u64 {
    (fs_size + LUKS_HEADER_SIZE).div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

fn mapping_name() -> String {
    format!("sifbuild-{}", uuid::Uuid::new_v4().simple())
}

impl CryptDevice for CryptSetup {
    fn encrypt_filesystem(&self, fs_path: &Path, key: &PlaintextKey) -> Result<PathBuf> {
        let binary = self.binary()?;
        let fs_size = fs::metadata(fs_path)
            .map_err(|err| FilesystemEncryptionError::Stat {
                path: fs_path.to_owned(),
                source: err,
            })?
            .len();

        let dir = self.dir.clone().unwrap_or_else(std::env::temp_dir);
        let allocate_err = |err: io::Error| {
            tracing::error!(?dir, ?err, "failed to allocate backing file");
            FilesystemEncryptionError::Allocate {
                dir: dir.clone(),
                source: err,
            }
        };
        let backing = tempfile::Builder::new()
            .prefix("crypt-")
            .tempfile_in(&dir)
            .map_err(allocate_err)?;
        backing
            .as_file()
            .set_len(backing_file_size(fs_size))
            .map_err(allocate_err)?;
        // removed on drop unless kept below
        let backing = backing.into_temp_path();

        self.run(
            &binary,
            CryptStage::Format,
            &backing,
            &[
                "luksFormat".as_ref(),
                "--batch-mode".as_ref(),
                "--type".as_ref(),
                "luks2".as_ref(),
                "--key-file".as_ref(),
                "-".as_ref(),
                backing.as_os_str(),
            ],
            Some(key),
        )?;

        let name = mapping_name();
        self.run(
            &binary,
            CryptStage::Open,
            &backing,
            &[
                "open".as_ref(),
                "--type".as_ref(),
                "luks2".as_ref(),
                "--key-file".as_ref(),
                "-".as_ref(),
                backing.as_os_str(),
                name.as_ref(),
            ],
            Some(key),
        )?;

        let mapping = scopeguard::guard(name, |name| {
            if let Err(err) = self.run(
                &binary,
                CryptStage::Close,
                &backing,
                &["close".as_ref(), name.as_ref()],
                None,
            ) {
                tracing::warn!(?err, %name, "failed to close device mapping");
            }
        });

        let device = Path::new("/dev/mapper").join(&*mapping);
        let copy = || -> io::Result<u64> {
            let mut src = File::open(fs_path)?;
            let mut dst = OpenOptions::new().write(true).open(&device)?;
            let copied = io::copy(&mut src, &mut dst)?;
            dst.sync_all()?;
            Ok(copied)
        };
        let copied = copy().map_err(|err| {
            tracing::error!(?fs_path, ?device, ?err, "failed to copy filesystem");
            FilesystemEncryptionError::Copy {
                path: fs_path.to_owned(),
                mapping: mapping.clone(),
                source: err,
            }
        })?;
        tracing::debug!(copied, ?device, "filesystem copied into encrypted device");

        // close explicitly so a failure is reported instead of only logged
        let name = scopeguard::ScopeGuard::into_inner(mapping);
        self.run(
            &binary,
            CryptStage::Close,
            &backing,
            &["close".as_ref(), name.as_ref()],
            None,
        )?;

        let path = backing.to_path_buf();
        backing
            .keep()
            .map_err(|err| FilesystemEncryptionError::Keep {
                path,
                source: err.error,
            })
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use anyhow::Result;

    use super::*;
    use crate::crypt::KeySpec;

    #[test]
    fn test_backing_file_size() {
        assert_eq!(backing_file_size(0), LUKS_HEADER_SIZE);
        assert_eq!(backing_file_size(1), LUKS_HEADER_SIZE + BLOCK_SIZE);
        assert_eq!(backing_file_size(BLOCK_SIZE), LUKS_HEADER_SIZE + BLOCK_SIZE);
    }

    #[test]
    fn test_mapping_names_are_unique() {
        assert_ne!(mapping_name(), mapping_name());
        assert!(mapping_name().starts_with("sifbuild-"));
    }

    #[test]
    fn test_failed_format_removes_backing_file() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let crypt_dir = tmp.path().join("crypt");
        fs::create_dir(&crypt_dir)?;
        let tool = tmp.path().join("cryptsetup");
        fs::write(&tool, "#!/bin/sh\ncat >/dev/null\necho \"no luks\" >&2\nexit 1\n")?;
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))?;
        let fs_path = tmp.path().join("squashfs");
        fs::write(&fs_path, b"hsqs")?;

        let device = CryptSetup::new(&AssemblerConfig {
            cryptsetup_path: Some(tool),
            crypt_dir: Some(crypt_dir.clone()),
            ..Default::default()
        });
        let key = PlaintextKey::from_spec(&KeySpec::passphrase("secret"))?;

        let result = device.encrypt_filesystem(&fs_path, &key);
        assert!(matches!(
            result,
            Err(FilesystemEncryptionError::Command {
                stage: CryptStage::Format,
                ..
            })
        ));
        assert_eq!(fs::read_dir(&crypt_dir)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_missing_filesystem() -> Result<()> {
        let device = CryptSetup::new(&AssemblerConfig {
            cryptsetup_path: Some("/bin/false".into()),
            ..Default::default()
        });
        let key = PlaintextKey::from_spec(&KeySpec::passphrase("secret"))?;
        let result = device.encrypt_filesystem(Path::new("/nonexistent/squashfs"), &key);
        assert!(matches!(
            result,
            Err(FilesystemEncryptionError::Stat { .. })
        ));
        Ok(())
    }
}
