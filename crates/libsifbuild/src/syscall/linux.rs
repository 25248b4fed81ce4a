//! Implements Syscall trait for Linux systems
use std::any::Any;
use std::path::Path;

use nix::unistd::{self, Gid, Uid};

use super::{Result, Syscall, SyscallError};

/// Empty structure to implement Syscall trait for
#[derive(Clone)]
pub struct LinuxSyscall;

impl Syscall for LinuxSyscall {
    /// To enable dynamic typing,
    /// see <https://doc.rust-lang.org/std/any/index.html> for more information
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_superuser(&self) -> bool {
        unistd::geteuid().is_root()
    }

    fn chown(&self, path: &Path, owner: Option<Uid>, group: Option<Gid>) -> Result<()> {
        unistd::chown(path, owner, group).map_err(|errno| {
            tracing::error!(?path, ?owner, ?group, ?errno, "failed to chown");
            SyscallError::ChownFailed {
                path: path.to_path_buf(),
                owner,
                group,
                errno,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use anyhow::Result;
    use nix::unistd::{getegid, geteuid};

    use super::*;

    #[test]
    fn test_chown_to_self() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("image.sif");
        std::fs::write(&path, "")?;

        // changing ownership to the current owner needs no privilege
        LinuxSyscall.chown(&path, Some(geteuid()), Some(getegid()))?;
        let meta = path.metadata()?;
        assert_eq!(meta.uid(), geteuid().as_raw());
        assert_eq!(meta.gid(), getegid().as_raw());
        Ok(())
    }

    #[test]
    fn test_chown_missing_file() {
        let result = LinuxSyscall.chown(
            Path::new("/nonexistent/image.sif"),
            Some(geteuid()),
            None,
        );
        assert!(matches!(
            result,
            Err(SyscallError::ChownFailed {
                errno: nix::errno::Errno::ENOENT,
                ..
            })
        ));
    }

    #[test]
    fn test_is_superuser() {
        assert_eq!(LinuxSyscall.is_superuser(), geteuid().is_root());
    }
}
