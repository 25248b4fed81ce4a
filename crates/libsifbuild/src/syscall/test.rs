use std::any::Any;
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid};

use super::{Result, Syscall, SyscallError};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChownArgs {
    pub path: PathBuf,
    pub owner: Option<Uid>,
    pub group: Option<Gid>,
}

/// Records calls instead of performing them
#[derive(Default)]
pub struct TestHelperSyscall {
    superuser: Cell<bool>,
    chown_args: RefCell<Vec<ChownArgs>>,
    chown_err: Cell<Option<nix::errno::Errno>>,
}

impl Syscall for TestHelperSyscall {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_superuser(&self) -> bool {
        self.superuser.get()
    }

    fn chown(&self, path: &Path, owner: Option<Uid>, group: Option<Gid>) -> Result<()> {
        if let Some(errno) = self.chown_err.get() {
            return Err(SyscallError::ChownFailed {
                path: path.to_path_buf(),
                owner,
                group,
                errno,
            });
        }

        self.chown_args.borrow_mut().push(ChownArgs {
            path: path.to_path_buf(),
            owner,
            group,
        });
        Ok(())
    }
}

impl TestHelperSyscall {
    pub fn set_superuser(&self, superuser: bool) {
        self.superuser.set(superuser);
    }

    /// Makes every following chown fail with the given errno
    pub fn set_chown_error(&self, errno: nix::errno::Errno) {
        self.chown_err.set(Some(errno));
    }

    pub fn get_chown_args(&self) -> Vec<ChownArgs> {
        self.chown_args.borrow().clone()
    }
}
