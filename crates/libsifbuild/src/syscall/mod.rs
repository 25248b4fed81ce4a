//! Contains a wrapper of syscalls for unit tests
//! This provides a uniform interface for the rest of sifbuild
//! to call the privileged operations the assembler needs

pub mod linux;
#[allow(clippy::module_inception)]
pub mod syscall;
pub mod test;

pub use syscall::Syscall;

#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    #[error("chown failed")]
    ChownFailed {
        path: std::path::PathBuf,
        owner: Option<nix::unistd::Uid>,
        group: Option<nix::unistd::Gid>,
        errno: nix::errno::Errno,
    },
}

type Result<T> = std::result::Result<T, SyscallError>;
