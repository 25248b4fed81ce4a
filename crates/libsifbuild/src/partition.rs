use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempPath;

use crate::config::AssemblerConfig;
use crate::utils::{run_command, CommandError};

#[derive(Debug, thiserror::Error)]
pub enum PackerError {
    #[error("mksquashfs not found in PATH")]
    NotFound(#[source] which::Error),
    #[error("mksquashfs exited with code {code:?}: {output}")]
    NonZeroExit { code: Option<i32>, output: String },
    #[error(transparent)]
    Command(CommandError),
}

#[derive(Debug, thiserror::Error)]
pub enum PartitionBuildError {
    #[error("failed to create partition file in {dir:?}")]
    CreateDestination {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("no source directory to pack")]
    NoSources,
    #[error("failed to create squashfs partition {dest:?}")]
    Pack { dest: PathBuf, source: PackerError },
}

type Result<T> = std::result::Result<T, PartitionBuildError>;

/// Options passed to mksquashfs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SquashfsFlags {
    /// Make every file owned by root, needed when an unprivileged user packs
    /// a tree it owns
    pub all_root: bool,
    pub gzip: bool,
    pub mem: Option<String>,
    pub processors: Option<u32>,
}

impl SquashfsFlags {
    pub fn from_config(config: &AssemblerConfig, is_superuser: bool) -> Self {
        Self {
            all_root: !is_superuser,
            gzip: config.gzip,
            mem: config.mksquashfs_mem.clone(),
            processors: config.mksquashfs_procs,
        }
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-noappend".to_owned()];
        if self.all_root {
            args.push("-all-root".to_owned());
        }
        if self.gzip {
            args.extend(["-comp".to_owned(), "gzip".to_owned()]);
        }
        if let Some(mem) = &self.mem {
            args.extend(["-mem".to_owned(), mem.clone()]);
        }
        if let Some(procs) = self.processors.filter(|p| *p > 0) {
            args.extend(["-processors".to_owned(), procs.to_string()]);
        }
        args
    }
}

/// Packs directories into a compressed filesystem image
pub trait Packer {
    fn pack(
        &self,
        sources: &[&Path],
        dest: &Path,
        flags: &SquashfsFlags,
    ) -> std::result::Result<(), PackerError>;
}

/// Packer backed by the mksquashfs tool
#[derive(Clone, Debug, Default)]
pub struct Mksquashfs {
    path: Option<PathBuf>,
}

impl Mksquashfs {
    pub fn new(config: &AssemblerConfig) -> Self {
        Self {
            path: config.mksquashfs_path.clone(),
        }
    }

    fn binary(&self) -> std::result::Result<PathBuf, PackerError> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => which::which("mksquashfs").map_err(|err| {
                tracing::error!(?err, "mksquashfs not found");
                PackerError::NotFound(err)
            }),
        }
    }
}

impl Packer for Mksquashfs {
    fn pack(
        &self,
        sources: &[&Path],
        dest: &Path,
        flags: &SquashfsFlags,
    ) -> std::result::Result<(), PackerError> {
        let mut cmd = Command::new(self.binary()?);
        cmd.args(sources).arg(dest).args(flags.to_args());

        let output = run_command(&mut cmd, None).map_err(|err| match err {
            CommandError::NonZeroExit { code, output, .. } => {
                PackerError::NonZeroExit { code, output }
            }
            err => PackerError::Command(err),
        })?;
        tracing::debug!(
            stdout = %String::from_utf8_lossy(&output.stdout),
            "mksquashfs finished"
        );
        Ok(())
    }
}

/// Reserves a uniquely named partition file in the scratch directory. The
/// file is removed when the returned guard drops.
pub fn create_partition_file(scratch: &Path) -> Result<TempPath> {
    tempfile::Builder::new()
        .prefix("squashfs-")
        .tempfile_in(scratch)
        .map(|file| file.into_temp_path())
        .map_err(|err| {
            tracing::error!(?scratch, ?err, "failed to create partition file");
            PartitionBuildError::CreateDestination {
                dir: scratch.to_owned(),
                source: err,
            }
        })
}

pub fn build_partition(
    packer: &dyn Packer,
    sources: &[&Path],
    dest: &Path,
    flags: &SquashfsFlags,
) -> Result<()> {
    if sources.is_empty() {
        return Err(PartitionBuildError::NoSources);
    }

    tracing::debug!(?sources, ?dest, ?flags, "creating squashfs partition");
    packer.pack(sources, dest, flags).map_err(|err| {
        tracing::error!(?dest, ?err, "failed to create squashfs partition");
        PartitionBuildError::Pack {
            dest: dest.to_owned(),
            source: err,
        }
    })
}
