use libsif::SifError;

use crate::config::ConfigError;
use crate::crypt::{FilesystemEncryptionError, KeyDerivationError, KeyWrapError};
use crate::descriptor::DescriptorError;
use crate::partition::PartitionBuildError;

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("invalid assembler configuration")]
    Config(#[from] ConfigError),
    #[error("failed to generate image identifier")]
    IdentifierGeneration(#[source] rand::Error),
    #[error(transparent)]
    PartitionBuild(#[from] PartitionBuildError),
    #[error("failed to derive encryption key")]
    KeyDerivation(#[from] KeyDerivationError),
    #[error("failed to encrypt partition")]
    FilesystemEncryption(#[from] FilesystemEncryptionError),
    #[error("failed to wrap encryption key")]
    KeyWrap(#[from] KeyWrapError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("failed to create container")]
    ContainerWrite(#[source] SifError),
    #[error("failed to finalize container")]
    ContainerFinalize(#[source] SifError),
}

pub type Result<T> = std::result::Result<T, AssembleError>;
