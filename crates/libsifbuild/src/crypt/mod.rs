//! Partition encryption: key derivation, the LUKS device and the key wrap
//! embedded next to the encrypted partition.

mod device;
mod key;

use std::path::{Path, PathBuf};

pub use device::{
    backing_file_size, CryptDevice, CryptSetup, CryptStage, FilesystemEncryptionError,
    LUKS_HEADER_SIZE,
};
pub use key::{wrap_key, KeyDerivationError, KeySpec, KeyWrapError, PlaintextKey, PEM_MESSAGE_LABEL};

/// Key material for a single assembly. Never persisted.
#[derive(Debug)]
pub struct EncryptionContext {
    spec: KeySpec,
    key: PlaintextKey,
}

impl EncryptionContext {
    pub fn new(spec: &KeySpec) -> Result<Self, KeyDerivationError> {
        let key = PlaintextKey::from_spec(spec)?;
        Ok(Self {
            spec: spec.clone(),
            key,
        })
    }

    pub fn encrypt_partition(
        &self,
        device: &dyn CryptDevice,
        partition: &Path,
    ) -> Result<PathBuf, FilesystemEncryptionError> {
        tracing::debug!(?partition, "encrypting partition");
        device.encrypt_filesystem(partition, &self.key)
    }

    /// Empty wraps are reported as `None`
    pub fn wrap_key(&self) -> Result<Option<Vec<u8>>, KeyWrapError> {
        Ok(wrap_key(&self.spec, &self.key)?.filter(|wrapped| !wrapped.is_empty()))
    }
}
