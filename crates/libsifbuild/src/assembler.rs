use std::path::Path;

use chrono::Utc;
use libsif::{CreateInfo, SifWriter};
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use tempfile::TempPath;
use uuid::Uuid;

use crate::arch::resolve_arch;
use crate::bundle::BuildBundle;
use crate::config::AssemblerConfig;
use crate::crypt::{CryptDevice, CryptSetup, EncryptionContext};
use crate::descriptor::assemble_descriptors;
use crate::error::{AssembleError, Result};
use crate::ownership::finalize_ownership;
use crate::partition::{build_partition, create_partition_file, Mksquashfs, Packer, SquashfsFlags};
use crate::syscall::syscall::SyscallType;

/// Turns a build bundle into a SIF image
pub struct SifAssembler {
    config: AssemblerConfig,
    packer: Box<dyn Packer>,
    crypt_device: Box<dyn CryptDevice>,
    syscall: SyscallType,
    ownership: Regex,
}

impl SifAssembler {
    pub fn new(config: AssemblerConfig) -> Result<Self> {
        let ownership = config.ownership_regex()?;
        Ok(Self {
            packer: Box::new(Mksquashfs::new(&config)),
            crypt_device: Box::new(CryptSetup::new(&config)),
            syscall: SyscallType::default(),
            ownership,
            config,
        })
    }

    pub fn with_packer(mut self, packer: Box<dyn Packer>) -> Self {
        self.packer = packer;
        self
    }

    pub fn with_crypt_device(mut self, crypt_device: Box<dyn CryptDevice>) -> Self {
        self.crypt_device = crypt_device;
        self
    }

    pub fn with_syscall(mut self, syscall: SyscallType) -> Self {
        self.syscall = syscall;
        self
    }

    /// Builds the image at `dest`, replacing whatever is there. Scratch files
    /// are removed on every path and nothing is left at `dest` on failure.
    #[tracing::instrument(level = "debug", skip(self, bundle), fields(rootfs = ?bundle.rootfs))]
    pub fn assemble(&self, bundle: &BuildBundle, dest: &Path) -> Result<()> {
        let syscall = self.syscall.create_syscall();
        let flags = SquashfsFlags::from_config(&self.config, syscall.is_superuser());
        let partition = create_partition_file(bundle.tmp_dir())?;

        let (resolved, packed) = std::thread::scope(|s| {
            let arch = s.spawn(|| resolve_arch(bundle.rootfs()));
            let packed = build_partition(self.packer.as_ref(), &[bundle.rootfs()], &partition, &flags);
            (arch.join(), packed)
        });
        packed?;
        let resolved = resolved.unwrap_or_else(|panic| std::panic::resume_unwind(panic));
        tracing::debug!(arch = %resolved.arch, source = ?resolved.source, "resolved image architecture");

        let mut context = None;
        let mut encrypted_partition: Option<TempPath> = None;
        let mut wrapped_key = None;
        if let Some(spec) = &bundle.opts.encryption {
            let ctx = EncryptionContext::new(spec)?;
            let path = ctx.encrypt_partition(self.crypt_device.as_ref(), &partition)?;
            // removed when this call returns, whatever the outcome
            encrypted_partition = Some(TempPath::from_path(path));
            wrapped_key = ctx.wrap_key()?;
            if wrapped_key.is_none() {
                tracing::warn!(
                    "partition is encrypted but no key is embedded, the image can only be opened with the original key"
                );
            }
            context = Some(ctx);
        }

        let partition_path: &Path = encrypted_partition.as_deref().unwrap_or(&*partition);
        let descriptors = assemble_descriptors(
            bundle,
            partition_path,
            resolved.arch,
            wrapped_key,
            bundle.is_encrypted(),
        )?;

        let id = generate_id()?;
        let mut info = CreateInfo::new(dest, id, Utc::now().timestamp());
        for descriptor in descriptors {
            info.push(descriptor.into_input());
        }

        let mut writer = SifWriter::create(info).map_err(|err| {
            tracing::error!(?dest, ?err, "failed to create container");
            AssembleError::ContainerWrite(err)
        })?;
        writer.finalize().map_err(|err| {
            tracing::error!(?dest, ?err, "failed to finalize container");
            AssembleError::ContainerFinalize(err)
        })?;
        drop(context);
        tracing::info!(?dest, %id, "created image");

        finalize_ownership(dest, syscall.as_ref(), &self.ownership);
        Ok(())
    }
}

fn generate_id() -> Result<Uuid> {
    let mut bytes = [0u8; 16];
    OsRng.try_fill_bytes(&mut bytes).map_err(|err| {
        tracing::error!(?err, "failed to read random bytes");
        AssembleError::IdentifierGeneration(err)
    })?;
    Ok(uuid::Builder::from_random_bytes(bytes).into_uuid())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::{Context, Result};
    use libsif::{Arch, DataType, Extra, FsType, SifImage};

    use super::*;
    use crate::crypt::KeySpec;
    use crate::test_utils::{FakeCryptDevice, FakePacker};

    fn assembler(tmp: &Path) -> Result<SifAssembler> {
        Ok(SifAssembler::new(AssemblerConfig::default())?
            .with_packer(Box::new(FakePacker::default()))
            .with_crypt_device(Box::new(FakeCryptDevice::new(tmp)))
            .with_syscall(SyscallType::Test))
    }

    #[test]
    fn test_generate_id_is_v4() -> Result<()> {
        let id = generate_id()?;
        assert_eq!(id.get_version_num(), 4);
        assert_ne!(id, generate_id()?);
        Ok(())
    }

    #[test]
    fn test_assemble_plain() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let scratch = tmp.path().join("scratch");
        fs::create_dir(&scratch)?;
        let bundle = BuildBundle::new(tmp.path().join("rootfs"), &scratch)
            .with_recipe("Bootstrap: scratch\n")
            .with_json_object("labels", "{}");
        let dest = tmp.path().join("image.sif");

        assembler(tmp.path())?.assemble(&bundle, &dest)?;

        let image = SifImage::open(&dest)?;
        let types: Vec<DataType> = image.descriptors().iter().map(|d| d.data_type).collect();
        assert_eq!(
            types,
            vec![DataType::Deffile, DataType::GenericJson, DataType::Partition]
        );
        let partition = image.primary_partition().context("no partition")?;
        assert!(matches!(
            partition.extra,
            Extra::Partition {
                fs_type: FsType::Squash,
                ..
            }
        ));
        assert_eq!(image.header().arch, Arch::host());
        assert_eq!(fs::read_dir(&scratch)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_assemble_passphrase_has_no_key_blob() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let bundle = BuildBundle::new(tmp.path().join("rootfs"), tmp.path())
            .with_encryption(KeySpec::passphrase("secret"));
        let dest = tmp.path().join("image.sif");

        assembler(tmp.path())?.assemble(&bundle, &dest)?;

        let image = SifImage::open(&dest)?;
        assert_eq!(image.descriptors().len(), 2);
        let partition = image.primary_partition().context("no partition")?;
        assert!(matches!(
            partition.extra,
            Extra::Partition {
                fs_type: FsType::EncryptedSquashfs,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn test_assemble_packer_failure_leaves_nothing() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let scratch = tmp.path().join("scratch");
        fs::create_dir(&scratch)?;
        let bundle = BuildBundle::new(tmp.path().join("rootfs"), &scratch);
        let dest = tmp.path().join("image.sif");

        let result = SifAssembler::new(AssemblerConfig::default())?
            .with_packer(Box::new(FakePacker::failing("disk full")))
            .assemble(&bundle, &dest);

        assert!(matches!(result, Err(AssembleError::PartitionBuild(_))));
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(&scratch)?.count(), 0);
        Ok(())
    }
}
