//! Fakes for the external tools, shared by unit and integration tests
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::crypt::{CryptDevice, FilesystemEncryptionError, PlaintextKey};
use crate::partition::{Packer, PackerError, SquashfsFlags};

/// Bytes every fake partition starts with
pub const FAKE_SQUASHFS: &[u8] = b"hsqs fake squashfs image";
pub const FAKE_LUKS_MAGIC: &[u8] = b"LUKS\xba\xbe";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackerCall {
    pub sources: Vec<PathBuf>,
    pub dest: PathBuf,
    pub flags: SquashfsFlags,
}

/// Records its invocations and writes a small fixed partition
#[derive(Debug, Default)]
pub struct FakePacker {
    calls: Mutex<Vec<PackerCall>>,
    failure: Option<String>,
}

impl FakePacker {
    pub fn failing(output: &str) -> Self {
        Self {
            calls: Mutex::default(),
            failure: Some(output.to_owned()),
        }
    }

    pub fn calls(&self) -> Vec<PackerCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Packer for FakePacker {
    fn pack(&self, sources: &[&Path], dest: &Path, flags: &SquashfsFlags) -> Result<(), PackerError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(PackerCall {
                sources: sources.iter().map(|p| p.to_path_buf()).collect(),
                dest: dest.to_owned(),
                flags: flags.clone(),
            });
        }

        if let Some(output) = &self.failure {
            return Err(PackerError::NonZeroExit {
                code: Some(1),
                output: output.clone(),
            });
        }

        fs::write(dest, FAKE_SQUASHFS).map_err(|err| {
            PackerError::Command(crate::utils::CommandError::Wait {
                program: "fake-mksquashfs".to_owned(),
                source: err,
            })
        })
    }
}

/// Writes a LUKS-looking copy of the filesystem into `dir`
#[derive(Debug)]
pub struct FakeCryptDevice {
    dir: PathBuf,
    keys: Mutex<Vec<Vec<u8>>>,
    fail: bool,
}

impl FakeCryptDevice {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            keys: Mutex::default(),
            fail: false,
        }
    }

    pub fn failing<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            fail: true,
            ..Self::new(dir)
        }
    }

    /// Keys seen so far, in call order
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.keys.lock().map(|k| k.clone()).unwrap_or_default()
    }
}

impl CryptDevice for FakeCryptDevice {
    fn encrypt_filesystem(
        &self,
        fs_path: &Path,
        key: &PlaintextKey,
    ) -> Result<PathBuf, FilesystemEncryptionError> {
        if let Ok(mut keys) = self.keys.lock() {
            keys.push(key.as_bytes().to_vec());
        }

        let allocate_err = |err| FilesystemEncryptionError::Allocate {
            dir: self.dir.clone(),
            source: err,
        };
        if self.fail {
            return Err(allocate_err(std::io::Error::other("fake device failure")));
        }

        let data = fs::read(fs_path).map_err(|err| FilesystemEncryptionError::Stat {
            path: fs_path.to_owned(),
            source: err,
        })?;
        let mut file = tempfile::Builder::new()
            .prefix("crypt-")
            .tempfile_in(&self.dir)
            .map_err(allocate_err)?;
        file.write_all(FAKE_LUKS_MAGIC).map_err(allocate_err)?;
        file.write_all(&data).map_err(allocate_err)?;
        file.into_temp_path()
            .keep()
            .map_err(|err| allocate_err(err.error))
    }
}

/// First 20 bytes of an ELF file: identification plus `e_machine`
pub fn elf_header(class: u8, data: u8, machine: u16) -> [u8; 20] {
    let mut header = [0u8; 20];
    header[..4].copy_from_slice(b"\x7fELF");
    header[4] = class;
    header[5] = data;
    header[6] = 1;
    let machine = if data == 2 {
        machine.to_be_bytes()
    } else {
        machine.to_le_bytes()
    };
    header[18..20].copy_from_slice(&machine);
    header
}

/// Writes a fake executable at `rel` inside `rootfs`
pub fn write_elf(
    rootfs: &Path,
    rel: &str,
    class: u8,
    data: u8,
    machine: u16,
) -> std::io::Result<PathBuf> {
    let path = rootfs.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut contents = elf_header(class, data, machine).to_vec();
    contents.resize(64, 0);
    fs::write(&path, contents)?;
    Ok(path)
}
