//! Detects the CPU architecture a root filesystem was built for by looking
//! at the ELF headers of binaries every distribution ships.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use libsif::Arch;

/// Binaries probed in order, relative to the rootfs
pub const PROBE_PATHS: [&str; 6] = [
    "bin/sh",
    "bin/bash",
    "bin/busybox",
    "usr/bin/env",
    "bin/ls",
    "usr/bin/ls",
];

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const ELF_IDENT_LEN: usize = 20;
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

pub const EM_386: u16 = 3;
pub const EM_MIPS: u16 = 8;
pub const EM_PPC64: u16 = 21;
pub const EM_S390: u16 = 22;
pub const EM_ARM: u16 = 40;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;
pub const EM_RISCV: u16 = 243;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArchSource {
    /// Read from the binary at this index of the probe list
    Detected(usize),
    HostFallback,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResolvedArch {
    pub arch: Arch,
    pub source: ArchSource,
}

/// Returns the architecture of the first recognized probe binary, or the
/// build host's architecture when none is recognized.
pub fn resolve_arch(rootfs: &Path) -> ResolvedArch {
    for (index, probe) in PROBE_PATHS.iter().enumerate() {
        // symlinks are followed as a chroot would, never leaving the rootfs
        let path = match safe_path::scoped_join(rootfs, probe) {
            Ok(path) => path,
            Err(err) => {
                tracing::debug!(?rootfs, probe, ?err, "failed to resolve probe path");
                continue;
            }
        };
        if let Some(arch) = read_elf_arch(&path) {
            tracing::debug!(?path, %arch, "detected image architecture");
            return ResolvedArch {
                arch,
                source: ArchSource::Detected(index),
            };
        }
    }

    let arch = Arch::host();
    tracing::info!(?rootfs, %arch, "architecture not recognized, using native");
    ResolvedArch {
        arch,
        source: ArchSource::HostFallback,
    }
}

fn read_elf_arch(path: &Path) -> Option<Arch> {
    let mut ident = [0u8; ELF_IDENT_LEN];
    let mut file = File::open(path).ok()?;
    file.read_exact(&mut ident).ok()?;
    elf_arch(&ident)
}

/// Maps the ELF identification and `e_machine` to an architecture tag
pub fn elf_arch(ident: &[u8; ELF_IDENT_LEN]) -> Option<Arch> {
    if &ident[..4] != ELF_MAGIC {
        return None;
    }
    let class = ident[4];
    let data = ident[5];
    let machine = match data {
        ELFDATA2LSB => u16::from_le_bytes([ident[18], ident[19]]),
        ELFDATA2MSB => u16::from_be_bytes([ident[18], ident[19]]),
        _ => return None,
    };
    let little = data == ELFDATA2LSB;

    let arch = match (machine, class) {
        (EM_386, ELFCLASS32) => Arch::X86,
        (EM_X86_64, ELFCLASS64) => Arch::Amd64,
        (EM_ARM, ELFCLASS32) => Arch::Arm,
        (EM_AARCH64, ELFCLASS64) => Arch::Arm64,
        (EM_PPC64, ELFCLASS64) if little => Arch::Ppc64le,
        (EM_PPC64, ELFCLASS64) => Arch::Ppc64,
        (EM_MIPS, ELFCLASS32) if little => Arch::Mipsle,
        (EM_MIPS, ELFCLASS32) => Arch::Mips,
        (EM_MIPS, ELFCLASS64) if little => Arch::Mips64le,
        (EM_MIPS, ELFCLASS64) => Arch::Mips64,
        (EM_S390, ELFCLASS64) => Arch::S390x,
        (EM_RISCV, ELFCLASS64) => Arch::Riscv64,
        _ => return None,
    };
    Some(arch)
}
