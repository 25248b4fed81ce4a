//! Descriptor inputs and the tags stored alongside each data object
use std::fmt::Display;
use std::fs::File;

use crate::error::SifError;

/// Group shared by every object of a single-partition image.
pub const DEFAULT_GROUP: u32 = GROUP_MASK | 1;
pub(crate) const GROUP_MASK: u32 = 0xf000_0000;

/// Kind of data object a descriptor points at
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DataType {
    Deffile = 0x4001,
    EnvVar = 0x4002,
    Labels = 0x4003,
    Partition = 0x4004,
    Signature = 0x4005,
    GenericJson = 0x4006,
    Generic = 0x4007,
    CryptoMessage = 0x4008,
}

impl TryFrom<i32> for DataType {
    type Error = SifError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let data_type = match value {
            0x4001 => Self::Deffile,
            0x4002 => Self::EnvVar,
            0x4003 => Self::Labels,
            0x4004 => Self::Partition,
            0x4005 => Self::Signature,
            0x4006 => Self::GenericJson,
            0x4007 => Self::Generic,
            0x4008 => Self::CryptoMessage,
            other => return Err(SifError::UnknownDataType(other)),
        };
        Ok(data_type)
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match *self {
            Self::Deffile => "Def.FILE",
            Self::EnvVar => "Env.Vars",
            Self::Labels => "JSON.Labels",
            Self::Partition => "FS",
            Self::Signature => "Signature",
            Self::GenericJson => "JSON.Generic",
            Self::Generic => "Generic/Raw",
            Self::CryptoMessage => "Cryptographic Message",
        };

        write!(f, "{print}")
    }
}

/// Filesystem stored in a partition object
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum FsType {
    Squash = 1,
    Ext3 = 2,
    ImmuObj = 3,
    Raw = 4,
    EncryptedSquashfs = 5,
}

impl FsType {
    fn from_raw(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Squash),
            2 => Some(Self::Ext3),
            3 => Some(Self::ImmuObj),
            4 => Some(Self::Raw),
            5 => Some(Self::EncryptedSquashfs),
            _ => None,
        }
    }
}

impl Display for FsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match *self {
            Self::Squash => "Squashfs",
            Self::Ext3 => "Ext3",
            Self::ImmuObj => "Data.Archive",
            Self::Raw => "Raw.Data",
            Self::EncryptedSquashfs => "Encrypted squashfs",
        };

        write!(f, "{print}")
    }
}

/// Role of a partition inside the image
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PartType {
    System = 1,
    PrimSys = 2,
    Data = 3,
    Overlay = 4,
}

impl PartType {
    fn from_raw(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::System),
            2 => Some(Self::PrimSys),
            3 => Some(Self::Data),
            4 => Some(Self::Overlay),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CryptoFormat {
    OpenPgp = 1,
    Pem = 2,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CryptoMessage {
    ClearSignature = 0x100,
    RsaOaep = 0x200,
}

/// CPU architecture tag. The canonical names follow the Go toolchain
/// spelling used by SIF consumers (`amd64`, `arm64`, ...).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Arch {
    #[default]
    Unknown,
    X86,
    Amd64,
    Arm,
    Arm64,
    Ppc64,
    Ppc64le,
    Mips,
    Mipsle,
    Mips64,
    Mips64le,
    S390x,
    Riscv64,
}

const ARCHES: [(Arch, &str, &[u8; 2]); 13] = [
    (Arch::Unknown, "unknown", b"00"),
    (Arch::X86, "386", b"01"),
    (Arch::Amd64, "amd64", b"02"),
    (Arch::Arm, "arm", b"03"),
    (Arch::Arm64, "arm64", b"04"),
    (Arch::Ppc64, "ppc64", b"05"),
    (Arch::Ppc64le, "ppc64le", b"06"),
    (Arch::Mips, "mips", b"07"),
    (Arch::Mipsle, "mipsle", b"08"),
    (Arch::Mips64, "mips64", b"09"),
    (Arch::Mips64le, "mips64le", b"10"),
    (Arch::S390x, "s390x", b"11"),
    (Arch::Riscv64, "riscv64", b"12"),
];

impl Arch {
    /// Two digit code stored in the header and in partition descriptors.
    pub fn code(&self) -> &'static [u8; 2] {
        ARCHES
            .iter()
            .find(|(arch, _, _)| arch == self)
            .map(|(_, _, code)| *code)
            .unwrap_or(b"00")
    }

    pub fn from_code(code: &[u8]) -> Self {
        ARCHES
            .iter()
            .find(|(_, _, c)| code.starts_with(&c[..]))
            .map(|(arch, _, _)| *arch)
            .unwrap_or_default()
    }

    pub fn name(&self) -> &'static str {
        ARCHES
            .iter()
            .find(|(arch, _, _)| arch == self)
            .map(|(_, name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Architecture of the machine running this process
    pub fn host() -> Self {
        let little = cfg!(target_endian = "little");
        match std::env::consts::ARCH {
            "x86" => Self::X86,
            "x86_64" => Self::Amd64,
            "arm" => Self::Arm,
            "aarch64" => Self::Arm64,
            "powerpc64" if little => Self::Ppc64le,
            "powerpc64" => Self::Ppc64,
            "mips" if little => Self::Mipsle,
            "mips" => Self::Mips,
            "mips64" if little => Self::Mips64le,
            "mips64" => Self::Mips64,
            "s390x" => Self::S390x,
            "riscv64" => Self::Riscv64,
            _ => Self::Unknown,
        }
    }
}

impl Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Reference from one descriptor to another by descriptor id
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Link {
    #[default]
    Unused,
    Descriptor(u32),
}

impl Link {
    pub(crate) fn raw(&self) -> u32 {
        match *self {
            Link::Unused => 0,
            Link::Descriptor(id) => id,
        }
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Link::Unused,
            id => Link::Descriptor(id),
        }
    }
}

/// Type specific attributes stored in the descriptor's extra area
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Extra {
    #[default]
    None,
    Partition {
        fs_type: FsType,
        part_type: PartType,
        arch: Arch,
    },
    CryptoMessage {
        format: CryptoFormat,
        message: CryptoMessage,
    },
}

impl Extra {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match *self {
            Extra::None => {}
            Extra::Partition {
                fs_type,
                part_type,
                arch,
            } => {
                buf.extend_from_slice(&(fs_type as i32).to_le_bytes());
                buf.extend_from_slice(&(part_type as i32).to_le_bytes());
                buf.extend_from_slice(arch.code());
                buf.push(0);
            }
            Extra::CryptoMessage { format, message } => {
                buf.extend_from_slice(&(format as i32).to_le_bytes());
                buf.extend_from_slice(&(message as i32).to_le_bytes());
            }
        }
        buf
    }

    pub(crate) fn decode(data_type: DataType, extra: &[u8]) -> Self {
        let field = |offset: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&extra[offset..offset + 4]);
            i32::from_le_bytes(raw)
        };

        match data_type {
            DataType::Partition if extra.len() >= 10 => {
                match (FsType::from_raw(field(0)), PartType::from_raw(field(4))) {
                    (Some(fs_type), Some(part_type)) => Extra::Partition {
                        fs_type,
                        part_type,
                        arch: Arch::from_code(&extra[8..10]),
                    },
                    _ => Extra::None,
                }
            }
            DataType::CryptoMessage if extra.len() >= 8 => {
                let format = match field(0) {
                    1 => CryptoFormat::OpenPgp,
                    2 => CryptoFormat::Pem,
                    _ => return Extra::None,
                };
                let message = match field(4) {
                    0x100 => CryptoMessage::ClearSignature,
                    0x200 => CryptoMessage::RsaOaep,
                    _ => return Extra::None,
                };
                Extra::CryptoMessage { format, message }
            }
            _ => Extra::None,
        }
    }
}

/// Source of the bytes for one data object
#[derive(Debug)]
pub enum DescriptorData {
    Bytes(Vec<u8>),
    /// Copied from the current position of an open file
    File(File),
}

/// Everything the writer needs to lay out one data object
#[derive(Debug)]
pub struct DescriptorInput {
    pub data_type: DataType,
    pub group_id: u32,
    pub link: Link,
    pub name: String,
    pub size: u64,
    pub data: DescriptorData,
    pub extra: Extra,
}

impl DescriptorInput {
    pub fn from_bytes(data_type: DataType, data: Vec<u8>) -> Self {
        Self {
            data_type,
            group_id: DEFAULT_GROUP,
            link: Link::Unused,
            name: String::new(),
            size: data.len() as u64,
            data: DescriptorData::Bytes(data),
            extra: Extra::None,
        }
    }

    pub fn from_file(data_type: DataType, file: File, size: u64) -> Self {
        Self {
            data_type,
            group_id: DEFAULT_GROUP,
            link: Link::Unused,
            name: String::new(),
            size,
            data: DescriptorData::File(file),
            extra: Extra::None,
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.link = link;
        self
    }

    pub fn with_partition_extra(mut self, fs_type: FsType, part_type: PartType, arch: Arch) -> Self {
        self.extra = Extra::Partition {
            fs_type,
            part_type,
            arch,
        };
        self
    }

    pub fn with_crypto_message_extra(mut self, format: CryptoFormat, message: CryptoMessage) -> Self {
        self.extra = Extra::CryptoMessage { format, message };
        self
    }
}
