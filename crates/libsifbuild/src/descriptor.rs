use std::fs::File;
use std::path::{Path, PathBuf};

use libsif::{
    Arch, CryptoFormat, CryptoMessage, DataType, DescriptorInput, FsType, Link, PartType,
};

use crate::bundle::BuildBundle;

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("failed to open partition {path:?}")]
    PartitionOpen {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to stat partition {path:?}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
}

type Result<T> = std::result::Result<T, DescriptorError>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PartitionFsType {
    Plain,
    Encrypted,
}

impl From<PartitionFsType> for FsType {
    fn from(fs_type: PartitionFsType) -> Self {
        match fs_type {
            PartitionFsType::Plain => FsType::Squash,
            PartitionFsType::Encrypted => FsType::EncryptedSquashfs,
        }
    }
}

/// One object of the image, in the order it is written
#[derive(Debug)]
pub enum ObjectDescriptor {
    DefinitionFile {
        data: Vec<u8>,
    },
    MetadataObject {
        name: String,
        data: Vec<u8>,
    },
    FilesystemPartition {
        file: File,
        size: u64,
        fs_type: PartitionFsType,
        arch: Arch,
    },
    EncryptionKeyBlob {
        data: Vec<u8>,
        /// Descriptor id of the partition the key unlocks
        link: u32,
    },
}

impl ObjectDescriptor {
    /// Descriptor id the object at `index` gets in the image. Ids start at 1.
    pub fn id_at(index: usize) -> u32 {
        index as u32 + 1
    }

    pub fn into_input(self) -> DescriptorInput {
        match self {
            Self::DefinitionFile { data } => DescriptorInput::from_bytes(DataType::Deffile, data),
            Self::MetadataObject { name, data } => {
                DescriptorInput::from_bytes(DataType::GenericJson, data).with_name(name)
            }
            Self::FilesystemPartition {
                file,
                size,
                fs_type,
                arch,
            } => DescriptorInput::from_file(DataType::Partition, file, size).with_partition_extra(
                fs_type.into(),
                PartType::PrimSys,
                arch,
            ),
            Self::EncryptionKeyBlob { data, link } => {
                DescriptorInput::from_bytes(DataType::CryptoMessage, data)
                    .with_link(Link::Descriptor(link))
                    .with_crypto_message_extra(CryptoFormat::Pem, CryptoMessage::RsaOaep)
            }
        }
    }
}

/// Builds the ordered descriptor list: definition file, non-empty metadata
/// objects sorted by name, the partition, then the key blob when there is
/// one.
pub fn assemble_descriptors(
    bundle: &BuildBundle,
    partition: &Path,
    arch: Arch,
    wrapped_key: Option<Vec<u8>>,
    encrypted: bool,
) -> Result<Vec<ObjectDescriptor>> {
    let mut descriptors = vec![ObjectDescriptor::DefinitionFile {
        data: bundle.recipe.clone(),
    }];

    let mut names: Vec<&String> = bundle.json_objects.keys().collect();
    names.sort();
    for name in names {
        let data = &bundle.json_objects[name];
        if data.is_empty() {
            tracing::debug!(%name, "skipping empty metadata object");
            continue;
        }
        descriptors.push(ObjectDescriptor::MetadataObject {
            name: name.clone(),
            data: data.clone(),
        });
    }

    let file = File::open(partition).map_err(|err| {
        tracing::error!(?partition, ?err, "failed to open partition");
        DescriptorError::PartitionOpen {
            path: partition.to_owned(),
            source: err,
        }
    })?;
    let size = file
        .metadata()
        .map_err(|err| {
            tracing::error!(?partition, ?err, "failed to stat partition");
            DescriptorError::Stat {
                path: partition.to_owned(),
                source: err,
            }
        })?
        .len();
    let fs_type = if encrypted {
        PartitionFsType::Encrypted
    } else {
        PartitionFsType::Plain
    };
    let partition_id = ObjectDescriptor::id_at(descriptors.len());
    descriptors.push(ObjectDescriptor::FilesystemPartition {
        file,
        size,
        fs_type,
        arch,
    });

    if let Some(data) = wrapped_key.filter(|data| !data.is_empty()) {
        descriptors.push(ObjectDescriptor::EncryptionKeyBlob {
            data,
            link: partition_id,
        });
    }

    Ok(descriptors)
}
