use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::descriptor::{DataType, Extra, PartType};
use crate::error::{Result, SifError};
use crate::layout::{Descriptor, Header, DESCRIPTOR_LEN, HEADER_LEN};

/// A SIF image opened for inspection
#[derive(Debug)]
pub struct SifImage {
    path: PathBuf,
    file: File,
    header: Header,
    descriptors: Vec<Descriptor>,
}

impl SifImage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let read_err = |err: std::io::Error| SifError::Read {
            path: path.clone(),
            source: err,
        };

        let mut file = File::open(&path).map_err(read_err)?;
        let mut raw_header = [0u8; HEADER_LEN];
        file.read_exact(&mut raw_header).map_err(read_err)?;
        let header = Header::decode(&raw_header).ok_or_else(|| SifError::BadMagic {
            path: path.clone(),
        })?;

        let descr_off = u64::try_from(header.descr_off).map_err(|_| SifError::Corrupt {
            path: path.clone(),
            reason: format!("descriptor table offset {}", header.descr_off),
        })?;
        file.seek(SeekFrom::Start(descr_off)).map_err(read_err)?;
        let mut descriptors = Vec::new();
        let mut raw = [0u8; DESCRIPTOR_LEN];
        for _ in 0..header.dtotal {
            file.read_exact(&mut raw).map_err(read_err)?;
            if let Some(descriptor) = Descriptor::decode(&raw)? {
                descriptors.push(descriptor);
            }
        }

        Ok(Self {
            path,
            file,
            header,
            descriptors,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// The partition the image boots from
    pub fn primary_partition(&self) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| {
            d.data_type == DataType::Partition
                && matches!(
                    d.extra,
                    Extra::Partition {
                        part_type: PartType::PrimSys,
                        ..
                    }
                )
        })
    }

    /// Reads the object behind `descriptor`. Offsets and sizes come from the
    /// file and are checked against its length before anything is allocated.
    pub fn read_data(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let read_err = |err: std::io::Error| SifError::Read {
            path: self.path.clone(),
            source: err,
        };

        let file_len = self.file.metadata().map_err(read_err)?.len();
        let bounds = u64::try_from(descriptor.offset)
            .ok()
            .zip(u64::try_from(descriptor.size).ok())
            .filter(|(offset, size)| {
                offset
                    .checked_add(*size)
                    .is_some_and(|end| end <= file_len)
            });
        let Some((offset, size)) = bounds else {
            tracing::error!(
                path = ?self.path,
                id = descriptor.id,
                offset = descriptor.offset,
                size = descriptor.size,
                file_len,
                "descriptor points outside the image"
            );
            return Err(SifError::Corrupt {
                path: self.path.clone(),
                reason: format!(
                    "descriptor {} data at {}+{} exceeds file length {file_len}",
                    descriptor.id, descriptor.offset, descriptor.size
                ),
            });
        };

        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset)).map_err(read_err)?;
        let mut data = Vec::new();
        file.take(size).read_to_end(&mut data).map_err(read_err)?;
        Ok(data)
    }
}
