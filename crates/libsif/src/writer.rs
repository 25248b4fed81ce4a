//! Two phase creation of SIF images.
//!
//! [`SifWriter::create`] lays the whole image out in a temporary file next to
//! the destination and leaves the writer [`WriterState::Open`]. Nothing is
//! visible at the destination until [`SifWriter::finalize`] commits the file
//! with a rename. A writer that is dropped while still open discards its
//! temporary file.
use std::fmt::Display;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::descriptor::{Arch, DataType, DescriptorData, DescriptorInput, Extra, PartType};
use crate::error::{Result, SifError};
use crate::layout::{
    align_up, Descriptor, Header, DESCRIPTOR_ENTRIES, DESCRIPTOR_LEN, HEADER_LEN, LAUNCH_SCRIPT,
    NAME_LEN, PARTITION_ALIGN, VERSION,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriterState {
    /// The image is laid out but not committed to its destination
    Open,
    /// The image is at its destination. Terminal.
    Finalized,
    /// Committing failed and the temporary image was discarded. Terminal.
    Failed,
}

impl Display for WriterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match *self {
            Self::Open => "open",
            Self::Finalized => "finalized",
            Self::Failed => "failed",
        };

        write!(f, "{print}")
    }
}

/// General information for a new image
#[derive(Debug)]
pub struct CreateInfo {
    pub path: PathBuf,
    pub launch: String,
    pub version: String,
    pub id: Uuid,
    /// Creation and modification time in seconds since the epoch
    pub timestamp: i64,
    /// Data objects in the order they are written
    pub inputs: Vec<DescriptorInput>,
}

impl CreateInfo {
    pub fn new<P: Into<PathBuf>>(path: P, id: Uuid, timestamp: i64) -> Self {
        Self {
            path: path.into(),
            launch: LAUNCH_SCRIPT.to_owned(),
            version: VERSION.to_owned(),
            id,
            timestamp,
            inputs: Vec::new(),
        }
    }

    pub fn push(&mut self, input: DescriptorInput) {
        self.inputs.push(input);
    }
}

pub struct SifWriter {
    path: PathBuf,
    state: WriterState,
    image: Option<NamedTempFile>,
    descriptors: usize,
}

impl SifWriter {
    /// Lays out a new image. Anything already at `info.path` is removed
    /// first; the new image only appears there after [`SifWriter::finalize`].
    pub fn create(info: CreateInfo) -> Result<Self> {
        validate(&info)?;
        remove_existing(&info.path)?;

        let dir = match info.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut image = tempfile::Builder::new()
            .prefix(".sif-")
            .tempfile_in(&dir)
            .map_err(|err| {
                tracing::error!(?dir, ?err, "failed to create temporary image");
                SifError::CreateTemp { dir, source: err }
            })?;

        let path = info.path.clone();
        let descriptors = info.inputs.len();
        write_image(image.as_file_mut(), info)?;
        tracing::debug!(?path, descriptors, "laid out SIF image");

        Ok(Self {
            path,
            state: WriterState::Open,
            image: Some(image),
            descriptors,
        })
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn descriptors(&self) -> usize {
        self.descriptors
    }

    /// Commits the image to its destination.
    pub fn finalize(&mut self) -> Result<&Path> {
        let image = match (self.state, self.image.take()) {
            (WriterState::Open, Some(image)) => image,
            (state, _) => return Err(SifError::InvalidState(state)),
        };

        match commit(image, &self.path) {
            Ok(()) => {
                self.state = WriterState::Finalized;
                Ok(&self.path)
            }
            Err(err) => {
                tracing::error!(path = ?self.path, ?err, "failed to finalize SIF image");
                self.state = WriterState::Failed;
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for SifWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SifWriter")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("descriptors", &self.descriptors)
            .finish()
    }
}

/// Rejects inputs the layout cannot hold, before the destination is touched
fn validate(info: &CreateInfo) -> Result<()> {
    if info.inputs.len() > DESCRIPTOR_ENTRIES {
        return Err(SifError::TooManyDescriptors {
            count: info.inputs.len(),
            max: DESCRIPTOR_ENTRIES,
        });
    }
    if let Some(input) = info.inputs.iter().find(|i| i.name.len() > NAME_LEN) {
        return Err(SifError::NameTooLong {
            name: input.name.clone(),
            max: NAME_LEN,
        });
    }
    Ok(())
}

fn remove_existing(path: &Path) -> Result<()> {
    let removed = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => Err(err),
    };

    removed.map_err(|err| {
        tracing::error!(?path, ?err, "failed to remove existing destination");
        SifError::RemoveDestination {
            path: path.to_path_buf(),
            source: err,
        }
    })
}

fn commit(image: NamedTempFile, path: &Path) -> Result<()> {
    image.as_file().sync_all().map_err(|err| SifError::Persist {
        path: path.to_path_buf(),
        source: err,
    })?;
    // on error the returned temporary file is dropped, which removes it
    image.persist(path).map_err(|err| SifError::Persist {
        path: path.to_path_buf(),
        source: err.error,
    })?;

    Ok(())
}

fn write_image(out: &mut File, info: CreateInfo) -> Result<()> {
    let write_err = |what: &'static str| {
        let path = info.path.clone();
        move |err: io::Error| SifError::Write {
            what,
            path,
            source: err,
        }
    };

    let descr_off = HEADER_LEN as u64;
    let descr_len = (DESCRIPTOR_ENTRIES * DESCRIPTOR_LEN) as u64;
    let data_off = descr_off + descr_len;
    let mut offset = data_off;
    let mut arch = Arch::Unknown;
    let mut table = Vec::with_capacity(DESCRIPTOR_ENTRIES * DESCRIPTOR_LEN);

    for (index, input) in info.inputs.into_iter().enumerate() {
        let id = index as u32 + 1;
        let padding = match input.data_type {
            DataType::Partition => align_up(offset, PARTITION_ALIGN) - offset,
            _ => 0,
        };
        offset += padding;

        out.seek(SeekFrom::Start(offset))
            .map_err(write_err("data object"))?;
        let copied = match input.data {
            DescriptorData::Bytes(bytes) => {
                out.write_all(&bytes).map_err(write_err("data object"))?;
                bytes.len() as u64
            }
            DescriptorData::File(file) => io::copy(&mut file.take(input.size), out)
                .map_err(write_err("data object"))?,
        };
        if copied != input.size {
            return Err(SifError::ShortData {
                id,
                expected: input.size,
                copied,
            });
        }

        if let Extra::Partition {
            part_type: PartType::PrimSys,
            arch: part_arch,
            ..
        } = input.extra
        {
            arch = part_arch;
        }

        let descriptor = Descriptor {
            data_type: input.data_type,
            id,
            group_id: input.group_id,
            link: input.link,
            offset: offset as i64,
            size: input.size as i64,
            store_len: (input.size + padding) as i64,
            ctime: info.timestamp,
            mtime: info.timestamp,
            uid: 0,
            gid: 0,
            name: input.name,
            extra: input.extra,
        };
        table.extend_from_slice(&descriptor.encode()?);
        offset += input.size;
    }

    let used = table.len() / DESCRIPTOR_LEN;
    table.resize(DESCRIPTOR_ENTRIES * DESCRIPTOR_LEN, 0);

    let header = Header {
        launch: info.launch,
        version: info.version,
        arch,
        id: info.id,
        ctime: info.timestamp,
        mtime: info.timestamp,
        dfree: (DESCRIPTOR_ENTRIES - used) as i64,
        dtotal: DESCRIPTOR_ENTRIES as i64,
        descr_off: descr_off as i64,
        descr_len: descr_len as i64,
        data_off: data_off as i64,
        data_len: (offset - data_off) as i64,
    };

    out.seek(SeekFrom::Start(0)).map_err(write_err("header"))?;
    out.write_all(&header.encode())
        .map_err(write_err("header"))?;
    out.write_all(&table)
        .map_err(write_err("descriptor table"))?;
    out.set_len(offset).map_err(write_err("data object"))?;

    Ok(())
}
