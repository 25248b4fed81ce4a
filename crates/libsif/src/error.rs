use std::path::PathBuf;

use crate::writer::WriterState;

#[derive(Debug, thiserror::Error)]
pub enum SifError {
    #[error("failed to remove existing destination {path:?}")]
    RemoveDestination {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create temporary image in {dir:?}")]
    CreateTemp {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {what} of {path:?}")]
    Write {
        what: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("descriptor {id}: expected {expected} bytes of data, got {copied}")]
    ShortData { id: u32, expected: u64, copied: u64 },
    #[error("failed to persist image to {path:?}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("descriptor name {name:?} is longer than {max} bytes")]
    NameTooLong { name: String, max: usize },
    #[error("{count} descriptors requested but an image holds at most {max}")]
    TooManyDescriptors { count: usize, max: usize },
    #[error("writer is {0}, expected open")]
    InvalidState(WriterState),
    #[error("failed to read {path:?}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path:?} is not a SIF image")]
    BadMagic { path: PathBuf },
    #[error("{path:?} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("unknown data type {0:#x}")]
    UnknownDataType(i32),
}

pub type Result<T> = std::result::Result<T, SifError>;
