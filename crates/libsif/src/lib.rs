//! Reading and writing of SIF (Singularity Image Format) container images.
//!
//! A SIF file is a fixed size global header, followed by a table of
//! descriptors, followed by the data objects the descriptors point at. This
//! crate does not decide what goes into an image; callers hand an ordered
//! list of [`DescriptorInput`]s to [`SifWriter::create`] and commit the result
//! with [`SifWriter::finalize`].
pub mod descriptor;
pub mod error;
pub mod layout;
pub mod reader;
pub mod writer;

pub use descriptor::{
    Arch, CryptoFormat, CryptoMessage, DataType, DescriptorData, DescriptorInput, Extra, FsType,
    Link, PartType, DEFAULT_GROUP,
};
pub use error::SifError;
pub use reader::SifImage;
pub use writer::{CreateInfo, SifWriter, WriterState};
