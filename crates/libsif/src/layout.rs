//! On-disk layout of the global header and the descriptor table.
//!
//! All integers are little endian and the structures are packed.
use uuid::Uuid;

use crate::descriptor::{Arch, DataType, Extra, Link};
use crate::error::SifError;

pub const LAUNCH_SCRIPT: &str = "#!/usr/bin/env run-singularity\n";
pub const MAGIC: &[u8; 10] = b"SIF_MAGIC\0";
pub const VERSION: &str = "01";

pub const LAUNCH_LEN: usize = 32;
pub const HEADER_LEN: usize = 128;
pub const DESCRIPTOR_LEN: usize = 585;
pub const NAME_LEN: usize = 128;
pub const EXTRA_LEN: usize = 384;
/// Number of slots in the descriptor table
pub const DESCRIPTOR_ENTRIES: usize = 48;
/// Partitions start on a page boundary so they can be mounted in place
pub const PARTITION_ALIGN: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub launch: String,
    pub version: String,
    pub arch: Arch,
    pub id: Uuid,
    pub ctime: i64,
    pub mtime: i64,
    pub dfree: i64,
    pub dtotal: i64,
    pub descr_off: i64,
    pub descr_len: i64,
    pub data_off: i64,
    pub data_len: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub data_type: DataType,
    pub id: u32,
    pub group_id: u32,
    pub link: Link,
    pub offset: i64,
    pub size: i64,
    pub store_len: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub uid: i64,
    pub gid: i64,
    pub name: String,
    pub extra: Extra,
}

fn put_fixed(buf: &mut Vec<u8>, value: &[u8], len: usize) {
    let n = value.len().min(len);
    buf.extend_from_slice(&value[..n]);
    buf.resize(buf.len() + len - n, 0);
}

fn get_i64(buf: &[u8], offset: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    i64::from_le_bytes(raw)
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn get_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

impl Header {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        put_fixed(&mut buf, self.launch.as_bytes(), LAUNCH_LEN);
        buf.extend_from_slice(MAGIC);
        put_fixed(&mut buf, self.version.as_bytes(), 3);
        put_fixed(&mut buf, self.arch.code(), 3);
        buf.extend_from_slice(self.id.as_bytes());
        for field in [
            self.ctime,
            self.mtime,
            self.dfree,
            self.dtotal,
            self.descr_off,
            self.descr_len,
            self.data_off,
            self.data_len,
        ] {
            buf.extend_from_slice(&field.to_le_bytes());
        }
        buf
    }

    /// Returns None when the buffer does not carry the SIF magic
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Option<Self> {
        if &buf[32..42] != MAGIC {
            return None;
        }

        let mut id = [0u8; 16];
        id.copy_from_slice(&buf[48..64]);
        Some(Self {
            launch: get_string(&buf[..LAUNCH_LEN]),
            version: get_string(&buf[42..45]),
            arch: Arch::from_code(&buf[45..48]),
            id: Uuid::from_bytes(id),
            ctime: get_i64(buf, 64),
            mtime: get_i64(buf, 72),
            dfree: get_i64(buf, 80),
            dtotal: get_i64(buf, 88),
            descr_off: get_i64(buf, 96),
            descr_len: get_i64(buf, 104),
            data_off: get_i64(buf, 112),
            data_len: get_i64(buf, 120),
        })
    }
}

impl Descriptor {
    pub fn encode(&self) -> Result<Vec<u8>, SifError> {
        if self.name.len() > NAME_LEN {
            return Err(SifError::NameTooLong {
                name: self.name.clone(),
                max: NAME_LEN,
            });
        }

        let mut buf = Vec::with_capacity(DESCRIPTOR_LEN);
        buf.extend_from_slice(&(self.data_type as i32).to_le_bytes());
        buf.push(1);
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.group_id.to_le_bytes());
        buf.extend_from_slice(&self.link.raw().to_le_bytes());
        for field in [
            self.offset,
            self.size,
            self.store_len,
            self.ctime,
            self.mtime,
            self.uid,
            self.gid,
        ] {
            buf.extend_from_slice(&field.to_le_bytes());
        }
        put_fixed(&mut buf, self.name.as_bytes(), NAME_LEN);
        put_fixed(&mut buf, &self.extra.encode(), EXTRA_LEN);
        Ok(buf)
    }

    /// Returns Ok(None) for an unused slot
    pub fn decode(buf: &[u8; DESCRIPTOR_LEN]) -> Result<Option<Self>, SifError> {
        if buf[4] == 0 {
            return Ok(None);
        }

        let mut raw_type = [0u8; 4];
        raw_type.copy_from_slice(&buf[..4]);
        let data_type = DataType::try_from(i32::from_le_bytes(raw_type))?;
        let extra_off = DESCRIPTOR_LEN - EXTRA_LEN;
        Ok(Some(Self {
            data_type,
            id: get_u32(buf, 5),
            group_id: get_u32(buf, 9),
            link: Link::from_raw(get_u32(buf, 13)),
            offset: get_i64(buf, 17),
            size: get_i64(buf, 25),
            store_len: get_i64(buf, 33),
            ctime: get_i64(buf, 41),
            mtime: get_i64(buf, 49),
            uid: get_i64(buf, 57),
            gid: get_i64(buf, 65),
            name: get_string(&buf[73..73 + NAME_LEN]),
            extra: Extra::decode(data_type, &buf[extra_off..]),
        }))
    }
}

pub(crate) fn align_up(offset: u64, align: u64) -> u64 {
    offset.div_ceil(align) * align
}
