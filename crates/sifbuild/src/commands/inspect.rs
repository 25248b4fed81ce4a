//! Prints the header and the descriptor table of an image
use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use libsif::layout::Descriptor;
use libsif::{Extra, Link, SifImage};
use tabwriter::TabWriter;

/// Show the objects stored in a SIF image
#[derive(Parser, Debug)]
pub struct Inspect {
    pub image: PathBuf,
}

pub fn inspect(args: Inspect) -> Result<()> {
    let image = SifImage::open(&args.image)
        .with_context(|| format!("failed to open image {:?}", args.image))?;
    let mut tab_writer = TabWriter::new(io::stdout());
    render(&image, &mut tab_writer)?;
    tab_writer.flush()?;
    Ok(())
}

fn format_time(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|utc| {
            let local: DateTime<Local> = DateTime::from(utc);
            local.to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
        })
        .unwrap_or_default()
}

fn describe_extra(descriptor: &Descriptor) -> String {
    match descriptor.extra {
        Extra::None => String::new(),
        Extra::Partition {
            fs_type,
            part_type,
            arch,
        } => format!("{fs_type}|{part_type:?}|{arch}"),
        Extra::CryptoMessage { format, message } => format!("{format:?}|{message:?}"),
    }
}

fn render<W: Write>(image: &SifImage, out: &mut W) -> Result<()> {
    let header = image.header();
    writeln!(out, "ID:\t{}", header.id)?;
    writeln!(out, "Arch:\t{}", header.arch)?;
    writeln!(out, "Created:\t{}", format_time(header.ctime))?;
    writeln!(out)?;

    let mut content = String::new();
    for descriptor in image.descriptors() {
        let link = match descriptor.link {
            Link::Unused => "NONE".to_owned(),
            Link::Descriptor(id) => id.to_string(),
        };
        let _ = writeln!(
            content,
            "{}\t{:#x}\t{}\t{}\t{}\t{}\t{}",
            descriptor.id,
            descriptor.group_id,
            link,
            descriptor.data_type,
            descriptor.name,
            descriptor.size,
            describe_extra(descriptor),
        );
    }

    writeln!(out, "ID\tGROUP\tLINK\tTYPE\tNAME\tSIZE\tEXTRA")?;
    write!(out, "{content}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use libsif::{Arch, CreateInfo, DataType, DescriptorInput, FsType, PartType, SifWriter};

    use super::*;

    #[test]
    fn test_render_lists_descriptors() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("image.sif");
        let id = uuid::Uuid::new_v4();
        let mut info = CreateInfo::new(&path, id, 0);
        info.push(DescriptorInput::from_bytes(DataType::Deffile, b"Bootstrap".to_vec()));
        info.push(
            DescriptorInput::from_bytes(DataType::GenericJson, b"{}".to_vec()).with_name("labels"),
        );
        info.push(
            DescriptorInput::from_bytes(DataType::Partition, b"hsqs".to_vec()).with_partition_extra(
                FsType::Squash,
                PartType::PrimSys,
                Arch::Amd64,
            ),
        );
        SifWriter::create(info)?.finalize()?;

        let image = SifImage::open(&path)?;
        let mut out = Vec::new();
        render(&image, &mut out)?;
        let out = String::from_utf8(out)?;

        assert!(out.contains(&format!("ID:\t{id}")));
        assert!(out.contains("Arch:\tamd64"));
        assert!(out.contains("ID\tGROUP\tLINK\tTYPE\tNAME\tSIZE\tEXTRA"));
        assert!(out.contains("2\t0xf0000001\tNONE\tJSON.Generic\tlabels\t2\t"));
        assert!(out.contains("3\t0xf0000001\tNONE\tFS\t\t4\tSquashfs|PrimSys|amd64"));
        Ok(())
    }
}
