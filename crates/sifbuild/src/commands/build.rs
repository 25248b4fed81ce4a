//! Assembles an image from a root filesystem
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use libsifbuild::{AssemblerConfig, BuildBundle, KeySpec, SifAssembler};

/// Build a SIF image from a root filesystem
#[derive(Parser, Debug)]
pub struct Build {
    /// Root filesystem to pack
    pub rootfs: PathBuf,
    /// Image to create, replaced if it already exists
    pub dest: PathBuf,
    /// Build recipe embedded as the definition file
    #[clap(long)]
    pub recipe: Option<PathBuf>,
    /// Metadata object as NAME=FILE, may be repeated
    #[clap(long = "json", value_parser = parse_json_object)]
    pub json: Vec<(String, PathBuf)>,
    /// Directory for temporary files (default: a fresh directory under $TMPDIR)
    #[clap(long)]
    pub scratch: Option<PathBuf>,
    /// JSON file with assembler settings, flags take precedence
    #[clap(long)]
    pub config: Option<PathBuf>,
    /// Compress the partition with gzip
    #[clap(long)]
    pub gzip: bool,
    /// mksquashfs binary to use instead of the one in PATH
    #[clap(long)]
    pub mksquashfs: Option<PathBuf>,
    #[clap(long)]
    pub mksquashfs_procs: Option<u32>,
    /// Memory limit passed to mksquashfs, e.g. 512M
    #[clap(long)]
    pub mksquashfs_mem: Option<String>,
    /// Encrypt with the passphrase stored in this environment variable
    #[clap(long, conflicts_with = "pem_key")]
    pub passphrase_env: Option<String>,
    /// Encrypt with a random key wrapped for this RSA public key
    #[clap(long)]
    pub pem_key: Option<PathBuf>,
}

fn parse_json_object(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((name, file)) if !name.is_empty() && !file.is_empty() => {
            Ok((name.to_owned(), PathBuf::from(file)))
        }
        _ => Err(format!("expected NAME=FILE, got {s:?}")),
    }
}

fn load_config(args: &Build) -> Result<AssemblerConfig> {
    let mut config = match &args.config {
        Some(path) => AssemblerConfig::load(path)
            .with_context(|| format!("failed to load config {path:?}"))?,
        None => AssemblerConfig::default(),
    };

    if args.gzip {
        config.gzip = true;
    }
    if let Some(path) = &args.mksquashfs {
        config.mksquashfs_path = Some(path.clone());
    }
    if let Some(procs) = args.mksquashfs_procs {
        config.mksquashfs_procs = Some(procs);
    }
    if let Some(mem) = &args.mksquashfs_mem {
        config.mksquashfs_mem = Some(mem.clone());
    }
    Ok(config)
}

fn key_spec(args: &Build) -> Result<Option<KeySpec>> {
    if let Some(var) = &args.passphrase_env {
        let passphrase =
            std::env::var(var).with_context(|| format!("passphrase variable {var} is not set"))?;
        return Ok(Some(KeySpec::passphrase(passphrase)));
    }
    Ok(args.pem_key.clone().map(KeySpec::PemPublicKey))
}

fn read_json_object(name: &str, path: &Path) -> Result<Vec<u8>> {
    let data = fs::read(path).with_context(|| format!("failed to read {name} from {path:?}"))?;
    // empty objects are accepted and left out of the image
    if !data.is_empty() {
        serde_json::from_slice::<serde_json::Value>(&data)
            .with_context(|| format!("{name} in {path:?} is not valid JSON"))?;
    }
    Ok(data)
}

pub fn build(args: Build) -> Result<()> {
    if !args.rootfs.is_dir() {
        bail!("root filesystem {:?} is not a directory", args.rootfs);
    }

    let config = load_config(&args)?;
    let recipe = match &args.recipe {
        Some(path) => fs::read(path).with_context(|| format!("failed to read recipe {path:?}"))?,
        None => Vec::new(),
    };

    // removed once the build is done
    let mut scratch_dir = None;
    let scratch = match &args.scratch {
        Some(path) => path.clone(),
        None => scratch_dir
            .insert(
                tempfile::Builder::new()
                    .prefix("sifbuild-")
                    .tempdir()
                    .context("failed to create scratch directory")?,
            )
            .path()
            .to_owned(),
    };

    let mut bundle = BuildBundle::new(&args.rootfs, scratch).with_recipe(recipe);
    for (name, path) in &args.json {
        let data = read_json_object(name, path)?;
        bundle = bundle.with_json_object(name.as_str(), data);
    }
    if let Some(spec) = key_spec(&args)? {
        bundle = bundle.with_encryption(spec);
    }

    let assembler = SifAssembler::new(config).context("invalid configuration")?;
    assembler
        .assemble(&bundle, &args.dest)
        .with_context(|| format!("failed to build image {:?}", args.dest))?;
    tracing::info!(dest = ?args.dest, "image built");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use libsif::{DataType, SifImage};
    use serial_test::serial;

    use super::*;

    fn parse(args: &[&str]) -> Result<Build> {
        let mut argv = vec!["build"];
        argv.extend_from_slice(args);
        Ok(Build::try_parse_from(argv)?)
    }

    #[test]
    fn test_parse_json_object() {
        assert_eq!(
            parse_json_object("labels=/tmp/labels.json"),
            Ok(("labels".to_owned(), PathBuf::from("/tmp/labels.json")))
        );
        assert!(parse_json_object("labels").is_err());
        assert!(parse_json_object("=file").is_err());
        assert!(parse_json_object("labels=").is_err());
    }

    #[test]
    fn test_flags_conflict() {
        assert!(parse(&["rootfs", "out.sif", "--passphrase-env", "PW", "--pem-key", "k.pem"]).is_err());
    }

    #[test]
    fn test_flags_override_config_file() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let config_path = tmp.path().join("config.json");
        AssemblerConfig {
            mksquashfs_procs: Some(2),
            mksquashfs_mem: Some("1G".to_owned()),
            ..Default::default()
        }
        .save(&config_path)?;

        let args = parse(&[
            "rootfs",
            "out.sif",
            "--config",
            config_path.to_str().context("non utf-8 path")?,
            "--gzip",
            "--mksquashfs-procs",
            "8",
        ])?;
        let config = load_config(&args)?;
        assert!(config.gzip);
        assert_eq!(config.mksquashfs_procs, Some(8));
        assert_eq!(config.mksquashfs_mem.as_deref(), Some("1G"));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_key_spec_from_env() -> Result<()> {
        let args = parse(&["rootfs", "out.sif", "--passphrase-env", "SIFBUILD_TEST_PASSPHRASE"])?;
        std::env::remove_var("SIFBUILD_TEST_PASSPHRASE");
        assert!(key_spec(&args).is_err());

        std::env::set_var("SIFBUILD_TEST_PASSPHRASE", "secret");
        let spec = key_spec(&args)?;
        std::env::remove_var("SIFBUILD_TEST_PASSPHRASE");
        assert!(matches!(spec, Some(KeySpec::Passphrase(p)) if p.as_str() == "secret"));

        let args = parse(&["rootfs", "out.sif", "--pem-key", "recipient.pem"])?;
        assert!(matches!(key_spec(&args)?, Some(KeySpec::PemPublicKey(_))));
        Ok(())
    }

    #[test]
    fn test_invalid_json_rejected() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("labels.json");
        fs::write(&path, "{not json")?;
        assert!(read_json_object("labels", &path).is_err());

        fs::write(&path, "")?;
        assert!(read_json_object("labels", &path)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_build_with_stub_mksquashfs() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir(&rootfs)?;
        let scratch = tmp.path().join("scratch");
        fs::create_dir(&scratch)?;
        let tool = tmp.path().join("mksquashfs");
        // sources come first, then the destination
        fs::write(&tool, "#!/bin/sh\nprintf hsqs > \"$2\"\n")?;
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))?;
        let recipe = tmp.path().join("recipe.def");
        fs::write(&recipe, "Bootstrap: scratch\n")?;
        let labels = tmp.path().join("labels.json");
        fs::write(&labels, r#"{"org":"example"}"#)?;
        let dest = tmp.path().join("image.sif");
        let json_arg = format!("labels={}", labels.display());

        let args = parse(&[
            rootfs.to_str().context("non utf-8 path")?,
            dest.to_str().context("non utf-8 path")?,
            "--recipe",
            recipe.to_str().context("non utf-8 path")?,
            "--json",
            json_arg.as_str(),
            "--scratch",
            scratch.to_str().context("non utf-8 path")?,
            "--mksquashfs",
            tool.to_str().context("non utf-8 path")?,
        ])?;
        build(args)?;

        let image = SifImage::open(&dest)?;
        let types: Vec<DataType> = image.descriptors().iter().map(|d| d.data_type).collect();
        assert_eq!(
            types,
            vec![DataType::Deffile, DataType::GenericJson, DataType::Partition]
        );
        let partition = image.primary_partition().context("no partition")?;
        assert_eq!(image.read_data(partition)?, b"hsqs");
        assert_eq!(fs::read_dir(&scratch)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_build_rejects_missing_rootfs() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let args = parse(&[
            tmp.path().join("missing").to_str().context("non utf-8 path")?,
            tmp.path().join("image.sif").to_str().context("non utf-8 path")?,
        ])?;
        assert!(build(args).is_err());
        assert!(!tmp.path().join("image.sif").exists());
        Ok(())
    }
}
