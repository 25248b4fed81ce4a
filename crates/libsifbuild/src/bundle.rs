use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::crypt::KeySpec;

/// Options that change what ends up in the image
#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    pub encryption: Option<KeySpec>,
}

/// Everything a build produced upstream of the assembler
#[derive(Clone, Debug)]
pub struct BuildBundle {
    pub rootfs: PathBuf,
    pub recipe: Vec<u8>,
    /// Metadata object name to raw JSON bytes
    pub json_objects: BTreeMap<String, Vec<u8>>,
    pub tmp_dir: PathBuf,
    pub opts: BuildOptions,
}

impl BuildBundle {
    pub fn new<P: Into<PathBuf>, T: Into<PathBuf>>(rootfs: P, tmp_dir: T) -> Self {
        Self {
            rootfs: rootfs.into(),
            recipe: Vec::new(),
            json_objects: BTreeMap::new(),
            tmp_dir: tmp_dir.into(),
            opts: BuildOptions::default(),
        }
    }

    pub fn with_recipe<B: Into<Vec<u8>>>(mut self, recipe: B) -> Self {
        self.recipe = recipe.into();
        self
    }

    /// Adds a metadata object, replacing any previous object of that name
    pub fn with_json_object<S: Into<String>, B: Into<Vec<u8>>>(mut self, name: S, data: B) -> Self {
        self.json_objects.insert(name.into(), data.into());
        self
    }

    pub fn with_encryption(mut self, spec: KeySpec) -> Self {
        self.opts.encryption = Some(spec);
        self
    }

    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn is_encrypted(&self) -> bool {
        self.opts.encryption.is_some()
    }
}
