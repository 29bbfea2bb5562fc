//! File-backed artifact stores.
//!
//! Each stage owns one directory under the run root. Every write goes to a
//! temporary sibling file that is renamed into place, so readers only ever
//! see complete artifacts.

use crate::error::{CoreResult, MesoscalerError};
use crate::packaging::Container;
use image::{ImageFormat, RgbImage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Collected,
    Landmarks,
    Alignment,
    Rois,
    Packages,
}

impl StoreKind {
    pub const ALL: [StoreKind; 5] = [
        StoreKind::Collected,
        StoreKind::Landmarks,
        StoreKind::Alignment,
        StoreKind::Rois,
        StoreKind::Packages,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            StoreKind::Collected => "collected",
            StoreKind::Landmarks => "landmarks",
            StoreKind::Alignment => "alignment",
            StoreKind::Rois => "rois",
            StoreKind::Packages => "packages",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Write `bytes` to `path` via a temp file in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| MesoscalerError::io(parent, e))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(parent)
        .map_err(|e| MesoscalerError::io(parent, e))?;
    tmp.write_all(bytes).map_err(|e| MesoscalerError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| MesoscalerError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| MesoscalerError::io(path, e.error))?;
    Ok(())
}

/// Read a file, mapping "not found" to `None`.
fn read_optional(path: &Path) -> CoreResult<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MesoscalerError::io(path, e)),
    }
}

/// Directory layout of one run.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self, kind: StoreKind) -> ArtifactStore {
        ArtifactStore {
            dir: self.root.join(kind.dir_name()),
            kind,
        }
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join("run_summary.json")
    }
}

/// One named store: JSON documents, PNG images and containers keyed by image.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    kind: StoreKind,
}

impl ArtifactStore {
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn json_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn image_path(&self, group: &str, key: &str) -> PathBuf {
        self.dir.join(group).join(format!("{}.png", key))
    }

    pub fn container_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.mspkg", key))
    }

    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> CoreResult<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| MesoscalerError::malformed(key, e))?;
        write_atomic(&self.json_path(key), &bytes)
    }

    /// `Ok(None)` when absent; unparsable content is a malformed artifact.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        let path = self.json_path(key);
        read_optional(&path)?
            .map(|bytes| {
                serde_json::from_slice(&bytes)
                    .map_err(|e| MesoscalerError::malformed(format!("{}/{}", self.kind, key), e))
            })
            .transpose()
    }

    pub fn put_image(&self, group: &str, key: &str, img: &RgbImage) -> CoreResult<()> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| MesoscalerError::malformed(key, e))?;
        write_atomic(&self.image_path(group, key), buf.get_ref())
    }

    pub fn get_image(&self, group: &str, key: &str) -> CoreResult<Option<RgbImage>> {
        let path = self.image_path(group, key);
        read_optional(&path)?
            .map(|bytes| {
                image::load_from_memory_with_format(&bytes, ImageFormat::Png)
                    .map(|img| img.to_rgb8())
                    .map_err(|e| MesoscalerError::malformed(format!("{}/{}/{}", self.kind, group, key), e))
            })
            .transpose()
    }

    pub fn put_container(&self, key: &str, container: &Container) -> CoreResult<()> {
        container.write_to(self.container_path(key))
    }

    pub fn get_container(&self, key: &str) -> CoreResult<Option<Container>> {
        let path = self.container_path(key);
        read_optional(&path)?
            .map(|bytes| Container::from_bytes(&bytes))
            .transpose()
    }
}
