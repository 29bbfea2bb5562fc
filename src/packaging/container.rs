//! Single-file hierarchical container.
//!
//! Layout, all inside one gzip stream:
//!
//! ```text
//! MSCPKG1\n | header length (u64 LE) | JSON header | dataset blobs (LE)
//! ```
//!
//! The header lists groups with their attributes and every dataset with its
//! dtype, shape, attributes and byte range within the blob section.

use crate::error::{CoreResult, MesoscalerError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

pub const CONTAINER_MAGIC: &[u8; 8] = b"MSCPKG1\n";
pub const CONTAINER_VERSION: u32 = 1;

pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    F64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatasetData {
    U8(Vec<u8>),
    F64(Vec<f64>),
}

impl DatasetData {
    pub fn dtype(&self) -> DType {
        match self {
            DatasetData::U8(_) => DType::U8,
            DatasetData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DatasetData::U8(v) => v.len(),
            DatasetData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            DatasetData::U8(v) => v.clone(),
            DatasetData::F64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub shape: Vec<usize>,
    pub attrs: Attributes,
    pub data: DatasetData,
}

impl Dataset {
    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.data {
            DatasetData::U8(v) => Some(v),
            DatasetData::F64(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.data {
            DatasetData::F64(v) => Some(v),
            DatasetData::U8(_) => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DatasetHeader {
    path: String,
    dtype: DType,
    shape: Vec<usize>,
    #[serde(default)]
    attrs: Attributes,
    offset: u64,
    len: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContainerHeader {
    version: u32,
    attrs: Attributes,
    groups: BTreeMap<String, Attributes>,
    datasets: Vec<DatasetHeader>,
}

/// In-memory container; paths use `/` separators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Container {
    attrs: Attributes,
    groups: BTreeMap<String, Attributes>,
    datasets: BTreeMap<String, Dataset>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attrs.insert(key.into(), value.into());
    }

    pub fn add_group(&mut self, path: impl Into<String>, attrs: Attributes) {
        self.groups.entry(path.into()).or_default().extend(attrs);
    }

    pub fn group(&self, path: &str) -> Option<&Attributes> {
        self.groups.get(path)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &Attributes)> + '_ {
        self.groups.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Insert a dataset; the element count must match `shape`.
    pub fn add_dataset(
        &mut self,
        path: impl Into<String>,
        shape: Vec<usize>,
        data: DatasetData,
        attrs: Attributes,
    ) -> CoreResult<()> {
        let path = path.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(MesoscalerError::malformed(
                path,
                format!("shape {:?} needs {} elements, got {}", shape, expected, data.len()),
            ));
        }
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.groups.entry(parent.to_string()).or_default();
        }
        self.datasets.insert(path, Dataset { shape, attrs, data });
        Ok(())
    }

    pub fn dataset(&self, path: &str) -> Option<&Dataset> {
        self.datasets.get(path)
    }

    pub fn require(&self, path: &str) -> CoreResult<&Dataset> {
        self.dataset(path)
            .ok_or_else(|| MesoscalerError::malformed(path, "dataset missing"))
    }

    pub fn dataset_paths(&self) -> impl Iterator<Item = &str> + '_ {
        self.datasets.keys().map(String::as_str)
    }

    /// Datasets directly below `group`, as `(name, dataset)`.
    pub fn children(&self, group: &str) -> Vec<(&str, &Dataset)> {
        let prefix = format!("{}/", group);
        self.datasets
            .iter()
            .filter_map(|(path, ds)| {
                path.strip_prefix(&prefix)
                    .filter(|rest| !rest.contains('/'))
                    .map(|name| (name, ds))
            })
            .collect()
    }

    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let mut blobs = Vec::new();
        let mut headers = Vec::with_capacity(self.datasets.len());
        for (path, ds) in &self.datasets {
            let bytes = ds.data.to_le_bytes();
            headers.push(DatasetHeader {
                path: path.clone(),
                dtype: ds.data.dtype(),
                shape: ds.shape.clone(),
                attrs: ds.attrs.clone(),
                offset: blobs.len() as u64,
                len: bytes.len() as u64,
            });
            blobs.extend_from_slice(&bytes);
        }
        let header = serde_json::to_vec(&ContainerHeader {
            version: CONTAINER_VERSION,
            attrs: self.attrs.clone(),
            groups: self.groups.clone(),
            datasets: headers,
        })
        .map_err(|e| MesoscalerError::malformed("header", e))?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut write_all = |chunk: &[u8]| {
            encoder
                .write_all(chunk)
                .map_err(|e| MesoscalerError::io("<container>", e))
        };
        write_all(CONTAINER_MAGIC)?;
        write_all(&(header.len() as u64).to_le_bytes())?;
        write_all(&header)?;
        write_all(&blobs)?;
        encoder
            .finish()
            .map_err(|e| MesoscalerError::io("<container>", e))
    }

    pub fn from_bytes(compressed: &[u8]) -> CoreResult<Self> {
        let mut raw = Vec::new();
        GzDecoder::new(compressed)
            .read_to_end(&mut raw)
            .map_err(|e| MesoscalerError::malformed("container", e))?;

        if raw.len() < 16 || &raw[..8] != CONTAINER_MAGIC {
            return Err(MesoscalerError::malformed("container", "bad magic"));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&raw[8..16]);
        let header_len = u64::from_le_bytes(len_bytes) as usize;
        let header_end = 16usize
            .checked_add(header_len)
            .filter(|end| *end <= raw.len())
            .ok_or_else(|| MesoscalerError::malformed("container", "truncated header"))?;
        let header: ContainerHeader = serde_json::from_slice(&raw[16..header_end])
            .map_err(|e| MesoscalerError::malformed("header", e))?;
        if header.version != CONTAINER_VERSION {
            return Err(MesoscalerError::malformed(
                "header",
                format!("unsupported version {}", header.version),
            ));
        }

        let blobs = &raw[header_end..];
        let mut container = Container {
            attrs: header.attrs,
            groups: header.groups,
            datasets: BTreeMap::new(),
        };
        for ds in header.datasets {
            let start = ds.offset as usize;
            let bytes = start
                .checked_add(ds.len as usize)
                .and_then(|end| blobs.get(start..end))
                .ok_or_else(|| MesoscalerError::malformed(&ds.path, "blob out of range"))?;
            let data = match ds.dtype {
                DType::U8 => DatasetData::U8(bytes.to_vec()),
                DType::F64 => {
                    if bytes.len() % 8 != 0 {
                        return Err(MesoscalerError::malformed(&ds.path, "f64 blob not 8-byte aligned"));
                    }
                    DatasetData::F64(
                        bytes
                            .chunks_exact(8)
                            .map(|c| {
                                let mut b = [0u8; 8];
                                b.copy_from_slice(c);
                                f64::from_le_bytes(b)
                            })
                            .collect(),
                    )
                }
            };
            container.add_dataset(ds.path, ds.shape, data, ds.attrs)?;
        }
        Ok(container)
    }

    /// Write atomically: a sibling temp file is renamed into place.
    pub fn write_to(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        crate::pipeline::store::write_atomic(path.as_ref(), &self.to_bytes()?)
    }

    pub fn read_from(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| MesoscalerError::io(path, e))?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bytes_round_trip_preserves_layout() {
        let mut c = Container::new();
        c.set_attr("image_name", "m1.png");
        let mut group_attrs = Attributes::new();
        group_attrs.insert("names".into(), json!(["L1", "M5"]));
        c.add_group("landmarks512", group_attrs);
        c.add_dataset("landmarks512/x", vec![2], DatasetData::F64(vec![1.5, -2.25]), Attributes::new())
            .unwrap();
        c.add_dataset("rois/left/MOs", vec![2, 3], DatasetData::U8(vec![0, 1, 1, 0, 0, 1]), Attributes::new())
            .unwrap();

        let back = Container::from_bytes(&c.to_bytes().unwrap()).unwrap();
        assert_eq!(back, c);
        assert_eq!(back.children("rois/left").len(), 1);
        assert!(back.children("rois").is_empty());
        assert!(back.group("rois/left").is_some());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut c = Container::new();
        let err = c
            .add_dataset("a", vec![2, 2], DatasetData::U8(vec![1, 2, 3]), Attributes::new())
            .unwrap_err();
        assert!(matches!(err, MesoscalerError::MalformedArtifact { .. }));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            Container::from_bytes(b"definitely not gzip"),
            Err(MesoscalerError::MalformedArtifact { .. })
        ));
    }
}
