//! An in-process decode capability.
//!
//! [`MemoryStore`] maps URLs to [`MemoryFile`]s which hold groups, dataset metadata and the
//! dataset values. A [`MemoryDecoder`] answers worker requests from the store and records
//! every request it serves, which makes it convenient for exercising the access layer
//! without a remote file.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use super::{Decode, Payload, Request, RequestKind};
use crate::data::{DataBuffer, Dtype, Order};
use crate::extent::Selection;
use crate::model::{self, Attributes, Dataset, Group, Subdataset, Subgroup};

#[derive(Debug, Clone)]
struct StoredDataset {
    meta: Dataset,
    data: DataBuffer,
}

/// Groups and datasets of one file.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    groups: BTreeMap<String, Attributes>,
    datasets: BTreeMap<String, StoredDataset>,
}

impl Default for MemoryFile {
    fn default() -> Self {
        MemoryFile::new()
    }
}

fn parent(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((p, _)) => p,
    }
}

impl MemoryFile {
    pub fn new() -> MemoryFile {
        let mut groups = BTreeMap::new();
        groups.insert("/".to_string(), Attributes::new());

        MemoryFile {
            groups,
            datasets: BTreeMap::new(),
        }
    }

    /// Add a group, creating missing parents. Attributes of an existing group are replaced.
    pub fn insert_group(&mut self, path: &str, attrs: Attributes) {
        let mut p = parent(path);
        while !self.groups.contains_key(p) {
            self.groups.insert(p.to_string(), Attributes::new());
            p = parent(p);
        }
        self.groups.insert(path.to_string(), attrs);
    }

    /// Add a dataset with row-major `data` of `shape`, creating missing parent groups.
    pub fn insert_dataset(
        &mut self,
        path: &str,
        shape: Vec<u64>,
        data: impl Into<DataBuffer>,
        attrs: Attributes,
    ) -> Result<(), anyhow::Error> {
        let data = data.into();
        ensure!(
            shape.iter().product::<u64>() == data.len() as u64,
            "dataset {} has shape {:?} but {} values",
            path,
            shape,
            data.len()
        );

        let p = parent(path);
        if !self.groups.contains_key(p) {
            self.insert_group(p, Attributes::new());
        }

        let meta = Dataset {
            name: model::basename(path).to_string(),
            path: path.to_string(),
            shape,
            dtype: data.dtype().to_string(),
            attrs,
        };
        self.datasets
            .insert(path.to_string(), StoredDataset { meta, data });

        Ok(())
    }

    /// Add a dataset from raw bytes as stored in a file. `dtype` is a NumPy style type
    /// string; without a byte order mark the bytes are read as little endian.
    pub fn insert_raw_dataset(
        &mut self,
        path: &str,
        shape: Vec<u64>,
        dtype: &str,
        bytes: &[u8],
        attrs: Attributes,
    ) -> Result<(), anyhow::Error> {
        let order = Dtype::order_of(dtype).unwrap_or(Order::LE);
        let data = DataBuffer::from_bytes(dtype.parse()?, bytes, order)?;
        self.insert_dataset(path, shape, data, attrs)
    }

    pub fn group(&self, path: &str) -> Result<Group, anyhow::Error> {
        let attrs = self
            .groups
            .get(path)
            .ok_or_else(|| anyhow!("no such group: {}", path))?;

        let subgroups = self
            .groups
            .iter()
            .filter(|(p, _)| p.as_str() != "/" && parent(p) == path)
            .map(|(p, a)| Subgroup {
                name: model::basename(p).to_string(),
                path: p.clone(),
                attrs: a.clone(),
            })
            .collect();

        let datasets = self
            .datasets
            .values()
            .filter(|d| parent(&d.meta.path) == path)
            .map(|d| Subdataset {
                name: d.meta.name.clone(),
                path: d.meta.path.clone(),
                shape: d.meta.shape.clone(),
                dtype: d.meta.dtype.clone(),
                attrs: d.meta.attrs.clone(),
            })
            .collect();

        Ok(Group {
            path: path.to_string(),
            subgroups,
            datasets,
            attrs: attrs.clone(),
        })
    }

    pub fn dataset(&self, path: &str) -> Result<Dataset, anyhow::Error> {
        self.datasets
            .get(path)
            .map(|d| d.meta.clone())
            .ok_or_else(|| anyhow!("no such dataset: {}", path))
    }

    /// Values of `path`, optionally restricted to `slice` (one range per axis).
    pub fn data(
        &self,
        path: &str,
        slice: Option<&[std::ops::Range<u64>]>,
    ) -> Result<DataBuffer, anyhow::Error> {
        let d = self
            .datasets
            .get(path)
            .ok_or_else(|| anyhow!("no such dataset: {}", path))?;

        match slice {
            None => Ok(d.data.clone()),
            Some(ranges) => {
                // Validate like a real decoder would.
                Selection::from(ranges).resolve(&d.meta.shape)?;
                d.data.select(&d.meta.shape, ranges)
            }
        }
    }
}

/// One request served by a [`MemoryDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub kind: &'static str,
    pub url: String,
    pub path: String,
}

/// Files by URL, shared by all decoders created from it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Arc<RwLock<HashMap<String, Arc<MemoryFile>>>>,
    served: Arc<Mutex<Vec<Served>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn insert(&self, url: &str, file: MemoryFile) {
        self.files
            .write()
            .unwrap()
            .insert(url.to_string(), Arc::new(file));
    }

    /// A decoder for one worker.
    pub fn decoder(&self) -> MemoryDecoder {
        MemoryDecoder {
            store: self.clone(),
            latency: None,
        }
    }

    /// Every request served so far, in order.
    pub fn served(&self) -> Vec<Served> {
        self.served.lock().unwrap().clone()
    }

    pub fn num_served(&self) -> usize {
        self.served.lock().unwrap().len()
    }

    fn file(&self, url: &str) -> Result<Arc<MemoryFile>, anyhow::Error> {
        self.files
            .read()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("file not found: {}", url))
    }
}

pub struct MemoryDecoder {
    store: MemoryStore,
    latency: Option<Duration>,
}

impl MemoryDecoder {
    /// Sleep this long on every request, imitating a slow remote read.
    pub fn with_latency(mut self, latency: Duration) -> MemoryDecoder {
        self.latency = Some(latency);
        self
    }
}

impl Decode for MemoryDecoder {
    fn decode(&mut self, request: &Request) -> Result<Payload, anyhow::Error> {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }

        self.store.served.lock().unwrap().push(Served {
            kind: request.name(),
            url: request.url.clone(),
            path: request.path.clone(),
        });

        let file = self.store.file(&request.url)?;

        Ok(match &request.kind {
            RequestKind::GetGroup => Payload::Group(file.group(&request.path)?),
            RequestKind::GetDataset => Payload::Dataset(file.dataset(&request.path)?),
            RequestKind::GetDatasetData { slice } => {
                Payload::Data(file.data(&request.path, slice.as_deref())?)
            }
        })
    }
}
