use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{DataOptions, H5Source};
use crate::data::DataBuffer;
use crate::model::{Dataset, Group};
use crate::worker::{Payload, Request, RequestKind, WorkerPool};
use crate::{Canceler, Config, Error, Result};

/// Counters of completed fetches, and the pool's outstanding requests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub get_group_count: u64,
    pub get_dataset_count: u64,
    pub get_dataset_data_count: u64,
    pub num_pending_requests: usize,
}

#[derive(Debug, Default)]
struct Counters {
    groups: AtomicU64,
    datasets: AtomicU64,
    data: AtomicU64,
}

/// A remote file read through a [`WorkerPool`].
///
/// Groups and dataset metadata are cached by path for the lifetime of the client. Values
/// are not cached here. When a metadata URL is given (a lightweight companion file with the
/// same structure), metadata and small reads are served from it.
#[derive(Debug)]
pub struct RemoteFile {
    url: String,
    meta_url: Option<String>,
    pool: Arc<WorkerPool>,
    config: Config,
    groups: Mutex<HashMap<String, Arc<Group>>>,
    datasets: Mutex<HashMap<String, Arc<Dataset>>>,
    counters: Counters,
}

impl RemoteFile {
    pub fn new(
        url: impl Into<String>,
        meta_url: Option<String>,
        pool: Arc<WorkerPool>,
        config: Config,
    ) -> RemoteFile {
        RemoteFile {
            url: url.into(),
            meta_url,
            pool,
            config,
            groups: Mutex::new(HashMap::new()),
            datasets: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn meta_url(&self) -> Option<&str> {
        self.meta_url.as_deref()
    }

    /// Whether the data lives on another host.
    pub fn data_is_remote(&self) -> bool {
        !self.url.starts_with("http://localhost")
    }

    pub fn stats(&self) -> Stats {
        Stats {
            get_group_count: self.counters.groups.load(Ordering::Relaxed),
            get_dataset_count: self.counters.datasets.load(Ordering::Relaxed),
            get_dataset_data_count: self.counters.data.load(Ordering::Relaxed),
            num_pending_requests: self.pool.num_requests(),
        }
    }

    /// URL and read block size for metadata requests.
    fn metadata_source(&self) -> (&str, u64) {
        match &self.meta_url {
            Some(m) => (m.as_str(), self.config.meta_chunk_size),
            None => (self.url.as_str(), self.config.chunk_size),
        }
    }

    /// URL and read block size for reading `count` elements.
    pub(crate) fn data_source(&self, count: u64) -> (&str, u64) {
        match &self.meta_url {
            Some(m) if count <= self.config.small_read_threshold => {
                (m.as_str(), self.config.meta_chunk_size)
            }
            _ => (self.url.as_str(), self.config.chunk_size),
        }
    }

    fn cached_group(&self, path: &str) -> Option<Arc<Group>> {
        self.groups.lock().unwrap().get(path).cloned()
    }

    fn cached_dataset(&self, path: &str) -> Option<Arc<Dataset>> {
        self.datasets.lock().unwrap().get(path).cloned()
    }

    async fn fetch(&self, kind: RequestKind, path: &str, canceler: &Canceler) -> Result<Payload> {
        let (url, chunk_size) = self.metadata_source();
        let request = Request {
            kind,
            url: url.to_string(),
            path: path.to_string(),
            chunk_size,
        };
        self.pool.post_request(request, canceler).await
    }
}

#[async_trait]
impl H5Source for RemoteFile {
    async fn get_group(&self, path: &str) -> Result<Arc<Group>> {
        if let Some(g) = self.cached_group(path) {
            return Ok(g);
        }

        let payload = self
            .fetch(RequestKind::GetGroup, path, &Canceler::new())
            .await?;
        let Payload::Group(g) = payload else {
            return Err(Error::UnexpectedPayload {
                path: path.to_string(),
                expected: "group",
            });
        };

        debug!("{}: cached group {}", self.url, path);
        let g = Arc::new(g);
        self.groups
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::clone(&g));
        self.counters.groups.fetch_add(1, Ordering::Relaxed);

        Ok(g)
    }

    async fn get_dataset(&self, path: &str) -> Result<Arc<Dataset>> {
        if let Some(d) = self.cached_dataset(path) {
            return Ok(d);
        }

        let payload = self
            .fetch(RequestKind::GetDataset, path, &Canceler::new())
            .await?;
        let Payload::Dataset(d) = payload else {
            return Err(Error::UnexpectedPayload {
                path: path.to_string(),
                expected: "dataset",
            });
        };

        debug!("{}: cached dataset {} {:?}", self.url, path, d.shape);
        let d = Arc::new(d);
        self.datasets
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::clone(&d));
        self.counters.datasets.fetch_add(1, Ordering::Relaxed);

        Ok(d)
    }

    async fn get_dataset_data(&self, path: &str, options: DataOptions) -> Result<DataBuffer> {
        let ds = self.get_dataset(path).await?;

        let ranges = options
            .slice
            .resolve(&ds.shape)
            .map_err(|e| Error::selection(path, e))?;
        let count: u64 = ranges.iter().map(|r| r.end - r.start).product();

        let (url, chunk_size) = self.data_source(count);
        trace!("{}: reading {} elements of {} from {}", self.url, count, path, url);

        let request = Request {
            kind: RequestKind::GetDatasetData {
                slice: (!options.slice.is_all()).then_some(ranges),
            },
            url: url.to_string(),
            path: path.to_string(),
            chunk_size,
        };

        let canceler = options.canceler.unwrap_or_default();
        let payload = self.pool.post_request(request, &canceler).await?;
        let Payload::Data(data) = payload else {
            return Err(Error::UnexpectedPayload {
                path: path.to_string(),
                expected: "data",
            });
        };

        if data.len() as u64 != count {
            return Err(Error::Decode(format!(
                "{}: expected {} elements, worker returned {}",
                path,
                count,
                data.len()
            )));
        }

        let data = if options.allow_big_int {
            data
        } else {
            data.narrow(self.config.strict_narrowing)?
        };

        self.counters.data.fetch_add(1, Ordering::Relaxed);

        Ok(data)
    }

    fn urls(&self) -> Vec<String> {
        vec![self.url.clone()]
    }
}
