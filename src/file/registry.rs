use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{H5Source, MergedRemoteFile, RemoteFile};
use crate::worker::{Decode, WorkerPool};
use crate::{Config, Result};

/// Opens files on a shared [`WorkerPool`] and hands out one [`RemoteFile`] per
/// `(url, meta_url)` pair, so that metadata caches are shared between users of the same file.
#[derive(Debug)]
pub struct Registry {
    pool: Arc<WorkerPool>,
    config: Config,
    files: Mutex<HashMap<(String, Option<String>), Arc<RemoteFile>>>,
}

impl Registry {
    /// Start a pool with decoders from `factory`. Must be called from within a tokio runtime.
    pub fn new<F>(config: Config, factory: F) -> Result<Registry>
    where
        F: FnMut() -> Box<dyn Decode>,
    {
        let pool = Arc::new(WorkerPool::new(&config, factory)?);
        Ok(Registry::with_pool(pool, config))
    }

    pub fn with_pool(pool: Arc<WorkerPool>, config: Config) -> Registry {
        Registry {
            pool,
            config,
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn open(&self, url: &str, meta_url: Option<&str>) -> Arc<RemoteFile> {
        let key = (url.to_string(), meta_url.map(str::to_string));
        let mut files = self.files.lock().unwrap();

        Arc::clone(files.entry(key).or_insert_with(|| {
            debug!("registry: opening {} (metadata: {:?})", url, meta_url);
            Arc::new(RemoteFile::new(
                url,
                meta_url.map(str::to_string),
                Arc::clone(&self.pool),
                self.config.clone(),
            ))
        }))
    }

    /// Open several files as one, see [`MergedRemoteFile`].
    pub fn open_merged(&self, files: &[(&str, Option<&str>)]) -> Result<MergedRemoteFile> {
        MergedRemoteFile::new(
            files
                .iter()
                .map(|(url, meta)| self.open(url, *meta) as Arc<dyn H5Source>)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attributes;
    use crate::worker::{MemoryFile, MemoryStore};

    #[tokio::test]
    async fn same_file_same_client() {
        let store = MemoryStore::new();
        let r = Registry::new(Config::default(), || Box::new(store.decoder())).unwrap();

        let a = r.open("mem://a", None);
        let b = r.open("mem://a", None);
        let c = r.open("mem://a", Some("mem://a.meta"));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(r.len(), 2);
    }

    #[tokio::test]
    async fn merged_lookup() {
        let store = MemoryStore::new();

        let mut primary = MemoryFile::new();
        primary
            .insert_dataset("/acquisition/x", vec![2], vec![1.0f32, 2.0], Attributes::new())
            .unwrap();
        store.insert("mem://primary", primary);

        let mut extra = MemoryFile::new();
        extra
            .insert_dataset("/acquisition/y", vec![1], vec![7u8], Attributes::new())
            .unwrap();
        extra
            .insert_dataset("/processing/z", vec![1], vec![8u8], Attributes::new())
            .unwrap();
        store.insert("mem://extra", extra);

        let r = Registry::new(Config::default(), || Box::new(store.decoder())).unwrap();
        let m = r
            .open_merged(&[("mem://primary", None), ("mem://extra", None)])
            .unwrap();

        assert_eq!(m.urls(), vec!["mem://primary", "mem://extra"]);

        let g = m.get_group("/acquisition").await.unwrap();
        let mut names: Vec<_> = g.datasets.iter().map(|d| d.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["x", "y"]);

        let root = m.get_group("/").await.unwrap();
        assert_eq!(root.subgroups.len(), 2);

        assert_eq!(m.get_dataset("/processing/z").await.unwrap().size(), 1);
        assert!(m.get_dataset("/nope").await.is_err());
        assert!(m.get_group("/nope").await.is_err());
    }
}
