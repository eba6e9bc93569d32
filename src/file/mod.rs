//! Remote files: cached metadata lookup and sliced reads through the worker pool.
use std::sync::Arc;

use async_trait::async_trait;

use crate::data::DataBuffer;
use crate::extent::Selection;
use crate::model::{Dataset, Group};
use crate::{Canceler, Result};

pub mod merged;
pub mod registry;
pub mod remote;

pub use merged::MergedRemoteFile;
pub use registry::Registry;
pub use remote::{RemoteFile, Stats};

/// Options for [`H5Source::get_dataset_data`].
#[derive(Debug, Clone, Default)]
pub struct DataOptions {
    pub slice: Selection,
    /// Return 64-bit integer buffers as they are instead of narrowing them to 32 bits.
    pub allow_big_int: bool,
    pub canceler: Option<Canceler>,
}

impl DataOptions {
    pub fn new() -> DataOptions {
        DataOptions::default()
    }

    pub fn slice(mut self, slice: impl Into<Selection>) -> DataOptions {
        self.slice = slice.into();
        self
    }

    pub fn allow_big_int(mut self, allow: bool) -> DataOptions {
        self.allow_big_int = allow;
        self
    }

    pub fn canceler(mut self, canceler: &Canceler) -> DataOptions {
        self.canceler = Some(canceler.clone());
        self
    }
}

/// Something groups, datasets and values can be read from.
#[async_trait]
pub trait H5Source: Send + Sync {
    async fn get_group(&self, path: &str) -> Result<Arc<Group>>;

    async fn get_dataset(&self, path: &str) -> Result<Arc<Dataset>>;

    async fn get_dataset_data(&self, path: &str, options: DataOptions) -> Result<DataBuffer>;

    /// URLs of the underlying files.
    fn urls(&self) -> Vec<String>;
}
