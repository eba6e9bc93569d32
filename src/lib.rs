//! # REMOTEH5
//!
//! Concurrent, cached access to large remote HDF5-like files, for viewers that render
//! multi-million sample time series incrementally.
//!
//! Decoding the container format is left to a [`Decode`](worker::Decode) implementation. A
//! [`WorkerPool`](worker::WorkerPool) runs one decoder per worker on its own thread and queues
//! requests FIFO per worker, routing each to the least loaded one. On top of that:
//!
//! * [`RemoteFile`](file::RemoteFile) caches groups and dataset metadata and reads sliced
//!   values, small reads optionally going to a lightweight metadata file.
//! * [`timestamps`] maps between time and sample index for regular and irregular series.
//! * [`DatasetChunkingClient`](chunking::DatasetChunkingClient) loads a series in chunks
//!   within a time budget, so that partial results can be shown while loading continues.
//!
//! Every operation that waits on the pool takes a [`Canceler`].
//!
//! ## Usage
//!
//! ```
//! use remoteh5::prelude::*;
//! use remoteh5::model::Attributes;
//! use remoteh5::worker::{MemoryFile, MemoryStore};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut f = MemoryFile::new();
//! f.insert_dataset("/acquisition/lfp/data", vec![4, 2], vec![1i16, 2, 3, 4, 5, 6, 7, 8], Attributes::new())
//!     .unwrap();
//!
//! let store = MemoryStore::new();
//! store.insert("https://example.org/file.nwb", f);
//!
//! let registry = Registry::new(Config::default(), || Box::new(store.decoder())).unwrap();
//! let file = registry.open("https://example.org/file.nwb", None);
//!
//! let values = file
//!     .get_dataset_data("/acquisition/lfp/data", DataOptions::new().slice([1..3, 0..1]))
//!     .await
//!     .unwrap();
//! assert_eq!(values.to_f64_vec(), vec![3.0, 5.0]);
//! # });
//! ```

#[macro_use]
extern crate anyhow;

#[macro_use]
extern crate log;

pub mod cancel;
pub mod chunking;
pub mod config;
pub mod data;
pub mod error;
pub mod extent;
pub mod file;
pub mod model;
pub mod timestamps;
pub mod worker;

pub use cancel::Canceler;
pub use config::Config;
pub use error::{Error, Result};

pub mod prelude {
    pub use super::chunking::{ChunkingOptions, ConcatenatedChunk, DatasetChunkingClient};
    pub use super::data::{DataBuffer, Dtype};
    pub use super::extent::{Extent, Selection};
    pub use super::file::{DataOptions, H5Source, MergedRemoteFile, Registry, RemoteFile};
    pub use super::timestamps::{resolver_for, TimestampResolver};
    pub use super::worker::{Decode, WorkerPool};
    pub use super::{Canceler, Config, Error, Result};
}
