//! Mapping between time and sample index of a time series.
//!
//! A series either has a `starting_time` and a fixed `rate` ([`RegularResolver`]) or an
//! explicit `timestamps` dataset ([`IrregularResolver`]). Use [`resolver_for`] to pick the
//! right one from the series group.
use std::sync::Arc;

use async_trait::async_trait;

use crate::data::DataBuffer;
use crate::file::H5Source;
use crate::{Canceler, Result};

pub mod finder;
pub mod irregular;
pub mod regular;

pub use finder::TimestampFinder;
pub use irregular::IrregularResolver;
pub use regular::RegularResolver;

#[async_trait]
pub trait TimestampResolver: Send + Sync {
    fn start_time(&self) -> f64;

    fn end_time(&self) -> f64;

    fn estimated_sampling_frequency(&self) -> f64;

    /// Index of the sample closest to `t`, clamped to the series.
    async fn index_for_time(&self, t: f64, canceler: &Canceler) -> Result<u64>;

    async fn data_index_for_time(&self, t: f64) -> Result<u64> {
        self.index_for_time(t, &Canceler::new()).await
    }

    /// Timestamps of samples `i1..i2`.
    async fn timestamps_for_data_indices(&self, i1: u64, i2: u64) -> Result<DataBuffer>;
}

/// Initialize the resolver matching the series at `path`.
pub async fn resolver_for(
    source: Arc<dyn H5Source>,
    path: &str,
) -> Result<Box<dyn TimestampResolver>> {
    let group = source.get_group(path).await?;

    if group.dataset("timestamps").is_some() {
        Ok(Box::new(IrregularResolver::initialize(source, path).await?))
    } else {
        Ok(Box::new(RegularResolver::initialize(source, path).await?))
    }
}
