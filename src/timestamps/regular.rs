use std::sync::Arc;

use async_trait::async_trait;

use super::TimestampResolver;
use crate::data::DataBuffer;
use crate::file::{DataOptions, H5Source};
use crate::model::join;
use crate::{Canceler, Error, Result};

/// Timestamps of a series sampled at a fixed rate from `starting_time`.
#[derive(Debug, Clone)]
pub struct RegularResolver {
    start: f64,
    rate: f64,
    len: u64,
}

impl RegularResolver {
    /// Read `<path>/starting_time` (value and `rate` attribute) and the length of
    /// `<path>/data`.
    pub async fn initialize(source: Arc<dyn H5Source>, path: &str) -> Result<RegularResolver> {
        let st_path = join(path, "starting_time");
        let st = source.get_dataset(&st_path).await?;

        // A zero rate would divide by zero.
        let rate = st
            .attr_f64("rate")
            .filter(|r| *r != 0.0)
            .unwrap_or(1.0);

        let start = source
            .get_dataset_data(&st_path, DataOptions::new())
            .await?
            .get_f64(0)
            .ok_or_else(|| Error::Decode(format!("{st_path}: empty starting_time")))?;

        let data_path = join(path, "data");
        let data = source.get_dataset(&data_path).await?;
        let len = *data
            .shape
            .first()
            .ok_or_else(|| Error::selection(&data_path, "scalar dataset has no sample axis"))?;

        debug!("{}: regular timestamps, start {} rate {} len {}", path, start, rate, len);

        Ok(RegularResolver::new(start, rate, len))
    }

    pub fn new(start: f64, rate: f64, len: u64) -> RegularResolver {
        RegularResolver { start, rate, len }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[async_trait]
impl TimestampResolver for RegularResolver {
    fn start_time(&self) -> f64 {
        self.start
    }

    fn end_time(&self) -> f64 {
        self.start + self.len as f64 / self.rate
    }

    fn estimated_sampling_frequency(&self) -> f64 {
        self.rate
    }

    async fn index_for_time(&self, t: f64, canceler: &Canceler) -> Result<u64> {
        canceler.check()?;

        let last = self.len.saturating_sub(1);
        if t < self.start {
            return Ok(0);
        }
        if t >= self.end_time() {
            return Ok(last);
        }

        Ok((((t - self.start) * self.rate).round() as u64).min(last))
    }

    async fn timestamps_for_data_indices(&self, i1: u64, i2: u64) -> Result<DataBuffer> {
        if i2 < i1 {
            return Err(Error::selection(
                "starting_time",
                format!("reversed index range {i1}..{i2}"),
            ));
        }

        // f64: f32 lacks the precision for large indices.
        Ok(DataBuffer::F64(
            (i1..i2)
                .map(|i| self.start + i as f64 / self.rate)
                .collect(),
        ))
    }
}
