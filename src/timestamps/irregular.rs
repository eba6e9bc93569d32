use std::sync::Arc;

use async_trait::async_trait;

use super::{finder::TimestampFinder, TimestampResolver};
use crate::data::DataBuffer;
use crate::file::{DataOptions, H5Source};
use crate::model::join;
use crate::{Canceler, Error, Result};

/// Timestamps used to estimate start, end and sampling frequency.
const NUM_INITIAL_TIMESTAMPS: u64 = 10_000;
const NUM_FINAL_TIMESTAMPS: u64 = 10;

/// Timestamps stored explicitly in `<path>/timestamps`.
pub struct IrregularResolver {
    source: Arc<dyn H5Source>,
    path: String,
    start: f64,
    end: f64,
    frequency: f64,
    finder: TimestampFinder,
}

impl IrregularResolver {
    pub async fn initialize(source: Arc<dyn H5Source>, path: &str) -> Result<IrregularResolver> {
        let ts_path = join(path, "timestamps");
        let ds = source.get_dataset(&ts_path).await?;
        let len = *ds
            .shape
            .first()
            .ok_or_else(|| Error::selection(&ts_path, "scalar timestamps"))?;
        if len == 0 {
            return Err(Error::selection(&ts_path, "no timestamps"));
        }

        let initial = read(&*source, &ts_path, 0, len.min(NUM_INITIAL_TIMESTAMPS)).await?;
        let last = read(
            &*source,
            &ts_path,
            len.saturating_sub(NUM_FINAL_TIMESTAMPS),
            len,
        )
        .await?;

        let start = initial
            .first()
            .copied()
            .ok_or_else(|| Error::Decode(format!("{ts_path}: empty read of the first timestamps")))?;
        let end = match last.as_slice() {
            [.., penultimate, l] if l.is_nan() => *penultimate,
            [.., l] => *l,
            [] => start,
        };
        let frequency = estimate_frequency(&initial);

        debug!(
            "{}: {} irregular timestamps from {} to {} (~{} Hz)",
            path, len, start, end, frequency
        );

        Ok(IrregularResolver {
            finder: TimestampFinder::new(Arc::clone(&source), ts_path.clone(), len),
            source,
            path: ts_path,
            start,
            end,
            frequency,
        })
    }

    pub fn finder(&self) -> &TimestampFinder {
        &self.finder
    }
}

async fn read(source: &dyn H5Source, path: &str, i1: u64, i2: u64) -> Result<Vec<f64>> {
    Ok(source
        .get_dataset_data(path, DataOptions::new().slice(i1..i2).allow_big_int(true))
        .await?
        .to_f64_vec())
}

/// Reciprocal of the median difference between consecutive timestamps.
pub fn estimate_frequency(timestamps: &[f64]) -> f64 {
    if timestamps.len() < 2 {
        return 1.0;
    }

    let mut deltas: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
    deltas.sort_by(f64::total_cmp);

    1.0 / deltas[deltas.len() / 2]
}

#[async_trait]
impl TimestampResolver for IrregularResolver {
    fn start_time(&self) -> f64 {
        self.start
    }

    fn end_time(&self) -> f64 {
        self.end
    }

    fn estimated_sampling_frequency(&self) -> f64 {
        self.frequency
    }

    async fn index_for_time(&self, t: f64, canceler: &Canceler) -> Result<u64> {
        self.finder.index_for_time(t, canceler).await
    }

    async fn timestamps_for_data_indices(&self, i1: u64, i2: u64) -> Result<DataBuffer> {
        self.source
            .get_dataset_data(
                &self.path,
                DataOptions::new().slice(i1..i2).allow_big_int(true),
            )
            .await
    }
}
