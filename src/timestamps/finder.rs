use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::file::{DataOptions, H5Source};
use crate::{Canceler, Error, Result};

pub const DEFAULT_FINDER_CHUNK_SIZE: u64 = 100_000;

/// Finds the sample closest to a time in a sorted, remote timestamps dataset.
///
/// Uses interpolation search, falling back to bisection when the estimate is not strictly
/// inside the current bracket. Timestamps are read in fixed size chunks which are kept for
/// the lifetime of the finder.
pub struct TimestampFinder {
    source: Arc<dyn H5Source>,
    path: String,
    len: u64,
    chunk_size: u64,
    chunks: Mutex<HashMap<u64, Arc<Vec<f64>>>>,
}

impl TimestampFinder {
    pub fn new(source: Arc<dyn H5Source>, path: impl Into<String>, len: u64) -> TimestampFinder {
        TimestampFinder {
            source,
            path: path.into(),
            len,
            chunk_size: DEFAULT_FINDER_CHUNK_SIZE,
            chunks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> TimestampFinder {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of timestamp chunks read so far.
    pub fn cached_chunks(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    /// Index of the timestamp closest to `t`, ties going to the lower index. Times before
    /// the first or after the last timestamp give the first or last index. The canceler is
    /// checked before every step.
    pub async fn index_for_time(&self, t: f64, canceler: &Canceler) -> Result<u64> {
        if self.len == 0 {
            return Ok(0);
        }

        let mut lo = 0;
        let mut hi = self.len - 1;
        if lo == hi {
            return Ok(lo);
        }

        canceler.check()?;
        let mut t_lo = self.get(lo, canceler).await?;
        let mut t_hi = self.get(hi, canceler).await?;

        // The final timestamp is occasionally missing.
        if t_hi.is_nan() {
            hi -= 1;
            t_hi = self.get(hi, canceler).await?;
        }

        while hi - lo > 1 {
            canceler.check()?;

            if t < t_lo {
                return Ok(lo);
            }
            if t > t_hi {
                return Ok(hi);
            }

            let est = lo as f64 + ((hi - lo) as f64 * (t - t_lo) / (t_hi - t_lo)).floor();
            let i = if est.is_finite() && est > lo as f64 && est < hi as f64 {
                est as u64
            } else {
                lo + (hi - lo) / 2
            };

            let ti = self.get(i, canceler).await?;
            trace!("{}: t={} bracket [{}, {}], probe {} = {}", self.path, t, lo, hi, i, ti);

            if ti == t {
                return Ok(i);
            }

            if ti < t {
                lo = i;
                t_lo = ti;
            } else {
                hi = i;
                t_hi = ti;
            }
        }

        if (t - t_lo).abs() <= (t_hi - t).abs() {
            Ok(lo)
        } else {
            Ok(hi)
        }
    }

    async fn get(&self, i: u64, canceler: &Canceler) -> Result<f64> {
        let ci = i / self.chunk_size;
        let chunk = match self.cached(ci) {
            Some(c) => c,
            None => self.load(ci, canceler).await?,
        };

        chunk
            .get((i - ci * self.chunk_size) as usize)
            .copied()
            .ok_or_else(|| {
                Error::Decode(format!(
                    "{}: timestamp {} missing from chunk {}",
                    self.path, i, ci
                ))
            })
    }

    fn cached(&self, ci: u64) -> Option<Arc<Vec<f64>>> {
        self.chunks.lock().unwrap().get(&ci).cloned()
    }

    async fn load(&self, ci: u64, canceler: &Canceler) -> Result<Arc<Vec<f64>>> {
        let a1 = ci * self.chunk_size;
        let a2 = ((ci + 1) * self.chunk_size).min(self.len);
        debug!("{}: reading timestamps {}..{}", self.path, a1, a2);

        let data = self
            .source
            .get_dataset_data(
                &self.path,
                DataOptions::new()
                    .slice(a1..a2)
                    .allow_big_int(true)
                    .canceler(canceler),
            )
            .await?;

        let chunk = Arc::new(data.to_f64_vec());
        self.chunks
            .lock()
            .unwrap()
            .insert(ci, Arc::clone(&chunk));

        Ok(chunk)
    }
}
