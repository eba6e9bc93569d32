//! Time-boxed, chunked loading of a time series for incremental display.
//!
//! The sample axis of a 1-D or 2-D dataset is divided in chunks of `chunk_size` samples.
//! [`DatasetChunkingClient::get_concatenated_chunk`] loads the chunks of a range that are not
//! yet cached until the time budget is spent, and returns the whole range with missing
//! samples as NaN. Calling it again with the same range continues where it left off; every
//! call loads at least one chunk, so repeated calls always complete. A range that does not
//! fit in a bounded cache is loaded in one call, ignoring the time budget.
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Stream;
use lru::LruCache;

use crate::file::{DataOptions, H5Source};
use crate::model::Dataset;
use crate::{Canceler, Error, Result};

/// Channels read when no visible range is set.
pub const DEFAULT_MAX_CHANNELS: u64 = 5;

pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(2);

/// Samples per section when estimating the noise level.
const NOISE_SECTION: usize = 100;
const NOISE_SECTIONS: usize = 50;

#[derive(Debug, Clone)]
pub struct ChunkingOptions {
    /// Channels to read, defaults to the first `max_channels`.
    pub visible_channels: Option<Range<u64>>,

    /// Offset channel `i` by `i * factor * noise level`, separating traces vertically.
    pub auto_channel_separation: Option<f64>,

    /// Do not apply the `conversion` and `offset` attributes of the dataset.
    pub ignore_conversion: bool,

    pub max_channels: u64,

    pub time_budget: Duration,

    /// Bound the chunk cache (least recently used chunks are evicted). Requests for more
    /// chunks than this are not time-boxed.
    pub max_cached_chunks: Option<NonZeroUsize>,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        ChunkingOptions {
            visible_channels: None,
            auto_channel_separation: None,
            ignore_conversion: false,
            max_channels: DEFAULT_MAX_CHANNELS,
            time_budget: DEFAULT_TIME_BUDGET,
            max_cached_chunks: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConcatenatedChunk {
    /// One row per channel, covering every sample of the requested chunks.
    pub data: Vec<Vec<f64>>,

    /// `false` if some chunks are not loaded yet (their samples are NaN).
    pub completed: bool,
}

/// Samples per channel.
type Chunk = Vec<Vec<f64>>;

pub struct DatasetChunkingClient {
    source: Arc<dyn H5Source>,
    dataset: Arc<Dataset>,
    chunk_size: u64,
    channels: Range<u64>,
    conversion: f64,
    offset: f64,
    options: ChunkingOptions,
    chunks: LruCache<u64, Arc<Chunk>>,
    noise: Option<f64>,
}

impl DatasetChunkingClient {
    pub fn new(
        source: Arc<dyn H5Source>,
        dataset: Arc<Dataset>,
        chunk_size: u64,
        options: ChunkingOptions,
    ) -> Result<DatasetChunkingClient> {
        let rank = dataset.shape.len();
        if !(1..=2).contains(&rank) {
            return Err(Error::selection(
                &dataset.path,
                format!("chunked reads need a 1 or 2 dimensional dataset, not rank {rank}"),
            ));
        }

        if chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".into()));
        }

        let num_channels = dataset.shape.get(1).copied().unwrap_or(1);
        let channels = match &options.visible_channels {
            Some(r) if r.start >= r.end || r.end > num_channels => {
                return Err(Error::selection(
                    &dataset.path,
                    format!("channels {r:?} outside 0..{num_channels}"),
                ));
            }
            Some(r) => r.clone(),
            None => 0..num_channels.min(options.max_channels),
        };

        let (conversion, offset) = if options.ignore_conversion {
            (1.0, 0.0)
        } else {
            (
                dataset
                    .attr_f64("conversion")
                    .filter(|c| *c != 0.0)
                    .unwrap_or(1.0),
                dataset.attr_f64("offset").unwrap_or(0.0),
            )
        };

        let chunks = match options.max_cached_chunks {
            Some(n) => LruCache::new(n),
            None => LruCache::unbounded(),
        };

        debug!(
            "{}: chunking {:?} in chunks of {} samples, channels {:?}",
            dataset.path, dataset.shape, chunk_size, channels
        );

        Ok(DatasetChunkingClient {
            source,
            dataset,
            chunk_size,
            channels,
            conversion,
            offset,
            options,
            chunks,
            noise: None,
        })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn channels(&self) -> Range<u64> {
        self.channels.clone()
    }

    pub fn num_samples(&self) -> u64 {
        self.dataset.shape[0]
    }

    pub fn num_chunks(&self) -> u64 {
        self.num_samples().div_ceil(self.chunk_size)
    }

    pub fn num_cached_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Noise level used for automatic channel separation, once estimated.
    pub fn noise_level(&self) -> Option<f64> {
        self.noise
    }

    /// Samples of chunks `start..end` for every channel.
    ///
    /// Chunks past the end of the dataset are ignored. Cancellation is not an error: the
    /// chunks loaded so far are returned with `completed: false`.
    pub async fn get_concatenated_chunk(
        &mut self,
        start: u64,
        end: u64,
        canceler: &Canceler,
    ) -> Result<ConcatenatedChunk> {
        if self.options.auto_channel_separation.is_some() && self.noise.is_none() {
            match self.estimate_noise(canceler).await {
                Ok(()) => {}
                Err(e) if e.is_canceled() => {}
                Err(e) => return Err(e),
            }
        }

        let end = end.min(self.num_chunks());
        let start = start.min(end);

        // Progress is kept between calls only if the whole range fits in the cache.
        let resumable = self
            .options
            .max_cached_chunks
            .map_or(true, |n| n.get() as u64 >= end - start);

        let timer = Instant::now();
        let mut available = Vec::with_capacity((end - start) as usize);
        let mut completed = true;

        for ci in start..end {
            if let Some(c) = self.chunks.get(&ci) {
                available.push((ci, Arc::clone(c)));
                continue;
            }

            if canceler.is_canceled() {
                completed = false;
                break;
            }

            let chunk = match self.load_chunk(ci, canceler).await {
                Ok(c) => c,
                Err(e) if e.is_canceled() => {
                    completed = false;
                    break;
                }
                Err(e) => return Err(e),
            };

            // Canceled while loading, the result belongs to a range nobody wants anymore.
            if canceler.is_canceled() {
                completed = false;
                break;
            }

            self.chunks.put(ci, Arc::clone(&chunk));
            available.push((ci, chunk));

            if resumable
                && timer.elapsed() > self.options.time_budget
                && (ci + 1..end).any(|c| !self.chunks.contains(&c))
            {
                trace!(
                    "{}: time budget spent after chunk {} of {}..{}",
                    self.dataset.path,
                    ci,
                    start,
                    end
                );
                completed = false;
                break;
            }
        }

        Ok(ConcatenatedChunk {
            data: self.assemble(start, end, &available),
            completed,
        })
    }

    /// Repeat [`Self::get_concatenated_chunk`] until the range is complete or `canceler`
    /// fires, yielding every intermediate result.
    pub fn stream(
        &mut self,
        start: u64,
        end: u64,
        canceler: Canceler,
    ) -> impl Stream<Item = Result<ConcatenatedChunk>> + '_ {
        async_stream::try_stream! {
            loop {
                let chunk = self.get_concatenated_chunk(start, end, &canceler).await?;
                let completed = chunk.completed;
                yield chunk;

                if completed || canceler.is_canceled() {
                    break;
                }
            }
        }
    }

    fn assemble(&self, start: u64, end: u64, available: &[(u64, Arc<Chunk>)]) -> Vec<Vec<f64>> {
        let first = start * self.chunk_size;
        let n = (end * self.chunk_size)
            .min(self.num_samples())
            .saturating_sub(first);
        let noise = self.noise.unwrap_or(0.0);

        let mut data = vec![vec![f64::NAN; n as usize]; self.channels.clone().count()];

        for (ci, chunk) in available {
            let off = (ci * self.chunk_size - first) as usize;

            for (i, (row, values)) in data.iter_mut().zip(chunk.iter()).enumerate() {
                let separation = self
                    .options
                    .auto_channel_separation
                    .map_or(0.0, |f| i as f64 * f * noise);

                for (dst, v) in row[off..off + values.len()].iter_mut().zip(values) {
                    *dst = v + separation;
                }
            }
        }

        data
    }

    async fn load_chunk(&self, ci: u64, canceler: &Canceler) -> Result<Arc<Chunk>> {
        let i1 = ci * self.chunk_size;
        let i2 = (i1 + self.chunk_size).min(self.num_samples());
        let samples = (i2 - i1) as usize;
        let nc = self.channels.clone().count();

        let slice = if self.dataset.shape.len() == 1 {
            vec![i1..i2]
        } else {
            vec![i1..i2, self.channels.clone()]
        };

        debug!("{}: loading chunk {} ({}..{})", self.dataset.path, ci, i1, i2);

        let values = self
            .source
            .get_dataset_data(
                &self.dataset.path,
                DataOptions::new()
                    .slice(slice)
                    .allow_big_int(true)
                    .canceler(canceler),
            )
            .await?
            .to_f64_vec();

        if values.len() != samples * nc {
            return Err(Error::Decode(format!(
                "{}: chunk {} has {} values, expected {}",
                self.dataset.path,
                ci,
                values.len(),
                samples * nc
            )));
        }

        let chunk = (0..nc)
            .map(|i| {
                (0..samples)
                    .map(|j| values[i + j * nc] * self.conversion + self.offset)
                    .collect()
            })
            .collect();

        Ok(Arc::new(chunk))
    }

    /// Three times the median RMS of short sections of the first chunk.
    async fn estimate_noise(&mut self, canceler: &Canceler) -> Result<()> {
        if self.num_chunks() == 0 {
            self.noise = Some(0.0);
            return Ok(());
        }

        let chunk = match self.chunks.get(&0) {
            Some(c) => Arc::clone(c),
            None => {
                let c = self.load_chunk(0, canceler).await?;
                self.chunks.put(0, Arc::clone(&c));
                c
            }
        };

        let mut rms: Vec<f64> = chunk
            .iter()
            .flat_map(|row| {
                let n = row.len().min(NOISE_SECTION * NOISE_SECTIONS);
                row[..n].chunks(NOISE_SECTION).map(|s| {
                    (s.iter().map(|x| x * x).sum::<f64>() / s.len() as f64).sqrt()
                })
            })
            .filter(|v| !v.is_nan())
            .collect();

        let noise = 3.0 * median(&mut rms).unwrap_or(0.0);
        debug!("{}: noise level {}", self.dataset.path, noise);
        self.noise = Some(noise);

        Ok(())
    }
}

fn median(v: &mut [f64]) -> Option<f64> {
    if v.is_empty() {
        return None;
    }

    v.sort_by(f64::total_cmp);
    let m = v.len() / 2;

    if v.len() % 2 == 0 {
        Some((v[m - 1] + v[m]) / 2.0)
    } else {
        Some(v[m])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::RemoteFile;
    use crate::model::Attributes;
    use crate::worker::{MemoryFile, MemoryStore, WorkerPool};
    use crate::Config;
    use futures::TryStreamExt;
    use serde_json::json;

    /// A `samples x channels` dataset where sample `s` of channel `c` is `s * 10 + c`.
    fn store(samples: u64, channels: u64, attrs: Attributes) -> MemoryStore {
        let values: Vec<i32> = (0..samples)
            .flat_map(|s| (0..channels).map(move |c| (s * 10 + c) as i32))
            .collect();

        let mut f = MemoryFile::new();
        f.insert_dataset("/ts/data", vec![samples, channels], values, attrs)
            .unwrap();
        f.insert_dataset(
            "/ts1/data",
            vec![samples],
            (0..samples).map(|s| s as f32).collect::<Vec<_>>(),
            Attributes::new(),
        )
        .unwrap();

        let store = MemoryStore::new();
        store.insert("mem://f", f);
        store
    }

    async fn client(
        store: &MemoryStore,
        path: &str,
        chunk_size: u64,
        options: ChunkingOptions,
        latency: Option<Duration>,
    ) -> Result<DatasetChunkingClient> {
        let pool = WorkerPool::new(&Config::default(), || {
            let d = store.decoder();
            Box::new(match latency {
                Some(l) => d.with_latency(l),
                None => d,
            })
        })?;
        let file = Arc::new(RemoteFile::new("mem://f", None, Arc::new(pool), Config::default()));
        let ds = file.get_dataset(path).await?;
        DatasetChunkingClient::new(file, ds, chunk_size, options)
    }

    #[tokio::test]
    async fn concatenate() {
        let mut attrs = Attributes::new();
        attrs.insert("conversion".into(), json!(2.0));
        attrs.insert("offset".into(), json!(1.0));
        let store = store(25, 7, attrs);

        let mut c = client(&store, "/ts/data", 10, ChunkingOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(c.channels(), 0..5);
        assert_eq!(c.num_chunks(), 3);

        let r = c.get_concatenated_chunk(1, 10, &Canceler::new()).await.unwrap();
        assert!(r.completed);
        assert_eq!(r.data.len(), 5);
        assert_eq!(r.data[0].len(), 15);
        assert_eq!(r.data[3][0], (100.0 + 3.0) * 2.0 + 1.0);
        assert_eq!(r.data[4][14], (240.0 + 4.0) * 2.0 + 1.0);
        assert_eq!(c.num_cached_chunks(), 2);
    }

    #[tokio::test]
    async fn one_dimensional() {
        let store = store(25, 1, Attributes::new());
        let mut c = client(&store, "/ts1/data", 10, ChunkingOptions::default(), None)
            .await
            .unwrap();

        let r = c.get_concatenated_chunk(0, 3, &Canceler::new()).await.unwrap();
        assert!(r.completed);
        assert_eq!(r.data, vec![(0..25).map(f64::from).collect::<Vec<_>>()]);
    }

    #[tokio::test]
    async fn visible_channels_and_no_conversion() {
        let mut attrs = Attributes::new();
        attrs.insert("conversion".into(), json!(2.0));
        let store = store(10, 7, attrs);

        let options = ChunkingOptions {
            visible_channels: Some(5..7),
            ignore_conversion: true,
            ..Default::default()
        };
        let mut c = client(&store, "/ts/data", 4, options, None).await.unwrap();

        let r = c.get_concatenated_chunk(0, 3, &Canceler::new()).await.unwrap();
        assert_eq!(r.data.len(), 2);
        assert_eq!(r.data[0][9], 95.0);
        assert_eq!(r.data[1][0], 6.0);
    }

    #[tokio::test]
    async fn preconditions() {
        let store = store(10, 3, Attributes::new());

        assert!(client(&store, "/ts/data", 0, ChunkingOptions::default(), None)
            .await
            .is_err());

        for channels in [2..4, 2..2] {
            let options = ChunkingOptions {
                visible_channels: Some(channels),
                ..Default::default()
            };
            let e = client(&store, "/ts/data", 4, options, None)
                .await
                .err()
                .unwrap();
            assert!(matches!(e, Error::InvalidSelection { .. }));
        }

        let ds = Arc::new(Dataset {
            name: "cube".into(),
            path: "/cube".into(),
            shape: vec![2, 2, 2],
            dtype: "<f4".into(),
            attrs: Attributes::new(),
        });
        let pool = WorkerPool::new(&Config::default(), || Box::new(store.decoder())).unwrap();
        let file = Arc::new(RemoteFile::new("mem://f", None, Arc::new(pool), Config::default()));
        assert!(DatasetChunkingClient::new(file, ds, 1, ChunkingOptions::default()).is_err());
    }

    #[tokio::test]
    async fn time_budget_converges() {
        let store = store(50, 2, Attributes::new());
        let options = ChunkingOptions {
            time_budget: Duration::from_millis(1),
            ..Default::default()
        };
        let mut c = client(&store, "/ts/data", 10, options, Some(Duration::from_millis(20)))
            .await
            .unwrap();

        let mut calls = 0;
        let r = loop {
            calls += 1;
            let r = c.get_concatenated_chunk(0, 5, &Canceler::new()).await.unwrap();
            assert_eq!(r.data[0].len(), 50);

            if r.completed {
                break r;
            }
            assert_eq!(c.num_cached_chunks(), calls);
            assert!(r.data[0][49].is_nan());
        };
        assert_eq!(calls, 5);

        let mut full = client(&store, "/ts/data", 10, ChunkingOptions::default(), None)
            .await
            .unwrap();
        let expected = full.get_concatenated_chunk(0, 5, &Canceler::new()).await.unwrap();
        assert_eq!(r, expected);
    }

    #[tokio::test]
    async fn canceled() {
        let store = store(30, 2, Attributes::new());
        let mut c = client(&store, "/ts/data", 10, ChunkingOptions::default(), None)
            .await
            .unwrap();

        let canceler = Canceler::new();
        canceler.cancel();
        let r = c.get_concatenated_chunk(0, 3, &canceler).await.unwrap();
        assert!(!r.completed);
        assert!(r.data.iter().flatten().all(|v| v.is_nan()));
        assert_eq!(c.num_cached_chunks(), 0);

        let r = c.get_concatenated_chunk(0, 3, &Canceler::new()).await.unwrap();
        assert!(r.completed);
    }

    #[tokio::test]
    async fn bounded_cache() {
        let store = store(30, 1, Attributes::new());
        let options = ChunkingOptions {
            max_cached_chunks: NonZeroUsize::new(2),
            ..Default::default()
        };
        let mut c = client(&store, "/ts/data", 10, options, None).await.unwrap();

        let r = c.get_concatenated_chunk(0, 3, &Canceler::new()).await.unwrap();
        assert!(r.completed);
        assert!(r.data[0].iter().all(|v| !v.is_nan()));
        assert_eq!(c.num_cached_chunks(), 2);
    }

    #[tokio::test]
    async fn range_larger_than_bounded_cache() {
        let store = store(50, 1, Attributes::new());
        let options = ChunkingOptions {
            time_budget: Duration::ZERO,
            max_cached_chunks: NonZeroUsize::new(2),
            ..Default::default()
        };
        let mut c = client(&store, "/ts/data", 10, options, None).await.unwrap();

        for _ in 0..2 {
            let r = c.get_concatenated_chunk(0, 5, &Canceler::new()).await.unwrap();
            assert!(r.completed);
            assert_eq!(r.data[0][49], 490.0);
            assert!(r.data[0].iter().all(|v| !v.is_nan()));
            assert_eq!(c.num_cached_chunks(), 2);
        }

        // A range that fits is still loaded one chunk per call.
        let r = c.get_concatenated_chunk(2, 4, &Canceler::new()).await.unwrap();
        assert!(!r.completed);
        let r = c.get_concatenated_chunk(2, 4, &Canceler::new()).await.unwrap();
        assert!(r.completed);
        assert_eq!(r.data[0][0], 200.0);
    }

    #[tokio::test]
    async fn out_of_range_chunks() {
        let store = store(15, 1, Attributes::new());
        let mut c = client(&store, "/ts/data", 10, ChunkingOptions::default(), None)
            .await
            .unwrap();

        let r = c.get_concatenated_chunk(1, 100, &Canceler::new()).await.unwrap();
        assert!(r.completed);
        assert_eq!(r.data[0].len(), 5);

        let r = c.get_concatenated_chunk(7, 9, &Canceler::new()).await.unwrap();
        assert!(r.completed);
        assert!(r.data[0].is_empty());
    }

    #[tokio::test]
    async fn auto_channel_separation() {
        // Alternating +-1 on every channel: RMS 1, noise level 3.
        let values: Vec<f32> = (0..200)
            .flat_map(|s| {
                let v = if s % 2 == 0 { 1.0 } else { -1.0 };
                [v, v, v]
            })
            .collect();
        let mut f = MemoryFile::new();
        f.insert_dataset("/ts/data", vec![200, 3], values, Attributes::new())
            .unwrap();
        let store = MemoryStore::new();
        store.insert("mem://f", f);

        let options = ChunkingOptions {
            auto_channel_separation: Some(2.0),
            ..Default::default()
        };
        let mut c = client(&store, "/ts/data", 100, options, None).await.unwrap();

        let r = c.get_concatenated_chunk(0, 2, &Canceler::new()).await.unwrap();
        assert_eq!(c.noise_level(), Some(3.0));
        assert_eq!(r.data[0][0], 1.0);
        assert_eq!(r.data[1][0], 1.0 + 6.0);
        assert_eq!(r.data[2][1], -1.0 + 12.0);
    }

    #[tokio::test]
    async fn stream_until_complete() {
        let store = store(30, 1, Attributes::new());
        let options = ChunkingOptions {
            time_budget: Duration::ZERO,
            ..Default::default()
        };
        let mut c = client(&store, "/ts/data", 10, options, None).await.unwrap();

        let results: Vec<_> = c
            .stream(0, 3, Canceler::new())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(!results[0].completed);
        assert!(results[2].completed);
        assert_eq!(results[2].data[0][29], 290.0);
    }

    #[test]
    fn median_is_numeric() {
        assert_eq!(median(&mut []), None);
        assert_eq!(median(&mut [10.0, 9.0, 2.0]), Some(9.0));
        assert_eq!(median(&mut [10.0, 9.0, 2.0, 1.0]), Some(5.5));
    }
}
