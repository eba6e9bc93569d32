//! Settings for the worker pool and remote file clients.
//!
//! All fields have defaults matching the behaviour of the viewer this layer was built for,
//! so a configuration file only needs to name the values it changes:
//!
//! ```
//! use remoteh5::Config;
//!
//! let c = Config::from_json(r#"{ "workers": 2, "request_timeout_secs": 30 }"#).unwrap();
//! assert_eq!(c.workers, 2);
//! assert_eq!(c.small_read_threshold, 100);
//! ```
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Block size hint for reads against the primary file.
pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024;

/// Block size hint for reads against the metadata file.
pub const DEFAULT_META_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of background workers. Every worker loads the file metadata on its own on first
    /// use, so more workers mean a slower first read.
    pub workers: usize,

    /// Ceiling for a single dispatched request.
    pub request_timeout_secs: u64,

    /// Reads of at most this many elements go to the metadata URL when one is configured.
    pub small_read_threshold: u64,

    pub chunk_size: u64,
    pub meta_chunk_size: u64,

    /// Fail instead of wrapping when narrowing 64-bit integers to 32 bits.
    pub strict_narrowing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workers: 1,
            request_timeout_secs: 180,
            small_read_threshold: 100,
            chunk_size: DEFAULT_CHUNK_SIZE,
            meta_chunk_size: DEFAULT_META_CHUNK_SIZE,
            strict_narrowing: false,
        }
    }
}

impl Config {
    pub fn from_json(s: &str) -> Result<Config> {
        let c: Config = serde_json::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        c.validate()?;
        Ok(c)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("at least one worker is required".into()));
        }
        if self.chunk_size == 0 || self.meta_chunk_size == 0 {
            return Err(Error::Config("chunk sizes must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.workers, 1);
        assert_eq!(c.request_timeout(), Duration::from_secs(180));
        assert_eq!(c.chunk_size, 102400);
        assert_eq!(c.meta_chunk_size, 4194304);
        c.validate().unwrap();
    }

    #[test]
    fn partial_json() {
        let c = Config::from_json(r#"{ "strict_narrowing": true }"#).unwrap();
        assert!(c.strict_narrowing);
        assert_eq!(c.workers, 1);
    }

    #[test]
    fn reject_zero_workers() {
        let e = Config::from_json(r#"{ "workers": 0 }"#).unwrap_err();
        assert!(matches!(e, Error::Config(_)));
    }

    #[test]
    fn reject_garbage() {
        assert!(Config::from_json("{ workers: }").is_err());
    }
}
