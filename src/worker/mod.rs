//! Background workers and the request protocol spoken with them.
//!
//! The parsing of the container format is done by a [`Decode`] implementation. Each worker
//! owns one and runs it on a dedicated thread, so slow remote reads never block the async
//! runtime. Requests reach a worker through a [`WorkerPool`], which queues them per worker,
//! balances load, and applies the global timeout and cancellation.
use std::ops::Range;

use crate::data::DataBuffer;
use crate::model::{Dataset, Group};

pub mod memory;
pub mod pool;
mod queue;

pub use memory::{MemoryDecoder, MemoryFile, MemoryStore};
pub use pool::{Ticket, WorkerPool};

#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    GetGroup,
    GetDataset,
    /// `None` reads the whole dataset.
    GetDatasetData { slice: Option<Vec<Range<u64>>> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub kind: RequestKind,
    pub url: String,
    pub path: String,
    /// Block size hint for the remote reads done by the decoder.
    pub chunk_size: u64,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self.kind {
            RequestKind::GetGroup => "getGroup",
            RequestKind::GetDataset => "getDataset",
            RequestKind::GetDatasetData { .. } => "getDatasetData",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Group(Group),
    Dataset(Dataset),
    Data(DataBuffer),
}

/// Reply envelope sent by a worker, correlated to its request by id.
#[derive(Debug)]
pub struct Response {
    pub request_id: u64,
    pub success: bool,
    pub payload: Option<Payload>,
    pub error: Option<String>,
}

impl Response {
    pub(crate) fn from_result(request_id: u64, r: Result<Payload, anyhow::Error>) -> Response {
        match r {
            Ok(payload) => Response {
                request_id,
                success: true,
                payload: Some(payload),
                error: None,
            },
            Err(e) => Response {
                request_id,
                success: false,
                payload: None,
                error: Some(format!("{e:#}")),
            },
        }
    }
}

/// The decode capability: answers one request against the file at `request.url`.
///
/// Implementations may keep per-file state (such as a parsed index) between requests; a
/// worker never calls `decode` concurrently.
pub trait Decode: Send + 'static {
    fn decode(&mut self, request: &Request) -> Result<Payload, anyhow::Error>;
}

impl<F> Decode for F
where
    F: FnMut(&Request) -> Result<Payload, anyhow::Error> + Send + 'static,
{
    fn decode(&mut self, request: &Request) -> Result<Payload, anyhow::Error> {
        self(request)
    }
}
