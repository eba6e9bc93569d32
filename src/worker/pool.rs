use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;

use super::queue::{Command, WorkerHandle};
use super::{Decode, Payload, Request};
use crate::{Canceler, Config, Error, Result};

/// A fixed set of long-lived workers. Requests are routed to the least loaded worker and
/// served FIFO per worker.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    next_id: AtomicU64,
}

/// A submitted request. Await [`Ticket::wait`] for the response; dropping the ticket
/// abandons the request (it is skipped if still queued).
#[derive(Debug)]
pub struct Ticket {
    worker: usize,
    rx: oneshot::Receiver<Result<Payload>>,
}

impl Ticket {
    /// Index of the worker the request was assigned to.
    pub fn worker(&self) -> usize {
        self.worker
    }

    pub async fn wait(self) -> Result<Payload> {
        self.rx.await.map_err(|_| Error::Disconnected)?
    }
}

impl WorkerPool {
    /// Start `config.workers` workers, each with its own decoder from `factory`. Must be
    /// called from within a tokio runtime.
    pub fn new<F>(config: &Config, mut factory: F) -> Result<WorkerPool>
    where
        F: FnMut() -> Box<dyn Decode>,
    {
        config.validate()?;

        let workers = (0..config.workers)
            .map(|i| {
                WorkerHandle::spawn(i, factory(), config.request_timeout())
                    .map_err(|e| Error::Config(format!("could not start worker {i}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "worker pool: started {} workers (timeout: {:?})",
            workers.len(),
            config.request_timeout()
        );

        Ok(WorkerPool {
            workers,
            next_id: AtomicU64::new(1),
        })
    }

    /// Queue `request` on the least loaded worker.
    ///
    /// If `canceler` fires while the request is still queued it is removed and the ticket
    /// resolves to [`Error::Canceled`]. Once dispatched the request runs to completion.
    pub fn submit(&self, request: Request, canceler: &Canceler) -> Ticket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();

        let Some((index, worker)) = self
            .workers
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.load())
        else {
            // No workers: the dropped reply fails the ticket.
            return Ticket { worker: 0, rx };
        };

        worker.load.fetch_add(1, Ordering::SeqCst);

        trace!(
            "worker pool: {} {} -> worker {} (id {})",
            request.name(),
            request.path,
            index,
            id
        );

        if worker
            .commands
            .send(Command::Post {
                id,
                request,
                reply,
                canceler: canceler.clone(),
            })
            .is_err()
        {
            // Dispatcher gone, the dropped reply makes the ticket fail with `Disconnected`.
            worker.load.fetch_sub(1, Ordering::SeqCst);
        } else {
            // Registered after posting so that the cancel is always ordered after the post.
            let commands = worker.commands.clone();
            canceler.on_cancel(move || {
                let _ = commands.send(Command::Cancel(id));
            });
        }

        Ticket { worker: index, rx }
    }

    pub async fn post_request(&self, request: Request, canceler: &Canceler) -> Result<Payload> {
        self.submit(request, canceler).wait().await
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Running plus pending requests per worker.
    pub fn loads(&self) -> Vec<usize> {
        self.workers.iter().map(WorkerHandle::load).collect()
    }

    /// Total number of outstanding requests.
    pub fn num_requests(&self) -> usize {
        self.loads().iter().sum()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("loads", &self.loads())
            .finish()
    }
}
