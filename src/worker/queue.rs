//! One worker: a decode thread plus the dispatcher task that owns its queue.
//!
//! The dispatcher holds the FIFO of pending requests and the single running slot. Everything
//! else talks to it through [`Command`]s, so the queue itself is never shared.
use std::collections::VecDeque;
use std::future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};

use super::{Decode, Payload, Request, Response};
use crate::{Canceler, Error, Result};

pub(crate) type Reply = oneshot::Sender<Result<Payload>>;

pub(crate) enum Command {
    Post {
        id: u64,
        request: Request,
        reply: Reply,
        canceler: Canceler,
    },
    Cancel(u64),
    Respond(Response),
}

struct Pending {
    id: u64,
    request: Request,
    reply: Reply,
    canceler: Canceler,
}

struct Running {
    id: u64,
    reply: Reply,
    deadline: Instant,
}

/// Handle kept by the pool for each worker.
pub(crate) struct WorkerHandle {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    /// Running plus pending requests.
    pub(crate) load: Arc<AtomicUsize>,
}

impl WorkerHandle {
    /// Start the decode thread and the dispatcher task. Must be called within a tokio
    /// runtime.
    pub(crate) fn spawn(
        index: usize,
        decoder: Box<dyn Decode>,
        timeout: Duration,
    ) -> std::io::Result<WorkerHandle> {
        let (commands, rx) = mpsc::unbounded_channel();
        let (jobs, job_rx) = mpsc::unbounded_channel();
        let load = Arc::new(AtomicUsize::new(0));

        let responses = commands.clone();
        thread::Builder::new()
            .name(format!("remoteh5-worker-{index}"))
            .spawn(move || decode_loop(decoder, job_rx, responses))?;

        let dispatcher = Dispatcher {
            index,
            commands: rx,
            jobs,
            pending: VecDeque::new(),
            running: None,
            timeout,
            load: Arc::clone(&load),
        };
        tokio::spawn(dispatcher.run());

        Ok(WorkerHandle { commands, load })
    }

    pub(crate) fn load(&self) -> usize {
        self.load.load(Ordering::SeqCst)
    }
}

/// Body of the worker thread. Exits when the dispatcher goes away.
fn decode_loop(
    mut decoder: Box<dyn Decode>,
    mut jobs: mpsc::UnboundedReceiver<(u64, Request)>,
    responses: mpsc::UnboundedSender<Command>,
) {
    while let Some((id, request)) = jobs.blocking_recv() {
        trace!("worker: {} {} (id {})", request.name(), request.path, id);
        let r = decoder.decode(&request);
        let response = Response::from_result(id, r);

        if responses.send(Command::Respond(response)).is_err() {
            break;
        }
    }
}

struct Dispatcher {
    index: usize,
    commands: mpsc::UnboundedReceiver<Command>,
    jobs: mpsc::UnboundedSender<(u64, Request)>,
    pending: VecDeque<Pending>,
    running: Option<Running>,
    timeout: Duration,
    load: Arc<AtomicUsize>,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            self.dispatch();

            let deadline = self.running.as_ref().map(|r| r.deadline);

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = expiry(deadline) => self.expire(),
            }
        }

        debug!("worker {}: dispatcher stopped", self.index);
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Post {
                id,
                request,
                reply,
                canceler,
            } => {
                self.pending.push_back(Pending {
                    id,
                    request,
                    reply,
                    canceler,
                });
            }

            Command::Cancel(id) => {
                if let Some(i) = self.pending.iter().position(|p| p.id == id) {
                    if let Some(p) = self.pending.remove(i) {
                        debug!("worker {}: canceled queued request {}", self.index, id);
                        self.finish(p.reply, Err(Error::Canceled));
                    }
                }
                // A running request can not be interrupted, its caller ignores the result.
            }

            Command::Respond(response) => match self.running.take() {
                Some(r) if r.id == response.request_id => {
                    let result = if response.success {
                        response
                            .payload
                            .ok_or_else(|| Error::Decode("empty response from worker".into()))
                    } else {
                        Err(Error::Decode(
                            response.error.unwrap_or_else(|| "unknown error".into()),
                        ))
                    };
                    self.finish(r.reply, result);
                }
                other => {
                    self.running = other;
                    debug!(
                        "worker {}: dropping late response for request {}",
                        self.index, response.request_id
                    );
                }
            },
        }
    }

    /// Send the next pending request to the worker thread if it is idle.
    fn dispatch(&mut self) {
        while self.running.is_none() {
            let Some(p) = self.pending.pop_front() else {
                return;
            };

            if p.reply.is_closed() {
                debug!("worker {}: caller of request {} is gone, skipping", self.index, p.id);
                self.load.fetch_sub(1, Ordering::SeqCst);
                continue;
            }

            // The cancel command may still be behind us in the channel.
            if p.canceler.is_canceled() {
                debug!("worker {}: request {} canceled before dispatch", self.index, p.id);
                self.finish(p.reply, Err(Error::Canceled));
                continue;
            }

            trace!(
                "worker {}: dispatching {} {} (id {}, {} pending)",
                self.index,
                p.request.name(),
                p.request.path,
                p.id,
                self.pending.len()
            );

            if self.jobs.send((p.id, p.request)).is_err() {
                self.finish(p.reply, Err(Error::Disconnected));
                continue;
            }

            self.running = Some(Running {
                id: p.id,
                reply: p.reply,
                deadline: Instant::now() + self.timeout,
            });
        }
    }

    fn expire(&mut self) {
        if let Some(r) = self.running.take() {
            warn!(
                "worker {}: request {} timed out after {:?}",
                self.index, r.id, self.timeout
            );
            self.finish(r.reply, Err(Error::Timeout(self.timeout)));
        }
    }

    fn finish(&self, reply: Reply, result: Result<Payload>) {
        self.load.fetch_sub(1, Ordering::SeqCst);
        // The caller may have stopped waiting.
        let _ = reply.send(result);
    }
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(d) => time::sleep_until(d).await,
        None => future::pending().await,
    }
}
