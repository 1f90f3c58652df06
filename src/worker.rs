//! Fixed-size worker thread pool draining connection I/O work handed
//! off by the reactor's accept/poll loop.
//!
//! Each worker blocks on a bounded crossbeam channel of [`Job`]s. The
//! reactor hands off full ownership of a connection's
//! [`ConnectionState`] for the duration of a job rather than sharing it
//! behind a lock, so workers need no synchronization to touch it — the
//! one-shot invariant (at most one job in flight per connection at a
//! time) is enforced by the reactor never dispatching a second job for
//! a token until the first one's `Completion` has been drained.
//!
//! This sidesteps the `Arc<Mutex<Connection>>` tradeoff entirely rather
//! than accepting its contention risk under load.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use mio::{Token, Waker};
use tracing::{error, warn};

use crate::connection::{ConnectionState, ReadOutcome, WriteOutcome};
use crate::db::UserStore;
use crate::parser::method::Method;
use crate::parser::request::Request;
use crate::parser::response::{Response, ResponseBuilder};
use crate::parser::status::Status;
use crate::parser::version::Version;

/// Outcome of a completed job, reported back to the reactor.
pub enum JobOutcome {
    /// The connection should be reregistered for more events.
    Continue,
    /// The connection should be deregistered and dropped.
    Close,
}

/// One unit of I/O work: drain whatever is readable and/or writable on
/// a connection handed off by the reactor.
pub struct Job {
    pub token: Token,
    pub generation: u64,
    pub connection: ConnectionState,
    pub readable: bool,
    pub writable: bool,
}

/// Reported back to the reactor once a [`Job`] has run to completion
/// (or hit `WouldBlock` in both directions).
pub struct Completion {
    pub token: Token,
    pub generation: u64,
    pub connection: ConnectionState,
    pub outcome: JobOutcome,
}

/// Shared, cheaply-cloned context every worker needs to route a fully
/// parsed request: where to serve static files from, and how to check
/// credentials for the login/register routes.
#[derive(Clone)]
pub struct RequestContext {
    pub responses: ResponseBuilder,
    pub users: Arc<dyn UserStore>,
}

/// A fixed pool of worker threads pulling jobs off a bounded channel.
pub struct WorkerPool {
    sender: Sender<Job>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` worker threads, each draining jobs and reporting
    /// completions on `completions`, waking `waker` after every send so
    /// the reactor's blocked `poll` returns promptly.
    pub fn new(
        count: usize,
        queue_capacity: usize,
        completions: Sender<Completion>,
        waker: Arc<Waker>,
        context: RequestContext,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(queue_capacity);
        let handles = (0..count.max(1))
            .map(|id| {
                let receiver: Receiver<Job> = receiver.clone();
                let completions = completions.clone();
                let waker = waker.clone();
                let context = context.clone();
                std::thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn(move || run_worker(receiver, completions, waker, context))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { sender, handles }
    }

    /// Hands a job to the pool. Blocks if every worker is busy and the
    /// bounded queue is full, applying backpressure to the reactor
    /// thread rather than letting the queue grow without bound.
    pub fn dispatch(&self, job: Job) -> Result<(), crossbeam_channel::SendError<Job>> {
        self.sender.send(job)
    }

    /// Drops the sending half, letting every worker's `recv` loop exit
    /// once the queue drains, then joins all threads.
    pub fn shutdown(self) {
        drop(self.sender);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn run_worker(receiver: Receiver<Job>, completions: Sender<Completion>, waker: Arc<Waker>, context: RequestContext) {
    while let Ok(job) = receiver.recv() {
        let Job { token, generation, mut connection, readable, writable } = job;

        let outcome = process(&mut connection, readable, writable, &context);

        if completions
            .send(Completion { token, generation, connection, outcome })
            .is_err()
        {
            return; // reactor has shut down
        }
        if let Err(e) = waker.wake() {
            error!(error = %e, "failed to wake reactor after completing job");
        }
    }
}

fn process(
    connection: &mut ConnectionState,
    readable: bool,
    writable: bool,
    context: &RequestContext,
) -> JobOutcome {
    if readable {
        drain_reads(connection);
        drain_requests(connection, context);
    }

    if writable && connection.has_pending_response() {
        match connection.write_once() {
            Ok(WriteOutcome::Flushed) => {
                if !connection.pending_keep_alive() {
                    connection.mark_closed();
                }
            }
            Ok(WriteOutcome::WouldBlock) => {}
            Err(e) => {
                warn!(error = %e, token = ?connection.token(), "write error, closing connection");
                connection.mark_closed();
            }
        }
    }

    if connection.is_closed() {
        JobOutcome::Close
    } else {
        JobOutcome::Continue
    }
}

fn drain_reads(connection: &mut ConnectionState) {
    loop {
        match connection.read_once() {
            Ok(ReadOutcome::Closed) => {
                connection.mark_closed();
                return;
            }
            Ok(ReadOutcome::WouldBlock) => return,
            Ok(ReadOutcome::Progress) => {}
            Err(e) => {
                warn!(error = %e, token = ?connection.token(), "read error, closing connection");
                connection.mark_closed();
                return;
            }
        }
    }
}

/// Pulls at most one complete request out of the read buffer and queues
/// its response. `ConnectionState` holds only a single pending
/// response at a time, so a second fully-buffered request (pipelined
/// ahead of the reactor writing the first one back) is left in the
/// read buffer rather than routed immediately — it's picked up on the
/// next readable event once the current response has been flushed and
/// the connection re-armed, per the read→process→write state machine.
fn drain_requests(connection: &mut ConnectionState, context: &RequestContext) {
    match connection.take_request() {
        Ok(Some(request)) => {
            let response = route(&request, context);
            connection.queue_response(response);
        }
        Ok(None) => {}
        Err(e) => {
            let status = match e {
                crate::error::ParseError::TooLarge => Status::ContentTooLarge,
                _ => Status::BadRequest,
            };
            let response = context.responses.error_page(Version::H1_1, false, status);
            connection.queue_response(response);
        }
    }
}

/// Dispatches a fully parsed request to either the static file server
/// or the login/register handlers.
///
/// A successful login or registration rewrites the served path to
/// `/welcome.html`; a failed one rewrites it to `/error.html`. Both are
/// then served exactly like a `GET` for that path (status 200, body is
/// the page's contents) rather than as a redirect — the login/register
/// forms never see anything but a normal page load in response. Any
/// other `POST` target isn't special-cased at all and falls through to
/// the same static-file path a `GET` would take.
fn route(request: &Request, context: &RequestContext) -> Response {
    match (request.method, request.path.as_str()) {
        (Method::Post, "/login.html") => {
            let fields = request.form_fields();
            let ok = verify(&fields, |u, p| context.users.verify_login(u, p));
            let target = if ok { "/welcome.html" } else { "/error.html" };
            context.responses.serve(target, request.version, request.keep_alive)
        }
        (Method::Post, "/register.html") => {
            let fields = request.form_fields();
            let ok = verify(&fields, |u, p| context.users.register(u, p));
            let target = if ok { "/welcome.html" } else { "/error.html" };
            context.responses.serve(target, request.version, request.keep_alive)
        }
        (Method::Get, path) | (Method::Head, path) | (Method::Post, path) => {
            context.responses.serve(path, request.version, request.keep_alive)
        }
        _ => context.responses.error_page(request.version, request.keep_alive, Status::BadRequest),
    }
}

/// Shared empty-credential short-circuit for the login and register
/// handlers: an empty username or password is rejected before ever
/// touching the user store.
fn verify(
    fields: &std::collections::HashMap<String, String>,
    call: impl FnOnce(&str, &str) -> Result<bool, crate::error::PoolError>,
) -> bool {
    fields
        .get("username")
        .zip(fields.get("password"))
        .filter(|(u, p)| !u.is_empty() && !p.is_empty())
        .map(|(u, p)| call(u, p).unwrap_or(false))
        .unwrap_or(false)
}
