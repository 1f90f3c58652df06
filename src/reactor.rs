//! The reactor: a single thread polling the listening socket and every
//! accepted connection with `mio`, dispatching I/O work to a
//! [`WorkerPool`] and reinserting completions, with an indexed timer
//! heap enforcing idle-connection timeouts.
//!
//! Grounded in the accept/dispatch/close-connection shape of the
//! teacher's `listener.rs`, generalized from a single generic
//! `TcpListener`/`TcpStream` pair to the concrete `mio::net` types (no
//! TLS, no swappable transport — this server only ever speaks plain
//! HTTP/1.1 over TCP) and from per-connection locking to the
//! move-ownership-through-a-channel handoff described in
//! [`crate::worker`].

use std::io::{ErrorKind, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use socket2::{Domain, Socket, Type};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::ConnectionState;
use crate::error::ReactorError;
use crate::timer::TimerHeap;
use crate::worker::{Completion, Job, JobOutcome, RequestContext, WorkerPool};

const LISTEN_TOKEN: Token = Token(usize::MAX);
const WAKE_TOKEN: Token = Token(usize::MAX - 1);

/// Backlog for the listening socket's completed-connection queue.
/// `mio::net::TcpListener::bind` doesn't expose a way to tune this, so
/// the socket is built with `socket2` first and converted in.
const LISTEN_BACKLOG: i32 = 6;

/// How long a closed socket lingers attempting to flush pending writes
/// before the kernel drops it, matching the original's `SO_LINGER`.
const SO_LINGER: Duration = Duration::from_secs(20);

/// A slab slot. `connection` is `None` while the connection is on loan
/// to a worker as part of an in-flight [`Job`] — nothing is registered
/// with `poll` for it during that window, satisfying the "at most one
/// outstanding interest or job per connection" invariant for free.
struct Slot {
    connection: Option<ConnectionState>,
    generation: u64,
}

/// Expired idle timers accumulate here from [`TimerHeap`] callbacks,
/// which run synchronously inside [`Reactor::run`]'s own thread but
/// can't borrow `self` directly (the heap is already borrowed mutably
/// by the `tick()` call invoking them). The `Arc<Mutex<_>>` costs
/// nothing in practice: only the reactor thread ever touches it.
type ExpiredTokens = Arc<Mutex<Vec<(Token, u64)>>>;

/// The reactor's single-threaded accept/poll loop, plus the worker
/// pool it dispatches connection I/O to.
pub struct Reactor {
    listener: TcpListener,
    poll: Poll,
    slots: Slab<Slot>,
    /// Per-slab-key generation counter, indexed by key. Unlike `Slot`
    /// itself, an entry here survives the slot being removed, so the
    /// next connection to reuse a freed key is guaranteed a strictly
    /// greater generation than whatever previously occupied it — the
    /// property `close_expired`/`handle_completion` rely on to recognize
    /// a callback or completion as stale.
    generations: Vec<u64>,
    timers: TimerHeap,
    expired: ExpiredTokens,
    timeout: Duration,
    max_connections: usize,
    max_header_bytes: usize,
    workers: WorkerPool,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
}

impl Reactor {
    /// Binds the listening socket and spins up the worker pool. Does
    /// not start polling — call [`Reactor::run`] for that.
    pub fn bind(config: &Config, context: RequestContext) -> Result<Self, ReactorError> {
        let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
        let mut listener = bind_listener(addr, config.linger_on)?;

        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTEN_TOKEN, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (completions_tx, completions_rx) = crossbeam_channel::unbounded();

        let worker_count = config.worker_count();
        let workers = WorkerPool::new(
            worker_count,
            config.max_queue_depth,
            completions_tx.clone(),
            waker,
            context,
        );

        info!(port = config.port, workers = worker_count, "reactor bound and listening");

        Ok(Self {
            listener,
            poll,
            slots: Slab::with_capacity(config.max_connections),
            generations: Vec::with_capacity(config.max_connections),
            timers: TimerHeap::new(),
            expired: Arc::new(Mutex::new(Vec::new())),
            timeout: Duration::from_millis(config.timeout_ms),
            max_connections: config.max_connections,
            max_header_bytes: config.max_header_bytes,
            workers,
            completions_tx,
            completions_rx,
        })
    }

    /// The address the listening socket is actually bound to. Useful
    /// in tests that bind to port 0 and need to learn the OS-assigned
    /// port before connecting.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept/poll loop until the process is killed. The
    /// wait passed to `poll` is capped by the nearest idle-connection
    /// expiry so timeouts fire promptly even with no socket activity.
    pub fn run(mut self) -> ! {
        let mut events = Events::with_capacity(1024);
        loop {
            let wait = self.timers.next_tick_ms().map(Duration::from_millis);

            if let Err(e) = self.poll.poll(&mut events, wait) {
                if e.kind() != ErrorKind::Interrupted {
                    warn!(error = %e, "poll failed");
                }
                continue;
            }

            self.timers.tick();
            self.close_expired();

            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => self.accept(),
                    WAKE_TOKEN => self.drain_completions(),
                    token => self.dispatch(token, event),
                }
            }
        }
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.admit(stream, addr),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }

    fn admit(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        if self.slots.len() >= self.max_connections {
            warn!(error = %ReactorError::TableFull(self.max_connections), %addr, "shedding new connection");
            let _ = stream.write_all(b"Server busy!");
            drop(stream);
            return;
        }

        let _ = stream.set_nodelay(true);
        let entry = self.slots.vacant_entry();
        let token = Token(entry.key());
        let generation = self.bump_generation(token);

        let mut connection = ConnectionState::new(stream, token, generation, addr, self.max_header_bytes);
        if let Err(e) = connection.register(self.poll.registry()) {
            warn!(error = %e, %addr, "failed to register new connection");
            return;
        }

        self.schedule_timeout(token, generation);
        entry.insert(Slot { connection: Some(connection), generation });
    }

    /// Advances and returns the generation for `token`'s slab key,
    /// growing the tracking vector on first use of a key.
    fn bump_generation(&mut self, token: Token) -> u64 {
        if token.0 >= self.generations.len() {
            self.generations.resize(token.0 + 1, 0);
        }
        self.generations[token.0] += 1;
        self.generations[token.0]
    }

    fn schedule_timeout(&mut self, token: Token, generation: u64) {
        let expired = self.expired.clone();
        self.timers.add(token, self.timeout, move || {
            expired.lock().unwrap().push((token, generation));
        });
    }

    fn close_expired(&mut self) {
        let tokens: Vec<(Token, u64)> = self.expired.lock().unwrap().drain(..).collect();
        for (token, generation) in tokens {
            let Some(slot) = self.slots.get_mut(token.0) else { continue };
            if slot.generation != generation {
                continue;
            }
            // `connection` is `None` while the slot's work is on loan
            // to a worker; that job's own completion will reschedule a
            // fresh timeout, so there's nothing to expire right now.
            if let Some(mut connection) = slot.connection.take() {
                let _ = connection.deregister(self.poll.registry());
                self.slots.try_remove(token.0);
            }
        }
    }

    fn dispatch(&mut self, token: Token, event: &mio::event::Event) {
        let Some(slot) = self.slots.get_mut(token.0) else { return };

        if event.is_error() || event.is_read_closed() || event.is_write_closed() {
            self.timers.remove(token);
            if let Some(mut connection) = slot.connection.take() {
                let _ = connection.deregister(self.poll.registry());
            }
            self.slots.try_remove(token.0);
            return;
        }

        let Some(connection) = slot.connection.take() else {
            return; // in-flight job; spurious or coalesced readiness
        };

        self.timers.remove(token);

        let job = Job {
            token,
            generation: slot.generation,
            connection,
            readable: event.is_readable(),
            writable: event.is_writable(),
        };
        if self.workers.dispatch(job).is_err() {
            warn!(?token, "worker pool unavailable, dropping connection");
            self.slots.try_remove(token.0);
        }
    }

    fn drain_completions(&mut self) {
        loop {
            let completion = match self.completions_rx.try_recv() {
                Ok(completion) => completion,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
            };
            self.handle_completion(completion);
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        let Completion { token, generation, mut connection, outcome } = completion;
        let Some(slot) = self.slots.get_mut(token.0) else { return };
        if slot.generation != generation {
            return; // stale completion for a slot already reused
        }

        match outcome {
            JobOutcome::Close => {
                let _ = connection.deregister(self.poll.registry());
                self.slots.try_remove(token.0);
            }
            JobOutcome::Continue => {
                if connection.reregister(self.poll.registry()).is_err() {
                    self.slots.try_remove(token.0);
                    return;
                }
                self.schedule_timeout(token, generation);
                slot.connection = Some(connection);
            }
        }
    }
}

/// Builds the listening socket with `socket2` so it can carry the
/// backlog and linger settings `mio::net::TcpListener::bind` doesn't
/// expose, then hands it to `mio` as a plain nonblocking std socket.
/// `linger_on` is `Config::linger_on`; when `false` the socket resets
/// on close instead of flushing pending writes for `SO_LINGER`.
fn bind_listener(addr: SocketAddr, linger_on: bool) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    if linger_on {
        socket.set_linger(Some(SO_LINGER))?;
    }
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}
