//! Per-connection state: the socket, its read/write buffers, the
//! incremental request parser, and whatever response is currently
//! being drained back to the client.
//!
//! Exactly one worker task or one pending poller interest touches a
//! given [`ConnectionState`] at any instant — the reactor never
//! dispatches a second event for a token until the first has been
//! acknowledged — so despite living in a `Slab` reachable from many
//! threads, a `ConnectionState` itself needs no internal locking.

use std::io::{self, ErrorKind, IoSlice, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::buffer::Buffer;
use crate::parser::request::{ParseOutcome, Request, RequestParser};
use crate::parser::response::Response;

/// What happened on the most recent read attempt.
pub enum ReadOutcome {
    /// The peer closed the connection (a zero-length read).
    Closed,
    /// At least one complete request is ready to be taken via
    /// [`ConnectionState::take_request`]; the caller should keep
    /// calling it until it returns `None`, since pipelined requests can
    /// arrive in a single `read_fd`.
    Progress,
    /// The socket has no more data right now.
    WouldBlock,
}

/// What happened on the most recent write attempt.
pub enum WriteOutcome {
    /// Everything queued has been written to the socket.
    Flushed,
    /// Some bytes remain; the caller should wait for another
    /// writability event.
    WouldBlock,
}

struct PendingResponse {
    head: Vec<u8>,
    head_written: usize,
    body: crate::parser::response::ResponseBody,
    body_written: usize,
    keep_alive: bool,
}

impl PendingResponse {
    fn new(response: Response) -> Self {
        let keep_alive = response.keep_alive();
        let head = response.head_bytes();
        let body = response.into_body();
        Self {
            head,
            head_written: 0,
            body,
            body_written: 0,
            keep_alive,
        }
    }

    fn is_done(&self) -> bool {
        self.head_written >= self.head.len() && self.body_written >= self.body.len()
    }
}

/// Per-connection socket state, owned by exactly one `Slab` slot in the
/// reactor.
pub struct ConnectionState {
    stream: TcpStream,
    token: Token,
    /// Bumped every time this slot is reused by a new connection, so a
    /// stale idle-timeout callback scheduled against a prior occupant
    /// can recognize itself as stale and no-op instead of closing the
    /// wrong connection.
    generation: u64,
    addr: SocketAddr,
    read_buf: Buffer,
    parser: RequestParser,
    pending: Option<PendingResponse>,
    closed: bool,
}

impl ConnectionState {
    /// Wraps a freshly accepted socket. `generation` is the reactor's
    /// current generation counter for this slab slot.
    pub fn new(stream: TcpStream, token: Token, generation: u64, addr: SocketAddr, max_header_bytes: usize) -> Self {
        Self {
            stream,
            token,
            generation,
            addr,
            read_buf: Buffer::new(4096),
            parser: RequestParser::new(max_header_bytes),
            pending: None,
            closed: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// The interest the reactor should (re)register for this
    /// connection: writable whenever a response is queued, readable
    /// otherwise (no point polling for more requests mid-response,
    /// since at most one request is in flight per connection at a
    /// time).
    pub fn interest(&self) -> Interest {
        if self.pending.is_some() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, self.interest())
    }

    pub fn reregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.reregister(&mut self.stream, self.token, self.interest())
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }

    /// Drains readable bytes into the buffer. Edge-triggered callers
    /// must loop this until `WouldBlock` to fully drain readiness.
    pub fn read_once(&mut self) -> io::Result<ReadOutcome> {
        match self.read_buf.read_fd(&mut self.stream) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(_) => Ok(ReadOutcome::Progress),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(ReadOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }

    /// Pulls one complete request out of the read buffer, if enough
    /// bytes have arrived. Returns `Ok(None)` when more data is needed,
    /// and `Err` on a malformed request (the caller should respond 400
    /// and close).
    pub fn take_request(&mut self) -> Result<Option<Request>, crate::error::ParseError> {
        match self.parser.parse(&mut self.read_buf)? {
            ParseOutcome::Incomplete => Ok(None),
            ParseOutcome::Complete(request) => Ok(Some(request)),
        }
    }

    /// Queues `response` to be drained to the socket on subsequent
    /// `write_once` calls.
    pub fn queue_response(&mut self, response: Response) {
        self.pending = Some(PendingResponse::new(response));
    }

    pub fn has_pending_response(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether the queued response asked for the connection to stay
    /// open; only meaningful once `write_once` reports the response as
    /// fully flushed.
    pub fn pending_keep_alive(&self) -> bool {
        self.pending.as_ref().map(|p| p.keep_alive).unwrap_or(true)
    }

    /// Gather-writes the queued response's header block and body in a
    /// single `writev`, advancing through partial writes across calls.
    pub fn write_once(&mut self) -> io::Result<WriteOutcome> {
        loop {
            let Some(pending) = self.pending.as_mut() else {
                return Ok(WriteOutcome::Flushed);
            };
            if pending.is_done() {
                self.pending = None;
                return Ok(WriteOutcome::Flushed);
            }

            let head_remaining = &pending.head[pending.head_written..];
            let body_bytes = pending.body.as_bytes();
            let body_remaining = &body_bytes[pending.body_written..];

            let slices = [IoSlice::new(head_remaining), IoSlice::new(body_remaining)];
            match self.stream.write_vectored(&slices) {
                Ok(0) => return Ok(WriteOutcome::WouldBlock),
                Ok(mut n) => {
                    let head_take = n.min(head_remaining.len());
                    pending.head_written += head_take;
                    n -= head_take;
                    pending.body_written += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(WriteOutcome::WouldBlock),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
