//! Single-Threaded Poll Event Loop
//!
//! One thread, one pollset. The listening socket and every client
//! connection sit in the same level-triggered poll(2) call; the loop
//! interleaves accepting, reading, parsing, dispatching and writing
//! across all of them with bounded work per iteration.
//!
//! ## Loop body
//!
//! ```text
//! 1. rebuild the pollset from each connection's interest
//! 2. poll, with a 1 second timeout
//! 3. periodic maintenance (expiry sweep, AOF sync tick)
//! 4. accept-drain if the listener is readable
//! 5. per ready connection, newest first:
//!      - error/hangup -> destroy
//!      - read-drain: read 4 KiB chunks until the socket is dry,
//!        parsing and dispatching every complete frame as it lands
//!      - write-drain: flush the outbound buffer, bounded by a
//!        64 KiB budget shared by all connections this iteration
//! ```
//!
//! ## Backpressure
//!
//! A connection whose outbound buffer reaches 2 MiB stops being read
//! until the client drains it. Interest in readability is simply not
//! registered for it, so a slow reader cannot balloon the process.
//!
//! ## Teardown
//!
//! Connections are scanned in reverse and removed with swap-remove, so
//! removal never invalidates an index the scan has yet to visit. The
//! pollset ordering carries no meaning.

use crate::commands::CommandHandler;
use crate::protocol::RespValue;
use bytes::{Buf, BytesMut};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsFd;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Listen backlog.
const BACKLOG: i32 = 128;

/// Bytes read from a socket per read(2) call.
const READ_CHUNK: usize = 4096;

/// Total bytes written across all connections per loop iteration.
const WRITE_BUDGET: usize = 64 * 1024;

/// Outbound-buffer size at which a connection stops being read.
const OUTBUF_LIMIT: usize = 2 * 1024 * 1024;

/// Readiness poll timeout.
const POLL_TIMEOUT_MS: u16 = 1000;

/// How often the expiry sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Per-client state: the socket and its two byte queues.
///
/// Dropping a Connection closes its socket.
#[derive(Debug)]
struct Connection {
    socket: TcpStream,
    peer: SocketAddr,
    /// Bytes received but not yet parsed into a complete frame
    inbuf: BytesMut,
    /// Serialized responses not yet written to the socket
    outbuf: BytesMut,
    closed: bool,
}

impl Connection {
    fn new(socket: TcpStream, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            inbuf: BytesMut::with_capacity(READ_CHUNK),
            outbuf: BytesMut::new(),
            closed: false,
        }
    }

    /// The events this connection wants from the next poll.
    ///
    /// Always readable, unless the outbound buffer has hit the
    /// backpressure cap; writable exactly when output is pending.
    fn interest(&self) -> PollFlags {
        let mut events = PollFlags::empty();
        if self.outbuf.len() < OUTBUF_LIMIT {
            events |= PollFlags::POLLIN;
        }
        if !self.outbuf.is_empty() {
            events |= PollFlags::POLLOUT;
        }
        events
    }
}

/// The server: listener, connections and all process-wide state.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    conns: Vec<Connection>,
    handler: CommandHandler,
    last_sweep: Instant,
}

impl Server {
    /// Binds `0.0.0.0:<port>` and prepares the loop.
    ///
    /// The listener gets `SO_REUSEADDR`, a backlog of 128 and
    /// non-blocking mode. Port 0 asks the kernel for an ephemeral port.
    pub fn bind(port: u16, handler: CommandHandler) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        socket.bind(&addr.into())?;
        socket.listen(BACKLOG)?;
        socket.set_nonblocking(true)?;

        let listener: TcpListener = socket.into();
        info!(addr = %listener.local_addr()?, "listening");

        Ok(Self {
            listener,
            conns: Vec::new(),
            handler,
            last_sweep: Instant::now(),
        })
    }

    /// The address the listener actually bound.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the event loop until a fatal poll error.
    ///
    /// Shutdown is external (signal); there is no graceful drain.
    pub fn run(&mut self) -> io::Result<()> {
        info!("event loop started");
        loop {
            self.tick()?;
        }
    }

    /// One loop iteration: poll, maintain, accept, serve.
    fn tick(&mut self) -> io::Result<()> {
        // (1) Rebuild the pollset. Index 0 is always the listener.
        let mut pfds: Vec<PollFd> = Vec::with_capacity(self.conns.len() + 1);
        pfds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        for conn in &self.conns {
            pfds.push(PollFd::new(conn.socket.as_fd(), conn.interest()));
        }

        // (2) Block for readiness, at most one second.
        match poll(&mut pfds, PollTimeout::from(POLL_TIMEOUT_MS)) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let listener_ready = pfds[0]
            .revents()
            .unwrap_or(PollFlags::empty())
            .contains(PollFlags::POLLIN);
        let ready: Vec<PollFlags> = pfds[1..]
            .iter()
            .map(|p| p.revents().unwrap_or(PollFlags::empty()))
            .collect();
        drop(pfds);

        // (3) Periodic maintenance, inline between poll and dispatch.
        if self.last_sweep.elapsed() >= SWEEP_INTERVAL {
            self.handler.sweep_expired();
            self.last_sweep = Instant::now();
        }
        self.handler.aof_tick();

        // (4) Accept every pending connection.
        if listener_ready {
            self.accept_drain();
        }

        // (5) Serve ready connections under a shared write budget.
        // Reverse iteration makes swap-remove safe mid-scan. Connections
        // accepted in step (4) sit past the end of `ready` and default to
        // no events; they get polled next time around.
        let mut write_budget = WRITE_BUDGET;
        for idx in (0..self.conns.len()).rev() {
            let events = ready.get(idx).copied().unwrap_or(PollFlags::empty());
            let conn = &mut self.conns[idx];

            if events
                .intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL)
            {
                conn.closed = true;
            }

            if !conn.closed
                && events.contains(PollFlags::POLLIN)
                && conn.outbuf.len() < OUTBUF_LIMIT
            {
                Self::read_drain(conn, &mut self.handler);
            }

            // Freshly produced responses are flushed in the same
            // iteration; EWOULDBLOCK is harmless if the socket isn't
            // actually writable yet.
            if !conn.closed && !conn.outbuf.is_empty() && write_budget > 0 {
                Self::write_drain(conn, &mut write_budget);
            }

            if conn.closed {
                debug!(client = %conn.peer, "client disconnected");
                self.conns.swap_remove(idx);
            }
        }

        Ok(())
    }

    /// Accepts until the listener reports EWOULDBLOCK.
    fn accept_drain(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((socket, peer)) => {
                    if let Err(e) = socket.set_nonblocking(true) {
                        warn!(client = %peer, error = %e, "failed to set non-blocking, dropping");
                        continue;
                    }
                    debug!(client = %peer, "client connected");
                    self.conns.push(Connection::new(socket, peer));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Reads until the socket is dry, dispatching frames as they complete.
    fn read_drain(conn: &mut Connection, handler: &mut CommandHandler) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match conn.socket.read(&mut chunk) {
                Ok(0) => {
                    // EOF: the peer closed its end
                    conn.closed = true;
                    return;
                }
                Ok(n) => {
                    conn.inbuf.extend_from_slice(&chunk[..n]);
                    Self::dispatch_frames(conn, handler);
                    if conn.outbuf.len() >= OUTBUF_LIMIT {
                        // Backpressure: stop consuming requests until the
                        // client drains what it already owes us.
                        return;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(client = %conn.peer, error = %e, "read failed");
                    conn.closed = true;
                    return;
                }
            }
        }
    }

    /// Parses and executes every complete frame in the inbound buffer.
    ///
    /// A protocol error becomes a RESP Error response and consumes one
    /// inbound byte, so the stream always makes forward progress and the
    /// connection stays open.
    fn dispatch_frames(conn: &mut Connection, handler: &mut CommandHandler) {
        let mut parser = crate::protocol::RespParser::new();
        while !conn.inbuf.is_empty() {
            match parser.parse(&conn.inbuf) {
                Ok(Some((frame, consumed))) => {
                    conn.inbuf.advance(consumed);
                    let response = handler.execute(frame);
                    conn.outbuf.extend_from_slice(&response.serialize());
                    trace!(client = %conn.peer, consumed, "dispatched frame");
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(client = %conn.peer, error = %e, "protocol error");
                    let response = RespValue::error(format!("ERR protocol error: {}", e));
                    conn.outbuf.extend_from_slice(&response.serialize());
                    conn.inbuf.advance(1);
                }
            }
        }
    }

    /// Writes pending output, bounded by the iteration's remaining budget.
    fn write_drain(conn: &mut Connection, budget: &mut usize) {
        while !conn.outbuf.is_empty() && *budget > 0 {
            let n = conn.outbuf.len().min(*budget);
            match conn.socket.write(&conn.outbuf[..n]) {
                Ok(0) => {
                    conn.closed = true;
                    return;
                }
                Ok(written) => {
                    conn.outbuf.advance(written);
                    *budget -= written;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(client = %conn.peer, error = %e, "write failed");
                    conn.closed = true;
                    return;
                }
            }
        }
    }
}
