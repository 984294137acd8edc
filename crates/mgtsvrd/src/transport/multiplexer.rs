//! Readiness-driven accept, read and write loop.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::{self, Read, Write};
use std::mem;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use mio::event::{Event, Source};
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, trace, warn};

use mgtsvr_config::SocketEndpoint;

use super::stream::ClientStream;
use super::{ConnectionHandler, LISTENER_TARGET, ListenerError, SocketListener};
use crate::channel::FramedChannel;
use crate::registry::{ConnectionId, ConnectionRecord, OutputNotifier, Registry};

/// Upper bound on a single readiness wait.
pub(crate) const POLL_TIMEOUT: Duration = Duration::from_millis(20);
/// Bytes requested per read call.
pub(crate) const READ_CHUNK: usize = 16 * 1024;
/// Bytes offered per write call.
pub(crate) const WRITE_CHUNK: usize = 4096;

const MAX_EVENTS: usize = 256;
const WAKER_TOKEN: Token = Token(0);
const FIRST_CONNECTION_TOKEN: usize = 16;

#[derive(Debug, Default)]
struct WakeRequests {
    flush: HashSet<ConnectionId>,
    close: Vec<(ConnectionId, Duration)>,
    stop: bool,
}

/// Cross-thread mailbox for the event loop.
#[derive(Debug)]
struct LoopNotifier {
    waker: Waker,
    requests: Mutex<WakeRequests>,
}

impl LoopNotifier {
    fn requests(&self) -> MutexGuard<'_, WakeRequests> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self) -> WakeRequests {
        mem::take(&mut *self.requests())
    }

    fn wake(&self) {
        if let Err(error) = self.waker.wake() {
            warn!(target: LISTENER_TARGET, error = %error, "failed to wake multiplexer");
        }
    }

    fn stop(&self) {
        self.requests().stop = true;
        self.wake();
    }
}

impl OutputNotifier for LoopNotifier {
    fn output_ready(&self, id: ConnectionId) {
        let newly_queued = self.requests().flush.insert(id);
        if newly_queued {
            self.wake();
        }
    }

    fn close_requested(&self, id: ConnectionId, delay: Duration) {
        self.requests().close.push((id, delay));
        self.wake();
    }
}

struct Slot {
    stream: ClientStream,
    inbound: FramedChannel,
    record: Arc<ConnectionRecord>,
    write_armed: bool,
    discard_input: bool,
}

impl Slot {
    /// Writes queued output until it drains or the socket would block.
    ///
    /// Returns whether the outbound channel is now empty.
    fn write_pending(&mut self) -> io::Result<bool> {
        let mut output = self.record.outbound();
        while !output.is_empty() {
            let attempt = {
                let chunk = output.peek_chunk(WRITE_CHUNK);
                self.stream.write(chunk).map(|written| (written, chunk.len()))
            };
            match attempt {
                Ok((0, _)) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok((written, offered)) => {
                    if written < offered {
                        trace!(
                            target: LISTENER_TARGET,
                            connection = %self.record.id(),
                            written,
                            offered,
                            "short write"
                        );
                    }
                    output.consume_front(written);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
        Ok(true)
    }
}

enum ReadOutcome {
    Open,
    Closed(&'static str),
}

/// Single-threaded event loop over every listener and client socket.
pub(crate) struct Multiplexer {
    poll: Poll,
    listeners: Vec<SocketListener>,
    notifier: Arc<LoopNotifier>,
    registry: Arc<Registry>,
    handler: Arc<dyn ConnectionHandler>,
    max_line_length: usize,
    slots: HashMap<Token, Slot>,
    pending_input: BTreeSet<Token>,
    closing: HashMap<Token, Instant>,
    next_token: usize,
}

impl Multiplexer {
    /// Binds every endpoint and registers it with a fresh poller.
    pub(crate) fn bind(
        endpoints: &[SocketEndpoint],
        registry: Arc<Registry>,
        handler: Arc<dyn ConnectionHandler>,
        max_line_length: usize,
    ) -> Result<Self, ListenerError> {
        if endpoints.is_empty() {
            return Err(ListenerError::NoEndpoints);
        }
        let poll = Poll::new().map_err(|source| ListenerError::Poll { source })?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)
            .map_err(|source| ListenerError::Poll { source })?;

        let mut listeners: Vec<SocketListener> = Vec::with_capacity(endpoints.len());
        for (index, endpoint) in endpoints.iter().enumerate() {
            let bound = SocketListener::bind(endpoint).and_then(|mut listener| {
                listener
                    .register(poll.registry(), Token(index + 1))
                    .map_err(|source| ListenerError::Register {
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
                Ok(listener)
            });
            match bound {
                Ok(listener) => listeners.push(listener),
                Err(error) => {
                    for listener in &listeners {
                        listener.cleanup();
                    }
                    return Err(error);
                }
            }
        }

        Ok(Self {
            poll,
            listeners,
            notifier: Arc::new(LoopNotifier {
                waker,
                requests: Mutex::new(WakeRequests::default()),
            }),
            registry,
            handler,
            max_line_length,
            slots: HashMap::new(),
            pending_input: BTreeSet::new(),
            closing: HashMap::new(),
            next_token: FIRST_CONNECTION_TOKEN,
        })
    }

    /// First bound TCP address, if a TCP endpoint is configured.
    pub(crate) fn tcp_addr(&self) -> Option<SocketAddr> {
        self.listeners.iter().find_map(SocketListener::local_addr)
    }

    /// Moves the loop onto its own thread.
    pub(crate) fn start(mut self) -> Result<MultiplexerHandle, ListenerError> {
        let notifier = Arc::clone(&self.notifier);
        let tcp_addr = self.tcp_addr();
        let handle = thread::Builder::new()
            .name("mgtsvr-multiplexer".to_owned())
            .spawn(move || self.run())
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(MultiplexerHandle {
            notifier,
            tcp_addr,
            handle: Some(handle),
        })
    }

    fn run(&mut self) {
        for listener in &self.listeners {
            info!(
                target: LISTENER_TARGET,
                endpoint = %listener.endpoint(),
                "socket listener active"
            );
        }
        let mut events = Events::with_capacity(MAX_EVENTS);
        loop {
            if let Err(error) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if error.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(target: LISTENER_TARGET, error = %error, "readiness wait failed");
                break;
            }

            for event in &events {
                match event.token() {
                    WAKER_TOKEN => {}
                    Token(index) if index < FIRST_CONNECTION_TOKEN => self.accept_all(index - 1),
                    token => self.client_event(token, event),
                }
            }

            if self.apply_requests() {
                break;
            }
            self.extract_commands();
            self.expire_closing();
        }
        self.finish();
    }

    fn accept_all(&mut self, index: usize) {
        loop {
            let Some(listener) = self.listeners.get(index) else {
                return;
            };
            let (mut stream, peer) = match listener.accept() {
                Ok(Some(accepted)) => accepted,
                Ok(None) => return,
                Err(error) => {
                    warn!(
                        target: LISTENER_TARGET,
                        endpoint = %listener.endpoint(),
                        error = %error,
                        "socket accept error"
                    );
                    return;
                }
            };

            let token = Token(self.next_token);
            self.next_token += 1;
            if let Err(error) = self
                .poll
                .registry()
                .register(&mut stream, token, Interest::READABLE)
            {
                warn!(
                    target: LISTENER_TARGET,
                    peer,
                    error = %error,
                    "failed to register client socket"
                );
                continue;
            }

            let notifier: Arc<dyn OutputNotifier> = Arc::clone(&self.notifier) as _;
            let record = Arc::new(ConnectionRecord::new(ConnectionId(token.0), peer, notifier));
            self.registry.insert(Arc::clone(&record));
            self.slots.insert(
                token,
                Slot {
                    stream,
                    inbound: FramedChannel::new(),
                    record: Arc::clone(&record),
                    write_armed: false,
                    discard_input: false,
                },
            );
            info!(
                target: LISTENER_TARGET,
                connection = %record.id(),
                peer = record.peer(),
                "client connected"
            );
            self.handler.connected(&record);
        }
    }

    fn client_event(&mut self, token: Token, event: &Event) {
        if event.is_readable() || event.is_read_closed() {
            if let ReadOutcome::Closed(reason) = self.read_from(token) {
                self.remove(token, reason);
                return;
            }
        }
        if event.is_writable() {
            self.flush(token);
        }
        if event.is_error() || event.is_write_closed() {
            self.remove(token, "socket error");
        }
    }

    fn read_from(&mut self, token: Token) -> ReadOutcome {
        let mut buffer = vec![0_u8; READ_CHUNK];
        loop {
            let Some(slot) = self.slots.get_mut(&token) else {
                return ReadOutcome::Open;
            };
            match slot.stream.read(&mut buffer) {
                Ok(0) => return ReadOutcome::Closed("peer closed"),
                Ok(_) if slot.discard_input => {}
                Ok(count) => {
                    slot.inbound.append(&buffer[..count]);
                    if slot.inbound.len() > self.max_line_length {
                        self.drain_lines(token);
                    } else {
                        self.pending_input.insert(token);
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return ReadOutcome::Open;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    debug!(
                        target: LISTENER_TARGET,
                        connection = %slot.record.id(),
                        error = %error,
                        "read failed"
                    );
                    return ReadOutcome::Closed("read error");
                }
            }
        }
    }

    /// Writes pending output and keeps write interest in step with it.
    fn flush(&mut self, token: Token) {
        let Some(slot) = self.slots.get_mut(&token) else {
            return;
        };
        let drained = match slot.write_pending() {
            Ok(drained) => drained,
            Err(error) => {
                debug!(
                    target: LISTENER_TARGET,
                    connection = %slot.record.id(),
                    error = %error,
                    "write failed"
                );
                self.remove(token, "write error");
                return;
            }
        };
        let wants_write = !drained;
        if wants_write == slot.write_armed {
            return;
        }
        let interest = if wants_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        match slot
            .stream
            .reregister(self.poll.registry(), token, interest)
        {
            Ok(()) => slot.write_armed = wants_write,
            Err(error) => {
                warn!(
                    target: LISTENER_TARGET,
                    connection = %slot.record.id(),
                    error = %error,
                    "failed to update socket interest"
                );
                self.remove(token, "registration error");
            }
        }
    }

    /// Drains wake requests; returns whether a stop was requested.
    fn apply_requests(&mut self) -> bool {
        let requests = self.notifier.take();
        for id in requests.flush {
            self.flush(Token(id.0));
        }
        let now = Instant::now();
        for (id, delay) in requests.close {
            let token = Token(id.0);
            if !self.slots.contains_key(&token) {
                continue;
            }
            if let Some(slot) = self.slots.get_mut(&token) {
                slot.discard_input = true;
                slot.inbound.clear();
            }
            let deadline = now + delay;
            self.closing
                .entry(token)
                .and_modify(|current| *current = (*current).min(deadline))
                .or_insert(deadline);
        }
        requests.stop
    }

    /// Hands every complete line to the handler, in arrival order.
    fn extract_commands(&mut self) {
        for token in mem::take(&mut self.pending_input) {
            self.drain_lines(token);
        }
    }

    /// Dispatches the complete lines buffered for `token`.
    ///
    /// Input is discarded for the rest of the connection once a line, or the
    /// unterminated remainder, exceeds `max_line_length`.
    fn drain_lines(&mut self, token: Token) {
        let Some(slot) = self.slots.get_mut(&token) else {
            return;
        };
        let mut overflow = false;
        while let Some(line) = slot.inbound.take_line() {
            if line.len() > self.max_line_length {
                overflow = true;
                break;
            }
            if !line.is_empty() {
                self.handler.line_received(&slot.record, line);
            }
        }
        if overflow || slot.inbound.len() > self.max_line_length {
            warn!(
                target: LISTENER_TARGET,
                connection = %slot.record.id(),
                limit = self.max_line_length,
                "inbound line too long"
            );
            slot.inbound.clear();
            slot.discard_input = true;
            self.handler.line_overflow(&slot.record);
        }
    }

    fn expire_closing(&mut self) {
        if self.closing.is_empty() {
            return;
        }
        let now = Instant::now();
        let due: Vec<Token> = self
            .closing
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(token, _)| *token)
            .collect();
        for token in due {
            if let Some(slot) = self.slots.get_mut(&token)
                && let Err(error) = slot.write_pending()
            {
                debug!(
                    target: LISTENER_TARGET,
                    connection = %slot.record.id(),
                    error = %error,
                    "final flush failed"
                );
            }
            self.remove(token, "closed by server");
        }
    }

    fn remove(&mut self, token: Token, reason: &'static str) {
        self.pending_input.remove(&token);
        self.closing.remove(&token);
        let Some(mut slot) = self.slots.remove(&token) else {
            return;
        };
        if let Err(error) = self.poll.registry().deregister(&mut slot.stream) {
            debug!(
                target: LISTENER_TARGET,
                connection = %slot.record.id(),
                error = %error,
                "failed to deregister client socket"
            );
        }
        self.registry.remove(slot.record.id());
        info!(
            target: LISTENER_TARGET,
            connection = %slot.record.id(),
            peer = slot.record.peer(),
            reason,
            "client disconnected"
        );
        self.handler.disconnected(&slot.record);
    }

    /// Best-effort final flush, then closes everything.
    fn finish(&mut self) {
        let tokens: Vec<Token> = self.slots.keys().copied().collect();
        for token in tokens {
            if let Some(slot) = self.slots.get_mut(&token)
                && let Err(error) = slot.write_pending()
            {
                debug!(
                    target: LISTENER_TARGET,
                    connection = %slot.record.id(),
                    error = %error,
                    "final flush failed"
                );
            }
            self.remove(token, "server shutdown");
        }
        info!(target: LISTENER_TARGET, "multiplexer stopped");
    }
}

impl Drop for Multiplexer {
    /// Removes UNIX socket files whether or not the loop ever ran.
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.cleanup();
        }
    }
}

/// Handle to the running event loop.
pub(crate) struct MultiplexerHandle {
    notifier: Arc<LoopNotifier>,
    tcp_addr: Option<SocketAddr>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MultiplexerHandle {
    /// First bound TCP address.
    pub(crate) fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// Asks the loop to flush, close every connection and exit.
    pub(crate) fn shutdown(&self) {
        self.notifier.stop();
    }

    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for MultiplexerHandle {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.notifier.stop();
        }
    }
}
