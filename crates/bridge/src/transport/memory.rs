//! An engine that lives in memory.
//!
//! Useful to drive the bridge without a network: loopback setups, benchmarks, and
//! applications testing their handlers. [`MemorySource`] replays queued events honoring
//! pause/resume, [`MemorySink`] collects the response and fills its write queue up to an
//! optional high-water mark until [`MemorySink::drain`] is called.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::future::{Future, ready};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tracing::trace;

use crate::protocol::{RemoteAddr, RequestCookie, ResponseCookie, SslSession};
use crate::transport::{DrainCallback, NativeRequest, ReadSource, ResponseSink, SourceEvent, SourceHandler};

/// A [`ReadSource`] replaying queued events.
///
/// `Data` is only delivered while resumed. Delivery happens synchronously from inside
/// `resume`, `set_handler` and `push`, the way an event loop delivers bytes it already buffered.
#[derive(Default)]
pub struct MemorySource {
    paused: Cell<bool>,
    dispatching: Cell<bool>,
    generation: Cell<u64>,
    handler: RefCell<Option<SourceHandler>>,
    pending: RefCell<VecDeque<SourceEvent>>,
}

impl MemorySource {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// A source delivering `chunks` followed by the end of the stream.
    pub fn from_chunks<I>(chunks: I) -> Rc<Self>
    where
        I: IntoIterator<Item = Bytes>,
    {
        let source = Self::new();
        {
            let mut pending = source.pending.borrow_mut();
            pending.extend(chunks.into_iter().map(SourceEvent::Data));
            pending.push_back(SourceEvent::End);
        }
        source
    }

    pub fn push(&self, event: SourceEvent) {
        self.pending.borrow_mut().push_back(event);
        self.pump();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.get()
    }

    /// Events not delivered yet.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    fn pump(&self) {
        if self.dispatching.get() {
            return;
        }

        loop {
            let event = {
                if self.handler.borrow().is_none() {
                    return;
                }
                let mut pending = self.pending.borrow_mut();
                match pending.front() {
                    None => return,
                    Some(SourceEvent::Data(_)) if self.paused.get() => return,
                    Some(_) => pending.pop_front(),
                }
            };

            if let Some(event) = event {
                self.dispatch(event);
            }
        }
    }

    fn dispatch(&self, event: SourceEvent) {
        let generation = self.generation.get();
        let Some(mut handler) = self.handler.borrow_mut().take() else {
            return;
        };

        self.dispatching.set(true);
        handler(event);
        self.dispatching.set(false);

        // a handler replaced while dispatching must not be overwritten
        if self.generation.get() == generation {
            *self.handler.borrow_mut() = Some(handler);
        }
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("paused", &self.paused.get())
            .field("has_handler", &self.handler.borrow().is_some())
            .field("pending", &self.pending.borrow().len())
            .finish_non_exhaustive()
    }
}

impl ReadSource for MemorySource {
    fn pause(&self) {
        self.paused.set(true);
    }

    fn resume(&self) {
        self.paused.set(false);
        self.pump();
    }

    fn set_handler(&self, handler: Option<SourceHandler>) {
        self.generation.set(self.generation.get() + 1);
        *self.handler.borrow_mut() = handler;
        self.pump();
    }
}

/// A [`NativeRequest`] built by hand.
#[derive(Debug, Clone)]
pub struct MemoryRequest {
    method: Method,
    absolute_uri: String,
    headers: HeaderMap,
    remote_addr: Option<RemoteAddr>,
    ssl_session: Option<SslSession>,
    cookies: Vec<RequestCookie>,
}

impl MemoryRequest {
    pub fn new(method: Method, absolute_uri: impl Into<String>) -> Self {
        Self {
            method,
            absolute_uri: absolute_uri.into(),
            headers: HeaderMap::new(),
            remote_addr: None,
            ssl_session: None,
            cookies: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_remote_addr(mut self, remote_addr: RemoteAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    pub fn with_ssl_session(mut self, ssl_session: SslSession) -> Self {
        self.ssl_session = Some(ssl_session);
        self
    }

    pub fn with_cookie(mut self, cookie: RequestCookie) -> Self {
        self.cookies.push(cookie);
        self
    }
}

impl NativeRequest for MemoryRequest {
    fn method(&self) -> Method {
        self.method.clone()
    }

    fn absolute_uri(&self) -> String {
        self.absolute_uri.clone()
    }

    fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    fn remote_address(&self) -> Option<RemoteAddr> {
        self.remote_addr.clone()
    }

    fn ssl_session(&self) -> Option<SslSession> {
        self.ssl_session.clone()
    }

    fn cookies(&self) -> Vec<RequestCookie> {
        self.cookies.clone()
    }
}

#[derive(Default)]
struct SinkState {
    initial_headers: HeaderMap,
    status: Option<StatusCode>,
    headers: HeaderMap,
    chunked: bool,
    cookies: Vec<ResponseCookie>,
    body: BytesMut,
    queued: usize,
    high_water_mark: Option<usize>,
    drain_callbacks: Vec<DrainCallback>,
    ended: bool,
}

/// A [`ResponseSink`] collecting the response in memory.
///
/// Clones share the same response, keep one to inspect what the bridge wrote.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Rc<RefCell<SinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The write queue reports full once `high_water_mark` bytes are queued and not drained.
    pub fn with_high_water_mark(high_water_mark: usize) -> Self {
        let sink = Self::default();
        sink.state.borrow_mut().high_water_mark = Some(high_water_mark);
        sink
    }

    /// Headers the engine set before handing the response over.
    pub fn with_headers(headers: HeaderMap) -> Self {
        let sink = Self::default();
        sink.state.borrow_mut().initial_headers = headers;
        sink
    }

    /// Empties the write queue, as if the peer read everything, and fires the drain callbacks.
    pub fn drain(&self) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            state.queued = 0;
            std::mem::take(&mut state.drain_callbacks)
        };

        if !callbacks.is_empty() {
            trace!(callbacks = callbacks.len(), "write queue drained");
        }
        for callback in callbacks {
            callback();
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.state.borrow().status
    }

    /// Headers as the bridge applied them.
    pub fn response_headers(&self) -> HeaderMap {
        self.state.borrow().headers.clone()
    }

    pub fn is_chunked(&self) -> bool {
        self.state.borrow().chunked
    }

    pub fn cookies(&self) -> Vec<ResponseCookie> {
        self.state.borrow().cookies.clone()
    }

    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.state.borrow().body)
    }

    pub fn is_ended(&self) -> bool {
        self.state.borrow().ended
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.state.borrow().ended {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "response already ended"));
        }
        Ok(())
    }
}

impl fmt::Debug for MemorySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MemorySink")
            .field("status", &state.status)
            .field("headers", &state.headers)
            .field("chunked", &state.chunked)
            .field("body_len", &state.body.len())
            .field("queued", &state.queued)
            .field("ended", &state.ended)
            .finish_non_exhaustive()
    }
}

impl ResponseSink for MemorySink {
    fn headers(&self) -> HeaderMap {
        self.state.borrow().initial_headers.clone()
    }

    fn set_status(&mut self, status: StatusCode) -> io::Result<()> {
        self.ensure_open()?;
        self.state.borrow_mut().status = Some(status);
        Ok(())
    }

    fn put_header(&mut self, name: &HeaderName, values: Vec<HeaderValue>) -> io::Result<()> {
        self.ensure_open()?;
        let mut state = self.state.borrow_mut();
        state.headers.remove(name);
        for value in values {
            state.headers.append(name.clone(), value);
        }
        Ok(())
    }

    fn set_chunked(&mut self, chunked: bool) -> io::Result<()> {
        self.ensure_open()?;
        self.state.borrow_mut().chunked = chunked;
        Ok(())
    }

    fn add_cookie(&mut self, cookie: ResponseCookie) -> io::Result<()> {
        self.ensure_open()?;
        self.state.borrow_mut().cookies.push(cookie);
        Ok(())
    }

    fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        self.ensure_open()?;
        let mut state = self.state.borrow_mut();
        state.queued += chunk.len();
        state.body.extend_from_slice(&chunk);
        Ok(())
    }

    fn is_write_queue_full(&self) -> bool {
        let state = self.state.borrow();
        state.high_water_mark.is_some_and(|mark| state.queued >= mark)
    }

    fn on_drain(&mut self, callback: DrainCallback) {
        self.state.borrow_mut().drain_callbacks.push(callback);
    }

    fn send_file(&mut self, path: &Path, offset: u64, length: u64) -> impl Future<Output = io::Result<()>> {
        let result = self.ensure_open().and_then(|()| read_range(path, offset, length)).map(|content| {
            self.state.borrow_mut().body.extend_from_slice(&content);
        });
        ready(result)
    }

    fn end(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.state.borrow_mut().ended = true;
        Ok(())
    }
}

fn read_range(path: &Path, offset: u64, length: u64) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;

    let mut content = Vec::new();
    file.take(length).read_to_end(&mut content)?;
    Ok(content)
}
