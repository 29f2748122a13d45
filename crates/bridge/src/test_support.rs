//! Recording fakes of the engine contracts, shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::{Future, ready};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Wake;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::protocol::ResponseCookie;
use crate::transport::{DrainCallback, ReadSource, ResponseSink, SourceEvent, SourceHandler};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SourceCall {
    Pause,
    Resume,
    SetHandler(bool),
}

/// A source that only delivers data while resumed, dispatching synchronously the way
/// an event loop would when bytes are already buffered.
#[derive(Default)]
pub(crate) struct FakeSource {
    paused: Cell<bool>,
    dispatching: Cell<bool>,
    generation: Cell<u64>,
    handler: RefCell<Option<SourceHandler>>,
    pending: RefCell<VecDeque<SourceEvent>>,
    calls: RefCell<Vec<SourceCall>>,
}

impl FakeSource {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn with_events<I>(events: I) -> Rc<Self>
    where
        I: IntoIterator<Item = SourceEvent>,
    {
        let source = Self::new();
        source.pending.borrow_mut().extend(events);
        source
    }

    /// Simulates bytes arriving from the network.
    pub(crate) fn push(&self, event: SourceEvent) {
        self.pending.borrow_mut().push_back(event);
        self.pump();
    }

    pub(crate) fn push_data(&self, data: &'static str) {
        self.push(SourceEvent::Data(Bytes::from_static(data.as_bytes())));
    }

    /// Delivers data ignoring the paused flag, as a misbehaving engine would.
    pub(crate) fn force_data(&self, data: &'static str) {
        self.dispatch(SourceEvent::Data(Bytes::from_static(data.as_bytes())));
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.get()
    }

    pub(crate) fn has_handler(&self) -> bool {
        self.handler.borrow().is_some() || self.dispatching.get()
    }

    pub(crate) fn calls(&self) -> Vec<SourceCall> {
        self.calls.borrow().clone()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }

    fn pump(&self) {
        if self.dispatching.get() {
            return;
        }

        loop {
            if self.handler.borrow().is_none() {
                return;
            }

            let event = {
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

        if self.generation.get() == generation {
            *self.handler.borrow_mut() = Some(handler);
        }
    }
}

impl ReadSource for FakeSource {
    fn pause(&self) {
        self.calls.borrow_mut().push(SourceCall::Pause);
        self.paused.set(true);
    }

    fn resume(&self) {
        self.calls.borrow_mut().push(SourceCall::Resume);
        self.paused.set(false);
        self.pump();
    }

    fn set_handler(&self, handler: Option<SourceHandler>) {
        self.calls.borrow_mut().push(SourceCall::SetHandler(handler.is_some()));
        self.generation.set(self.generation.get() + 1);
        *self.handler.borrow_mut() = handler;
        self.pump();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SinkCall {
    Status(StatusCode),
    Header(HeaderName, Vec<HeaderValue>),
    Chunked(bool),
    Cookie(ResponseCookie),
    Write(Bytes),
    SendFile(PathBuf, u64, u64),
    End,
}

#[derive(Default)]
struct SinkState {
    calls: Vec<SinkCall>,
    initial_headers: HeaderMap,
    queued: usize,
    queue_limit: Option<usize>,
    drain_callbacks: Vec<DrainCallback>,
    drain_registrations: usize,
    fail_writes: bool,
    fail_status: bool,
}

/// A sink whose write queue fills up after `queue_limit` bytes and drains on demand.
#[derive(Clone, Default)]
pub(crate) struct FakeSink {
    state: Rc<RefCell<SinkState>>,
}

impl FakeSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_queue_limit(limit: usize) -> Self {
        let sink = Self::default();
        sink.state.borrow_mut().queue_limit = Some(limit);
        sink
    }

    pub(crate) fn with_initial_headers(headers: HeaderMap) -> Self {
        let sink = Self::default();
        sink.state.borrow_mut().initial_headers = headers;
        sink
    }

    pub(crate) fn fail_writes(&self) {
        self.state.borrow_mut().fail_writes = true;
    }

    pub(crate) fn fail_status(&self) {
        self.state.borrow_mut().fail_status = true;
    }

    /// Empties the write queue and fires the registered drain callbacks.
    pub(crate) fn drain(&self) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            state.queued = 0;
            std::mem::take(&mut state.drain_callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Drops the drain callbacks without firing them, like a closed connection.
    pub(crate) fn forget_drain(&self) {
        self.state.borrow_mut().drain_callbacks.clear();
    }

    pub(crate) fn drain_registrations(&self) -> usize {
        self.state.borrow().drain_registrations
    }

    pub(crate) fn calls(&self) -> Vec<SinkCall> {
        self.state.borrow().calls.clone()
    }

    pub(crate) fn writes(&self) -> Vec<Bytes> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn position(&self, predicate: impl Fn(&SinkCall) -> bool) -> Option<usize> {
        self.state.borrow().calls.iter().position(predicate)
    }

    fn record(&self, call: SinkCall) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl ResponseSink for FakeSink {
    fn headers(&self) -> HeaderMap {
        self.state.borrow().initial_headers.clone()
    }

    fn set_status(&mut self, status: StatusCode) -> io::Result<()> {
        if self.state.borrow().fail_status {
            return Err(io::Error::other("status rejected"));
        }
        self.record(SinkCall::Status(status));
        Ok(())
    }

    fn put_header(&mut self, name: &HeaderName, values: Vec<HeaderValue>) -> io::Result<()> {
        self.record(SinkCall::Header(name.clone(), values));
        Ok(())
    }

    fn set_chunked(&mut self, chunked: bool) -> io::Result<()> {
        self.record(SinkCall::Chunked(chunked));
        Ok(())
    }

    fn add_cookie(&mut self, cookie: ResponseCookie) -> io::Result<()> {
        self.record(SinkCall::Cookie(cookie));
        Ok(())
    }

    fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        state.queued += chunk.len();
        state.calls.push(SinkCall::Write(chunk));
        Ok(())
    }

    fn is_write_queue_full(&self) -> bool {
        let state = self.state.borrow();
        state.queue_limit.is_some_and(|limit| state.queued >= limit)
    }

    fn on_drain(&mut self, callback: DrainCallback) {
        let mut state = self.state.borrow_mut();
        state.drain_registrations += 1;
        state.drain_callbacks.push(callback);
    }

    fn send_file(&mut self, path: &Path, offset: u64, length: u64) -> impl Future<Output = io::Result<()>> {
        self.record(SinkCall::SendFile(path.to_path_buf(), offset, length));
        ready(Ok(()))
    }

    fn end(&mut self) -> io::Result<()> {
        self.record(SinkCall::End);
        Ok(())
    }
}

/// Counts how often the task was woken.
#[derive(Default)]
pub(crate) struct WakeCounter {
    count: AtomicUsize,
}

impl WakeCounter {
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Wake for WakeCounter {
    fn wake(self: Arc<Self>) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
