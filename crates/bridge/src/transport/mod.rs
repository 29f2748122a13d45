//! Contracts of the callback-based engine underneath the bridge.
//!
//! The engine owns the socket. It delivers inbound bytes by calling a registered
//! handler, accepts outbound bytes into a write queue that may fill up, and tells
//! when the queue drained. All calls happen on the connection's event loop, so none of
//! these traits require `Send`.
//!
//! - [`ReadSource`]: the pausable inbound byte source
//! - [`ResponseSink`]: the back-pressured outbound side of one response
//! - [`NativeRequest`]: request metadata known once the head has been parsed
//!
//! [`memory`] implements all three without a network.

use std::future::Future;
use std::io;
use std::path::Path;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};

use crate::protocol::{RemoteAddr, RequestCookie, ResponseCookie, SslSession};

pub mod memory;

/// Event pushed by a [`ReadSource`], in order: any number of `Data`, then one of `End` or `Error`.
#[derive(Debug)]
pub enum SourceEvent {
    Data(Bytes),
    End,
    Error(io::Error),
}

pub type SourceHandler = Box<dyn FnMut(SourceEvent)>;

pub type DrainCallback = Box<dyn FnOnce()>;

/// A push-based byte source that can be paused.
///
/// Methods take `&self` because a handler may call back into the source (typically
/// `pause`) while the source is dispatching to it. Implementations must not hold
/// internal borrows while invoking the handler, and may dispatch synchronously from
/// inside `resume`.
pub trait ReadSource {
    /// Stop delivering `Data` events until `resume` is called.
    fn pause(&self);

    fn resume(&self);

    /// Installs the event handler, replacing the previous one. `None` deregisters it.
    fn set_handler(&self, handler: Option<SourceHandler>);
}

/// The outbound half of one exchange.
pub trait ResponseSink {
    /// Headers the engine already put on the response before the bridge took over.
    fn headers(&self) -> HeaderMap;

    fn set_status(&mut self, status: StatusCode) -> io::Result<()>;

    /// Replaces every value of `name` with `values`.
    fn put_header(&mut self, name: &HeaderName, values: Vec<HeaderValue>) -> io::Result<()>;

    fn set_chunked(&mut self, chunked: bool) -> io::Result<()>;

    fn add_cookie(&mut self, cookie: ResponseCookie) -> io::Result<()>;

    /// Queues `chunk` for writing. Never blocks; the queue may grow past its limit.
    fn write(&mut self, chunk: Bytes) -> io::Result<()>;

    fn is_write_queue_full(&self) -> bool;

    /// Registers a one-shot callback fired once the write queue has room again.
    fn on_drain(&mut self, callback: DrainCallback);

    /// Transfers `length` bytes of `path` starting at `offset` without passing them through the bridge.
    fn send_file(&mut self, path: &Path, offset: u64, length: u64) -> impl Future<Output = io::Result<()>>;

    /// Finishes the response message. The connection itself stays with the engine.
    fn end(&mut self) -> io::Result<()>;
}

/// Request metadata read from the engine's native request object.
#[cfg_attr(test, mockall::automock)]
pub trait NativeRequest {
    fn method(&self) -> Method;

    fn absolute_uri(&self) -> String;

    fn headers(&self) -> HeaderMap;

    fn remote_address(&self) -> Option<RemoteAddr>;

    /// The TLS session, `None` on plaintext connections.
    fn ssl_session(&self) -> Option<SslSession>;

    /// Cookies as the engine parsed them, duplicates included.
    fn cookies(&self) -> Vec<RequestCookie>;
}
