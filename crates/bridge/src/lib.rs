//! A demand-driven bridge between a callback-based HTTP engine and `http` / `http-body` types
//!
//! Event-loop HTTP engines push request bytes through callbacks and accept response bytes
//! into a write queue that may fill up. Applications written against `http_body::Body`
//! pull instead. This crate sits in between and keeps both sides honest: the request body
//! never holds more chunks than were asked for, and the response body is never asked for
//! a chunk while the engine can't take it.
//!
//! # Example
//!
//! ```no_run
//! use std::error::Error;
//! use std::rc::Rc;
//!
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::{BodyExt, Full};
//! use micro_bridge::body::SourceBody;
//! use micro_bridge::exchange::serve;
//! use micro_bridge::handler::make_handler;
//! use micro_bridge::transport::{NativeRequest, ReadSource, ResponseSink};
//!
//! async fn echo<S: ReadSource + 'static>(request: Request<SourceBody<S>>) -> Result<Response<Full<Bytes>>, Box<dyn Error + Send + Sync>> {
//!     let body = request.into_body().collect().await?.to_bytes();
//!     Ok(Response::new(Full::new(body)))
//! }
//!
//! async fn on_request<R, S, W>(native: R, source: Rc<S>, sink: W)
//! where
//!     R: NativeRequest,
//!     S: ReadSource + 'static,
//!     W: ResponseSink,
//! {
//!     let handler = make_handler(echo::<S>);
//!     if let Err(e) = serve(&handler, native, source, sink).await {
//!         tracing::error!(cause = %e, "exchange failed");
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`transport`]: the contracts the engine implements
//! - [`body`]: [`body::SourceBody`] for the inbound side and [`body::FlowControlledWriter`] for the outbound side
//! - [`exchange`]: request and response surfaces of a single exchange, and [`exchange::serve`]
//! - [`handler`]: request handler traits and utilities
//! - [`protocol`]: value types and errors
//!
//! # Error Handling
//!
//! - [`protocol::BridgeError`]: top-level error type
//! - [`protocol::ReceiveError`]: request surface and request body errors
//! - [`protocol::SendError`]: response framing, response body and sink errors
//!
//! # Threading
//!
//! Everything runs on the engine's event loop. Bodies and surfaces share state through
//! `Rc`, so none of the types here are `Send`; run them on a single-threaded runtime
//! such as a tokio `LocalSet`.

pub mod body;
pub mod exchange;
pub mod handler;
pub mod protocol;
pub mod transport;

mod utils;
pub(crate) use utils::ensure;

#[cfg(test)]
mod test_support;
