//! Both directions of the body bridge.
//!
//! - [`SourceBody`]: turns a pausable, callback-driven [`ReadSource`](crate::transport::ReadSource)
//!   into a `Stream` / `http_body::Body` that never emits more chunks than were asked for
//! - [`FlowControlledWriter`]: drains a `Body` into a [`ResponseSink`](crate::transport::ResponseSink),
//!   asking for the next chunk only while the sink's write queue has room
//!
//! Demand on the inbound side is explicit (`SourceBody::request`) or implied by polling;
//! on the outbound side it is always a single chunk, requested by the writer after the
//! previous one reached the sink.

mod flow_writer;
mod source_body;

pub use flow_writer::FlowControlledWriter;
pub use source_body::SourceBody;
