//! One request/response exchange on top of the engine contracts.
//!
//! - [`ServerRequest`]: request metadata plus the body as a [`SourceBody`](crate::body::SourceBody)
//! - [`ServerResponse`]: collects status, headers and cookies, commits them exactly once
//!   and streams the body through a [`FlowControlledWriter`](crate::body::FlowControlledWriter)
//! - [`serve`]: ties both halves to a [`Handler`](crate::handler::Handler)

mod serve;
mod server_request;
mod server_response;

pub use serve::serve;
pub use server_request::ServerRequest;
pub use server_response::ResponseState;
pub use server_response::ServerResponse;
