//! Value types shared by both directions of the bridge.
//!
//! - [`PayloadSize`] and [`StreamState`]: framing and body stream lifecycle
//! - [`ResponseCookie`], [`RequestCookie`] and their collections
//! - [`RemoteAddr`] and [`SslInfo`]: connection metadata handed to applications
//! - [`BridgeError`], [`ReceiveError`], [`SendError`]: error types

mod message;
pub use message::PayloadSize;
pub use message::StreamState;

mod cookie;
pub use cookie::RequestCookie;
pub use cookie::RequestCookies;
pub use cookie::ResponseCookie;
pub use cookie::ResponseCookies;

mod address;
pub use address::RemoteAddr;

mod ssl;
pub use ssl::SslInfo;
pub use ssl::SslSession;

mod error;
pub use error::BridgeError;
pub use error::ReceiveError;
pub use error::SendError;
