use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ReceiveError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },
}

/// Failures on the inbound side: the request surface and the source body.
#[derive(Error, Debug)]
pub enum ReceiveError {
    /// The demand contract was broken, e.g. the source delivered data while no demand was outstanding.
    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("invalid absolute uri: {reason}")]
    InvalidUri { reason: String },

    #[error("request body has been consumed")]
    BodyConsumed,

    #[error("source error: {source}")]
    Source {
        #[from]
        source: io::Error,
    },
}

impl ReceiveError {
    pub fn protocol_violation<S: ToString>(str: S) -> Self {
        Self::ProtocolViolation { reason: str.to_string() }
    }

    pub fn invalid_uri<S: ToString>(str: S) -> Self {
        Self::InvalidUri { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Source { source: e.into() }
    }
}

/// Failures on the outbound side: framing, the sink and the response body.
#[derive(Error, Debug)]
pub enum SendError {
    /// Headers could not be finalized in order, e.g. a second commit or a second body.
    #[error("framing error: {reason}")]
    Framing { reason: String },

    /// The response body stream failed.
    #[error("invalid body: {reason}")]
    Body { reason: String },

    #[error("handler error: {reason}")]
    Handler { reason: String },

    #[error("sink error: {source}")]
    Sink {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn framing<S: ToString>(str: S) -> Self {
        Self::Framing { reason: str.to_string() }
    }

    pub fn body<S: ToString>(str: S) -> Self {
        Self::Body { reason: str.to_string() }
    }

    pub fn handler<S: ToString>(str: S) -> Self {
        Self::Handler { reason: str.to_string() }
    }

    pub fn sink<E: Into<io::Error>>(e: E) -> Self {
        Self::Sink { source: e.into() }
    }

    /// Returns true if the failure came from the sink rather than from the response itself.
    pub fn is_sink(&self) -> bool {
        matches!(self, SendError::Sink { .. })
    }
}
