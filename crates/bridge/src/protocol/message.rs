use http::HeaderMap;
use http::header::CONTENT_LENGTH;
use http_body::SizeHint;

/// Represents the size information of an HTTP payload.
///
/// The response side uses it to pick the framing before the first byte goes out:
/// a declared length is sent as is, everything else switches the sink to chunked mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Payload with known length in bytes
    Length(u64),
    /// Payload using chunked transfer encoding
    Chunked,
    /// Empty payload (no body)
    Empty,
}

impl PayloadSize {
    /// Derives the framing from the `content-length` header.
    ///
    /// A missing or unreadable `content-length` means the length is unknown, hence chunked.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let length = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());

        match length {
            Some(0) => PayloadSize::Empty,
            Some(length) => PayloadSize::Length(length),
            None => PayloadSize::Chunked,
        }
    }

    /// Returns true if the payload uses chunked transfer encoding
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    /// Returns true if the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }
}

impl From<PayloadSize> for SizeHint {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(length) => SizeHint::with_exact(length),
            PayloadSize::Chunked => SizeHint::new(),
            PayloadSize::Empty => SizeHint::with_exact(0),
        }
    }
}

/// Lifecycle of one body stream. Every state but `Active` is terminal and sticky.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamState {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl StreamState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamState::Active)
    }
}
