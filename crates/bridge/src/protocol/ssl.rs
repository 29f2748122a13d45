use bytes::Bytes;

/// TLS session data exposed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslSession {
    pub id: Vec<u8>,
    /// DER encoded peer certificates, leaf first.
    pub peer_certificates: Vec<Bytes>,
}

/// Session information offered to applications.
///
/// Plaintext exchanges carry no `SslInfo` at all; see [`SslInfo::from_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslInfo {
    session_id: Option<String>,
    peer_certificates: Vec<Bytes>,
}

impl SslInfo {
    /// Wraps the transport session. `None` in, `None` out: no TLS is not an error.
    pub fn from_session(session: Option<SslSession>) -> Option<Self> {
        session.map(Self::from)
    }

    /// Lowercase hex of the session id, `None` when the transport did not assign one.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn peer_certificates(&self) -> &[Bytes] {
        &self.peer_certificates
    }
}

impl From<SslSession> for SslInfo {
    fn from(session: SslSession) -> Self {
        let session_id = if session.id.is_empty() {
            None
        } else {
            Some(session.id.iter().map(|byte| format!("{byte:02x}")).collect())
        };

        Self { session_id, peer_certificates: session.peer_certificates }
    }
}
