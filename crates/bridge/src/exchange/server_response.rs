use std::fmt::{self, Display};
use std::io;
use std::path::Path;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, StatusCode};
use http_body::Body;
use http_body_util::{BodyStream, StreamBody};
use tracing::{debug, error, trace, warn};

use crate::body::FlowControlledWriter;
use crate::ensure;
use crate::protocol::{PayloadSize, ResponseCookie, ResponseCookies, SendError};
use crate::transport::ResponseSink;

/// Where a [`ServerResponse`] is in its lifecycle.
///
/// `Unstarted → HeadersApplying → Committed → BodyStreaming → BodyComplete → Done`,
/// with `Failed` reachable from any step that touches the sink.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResponseState {
    Unstarted,
    HeadersApplying,
    Committed,
    BodyStreaming,
    BodyComplete,
    Done,
    Failed,
}

/// The response half of one exchange.
///
/// Status, headers and cookies are collected here and pushed into the sink in one go,
/// the commit, which happens on the first body write or on an explicit [`commit`](Self::commit),
/// whichever comes first. The commit decides the framing: without a `content-length`
/// header the sink is switched to chunked mode, always before the first byte is written.
pub struct ServerResponse<W> {
    sink: W,
    status: Option<StatusCode>,
    headers: HeaderMap,
    cookies: ResponseCookies,
    cookies_applied: bool,
    state: ResponseState,
}

impl<W> ServerResponse<W>
where
    W: ResponseSink,
{
    /// Wraps the sink, starting from the headers the engine already set on it.
    pub fn new(sink: W) -> Self {
        let headers = sink.headers();
        Self { sink, status: None, headers, cookies: ResponseCookies::new(), cookies_applied: false, state: ResponseState::Unstarted }
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }

    pub fn is_committed(&self) -> bool {
        self.state != ResponseState::Unstarted
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Sets the status, returns false and changes nothing once the response is committed.
    pub fn set_status(&mut self, status: StatusCode) -> bool {
        if self.is_committed() {
            warn!(%status, state = ?self.state, "ignore status change on committed response");
            return false;
        }
        self.status = Some(status);
        true
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The headers, or `None` once they were handed to the sink.
    pub fn headers_mut(&mut self) -> Option<&mut HeaderMap> {
        if self.is_committed() {
            warn!(state = ?self.state, "ignore header change on committed response");
            return None;
        }
        Some(&mut self.headers)
    }

    pub fn cookies(&self) -> &ResponseCookies {
        &self.cookies
    }

    /// Records a cookie. Several cookies may share a name; only the last one reaches the sink.
    pub fn add_cookie(&mut self, cookie: ResponseCookie) -> bool {
        if self.cookies_applied {
            warn!(name = cookie.name(), "ignore cookie added after cookies were sent");
            return false;
        }
        self.cookies.add(cookie);
        true
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Pushes status, headers and cookies into the sink without writing a body.
    ///
    /// Committing twice is a framing error.
    pub fn commit(&mut self) -> Result<(), SendError> {
        ensure!(self.state == ResponseState::Unstarted, SendError::framing(format!("response already committed, state: {:?}", self.state)));
        self.apply_head()
    }

    /// Streams `body` into the sink, committing first if needed.
    ///
    /// Returns the number of body bytes written. The response is not ended; call [`end`](Self::end).
    pub async fn write_with<B>(&mut self, body: B) -> Result<u64, SendError>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: Display,
    {
        self.begin_body()?;

        match FlowControlledWriter::new(&mut self.sink).write_body(body).await {
            Ok(written) => {
                self.state = ResponseState::BodyComplete;
                Ok(written)
            }
            Err(e) => {
                self.state = ResponseState::Failed;
                Err(e)
            }
        }
    }

    /// Streams a sequence of bodies, one after the other, as a single response body.
    pub async fn write_and_flush_with<St, B>(&mut self, bodies: St) -> Result<u64, SendError>
    where
        St: Stream<Item = B> + Unpin,
        B: Body<Data = Bytes> + Unpin,
        B::Error: Display,
    {
        let flattened = StreamBody::new(bodies.map(BodyStream::new).flatten());
        self.write_with(flattened).await
    }

    /// Sends a file range as the body, bypassing the chunk path.
    pub async fn send_file(&mut self, path: impl AsRef<Path>, offset: u64, length: u64) -> Result<(), SendError> {
        self.begin_body()?;

        let path = path.as_ref();
        debug!(path = %path.display(), offset, length, "send file");
        match self.sink.send_file(path, offset, length).await {
            Ok(()) => {
                self.state = ResponseState::BodyComplete;
                Ok(())
            }
            Err(e) => {
                error!(cause = %e, path = %path.display(), "failed to send file");
                self.state = ResponseState::Failed;
                Err(SendError::sink(e))
            }
        }
    }

    /// Ends the response. A response without body is committed here, so status and framing still go out.
    ///
    /// Without a `content-length` the response is marked chunked whatever the status. For
    /// statuses that carry no body (1xx, 204, 304) the engine must leave out `transfer-encoding`.
    pub fn end(&mut self) -> Result<(), SendError> {
        match self.state {
            ResponseState::Unstarted => self.apply_head()?,
            ResponseState::Committed | ResponseState::BodyComplete => {}
            state => return Err(SendError::framing(format!("can't end response in state: {state:?}"))),
        }

        if let Err(e) = self.apply_cookies().and_then(|()| self.sink.end()) {
            error!(cause = %e, "failed to end response");
            self.state = ResponseState::Failed;
            return Err(SendError::sink(e));
        }

        trace!("response ended");
        self.state = ResponseState::Done;
        Ok(())
    }

    fn begin_body(&mut self) -> Result<(), SendError> {
        match self.state {
            ResponseState::Unstarted => self.apply_head()?,
            ResponseState::Committed => {}
            state => return Err(SendError::framing(format!("can't write body in state: {state:?}"))),
        }
        self.state = ResponseState::BodyStreaming;
        Ok(())
    }

    fn apply_head(&mut self) -> Result<(), SendError> {
        self.state = ResponseState::HeadersApplying;

        let result = self.apply_status().and_then(|()| self.apply_headers()).and_then(|()| self.apply_cookies());
        match result {
            Ok(()) => {
                self.state = ResponseState::Committed;
                Ok(())
            }
            Err(e) => {
                error!(cause = %e, "failed to apply response head");
                self.state = ResponseState::Failed;
                Err(SendError::sink(e))
            }
        }
    }

    fn apply_status(&mut self) -> io::Result<()> {
        match self.status {
            Some(status) => self.sink.set_status(status),
            None => Ok(()),
        }
    }

    fn apply_headers(&mut self) -> io::Result<()> {
        // framing must be fixed before the first byte is written
        if !self.headers.contains_key(CONTENT_LENGTH) {
            self.sink.set_chunked(true)?;
        }

        for name in self.headers.keys() {
            let values = self.headers.get_all(name).iter().cloned().collect();
            self.sink.put_header(name, values)?;
        }

        trace!(payload_size = ?PayloadSize::from_headers(&self.headers), headers = self.headers.len(), "response headers applied");
        Ok(())
    }

    fn apply_cookies(&mut self) -> io::Result<()> {
        if self.cookies_applied {
            return Ok(());
        }

        for cookie in self.cookies.to_single_values() {
            self.sink.add_cookie(cookie)?;
        }
        self.cookies_applied = true;
        Ok(())
    }
}

impl<W> fmt::Debug for ServerResponse<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeSink, SinkCall};
    use futures::stream;
    use http::header::{CONTENT_TYPE, SERVER};
    use http::{HeaderName, HeaderValue};
    use http_body::Frame;
    use http_body_util::{Empty, Full};
    use std::convert::Infallible;
    use std::path::PathBuf;

    fn chunked_body(chunks: Vec<&'static str>) -> StreamBody<impl Stream<Item = Result<Frame<Bytes>, Infallible>> + Unpin> {
        StreamBody::new(stream::iter(chunks.into_iter().map(|chunk| Ok(Frame::data(Bytes::from_static(chunk.as_bytes()))))))
    }

    #[tokio::test]
    async fn chunked_mode_is_set_before_first_write() {
        let sink = FakeSink::new();
        let mut response = ServerResponse::new(sink.clone());
        response.set_status(StatusCode::OK);
        response.headers_mut().expect("not committed").insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let written = response.write_with(chunked_body(vec!["hello", " world"])).await.expect("body written");
        assert_eq!(written, 11);
        assert_eq!(response.state(), ResponseState::BodyComplete);

        let status = sink.position(|call| matches!(call, SinkCall::Status(_))).expect("status applied");
        let chunked = sink.position(|call| *call == SinkCall::Chunked(true)).expect("chunked applied");
        let header = sink.position(|call| matches!(call, SinkCall::Header(..))).expect("header applied");
        let first_write = sink.position(|call| matches!(call, SinkCall::Write(_))).expect("body written");
        assert!(status < chunked);
        assert!(chunked < first_write);
        assert!(header < first_write);

        response.end().expect("response ended");
        assert_eq!(response.state(), ResponseState::Done);
        assert_eq!(sink.calls().last(), Some(&SinkCall::End));
    }

    #[tokio::test]
    async fn content_length_keeps_fixed_framing() {
        let sink = FakeSink::new();
        let mut response = ServerResponse::new(sink.clone());
        response.headers_mut().expect("not committed").insert(CONTENT_LENGTH, HeaderValue::from_static("5"));

        response.write_with(Full::new(Bytes::from_static(b"hello"))).await.expect("body written");

        assert!(sink.position(|call| matches!(call, SinkCall::Chunked(_))).is_none());
        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Header(CONTENT_LENGTH, vec![HeaderValue::from_static("5")]),
                SinkCall::Write(Bytes::from_static(b"hello")),
            ]
        );
    }

    #[test]
    fn empty_response_still_applies_head() {
        let sink = FakeSink::new();
        let mut response = ServerResponse::new(sink.clone());
        response.set_status(StatusCode::ACCEPTED);

        response.end().expect("response ended");

        assert_eq!(sink.calls(), vec![SinkCall::Status(StatusCode::ACCEPTED), SinkCall::Chunked(true), SinkCall::End]);
    }

    #[test]
    fn cookies_collapse_to_last_value() {
        let sink = FakeSink::new();
        let mut response = ServerResponse::new(sink.clone());
        assert!(response.add_cookie(ResponseCookie::new("a", "x")));
        assert!(response.add_cookie(ResponseCookie::new("a", "y").with_http_only(true)));

        response.commit().expect("committed");

        let cookies: Vec<_> = sink
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Cookie(cookie) => Some(cookie),
                _ => None,
            })
            .collect();
        assert_eq!(cookies, vec![ResponseCookie::new("a", "y").with_http_only(true)]);

        assert!(!response.add_cookie(ResponseCookie::new("late", "z")));
        response.end().expect("response ended");
        assert_eq!(sink.calls().iter().filter(|call| matches!(call, SinkCall::Cookie(_))).count(), 1);
    }

    #[test]
    fn head_is_frozen_after_commit() {
        let mut response = ServerResponse::new(FakeSink::new());
        response.commit().expect("committed");

        assert!(response.is_committed());
        assert!(response.headers_mut().is_none());
        assert!(!response.set_status(StatusCode::IM_A_TEAPOT));
        assert_eq!(response.status(), None);
    }

    #[test]
    fn double_commit_is_a_framing_error() {
        let mut response = ServerResponse::new(FakeSink::new());
        response.commit().expect("committed");

        assert!(matches!(response.commit(), Err(SendError::Framing { .. })));
        assert_eq!(response.state(), ResponseState::Committed);
    }

    #[tokio::test]
    async fn body_after_explicit_commit_does_not_reapply_head() {
        let sink = FakeSink::new();
        let mut response = ServerResponse::new(sink.clone());
        response.set_status(StatusCode::ACCEPTED);
        response.commit().expect("committed");

        response.write_with(chunked_body(vec!["late body"])).await.expect("body written");

        assert_eq!(sink.calls().iter().filter(|call| matches!(call, SinkCall::Status(_))).count(), 1);
        assert_eq!(sink.writes(), vec![Bytes::from_static(b"late body")]);
    }

    #[tokio::test]
    async fn second_body_is_a_framing_error() {
        let sink = FakeSink::new();
        let mut response = ServerResponse::new(sink.clone());
        response.write_with(chunked_body(vec!["first"])).await.expect("body written");

        let result = response.write_with(chunked_body(vec!["second"])).await;

        assert!(matches!(result, Err(SendError::Framing { .. })));
        assert_eq!(sink.writes(), vec![Bytes::from_static(b"first")]);
    }

    #[tokio::test]
    async fn failed_status_writes_no_body() {
        let sink = FakeSink::new();
        sink.fail_status();
        let mut response = ServerResponse::new(sink.clone());
        response.set_status(StatusCode::OK);

        let result = response.write_with(chunked_body(vec!["never"])).await;

        assert!(matches!(result, Err(SendError::Sink { .. })));
        assert_eq!(response.state(), ResponseState::Failed);
        assert!(sink.writes().is_empty());
        assert!(matches!(response.end(), Err(SendError::Framing { .. })));
    }

    #[tokio::test]
    async fn send_file_commits_first() {
        let sink = FakeSink::new();
        let mut response = ServerResponse::new(sink.clone());
        response.headers_mut().expect("not committed").insert(CONTENT_LENGTH, HeaderValue::from_static("100"));

        response.send_file("/srv/static/index.html", 10, 100).await.expect("file sent");
        response.end().expect("response ended");

        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Header(CONTENT_LENGTH, vec![HeaderValue::from_static("100")]),
                SinkCall::SendFile(PathBuf::from("/srv/static/index.html"), 10, 100),
                SinkCall::End,
            ]
        );
    }

    #[test]
    fn seeds_headers_from_sink() {
        let mut initial = HeaderMap::new();
        initial.insert(SERVER, HeaderValue::from_static("engine"));
        let sink = FakeSink::with_initial_headers(initial);
        let mut response = ServerResponse::new(sink.clone());

        let multi = HeaderName::from_static("x-multi");
        let headers = response.headers_mut().expect("not committed");
        headers.append(&multi, HeaderValue::from_static("1"));
        headers.append(&multi, HeaderValue::from_static("2"));
        response.commit().expect("committed");

        let calls = sink.calls();
        assert!(calls.contains(&SinkCall::Header(SERVER, vec![HeaderValue::from_static("engine")])));
        assert!(calls.contains(&SinkCall::Header(multi, vec![HeaderValue::from_static("1"), HeaderValue::from_static("2")])));
    }

    #[tokio::test]
    async fn flattens_body_sequence() {
        let sink = FakeSink::new();
        let mut response = ServerResponse::new(sink.clone());
        let bodies = stream::iter(vec![Full::new(Bytes::from_static(b"part 1")), Full::new(Bytes::from_static(b"part 2"))]);

        let written = response.write_and_flush_with(bodies).await.expect("bodies written");

        assert_eq!(written, 12);
        assert_eq!(sink.writes(), vec![Bytes::from_static(b"part 1"), Bytes::from_static(b"part 2")]);
    }

    #[tokio::test]
    async fn empty_body_still_commits() {
        let sink = FakeSink::new();
        let mut response = ServerResponse::new(sink.clone());

        let written = response.write_with(Empty::<Bytes>::new()).await.expect("body written");

        assert_eq!(written, 0);
        assert_eq!(sink.calls(), vec![SinkCall::Chunked(true)]);
    }
}
