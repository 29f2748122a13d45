use std::fmt;
use std::rc::Rc;

use http::{HeaderMap, Method, Request, Uri};
use once_cell::unsync::OnceCell;
use tracing::{trace, warn};

use crate::body::SourceBody;
use crate::protocol::{PayloadSize, ReceiveError, RemoteAddr, RequestCookies, SslInfo};
use crate::transport::{NativeRequest, ReadSource};

/// The request half of one exchange.
///
/// Method, URI, headers and the remote address are read from the engine once, when the
/// request is created. TLS information and cookies are derived on first access and cached,
/// so the engine is asked for them at most once. The body can be taken exactly once.
pub struct ServerRequest<R, S: ReadSource + 'static> {
    native: R,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: Option<RemoteAddr>,
    ssl_info: OnceCell<Option<SslInfo>>,
    cookies: OnceCell<RequestCookies>,
    body: Option<SourceBody<S>>,
}

impl<R, S> ServerRequest<R, S>
where
    R: NativeRequest,
    S: ReadSource + 'static,
{
    /// Builds the request from the engine's view of it.
    ///
    /// The source is paused and attached to the body right away, no byte is read before
    /// the body is polled or asked for chunks. When the request is rejected the body is
    /// dropped with it, so the source is left paused without a handler.
    pub fn new(native: R, source: Rc<S>) -> Result<Self, ReceiveError> {
        let headers = native.headers();
        let payload_size = PayloadSize::from_headers(&headers);
        let body = SourceBody::with_payload_size(source, payload_size);

        let absolute_uri = native.absolute_uri();
        let uri = absolute_uri.parse::<Uri>().map_err(|e| {
            warn!(uri = %absolute_uri, cause = %e, "received invalid absolute uri");
            ReceiveError::invalid_uri(format!("{absolute_uri}: {e}"))
        })?;

        let method = native.method();
        let remote_addr = native.remote_address();
        trace!(%method, %uri, ?payload_size, "request head received");

        Ok(Self {
            native,
            method,
            uri,
            headers,
            remote_addr,
            ssl_info: OnceCell::new(),
            cookies: OnceCell::new(),
            body: Some(body),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn remote_addr(&self) -> Option<&RemoteAddr> {
        self.remote_addr.as_ref()
    }

    /// TLS details of the connection, `None` for plain connections.
    pub fn ssl_info(&self) -> Option<&SslInfo> {
        self.ssl_info.get_or_init(|| SslInfo::from_session(self.native.ssl_session())).as_ref()
    }

    /// Cookies grouped by name. Only the last cookie of a name survives.
    pub fn cookies(&self) -> &RequestCookies {
        self.cookies.get_or_init(|| RequestCookies::collapse(self.native.cookies()))
    }

    /// The engine's own request object.
    pub fn native(&self) -> &R {
        &self.native
    }

    /// Takes the body out of the request. A second call fails with [`ReceiveError::BodyConsumed`].
    pub fn take_body(&mut self) -> Result<SourceBody<S>, ReceiveError> {
        self.body.take().ok_or(ReceiveError::BodyConsumed)
    }

    /// Converts into an `http::Request` carrying the remote address, TLS info and cookies
    /// as extensions.
    pub fn into_request(mut self) -> Result<Request<SourceBody<S>>, ReceiveError> {
        let body = self.take_body()?;
        let ssl_info = self.ssl_info().cloned();
        let cookies = self.cookies().clone();

        let mut request = Request::new(body);
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.headers_mut() = self.headers;

        let extensions = request.extensions_mut();
        if let Some(remote_addr) = self.remote_addr {
            extensions.insert(remote_addr);
        }
        if let Some(ssl_info) = ssl_info {
            extensions.insert(ssl_info);
        }
        extensions.insert(cookies);

        Ok(request)
    }
}

impl<R, S: ReadSource + 'static> fmt::Debug for ServerRequest<R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("headers", &self.headers)
            .field("remote_addr", &self.remote_addr)
            .field("body_taken", &self.body.is_none())
            .finish_non_exhaustive()
    }
}
