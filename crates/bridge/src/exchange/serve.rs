use std::error::Error;
use std::fmt::Display;
use std::rc::Rc;

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{HeaderValue, Response, StatusCode};
use http_body::Body;
use tracing::{debug, error, trace};

use crate::body::SourceBody;
use crate::exchange::{ServerRequest, ServerResponse};
use crate::handler::Handler;
use crate::protocol::{BridgeError, PayloadSize, ResponseCookies, SendError};
use crate::transport::{NativeRequest, ReadSource, ResponseSink};

/// Runs one exchange: builds the request, calls the handler and streams its response into the sink.
///
/// A request the bridge can't represent is answered with `400 Bad Request` and reported as
/// an error. A failing handler is answered with `500 Internal Server Error` and is not an
/// error of the exchange itself.
///
/// Whatever part of the request body the handler did not read is left in the source,
/// paused and without a handler; draining or closing the connection is up to the engine.
pub async fn serve<H, R, S, W>(handler: &H, native: R, source: Rc<S>, sink: W) -> Result<(), BridgeError>
where
    H: Handler<SourceBody<S>>,
    H::RespBody: Body<Data = Bytes> + Unpin,
    <H::RespBody as Body>::Error: Display,
    R: NativeRequest,
    S: ReadSource + 'static,
    W: ResponseSink,
{
    let mut response = ServerResponse::new(sink);

    let request = match ServerRequest::new(native, source).and_then(ServerRequest::into_request) {
        Ok(request) => request,
        Err(e) => {
            error!(cause = %e, "can't accept request");
            send_error_response(&mut response, StatusCode::BAD_REQUEST)?;
            return Err(e.into());
        }
    };

    debug!(method = %request.method(), uri = %request.uri(), "dispatch request");
    let response_result = handler.call(request).await;

    send_response(&mut response, response_result).await
}

async fn send_response<W, T, E>(response: &mut ServerResponse<W>, response_result: Result<Response<T>, E>) -> Result<(), BridgeError>
where
    W: ResponseSink,
    T: Body<Data = Bytes> + Unpin,
    T::Error: Display,
    E: Into<Box<dyn Error + Send + Sync>>,
{
    match response_result {
        Ok(handler_response) => do_send_response(response, handler_response).await,
        Err(e) => {
            let cause: Box<dyn Error + Send + Sync> = e.into();
            let e = SendError::handler(cause);
            error!(cause = %e, "handle response error");
            send_error_response(response, StatusCode::INTERNAL_SERVER_ERROR)?;
            Ok(())
        }
    }
}

async fn do_send_response<W, T>(response: &mut ServerResponse<W>, handler_response: Response<T>) -> Result<(), BridgeError>
where
    W: ResponseSink,
    T: Body<Data = Bytes> + Unpin,
    T::Error: Display,
{
    let (mut parts, body) = handler_response.into_parts();

    let payload_size = match body.size_hint().exact() {
        Some(0) => PayloadSize::Empty,
        Some(length) => PayloadSize::Length(length),
        None => PayloadSize::Chunked,
    };

    response.set_status(parts.status);
    if let Some(headers) = response.headers_mut() {
        headers.extend(parts.headers);

        // a body of known size goes out with a fixed length instead of chunks
        if !headers.contains_key(CONTENT_LENGTH) && allows_body(parts.status) {
            match payload_size {
                PayloadSize::Length(length) => {
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
                }
                PayloadSize::Empty => {
                    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
                }
                PayloadSize::Chunked => {}
            }
        }
    }

    if let Some(cookies) = parts.extensions.remove::<ResponseCookies>() {
        for cookie in cookies.to_single_values() {
            response.add_cookie(cookie);
        }
    }

    let written = response.write_with(body).await?;
    response.end()?;

    trace!(status = %parts.status, written, "response sent");
    Ok(())
}

fn send_error_response<W: ResponseSink>(response: &mut ServerResponse<W>, status: StatusCode) -> Result<(), SendError> {
    response.set_status(status);
    if let Some(headers) = response.headers_mut() {
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    }
    response.end()
}

fn allows_body(status: StatusCode) -> bool {
    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}
