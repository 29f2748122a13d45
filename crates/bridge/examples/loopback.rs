//! Runs one exchange against the in-memory engine: a client trickles the request body in,
//! the handler streams it back upper-cased, and a slow peer drains the response.

use std::error::Error;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, Response};
use http_body::Frame;
use http_body_util::StreamBody;
use micro_bridge::body::SourceBody;
use micro_bridge::exchange::serve;
use micro_bridge::handler::make_handler;
use micro_bridge::protocol::{ReceiveError, RemoteAddr};
use micro_bridge::transport::SourceEvent;
use micro_bridge::transport::memory::{MemoryRequest, MemorySink, MemorySource};
use tokio::task::{LocalSet, spawn_local};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

type ShoutBody = StreamBody<Box<dyn Stream<Item = Result<Frame<Bytes>, ReceiveError>> + Unpin>>;

async fn shout(request: Request<SourceBody<MemorySource>>) -> Result<Response<ShoutBody>, Box<dyn Error + Send + Sync>> {
    info!(uri = %request.uri(), remote = ?request.extensions().get::<RemoteAddr>(), "shouting back");

    let frames = request.into_body().map(|chunk| chunk.map(|bytes| Frame::data(Bytes::from(bytes.to_ascii_uppercase()))));
    let response = Response::builder()
        .header(CONTENT_TYPE, "text/plain")
        .body(StreamBody::new(Box::new(frames) as Box<dyn Stream<Item = _> + Unpin>))?;
    Ok(response)
}

async fn run() {
    let source = MemorySource::new();
    let sink = MemorySink::with_high_water_mark(8);
    let native = MemoryRequest::new(Method::POST, "http://127.0.0.1:8080/shout")
        .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
        .with_remote_addr(RemoteAddr::unresolved("127.0.0.1", 51234));

    let client = Rc::clone(&source);
    spawn_local(async move {
        for piece in ["hello ", "from ", "the loopback ", "engine"] {
            tokio::time::sleep(Duration::from_millis(10)).await;
            client.push(SourceEvent::Data(Bytes::from_static(piece.as_bytes())));
        }
        client.push(SourceEvent::End);
    });

    // reads slower than the handler writes, so the write queue fills up
    let peer = sink.clone();
    let reader = spawn_local(async move {
        while !peer.is_ended() {
            tokio::time::sleep(Duration::from_millis(5)).await;
            peer.drain();
        }
        peer
    });

    let handler = make_handler(shout);
    if let Err(e) = serve(&handler, native, source, sink).await {
        error!(cause = %e, "exchange failed");
        return;
    }

    match reader.await {
        Ok(peer) => {
            let body = peer.body();
            info!(status = ?peer.status(), chunked = peer.is_chunked(), body = %String::from_utf8_lossy(&body), "response received");
        }
        Err(e) => error!(cause = %e, "peer task failed"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::TRACE).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    LocalSet::new().run_until(run()).await;
}
