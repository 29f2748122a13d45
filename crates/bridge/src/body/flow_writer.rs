use std::fmt::Display;
use std::io;

use bytes::Bytes;
use futures::channel::oneshot;
use http_body::Body;
use http_body_util::BodyExt;
use tracing::{debug, error, trace};

use crate::protocol::SendError;
use crate::transport::ResponseSink;

/// Drains a response body into a [`ResponseSink`] at the pace the sink can absorb.
///
/// The writer asks the body for one chunk at a time and hands it to the sink right
/// away. While the sink reports a full write queue no further chunk is requested; the
/// writer parks on a single drain registration and asks for the next chunk once it
/// fires. At most one chunk is ever held by the writer.
///
/// Completing the body does not end the response, the sink stays open for the caller.
#[derive(Debug)]
pub struct FlowControlledWriter<'sink, W> {
    sink: &'sink mut W,
    written: u64,
    chunks: u64,
    drain_waits: u64,
}

impl<'sink, W> FlowControlledWriter<'sink, W>
where
    W: ResponseSink,
{
    pub fn new(sink: &'sink mut W) -> Self {
        Self { sink, written: 0, chunks: 0, drain_waits: 0 }
    }

    /// Writes the whole body and returns the number of bytes handed to the sink.
    ///
    /// A failing body is reported as [`SendError::Body`]; nothing more is requested from it.
    /// A failing sink is reported as [`SendError::Sink`] and the body is dropped, which
    /// cancels whatever produces it. Bytes already handed to the sink stay written.
    pub async fn write_body<B>(mut self, mut body: B) -> Result<u64, SendError>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: Display,
    {
        loop {
            let frame = match body.frame().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    error!(cause = %e, written = self.written, "response body failed");
                    return Err(SendError::body(format!("resolve response body error: {e}")));
                }
                None => {
                    debug!(written = self.written, chunks = self.chunks, drain_waits = self.drain_waits, "response body written");
                    return Ok(self.written);
                }
            };

            let chunk = frame.into_data().map_err(|_frame| SendError::body("trailers can't be written to the sink"))?;
            if chunk.is_empty() {
                continue;
            }

            let size = chunk.len() as u64;
            if let Err(e) = self.sink.write(chunk) {
                error!(cause = %e, written = self.written, "failed to write chunk, cancel response body");
                drop(body);
                return Err(SendError::sink(e));
            }
            self.written += size;
            self.chunks += 1;

            if self.sink.is_write_queue_full() {
                self.wait_drain().await?;
            }
        }
    }

    async fn wait_drain(&mut self) -> Result<(), SendError> {
        let (tx, rx) = oneshot::channel::<()>();
        self.sink.on_drain(Box::new(move || {
            // the writer may be gone already, then nobody waits for the signal
            let _ = tx.send(());
        }));
        self.drain_waits += 1;
        trace!(written = self.written, "write queue full, wait for drain");

        rx.await.map_err(|_canceled| {
            error!("sink dropped the drain callback without firing it");
            SendError::sink(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed while waiting for drain"))
        })
    }
}
