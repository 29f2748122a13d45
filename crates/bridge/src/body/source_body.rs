use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use tracing::{debug, error, trace};

use crate::protocol::{PayloadSize, ReceiveError, StreamState};
use crate::transport::{ReadSource, SourceEvent, SourceHandler};

/// A request body fed by a pausable, callback-driven [`ReadSource`].
///
/// The source is paused on construction and resumed only while demand is outstanding.
/// Demand is granted either explicitly through [`SourceBody::request`] or implicitly by
/// polling the body when nothing is buffered, which asks for exactly one chunk.
/// Every `Data` event consumes one unit of demand and the source is paused again as
/// soon as demand reaches zero, so the number of chunks emitted never exceeds the
/// demand granted.
///
/// Dropping the body cancels it: the handler is deregistered and the source is left paused.
pub struct SourceBody<S: ReadSource + 'static> {
    shared: Rc<RefCell<Shared>>,
    source: Rc<S>,
    payload_size: PayloadSize,
}

struct Shared {
    state: StreamState,
    demand: u64,
    paused: bool,
    registered: bool,
    delivered: VecDeque<Bytes>,
    failure: Option<ReceiveError>,
    waker: Option<Waker>,
    granted: u64,
    emitted: u64,
}

/// What the event handler must do once it released the shared state.
#[derive(Default)]
struct Reaction {
    pause: bool,
    waker: Option<Waker>,
}

impl<S: ReadSource + 'static> SourceBody<S> {
    pub fn new(source: Rc<S>) -> Self {
        Self::with_payload_size(source, PayloadSize::Chunked)
    }

    /// Creates a body whose size hint reflects the request framing.
    pub fn with_payload_size(source: Rc<S>, payload_size: PayloadSize) -> Self {
        let shared = Rc::new(RefCell::new(Shared::new()));

        // pause before registering, a source with buffered bytes would otherwise dispatch right away
        source.pause();
        source.set_handler(Some(event_handler(Rc::downgrade(&shared), Rc::downgrade(&source))));

        Self { shared, source, payload_size }
    }

    /// Grants `n` more chunks of demand, resuming the source if it was paused.
    ///
    /// A request of zero is a protocol violation and fails the body. Requests after
    /// the body reached a terminal state are ignored.
    pub fn request(&self, n: u64) {
        let resume = {
            let mut shared = self.shared.borrow_mut();
            if shared.state.is_terminal() {
                return;
            }

            if n == 0 {
                error!("received demand of zero chunks");
                let reaction = shared.fail(ReceiveError::protocol_violation("demand must be greater than zero"));
                drop(shared);
                self.react(reaction);
                return;
            }

            shared.grant(n)
        };

        if resume {
            trace!(demand = n, "resume source");
            self.source.resume();
        }
    }

    /// Cancels the body: deregisters the handler and leaves the source paused.
    ///
    /// Idempotent, and a no-op once the body completed or failed.
    pub fn cancel(&self) {
        {
            let mut shared = self.shared.borrow_mut();
            if shared.state.is_terminal() {
                return;
            }
            shared.state = StreamState::Cancelled;
            shared.delivered.clear();
            shared.demand = 0;
            shared.paused = true;
            shared.waker = None;
        }

        debug!("source body cancelled");
        self.detach();
        self.source.pause();
    }

    pub fn state(&self) -> StreamState {
        self.shared.borrow().state
    }

    /// Demand granted but not yet fulfilled.
    pub fn outstanding_demand(&self) -> u64 {
        self.shared.borrow().demand
    }

    /// Total demand granted over the lifetime of the body.
    pub fn granted(&self) -> u64 {
        self.shared.borrow().granted
    }

    /// Number of chunks the source delivered into the body.
    pub fn emitted(&self) -> u64 {
        self.shared.borrow().emitted
    }

    fn detach(&self) {
        let registered = std::mem::replace(&mut self.shared.borrow_mut().registered, false);
        if registered {
            self.source.set_handler(None);
        }
    }

    fn react(&self, reaction: Reaction) {
        if reaction.pause {
            self.source.pause();
        }
        if let Some(waker) = reaction.waker {
            waker.wake();
        }
    }
}

fn event_handler<S: ReadSource + 'static>(shared: Weak<RefCell<Shared>>, source: Weak<S>) -> SourceHandler {
    Box::new(move |event| {
        let Some(shared) = shared.upgrade() else {
            return;
        };

        // the borrow must end before calling into the source, which may dispatch again
        let reaction = shared.borrow_mut().on_event(event);

        if reaction.pause
            && let Some(source) = source.upgrade()
        {
            source.pause();
        }
        if let Some(waker) = reaction.waker {
            waker.wake();
        }
    })
}

impl Shared {
    fn new() -> Self {
        Self {
            state: StreamState::Active,
            demand: 0,
            paused: true,
            registered: true,
            delivered: VecDeque::new(),
            failure: None,
            waker: None,
            granted: 0,
            emitted: 0,
        }
    }

    /// Adds demand and returns true if the source has to be resumed.
    fn grant(&mut self, n: u64) -> bool {
        self.demand = self.demand.saturating_add(n);
        self.granted = self.granted.saturating_add(n);
        std::mem::replace(&mut self.paused, false)
    }

    fn fail(&mut self, e: ReceiveError) -> Reaction {
        self.state = StreamState::Failed;
        self.failure = Some(e);
        self.demand = 0;
        let pause = !std::mem::replace(&mut self.paused, true);
        Reaction { pause, waker: self.waker.take() }
    }

    fn on_event(&mut self, event: SourceEvent) -> Reaction {
        if self.state.is_terminal() {
            trace!(state = ?self.state, "ignore source event after terminal state");
            return Reaction::default();
        }

        match event {
            SourceEvent::Data(bytes) => {
                if self.demand == 0 {
                    error!(size = bytes.len(), "source delivered data without outstanding demand");
                    return self.fail(ReceiveError::protocol_violation("data delivered while no demand was outstanding"));
                }

                self.demand -= 1;
                self.emitted += 1;
                trace!(size = bytes.len(), demand = self.demand, "receive body chunk");
                self.delivered.push_back(bytes);

                let pause = self.demand == 0 && !std::mem::replace(&mut self.paused, true);
                Reaction { pause, waker: self.waker.take() }
            }

            SourceEvent::End => {
                debug!(chunks = self.emitted, "source body completed");
                self.state = StreamState::Completed;
                Reaction { pause: false, waker: self.waker.take() }
            }

            SourceEvent::Error(e) => {
                error!(cause = %e, "source body failed");
                self.state = StreamState::Failed;
                self.failure = Some(ReceiveError::io(e));
                Reaction { pause: false, waker: self.waker.take() }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.delivered.is_empty()
            && match self.state {
                StreamState::Active => false,
                StreamState::Failed => self.failure.is_none(),
                StreamState::Completed | StreamState::Cancelled => true,
            }
    }
}

impl<S: ReadSource + 'static> Stream for SourceBody<S> {
    type Item = Result<Bytes, ReceiveError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            let resume = {
                let mut shared = this.shared.borrow_mut();

                if let Some(bytes) = shared.delivered.pop_front() {
                    return Poll::Ready(Some(Ok(bytes)));
                }

                match shared.state {
                    StreamState::Active => {}
                    // the failure is taken on first report, later polls see the end of the stream
                    StreamState::Failed => return Poll::Ready(shared.failure.take().map(Err)),
                    StreamState::Completed | StreamState::Cancelled => return Poll::Ready(None),
                }

                if !shared.waker.as_ref().is_some_and(|waker| waker.will_wake(cx.waker())) {
                    shared.waker = Some(cx.waker().clone());
                }

                if shared.demand > 0 {
                    return Poll::Pending;
                }

                shared.grant(1)
            };

            if !resume {
                return Poll::Pending;
            }

            trace!("resume source for one chunk");
            this.source.resume();
        }
    }
}

impl<S: ReadSource + 'static> Body for SourceBody<S> {
    type Data = Bytes;
    type Error = ReceiveError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.shared.borrow().is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.payload_size.into()
    }
}

impl<S: ReadSource + 'static> Drop for SourceBody<S> {
    fn drop(&mut self) {
        self.cancel();
        self.detach();
    }
}

impl<S: ReadSource + 'static> fmt::Debug for SourceBody<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("SourceBody")
            .field("state", &shared.state)
            .field("demand", &shared.demand)
            .field("paused", &shared.paused)
            .field("buffered", &shared.delivered.len())
            .field("payload_size", &self.payload_size)
            .finish_non_exhaustive()
    }
}
