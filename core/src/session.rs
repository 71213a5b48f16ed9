use crate::error::ClientError;
use crate::stream::{StreamEvent, StreamEventParser};
use crate::transport::ByteStream;
use futures::StreamExt;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

/// Receives the decoded events of one stream.
///
/// `on_complete` runs once on natural end or after a terminal event;
/// `on_error` runs at most once when the body fails first. After either of
/// them, or after [`SessionHandle::cancel`], nothing else is called.
pub trait StreamObserver: Send + 'static {
    fn on_event(&mut self, event: StreamEvent);

    fn on_error(&mut self, _error: ClientError) {}

    fn on_complete(&mut self) {}
}

type ErrorCallback = Box<dyn FnOnce(ClientError) + Send>;
type CompleteCallback = Box<dyn FnOnce() + Send>;

/// Closure-backed observer.
pub struct StreamCallbacks<E> {
    on_event: E,
    on_error: Option<ErrorCallback>,
    on_complete: Option<CompleteCallback>,
}

impl<E> StreamCallbacks<E>
where
    E: FnMut(StreamEvent) + Send + 'static,
{
    pub fn new(on_event: E) -> Self {
        Self {
            on_event,
            on_error: None,
            on_complete: None,
        }
    }

    pub fn with_error(mut self, f: impl FnOnce(ClientError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn with_complete(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl<E> StreamObserver for StreamCallbacks<E>
where
    E: FnMut(StreamEvent) + Send + 'static,
{
    fn on_event(&mut self, event: StreamEvent) {
        (self.on_event)(event)
    }

    fn on_error(&mut self, error: ClientError) {
        if let Some(f) = self.on_error.take() {
            f(error)
        }
    }

    fn on_complete(&mut self) {
        if let Some(f) = self.on_complete.take() {
            f()
        }
    }
}

/// Channel form of the observer callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Event(StreamEvent),
    Failed(ClientError),
    Completed,
}

impl StreamObserver for mpsc::UnboundedSender<SessionUpdate> {
    fn on_event(&mut self, event: StreamEvent) {
        self.send(SessionUpdate::Event(event)).ok();
    }

    fn on_error(&mut self, error: ClientError) {
        self.send(SessionUpdate::Failed(error)).ok();
    }

    fn on_complete(&mut self) {
        self.send(SessionUpdate::Completed).ok();
    }
}

type ObserverSlot = ReentrantMutex<RefCell<Option<Box<dyn StreamObserver>>>>;

struct SessionShared {
    id: Uuid,
    cancel: CancellationToken,
    // Held for the whole of every callback, so `cancel` from another thread
    // waits for an in-flight callback. Reentrant so a callback may cancel
    // its own session.
    observer: ObserverSlot,
    finished: watch::Sender<bool>,
}

impl SessionShared {
    /// Runs `f` against the observer unless the session was cancelled.
    fn dispatch(&self, f: impl FnOnce(&mut dyn StreamObserver)) -> bool {
        let slot = self.observer.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        let Some(mut observer) = slot.borrow_mut().take() else {
            return false;
        };
        f(observer.as_mut());
        if self.cancel.is_cancelled() {
            return false;
        }
        *slot.borrow_mut() = Some(observer);
        true
    }

    /// Final callback; the observer is released afterwards.
    fn finish(&self, f: impl FnOnce(&mut dyn StreamObserver)) {
        let slot = self.observer.lock();
        let observer = slot.borrow_mut().take();
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(mut observer) = observer {
            f(observer.as_mut());
        }
    }
}

/// Control surface for a running stream. Clones share the session; dropping a
/// handle does not cancel it.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Stops reading and silences the observer. Safe to call repeatedly.
    ///
    /// Blocks until a callback running on another thread has returned; no
    /// callback starts once this returns.
    pub fn cancel(&self) {
        let first = !self.shared.cancel.is_cancelled();
        self.shared.cancel.cancel();
        let observer = self.shared.observer.lock().borrow_mut().take();
        drop(observer);
        if first {
            debug!(session = %self.shared.id, "stream session cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        *self.shared.finished.borrow()
    }

    /// Resolves once the reader task has exited and released the body.
    pub async fn closed(&self) {
        let mut rx = self.shared.finished.subscribe();
        let _ = rx.wait_for(|finished| *finished).await;
    }
}

enum Outcome {
    Ended,
    Terminal,
    Failed(ClientError),
    Cancelled,
}

/// Pumps a response body through a [`StreamEventParser`] into an observer.
pub struct StreamSession;

impl StreamSession {
    /// Spawns the reader task on the current Tokio runtime.
    pub fn start(body: ByteStream, observer: impl StreamObserver) -> SessionHandle {
        let (finished, _) = watch::channel(false);
        let shared = Arc::new(SessionShared {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            observer: ReentrantMutex::new(RefCell::new(Some(Box::new(observer)))),
            finished,
        });
        let span = tracing::info_span!("stream_session", id = %shared.id);
        tokio::spawn(drive(shared.clone(), body).instrument(span));
        SessionHandle { shared }
    }
}

async fn drive(shared: Arc<SessionShared>, mut body: ByteStream) {
    let mut parser = StreamEventParser::new();
    let mut delivered = 0usize;

    let outcome = 'read: loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break 'read Outcome::Cancelled,
            next = body.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                for result in parser.feed_bytes(&chunk) {
                    match result {
                        Ok(event) => {
                            let terminal = event.is_terminal();
                            if !shared.dispatch(|o| o.on_event(event)) {
                                break 'read Outcome::Cancelled;
                            }
                            delivered += 1;
                            if terminal {
                                break 'read Outcome::Terminal;
                            }
                        }
                        Err(err) => warn!(%err, "skipping malformed stream frame"),
                    }
                }
            }
            Some(Err(err)) => break 'read Outcome::Failed(err),
            None => break 'read Outcome::Ended,
        }
    };
    drop(body);

    match outcome {
        Outcome::Ended => {
            let tail = parser.flush();
            let mut live = true;
            if let Some(event) = tail {
                live = shared.dispatch(|o| o.on_event(event));
                delivered += 1;
            }
            if live {
                shared.finish(|o| o.on_complete());
            }
            debug!(delivered, "stream ended");
        }
        Outcome::Terminal => {
            shared.finish(|o| o.on_complete());
            debug!(delivered, "stream reached terminal event");
        }
        Outcome::Failed(err) => {
            warn!(%err, delivered, "stream failed");
            shared.finish(|o| o.on_error(err));
        }
        Outcome::Cancelled => debug!(delivered, "stream reader released after cancel"),
    }
    parser.clear();
    shared.finished.send_replace(true);
}
