use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Status, Streaming};

use crate::rpc::{ClientEventMessage, PluginEventMessage};
use crate::wrapper::clap::InstanceShared;

/// Outbound messages a session will buffer before it starts shedding events. The transport
/// allows one write in flight per session; everything behind it queues here.
const OUTBOUND_BUFFER_CAPACITY: usize = 256;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// One client's bidirectional stream session against a plugin instance.
///
/// Owned by the instance's client set; every termination path (client half-close, transport
/// error, cancellation at destroy, server shutdown) funnels into
/// [`InstanceShared::disconnect`], which removes the session from the set exactly once. The
/// reactor holds shared ownership of the instance state, so a write completing after the host's
/// destroy callback still runs against valid memory.
pub(crate) struct EventStreamReactor {
    session: u64,
    shared: Arc<InstanceShared>,
    /// The write slot plus burst buffer. The queue worker pushes `Arc`-wrapped messages; the
    /// response stream clones them out when the transport is ready for the next write.
    outbound: mpsc::Sender<Result<Arc<PluginEventMessage>, Status>>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
    cancelled: AtomicBool,
}

impl EventStreamReactor {
    /// Register a new session against `shared` and return the response stream for the transport.
    /// Spawns the session's read task; must run inside the server's runtime.
    pub fn connect(
        shared: Arc<InstanceShared>,
        mut inbound: Streaming<ClientEventMessage>,
    ) -> EventStream {
        let session = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        let (outbound, receiver) = mpsc::channel(OUTBOUND_BUFFER_CAPACITY);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();

        let reactor = Arc::new(Self {
            session,
            shared: Arc::clone(&shared),
            outbound,
            cancel: Mutex::new(Some(cancel_tx)),
            cancelled: AtomicBool::new(false),
        });
        shared.connect(reactor);

        // Keep exactly one read outstanding for the lifetime of the session, so inbound messages
        // are handled in arrival order
        let read_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    message = inbound.message() => match message {
                        Ok(Some(message)) => read_shared.dispatch_client_event(&message),
                        // The client half-closed; an orderly finish
                        Ok(None) => break,
                        Err(status) => {
                            remote_trace!("Session {session} read failed: {status}");
                            break;
                        }
                    },
                }
            }

            // Dropping the registration also drops the session's outbound sender (once the
            // worker lets go of any temporary reference), which lets buffered writes drain and
            // then finishes the response stream
            read_shared.disconnect(session);
        });

        EventStream {
            inner: ReceiverStream::new(receiver),
            _guard: DisconnectGuard { shared, session },
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Queue a shared message for this client. The message is dropped for this client only when
    /// its buffer is full or the session is already going away.
    pub fn start_shared_write(&self, message: &Arc<PluginEventMessage>) -> bool {
        if self.is_cancelled() {
            return false;
        }

        match self.outbound.try_send(Ok(Arc::clone(message))) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                remote_trace!(
                    "Session {} of instance {} has a full write buffer, dropping an event",
                    self.session,
                    self.shared.instance_id()
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Cancel the session from the server side. The client observes a `CANCELLED` status after
    /// any in-flight writes; the read task winds down and detaches the session.
    pub fn try_cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self
            .outbound
            .try_send(Err(Status::cancelled("plugin instance destroyed")));
        if let Some(cancel) = self.cancel.lock().take() {
            let _ = cancel.send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Detaches the session when the transport drops the response stream, whichever way the session
/// ends. `disconnect` is idempotent, so racing the read task's own detach is fine.
struct DisconnectGuard {
    shared: Arc<InstanceShared>,
    session: u64,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.shared.disconnect(self.session);
    }
}

/// The server-to-client half of a session. Yields the worker's shared messages by value, cloning
/// each one out of its `Arc` only once the transport is ready to encode it.
pub(crate) struct EventStream {
    inner: ReceiverStream<Result<Arc<PluginEventMessage>, Status>>,
    _guard: DisconnectGuard,
}

impl Stream for EventStream {
    type Item = Result<PluginEventMessage, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(message))) => Poll::Ready(Some(Ok((*message).clone()))),
            Poll::Ready(Some(Err(status))) => Poll::Ready(Some(Err(status))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
