//! Watch relay: a background task that reads backing watch events,
//! stamps the external identity on every non-error event, and
//! republishes them in order on its own channel.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use veneer_client::WatchHandle;
use veneer_core::{ResourceIdentity, WatchEvent};

/// Buffering policy for the relay's output channel.
///
/// Both variants preserve order and never drop events. `Unbounded`
/// never blocks the relay but grows without limit if the consumer stops
/// reading. `Bounded` parks the relay (and transitively the backing
/// source) on a full buffer until the consumer drains or the relay is
/// stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayBuffer {
    Unbounded,
    Bounded(usize),
}

impl RelayBuffer {
    /// Policy from `VENEER_WATCH_QUEUE_CAP`; unset, unparsable or 0
    /// means unbounded.
    pub fn from_env() -> Self {
        match std::env::var("VENEER_WATCH_QUEUE_CAP")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            Some(cap) if cap > 0 => RelayBuffer::Bounded(cap),
            _ => RelayBuffer::Unbounded,
        }
    }
}

enum EventTx {
    Unbounded(mpsc::UnboundedSender<WatchEvent>),
    Bounded(mpsc::Sender<WatchEvent>),
}

enum EventRx {
    Unbounded(mpsc::UnboundedReceiver<WatchEvent>),
    Bounded(mpsc::Receiver<WatchEvent>),
}

impl EventTx {
    /// Publish one event; `Err` means the consumer is gone.
    async fn send(&self, event: WatchEvent) -> std::result::Result<(), ()> {
        match self {
            EventTx::Unbounded(tx) => tx.send(event).map_err(|_| ()),
            EventTx::Bounded(tx) => tx.send(event).await.map_err(|_| ()),
        }
    }
}

impl EventRx {
    async fn recv(&mut self) -> Option<WatchEvent> {
        match self {
            EventRx::Unbounded(rx) => rx.recv().await,
            EventRx::Bounded(rx) => rx.recv().await,
        }
    }
}

fn event_channel(buffer: RelayBuffer) -> (EventTx, EventRx) {
    match buffer {
        RelayBuffer::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (EventTx::Unbounded(tx), EventRx::Unbounded(rx))
        }
        RelayBuffer::Bounded(cap) => {
            let (tx, rx) = mpsc::channel(cap);
            (EventTx::Bounded(tx), EventRx::Bounded(rx))
        }
    }
}

/// A running watch, already remapped to the external identity.
///
/// The relay stops when the backing stream closes or [`WatchRelay::stop`]
/// is called, whichever happens first. Stopping is idempotent and safe
/// to call from any task, concurrently with delivery; events already
/// buffered remain readable until the channel drains. Dropping the relay
/// stops it too.
pub struct WatchRelay {
    rx: EventRx,
    token: CancellationToken,
}

impl Drop for WatchRelay {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl WatchRelay {
    /// Start the background relay over a backing watch.
    pub fn spawn(external: ResourceIdentity, backing: WatchHandle, buffer: RelayBuffer) -> Self {
        let (tx, rx) = event_channel(buffer);
        let token = CancellationToken::new();
        let task_token = token.clone();
        let WatchHandle {
            rx: mut backing_rx,
            cancel,
        } = backing;
        tokio::spawn(async move {
            let mut relayed = 0u64;
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    next = backing_rx.recv() => {
                        let mut event = match next {
                            Some(event) => event,
                            None => {
                                debug!("backing watch closed");
                                break;
                            }
                        };
                        // Error events carry a status document and pass
                        // through untouched.
                        if let Some(obj) = event.resource_mut() {
                            external.stamp(obj);
                        }
                        tokio::select! {
                            biased;
                            _ = task_token.cancelled() => break,
                            sent = tx.send(event) => {
                                if sent.is_err() {
                                    debug!("relay consumer dropped");
                                    break;
                                }
                                relayed += 1;
                            }
                        }
                    }
                }
            }
            cancel.cancel();
            debug!(relayed, "watch relay stopped");
        });
        Self { rx, token }
    }

    /// Next event, in backing-store order; `None` once the relay has
    /// stopped and the buffer is drained.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }

    /// Request shutdown of the relay and the backing watch. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }
}
