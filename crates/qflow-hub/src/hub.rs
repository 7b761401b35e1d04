//! Hub actor.
//!
//! [`HubTask`] owns the subscriber registry and is the only code that touches
//! it. Producers talk to it through an unbounded ingress channel, so
//! `broadcast` never waits. Each subscriber has its own bounded queue; the
//! loop pushes with `try_send` and drops any subscriber whose queue is full or
//! whose receiver is gone. Every live subscriber sees events in broadcast
//! order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use qflow_telemetry::Metrics;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{HubError, HubResult};
use crate::event::{Frame, HubEvent};

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

type SubscriberId = u64;

/// Messages handled by the dispatch loop.
#[derive(Debug)]
enum HubMsg {
    Register {
        id: SubscriberId,
        tx: mpsc::Sender<Arc<Frame>>,
    },
    Unregister(SubscriberId),
    Broadcast(HubEvent),
    Count(oneshot::Sender<usize>),
    Shutdown,
}

struct HubTask {
    rx: mpsc::UnboundedReceiver<HubMsg>,
    subscribers: BTreeMap<SubscriberId, mpsc::Sender<Arc<Frame>>>,
}

impl HubTask {
    async fn run(mut self) {
        debug!("HubTask started");

        while let Some(msg) = self.rx.recv().await {
            match msg {
                HubMsg::Register { id, tx } => {
                    self.subscribers.insert(id, tx);
                    Metrics::viewers_set(self.subscribers.len());
                    debug!(subscriber = id, total = self.subscribers.len(), "Subscriber registered");
                }
                HubMsg::Unregister(id) => {
                    if self.subscribers.remove(&id).is_some() {
                        Metrics::viewers_set(self.subscribers.len());
                        debug!(subscriber = id, total = self.subscribers.len(), "Subscriber unregistered");
                    }
                }
                HubMsg::Broadcast(event) => self.dispatch(event),
                HubMsg::Count(reply) => {
                    let _ = reply.send(self.subscribers.len());
                }
                HubMsg::Shutdown => {
                    debug!("HubTask shutting down");
                    break;
                }
            }
        }

        self.subscribers.clear();
        Metrics::viewers_set(0);
        debug!("HubTask terminated");
    }

    fn dispatch(&mut self, event: HubEvent) {
        let name = event.name();
        let frame = match Frame::encode(event) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(error = %e, event = name, "Dropping unencodable event");
                return;
            }
        };
        Metrics::hub_event(name);

        let mut dropped = Vec::new();
        for (id, tx) in &self.subscribers {
            match tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = id, event = name, "Subscriber lagging, dropping");
                    Metrics::viewer_dropped("lagging");
                    dropped.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber = id, "Subscriber gone, removing");
                    Metrics::viewer_dropped("closed");
                    dropped.push(*id);
                }
            }
        }
        for id in &dropped {
            self.subscribers.remove(id);
        }
        if !dropped.is_empty() {
            Metrics::viewers_set(self.subscribers.len());
        }
        trace!(event = name, subscribers = self.subscribers.len(), "Event dispatched");
    }
}

/// Handle for publishing to and subscribing with the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubMsg>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

impl HubHandle {
    /// Publish an event. Returns immediately.
    pub fn broadcast(&self, event: HubEvent) -> HubResult<()> {
        self.tx
            .send(HubMsg::Broadcast(event))
            .map_err(|_| HubError::Closed)
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> HubResult<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.tx
            .send(HubMsg::Register { id, tx })
            .map_err(|_| HubError::Closed)?;
        Ok(Subscription {
            id,
            rx,
            hub: self.tx.clone(),
        })
    }

    /// Number of registered subscribers, as seen by the dispatch loop after
    /// every message sent before this call.
    pub async fn subscriber_count(&self) -> HubResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubMsg::Count(reply))
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Stop the dispatch loop. Subscribers see their stream end.
    pub fn shutdown(&self) {
        let _ = self.tx.send(HubMsg::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A registered subscriber. Unregisters itself when dropped.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<Frame>>,
    hub: mpsc::UnboundedSender<HubMsg>,
}

impl Subscription {
    /// Next frame, or `None` once the hub has dropped this subscriber or
    /// shut down.
    pub async fn recv(&mut self) -> Option<Arc<Frame>> {
        self.rx.recv().await
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.hub.send(HubMsg::Unregister(self.id));
    }
}

/// Spawn the hub dispatch loop.
///
/// `subscriber_buffer` is the queue depth each subscriber may fall behind by
/// before it is dropped.
pub fn spawn_hub(subscriber_buffer: usize) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let task = HubTask {
        rx,
        subscribers: BTreeMap::new(),
    };
    let handle = HubHandle {
        tx,
        next_id: Arc::new(AtomicU64::new(1)),
        buffer: subscriber_buffer.max(1),
    };

    let join_handle = tokio::spawn(task.run());

    (handle, join_handle)
}
