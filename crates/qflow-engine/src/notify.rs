//! Requester notifications.
//!
//! Notifications are best effort. The engine enqueues them onto a bounded
//! queue served by a fixed set of worker tasks; a full queue, a slow
//! transport, or a failed delivery is logged and counted, never reported to
//! the operation that produced the notification.
//!
//! On shutdown the pool stops accepting jobs, lets its workers drain what is
//! already queued, and joins them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use qflow_core::{Counter, CounterId, Requester, Ticket, TicketId, TicketNo};
use qflow_store::BoxFuture;
use qflow_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::NotifyError;

/// Why a requester is being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    /// Service ended; ask for a review.
    FeedbackRequest,
    /// The requester's ticket is being called at a counter.
    Recall,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FeedbackRequest => "feedback_request",
            Self::Recall => "recall",
        }
    }
}

/// A message for one requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub ticket_id: TicketId,
    pub ticket_no: TicketNo,
    pub counter_id: Option<CounterId>,
    pub recipient: Requester,
    pub title: String,
    pub body: String,
}

impl Notification {
    /// Feedback request for a ticket whose service just ended.
    pub fn feedback_request(ticket: &Ticket) -> Self {
        Self {
            kind: NotificationKind::FeedbackRequest,
            ticket_id: ticket.id,
            ticket_no: ticket.no.clone(),
            counter_id: ticket.counter_id,
            recipient: ticket.requester.clone(),
            title: "Let's review your recent help!".to_string(),
            body: "Was the service okay? Tap here to review.".to_string(),
        }
    }

    /// Call-again message for the ticket a counter is serving.
    pub fn recall(ticket: &Ticket, counter: &Counter) -> Self {
        Self {
            kind: NotificationKind::Recall,
            ticket_id: ticket.id,
            ticket_no: ticket.no.clone(),
            counter_id: Some(counter.id),
            recipient: ticket.requester.clone(),
            title: "It's your turn!".to_string(),
            body: format!(
                "Ticket {} is being called at counter {}.",
                ticket.no, counter.label
            ),
        }
    }
}

/// Delivery transport.
pub trait Notifier: Send + Sync {
    fn deliver(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotifyError>>;
}

/// Arc wrapper for Notifier trait objects.
pub type DynNotifier = Arc<dyn Notifier>;

/// Notifier that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotifyError>> {
        Box::pin(async move {
            info!(
                kind = notification.kind.as_str(),
                ticket_no = %notification.ticket_no,
                first_name = notification.recipient.first_name(),
                last_name = notification.recipient.last_name(),
                title = %notification.title,
                "Notification"
            );
            Ok(())
        })
    }
}

/// Mock notifier for testing.
#[derive(Debug, Default)]
pub struct MockNotifier {
    /// Delivered notifications, in completion order.
    delivered: Mutex<Vec<Notification>>,
    /// Tickets whose deliveries fail.
    failing: Mutex<HashSet<TicketId>>,
    /// Artificial transport latency.
    delay: Mutex<Duration>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every delivery addressed to `ticket`.
    pub fn fail_for(&self, ticket: TicketId) {
        self.failing.lock().insert(ticket);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().clone()
    }
}

impl Notifier for MockNotifier {
    fn deliver(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotifyError>> {
        Box::pin(async move {
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.failing.lock().contains(&notification.ticket_id) {
                return Err(NotifyError::Delivery(format!(
                    "mock failure for {}",
                    notification.ticket_no
                )));
            }
            self.delivered.lock().push(notification);
            Ok(())
        })
    }
}

/// Pool sizing.
#[derive(Debug, Clone, Copy)]
pub struct NotificationPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Upper bound for one delivery attempt.
    pub delivery_timeout: Duration,
}

impl Default for NotificationPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            delivery_timeout: Duration::from_secs(10),
        }
    }
}

/// Cloneable handle for enqueueing notifications.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<Notification>,
    closed: CancellationToken,
}

impl NotificationSender {
    /// Queue a notification without waiting. Returns whether it was accepted.
    pub fn enqueue(&self, notification: Notification) -> bool {
        let kind = notification.kind.as_str();
        if self.closed.is_cancelled() {
            warn!(kind, ticket_no = %notification.ticket_no, "Notification pool shut down, dropping");
            Metrics::notification(kind, "dropped");
            return false;
        }
        match self.tx.try_send(notification) {
            Ok(()) => {
                Metrics::notification_queued();
                true
            }
            Err(mpsc::error::TrySendError::Full(n)) => {
                warn!(kind, ticket_no = %n.ticket_no, "Notification queue full, dropping");
                Metrics::notification(kind, "dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                warn!(kind, ticket_no = %n.ticket_no, "Notification workers gone, dropping");
                Metrics::notification(kind, "dropped");
                false
            }
        }
    }
}

/// Bounded worker pool delivering notifications.
pub struct NotificationPool {
    sender: NotificationSender,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationPool {
    /// Spawn `config.workers` workers sharing one bounded queue.
    pub fn start(config: NotificationPoolConfig, notifier: DynNotifier) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(TokioMutex::new(rx));
        let closed = CancellationToken::new();

        let workers = (0..config.workers.max(1))
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    rx.clone(),
                    notifier.clone(),
                    closed.clone(),
                    config.delivery_timeout,
                ))
            })
            .collect();

        info!(
            workers = config.workers.max(1),
            queue_capacity = config.queue_capacity.max(1),
            "Notification pool started"
        );

        Self {
            sender: NotificationSender { tx, closed },
            workers: Mutex::new(workers),
        }
    }

    pub fn sender(&self) -> NotificationSender {
        self.sender.clone()
    }

    /// Stop accepting jobs, deliver what is queued, and join the workers.
    ///
    /// Returns `false` if the workers did not finish within `timeout`; they
    /// are aborted in that case.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.sender.closed.cancel();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();

        match tokio::time::timeout(timeout, join_all(workers)).await {
            Ok(_) => {
                info!("Notification pool drained");
                true
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Notification pool drain timed out");
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

async fn run_worker(
    id: usize,
    rx: Arc<TokioMutex<mpsc::Receiver<Notification>>>,
    notifier: DynNotifier,
    closed: CancellationToken,
    delivery_timeout: Duration,
) {
    debug!(worker = id, "Notification worker started");
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                job = rx.recv() => job,
                // After shutdown, refuse late sends and take whatever is
                // still queued without waiting.
                () = closed.cancelled() => {
                    rx.close();
                    rx.try_recv().ok()
                }
            }
        };
        let Some(notification) = job else {
            break;
        };
        Metrics::notification_dequeued();

        let kind = notification.kind.as_str();
        let ticket_no = notification.ticket_no.clone();
        match tokio::time::timeout(delivery_timeout, notifier.deliver(notification)).await {
            Ok(Ok(())) => {
                debug!(worker = id, kind, ticket_no = %ticket_no, "Notification delivered");
                Metrics::notification(kind, "delivered");
            }
            Ok(Err(e)) => {
                warn!(worker = id, kind, ticket_no = %ticket_no, error = %e, "Notification failed");
                Metrics::notification(kind, "failed");
            }
            Err(_) => {
                warn!(worker = id, kind, ticket_no = %ticket_no, "Notification timed out");
                Metrics::notification(kind, "failed");
            }
        }
    }
    debug!(worker = id, "Notification worker stopped");
}
