//! Request-driven queue operations.
//!
//! Each mutating operation runs one store transaction, then publishes the
//! committed result to the hub. Publishing and notification happen after the
//! commit and never fail the operation.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use qflow_core::{
    BusinessCalendar, Clock, Counter, CounterId, DayWindow, NewTicket, Requester, Ticket,
    TicketId, Topic, TopicId,
};
use qflow_hub::{HubEvent, HubHandle};
use qflow_store::{BoxFuture, DynStore, StoreResult};
use qflow_telemetry::Metrics;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::notify::{Notification, NotificationSender};
use crate::waiting::{waiting_after_reference, waiting_position};

/// Longest note accepted on a reservation, in characters.
pub const MAX_NOTE_CHARS: usize = 500;

/// A freshly issued (or looked up) ticket and its waiting position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub ticket: Ticket,
    pub waiting: u32,
}

/// Committed result of a counter call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispatch {
    pub current: Ticket,
    pub called: Option<Ticket>,
    pub waiting: u32,
}

/// What a counter sees: the tickets it may call and the one it is serving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterQueue {
    pub counter: Counter,
    pub current: Option<Ticket>,
    pub waiting: Vec<Ticket>,
}

/// Queue operations shared by all request handlers.
#[derive(Clone)]
pub struct Dispatcher {
    store: DynStore,
    hub: HubHandle,
    notifications: NotificationSender,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
}

impl Dispatcher {
    pub fn new(
        store: DynStore,
        hub: HubHandle,
        notifications: NotificationSender,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
    ) -> Self {
        Self {
            store,
            hub,
            notifications,
            clock,
            calendar,
        }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    fn today(&self) -> DayWindow {
        self.calendar.day_window(self.clock.now())
    }

    /// Issue the topic's next ticket of the day to `requester`.
    pub async fn reserve(
        &self,
        topic: TopicId,
        requester: Requester,
        note: Option<String>,
    ) -> EngineResult<Reservation> {
        observe("reserve", self.reserve_inner(topic, requester, note)).await
    }

    async fn reserve_inner(
        &self,
        topic_id: TopicId,
        requester: Requester,
        note: Option<String>,
    ) -> EngineResult<Reservation> {
        let note = normalize_note(note)?;
        let topic = self.require_topic(topic_id).await?;

        let now = self.clock.now();
        let day = self.calendar.day_window(now);
        let new = NewTicket {
            topic_id,
            requester,
            note,
        };
        let ticket = timed("reserve", self.store.reserve(new, day, now)).await?;

        let waiting = match timed("topic_tickets", self.store.topic_tickets(topic_id, day)).await {
            Ok(tickets) => waiting_position(&tickets, &ticket),
            Err(e) => {
                warn!(ticket_no = %ticket.no, error = %e, "Waiting position unavailable after reserve");
                0
            }
        };

        info!(
            ticket_no = %ticket.no,
            topic = %topic.code,
            walk_in = ticket.requester.is_walk_in(),
            waiting,
            "Ticket issued"
        );
        Metrics::ticket_issued(&topic.code);
        self.publish(HubEvent::AddQueue {
            queue: ticket.clone(),
            waiting,
        });

        Ok(Reservation { ticket, waiting })
    }

    /// Bind `counter` to `ticket` and demote whatever it was serving.
    pub async fn call(&self, ticket: TicketId, counter: CounterId) -> EngineResult<Dispatch> {
        observe("call", self.call_inner(ticket, counter)).await
    }

    async fn call_inner(&self, ticket_id: TicketId, counter_id: CounterId) -> EngineResult<Dispatch> {
        let counter = self.require_counter(counter_id).await?;
        let ticket = self.require_ticket(ticket_id).await?;
        if !counter.serves(ticket.topic_id) {
            return Err(EngineError::Unauthorized {
                counter: counter_id,
                topic: ticket.topic_id,
            });
        }

        let outcome = timed("call", self.store.call(ticket_id, counter_id)).await?;
        let current = outcome.current;
        let called = outcome.displaced;

        let day = self.calendar.day_window(current.created_at);
        let waiting = match timed("topic_tickets", self.store.topic_tickets(current.topic_id, day)).await {
            Ok(tickets) => waiting_after_reference(&tickets, &current),
            Err(e) => {
                warn!(ticket_no = %current.no, error = %e, "Waiting count unavailable after call");
                0
            }
        };

        info!(
            ticket_no = %current.no,
            counter_id = counter_id.value(),
            called = ?called.as_ref().map(|t| t.no.to_string()),
            waiting,
            "Ticket called"
        );
        Metrics::ticket_dispatched(counter_id.value());
        if called.is_some() {
            Metrics::ticket_finished("next_call");
        }
        self.publish(HubEvent::UpdateQueue {
            current: current.clone(),
            called: called.clone(),
            counter: counter_id,
            waiting,
        });

        Ok(Dispatch {
            current,
            called,
            waiting,
        })
    }

    /// Re-announce the ticket `counter` is serving.
    pub async fn recall(&self, counter: CounterId) -> EngineResult<Ticket> {
        observe("recall", self.recall_inner(counter)).await
    }

    async fn recall_inner(&self, counter_id: CounterId) -> EngineResult<Ticket> {
        let counter = self.require_counter(counter_id).await?;
        let ticket = timed("serving_at", self.store.serving_at(counter_id))
            .await?
            .ok_or_else(|| EngineError::not_found("ticket serving at counter", counter_id))?;

        info!(ticket_no = %ticket.no, counter_id = counter_id.value(), "Ticket recalled");
        self.publish(HubEvent::RecallQueue {
            no: ticket.no.clone(),
            counter: counter_id,
        });
        self.notifications
            .enqueue(Notification::recall(&ticket, &counter));

        Ok(ticket)
    }

    /// Remove a ticket.
    pub async fn delete(&self, ticket: TicketId) -> EngineResult<Ticket> {
        observe("delete", self.delete_inner(ticket)).await
    }

    async fn delete_inner(&self, ticket_id: TicketId) -> EngineResult<Ticket> {
        let ticket = timed("delete_ticket", self.store.delete_ticket(ticket_id))
            .await?
            .ok_or_else(|| EngineError::not_found("ticket", ticket_id))?;

        info!(ticket_no = %ticket.no, status = %ticket.status, "Ticket deleted");
        self.publish(HubEvent::DeleteQueue {
            queue: ticket.clone(),
        });
        Ok(ticket)
    }

    /// Mark feedback as submitted for a served ticket.
    pub async fn submit_feedback(&self, ticket: TicketId) -> EngineResult<Ticket> {
        observe("submit_feedback", async {
            let ticket = timed("record_feedback", self.store.record_feedback(ticket)).await?;
            info!(ticket_no = %ticket.no, "Feedback recorded");
            Ok(ticket)
        })
        .await
    }

    /// Today's WAITING tickets the counter may call, plus its current ticket.
    pub async fn counter_queue(&self, counter: CounterId) -> EngineResult<CounterQueue> {
        observe("counter_queue", async {
            let counter = self.require_counter(counter).await?;
            let day = self.today();
            let waiting = timed(
                "waiting_for_topics",
                self.store.waiting_for_topics(counter.topics.clone(), day),
            )
            .await?;
            let current = timed("serving_at", self.store.serving_at(counter.id)).await?;
            Ok(CounterQueue {
                counter,
                current,
                waiting,
            })
        })
        .await
    }

    /// The requester's WAITING ticket of today, with its position.
    pub async fn requester_ticket(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> EngineResult<Option<Reservation>> {
        observe("requester_ticket", async {
            let first_name = first_name.trim();
            let last_name = last_name.trim();
            if first_name.is_empty() || last_name.is_empty() {
                return Err(EngineError::Validation(
                    "firstName and lastName are required".to_string(),
                ));
            }
            let day = self.today();
            let found = timed(
                "waiting_by_name",
                self.store
                    .waiting_by_name(first_name.to_string(), last_name.to_string(), day),
            )
            .await?;
            let Some(ticket) = found else {
                return Ok(None);
            };
            let tickets = timed("topic_tickets", self.store.topic_tickets(ticket.topic_id, day)).await?;
            let waiting = waiting_position(&tickets, &ticket);
            Ok(Some(Reservation { ticket, waiting }))
        })
        .await
    }

    pub async fn ticket(&self, ticket: TicketId) -> EngineResult<Ticket> {
        observe("ticket", self.require_ticket(ticket)).await
    }

    async fn require_topic(&self, id: TopicId) -> EngineResult<Topic> {
        timed("topic", self.store.topic(id))
            .await?
            .ok_or_else(|| EngineError::not_found("topic", id))
    }

    async fn require_counter(&self, id: CounterId) -> EngineResult<Counter> {
        timed("counter", self.store.counter(id))
            .await?
            .ok_or_else(|| EngineError::not_found("counter", id))
    }

    async fn require_ticket(&self, id: TicketId) -> EngineResult<Ticket> {
        timed("ticket", self.store.ticket(id))
            .await?
            .ok_or_else(|| EngineError::not_found("ticket", id))
    }

    fn publish(&self, event: HubEvent) {
        publish(&self.hub, event);
    }
}

/// Broadcast without failing the caller; the hub only stops at shutdown.
pub(crate) fn publish(hub: &HubHandle, event: HubEvent) {
    let name = event.name();
    if let Err(e) = hub.broadcast(event) {
        warn!(event = name, error = %e, "Hub unavailable, event not published");
    }
}

/// Await a store call, recording its latency.
pub(crate) async fn timed<T>(
    operation: &'static str,
    fut: BoxFuture<'_, StoreResult<T>>,
) -> EngineResult<T> {
    let start = Instant::now();
    let result = fut.await;
    Metrics::store_latency(operation, start.elapsed().as_secs_f64() * 1000.0);
    result.map_err(EngineError::from)
}

/// Record failed operations by error kind.
async fn observe<T, F>(operation: &'static str, fut: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    let result = fut.await;
    if let Err(e) = &result {
        Metrics::operation_error(operation, e.kind());
        if e.is_retryable() {
            warn!(operation, error = %e, "Operation failed");
        } else {
            debug!(operation, error = %e, "Operation rejected");
        }
    }
    result
}

fn normalize_note(note: Option<String>) -> EngineResult<Option<String>> {
    let Some(note) = note else {
        return Ok(None);
    };
    let note = note.trim();
    if note.is_empty() {
        return Ok(None);
    }
    if note.chars().count() > MAX_NOTE_CHARS {
        return Err(EngineError::Validation(format!(
            "note exceeds {MAX_NOTE_CHARS} characters"
        )));
    }
    Ok(Some(note.to_string()))
}
