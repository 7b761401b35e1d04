//! In-process store.
//!
//! All state sits behind one mutex and every method runs to completion under
//! it, so each call is a serializable transaction. Writes are applied only
//! after every check of the call has passed, which gives all-or-nothing
//! commits without an undo log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use qflow_core::sequence::highest;
use qflow_core::{
    next_ticket_no, Counter, CounterId, DayWindow, NewTicket, Ticket, TicketId, TicketStatus,
    Topic, TopicId,
};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{
    BoxFuture, CallOutcome, ClosingOutcome, ClosingQuery, NewCounter, NewTopic, QueueStore,
};

#[derive(Debug, Default)]
struct State {
    topics: BTreeMap<TopicId, Topic>,
    counters: BTreeMap<CounterId, Counter>,
    tickets: BTreeMap<TicketId, Ticket>,
    last_topic_id: i64,
    last_counter_id: i64,
    last_ticket_id: i64,
    /// Injected failure for the next write transaction.
    fail_next_write: Option<String>,
}

impl State {
    /// Start a write transaction.
    fn begin_write(&mut self) -> StoreResult<()> {
        match self.fail_next_write.take() {
            Some(message) => Err(StoreError::Database(message)),
            None => Ok(()),
        }
    }

    fn topic(&self, id: TopicId) -> StoreResult<&Topic> {
        self.topics
            .get(&id)
            .ok_or_else(|| StoreError::not_found("topic", id.value()))
    }

    fn counter(&self, id: CounterId) -> StoreResult<&Counter> {
        self.counters
            .get(&id)
            .ok_or_else(|| StoreError::not_found("counter", id.value()))
    }

    fn ticket(&self, id: TicketId) -> StoreResult<&Ticket> {
        self.tickets
            .get(&id)
            .ok_or_else(|| StoreError::not_found("ticket", id.value()))
    }

    fn serving_at(&self, counter: CounterId) -> Option<&Ticket> {
        self.tickets.values().find(|t| t.is_serving_at(counter))
    }

    fn insert_topic(&mut self, topic: NewTopic) -> StoreResult<Topic> {
        self.begin_write()?;
        if self.topics.values().any(|t| t.code == topic.code) {
            return Err(StoreError::Conflict(format!(
                "topic code {:?} already exists",
                topic.code
            )));
        }
        let id = TopicId(self.last_topic_id + 1);
        let topic = Topic::new(id, topic.names, topic.code)?;
        self.last_topic_id = id.value();
        self.topics.insert(id, topic.clone());
        Ok(topic)
    }

    fn insert_counter(&mut self, counter: NewCounter) -> StoreResult<Counter> {
        self.begin_write()?;
        if self.counters.values().any(|c| c.label == counter.label) {
            return Err(StoreError::Conflict(format!(
                "counter label {:?} already exists",
                counter.label
            )));
        }
        for topic in &counter.topics {
            self.topic(*topic)?;
        }
        let id = CounterId(self.last_counter_id + 1);
        let counter = Counter {
            id,
            label: counter.label,
            open: counter.open,
            closes_at: counter.closes_at,
            topics: counter.topics,
        };
        self.last_counter_id = id.value();
        self.counters.insert(id, counter.clone());
        Ok(counter)
    }

    fn set_counter_open(&mut self, id: CounterId, open: bool) -> StoreResult<Counter> {
        self.begin_write()?;
        let counter = self
            .counters
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("counter", id.value()))?;
        counter.open = open;
        Ok(counter.clone())
    }

    fn reserve(&mut self, new: NewTicket, day: DayWindow, now: DateTime<Utc>) -> StoreResult<Ticket> {
        self.begin_write()?;
        let code = self.topic(new.topic_id)?.code.clone();
        let issued_today: Vec<String> = self
            .tickets
            .values()
            .filter(|t| t.topic_id == new.topic_id && day.contains(t.created_at))
            .map(|t| t.no.encode())
            .filter(|no| no.starts_with(code.as_str()))
            .collect();
        let last = highest(issued_today.iter().map(String::as_str));
        let no = next_ticket_no(&code, last)?;

        let id = TicketId(self.last_ticket_id + 1);
        let ticket = Ticket::issued(id, no, new, now);
        self.last_ticket_id = id.value();
        self.tickets.insert(id, ticket.clone());
        Ok(ticket)
    }

    fn call(&mut self, ticket_id: TicketId, counter_id: CounterId) -> StoreResult<CallOutcome> {
        self.begin_write()?;
        self.counter(counter_id)?;
        let mut current = self.ticket(ticket_id)?.clone();
        current.start(counter_id)?;

        let displaced = match self.serving_at(counter_id) {
            Some(previous) => {
                let mut previous = previous.clone();
                previous.finish()?;
                Some(previous)
            }
            None => None,
        };

        if let Some(previous) = &displaced {
            self.tickets.insert(previous.id, previous.clone());
        }
        self.tickets.insert(current.id, current.clone());
        Ok(CallOutcome { current, displaced })
    }

    fn record_feedback(&mut self, ticket_id: TicketId) -> StoreResult<Ticket> {
        self.begin_write()?;
        let mut ticket = self.ticket(ticket_id)?.clone();
        ticket.record_feedback()?;
        self.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    fn delete_ticket(&mut self, ticket_id: TicketId) -> StoreResult<Option<Ticket>> {
        self.begin_write()?;
        Ok(self.tickets.remove(&ticket_id))
    }

    fn close_due_counters(&mut self, query: ClosingQuery) -> StoreResult<ClosingOutcome> {
        self.begin_write()?;
        let closed: Vec<CounterId> = self
            .counters
            .values()
            .filter(|c| query.is_due(c))
            .map(|c| c.id)
            .collect();

        let mut displaced = Vec::new();
        for counter in &closed {
            if let Some(ticket) = self.serving_at(*counter) {
                let mut ticket = ticket.clone();
                ticket.finish()?;
                displaced.push(ticket);
            }
        }

        for id in &closed {
            if let Some(counter) = self.counters.get_mut(id) {
                counter.open = false;
            }
        }
        for ticket in &displaced {
            self.tickets.insert(ticket.id, ticket.clone());
        }
        Ok(ClosingOutcome { closed, displaced })
    }

    fn delete_tickets_before(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.begin_write()?;
        let before = self.tickets.len();
        self.tickets.retain(|_, t| t.created_at >= cutoff);
        Ok((before - self.tickets.len()) as u64)
    }

    fn topic_tickets(&self, topic: TopicId, day: DayWindow) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .tickets
            .values()
            .filter(|t| t.topic_id == topic && day.contains(t.created_at))
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.no.ordinal());
        tickets
    }

    fn waiting_for_topics(&self, topics: &[TopicId], day: DayWindow) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .tickets
            .values()
            .filter(|t| {
                t.status == TicketStatus::Waiting
                    && topics.contains(&t.topic_id)
                    && day.contains(t.created_at)
            })
            .cloned()
            .collect();
        tickets.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.no.encode().cmp(&b.no.encode()))
        });
        tickets
    }

    fn waiting_by_name(&self, first_name: &str, last_name: &str, day: DayWindow) -> Option<Ticket> {
        self.tickets
            .values()
            .filter(|t| {
                t.status == TicketStatus::Waiting
                    && day.contains(t.created_at)
                    && t.requester.has_name(first_name, last_name)
            })
            .max_by_key(|t| (t.created_at, t.id))
            .cloned()
    }
}

/// Store kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write transaction fail with a database error.
    ///
    /// Nothing is written by the failing transaction.
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.state.lock().fail_next_write = Some(message.into());
    }

    /// Number of stored tickets.
    pub fn ticket_count(&self) -> usize {
        self.state.lock().tickets.len()
    }

    /// Snapshot of every stored ticket, by id.
    pub fn all_tickets(&self) -> Vec<Ticket> {
        self.state.lock().tickets.values().cloned().collect()
    }
}

impl QueueStore for MemoryStore {
    fn insert_topic(&self, topic: NewTopic) -> BoxFuture<'_, StoreResult<Topic>> {
        Box::pin(async move {
            let topic = self.state.lock().insert_topic(topic)?;
            debug!(topic_id = %topic.id, code = %topic.code, "Topic inserted");
            Ok(topic)
        })
    }

    fn insert_counter(&self, counter: NewCounter) -> BoxFuture<'_, StoreResult<Counter>> {
        Box::pin(async move {
            let counter = self.state.lock().insert_counter(counter)?;
            debug!(counter_id = %counter.id, label = %counter.label, "Counter inserted");
            Ok(counter)
        })
    }

    fn set_counter_open(&self, id: CounterId, open: bool) -> BoxFuture<'_, StoreResult<Counter>> {
        Box::pin(async move { self.state.lock().set_counter_open(id, open) })
    }

    fn topic(&self, id: TopicId) -> BoxFuture<'_, StoreResult<Option<Topic>>> {
        Box::pin(async move { Ok(self.state.lock().topics.get(&id).cloned()) })
    }

    fn counter(&self, id: CounterId) -> BoxFuture<'_, StoreResult<Option<Counter>>> {
        Box::pin(async move { Ok(self.state.lock().counters.get(&id).cloned()) })
    }

    fn ticket(&self, id: TicketId) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        Box::pin(async move { Ok(self.state.lock().tickets.get(&id).cloned()) })
    }

    fn reserve(
        &self,
        new: NewTicket,
        day: DayWindow,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Ticket>> {
        Box::pin(async move { self.state.lock().reserve(new, day, now) })
    }

    fn call(&self, ticket: TicketId, counter: CounterId) -> BoxFuture<'_, StoreResult<CallOutcome>> {
        Box::pin(async move { self.state.lock().call(ticket, counter) })
    }

    fn record_feedback(&self, ticket: TicketId) -> BoxFuture<'_, StoreResult<Ticket>> {
        Box::pin(async move { self.state.lock().record_feedback(ticket) })
    }

    fn delete_ticket(&self, ticket: TicketId) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        Box::pin(async move { self.state.lock().delete_ticket(ticket) })
    }

    fn close_due_counters(&self, query: ClosingQuery) -> BoxFuture<'_, StoreResult<ClosingOutcome>> {
        Box::pin(async move { self.state.lock().close_due_counters(query) })
    }

    fn delete_tickets_before(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, StoreResult<u64>> {
        Box::pin(async move { self.state.lock().delete_tickets_before(cutoff) })
    }

    fn topic_tickets(&self, topic: TopicId, day: DayWindow) -> BoxFuture<'_, StoreResult<Vec<Ticket>>> {
        Box::pin(async move { Ok(self.state.lock().topic_tickets(topic, day)) })
    }

    fn waiting_for_topics(
        &self,
        topics: Vec<TopicId>,
        day: DayWindow,
    ) -> BoxFuture<'_, StoreResult<Vec<Ticket>>> {
        Box::pin(async move { Ok(self.state.lock().waiting_for_topics(&topics, day)) })
    }

    fn serving_at(&self, counter: CounterId) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        Box::pin(async move { Ok(self.state.lock().serving_at(counter).cloned()) })
    }

    fn waiting_by_name(
        &self,
        first_name: String,
        last_name: String,
        day: DayWindow,
    ) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .waiting_by_name(&first_name, &last_name, day))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime, TimeZone};
    use qflow_core::{BusinessCalendar, CoreError, DisplayNames, Requester};

    fn t0() -> DateTime<Utc> {
        // 10:00 local
        Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap()
    }

    fn day() -> DayWindow {
        BusinessCalendar::default().day_window(t0())
    }

    async fn seeded() -> (MemoryStore, Topic, Counter) {
        let store = MemoryStore::new();
        let topic = store
            .insert_topic(NewTopic {
                names: DisplayNames {
                    th: "งานทะเบียน".to_string(),
                    en: "Registration".to_string(),
                },
                code: "A".to_string(),
            })
            .await
            .unwrap();
        let counter = store
            .insert_counter(NewCounter {
                label: "1".to_string(),
                open: true,
                closes_at: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
                topics: vec![topic.id],
            })
            .await
            .unwrap();
        (store, topic, counter)
    }

    fn new_ticket(topic: TopicId, first: &str) -> NewTicket {
        NewTicket {
            topic_id: topic,
            requester: Requester::walk_in(first, "Jaidee").unwrap(),
            note: None,
        }
    }

    #[tokio::test]
    async fn test_reserve_numbers_per_day() {
        let (store, topic, _) = seeded().await;
        let a = store.reserve(new_ticket(topic.id, "A"), day(), t0()).await.unwrap();
        let b = store.reserve(new_ticket(topic.id, "B"), day(), t0()).await.unwrap();
        assert_eq!(a.no.encode(), "A001");
        assert_eq!(b.no.encode(), "A002");

        let tomorrow = t0() + Duration::days(1);
        let next_day = BusinessCalendar::default().day_window(tomorrow);
        let c = store
            .reserve(new_ticket(topic.id, "C"), next_day, tomorrow)
            .await
            .unwrap();
        assert_eq!(c.no.encode(), "A001");
    }

    #[tokio::test]
    async fn test_reserve_unknown_topic() {
        let (store, _, _) = seeded().await;
        let err = store
            .reserve(new_ticket(TopicId(99), "A"), day(), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "topic", id: 99 }));
        assert_eq!(store.ticket_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_topic_code_conflicts() {
        let (store, topic, _) = seeded().await;
        let err = store
            .insert_topic(NewTopic {
                names: topic.names.clone(),
                code: "A".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_call_promotes_and_demotes() {
        let (store, topic, counter) = seeded().await;
        let a = store.reserve(new_ticket(topic.id, "A"), day(), t0()).await.unwrap();
        let b = store.reserve(new_ticket(topic.id, "B"), day(), t0()).await.unwrap();

        let first = store.call(a.id, counter.id).await.unwrap();
        assert_eq!(first.current.status, TicketStatus::InProgress);
        assert_eq!(first.current.counter_id, Some(counter.id));
        assert!(first.displaced.is_none());

        let second = store.call(b.id, counter.id).await.unwrap();
        let displaced = second.displaced.unwrap();
        assert_eq!(displaced.id, a.id);
        assert_eq!(displaced.status, TicketStatus::Called);
        assert_eq!(
            store.serving_at(counter.id).await.unwrap().map(|t| t.id),
            Some(b.id)
        );
    }

    #[tokio::test]
    async fn test_call_non_waiting_ticket_writes_nothing() {
        let (store, topic, counter) = seeded().await;
        let a = store.reserve(new_ticket(topic.id, "A"), day(), t0()).await.unwrap();
        store.call(a.id, counter.id).await.unwrap();

        let err = store.call(a.id, counter.id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(CoreError::InvalidTransition { .. })
        ));
        let still = store.ticket(a.id).await.unwrap().unwrap();
        assert_eq!(still.status, TicketStatus::InProgress);
    }

    #[tokio::test]
    async fn test_injected_failure_rolls_back() {
        let (store, topic, counter) = seeded().await;
        let a = store.reserve(new_ticket(topic.id, "A"), day(), t0()).await.unwrap();
        store.fail_next_write("lock timeout");
        assert!(matches!(
            store.call(a.id, counter.id).await,
            Err(StoreError::Database(_))
        ));
        let a = store.ticket(a.id).await.unwrap().unwrap();
        assert_eq!(a.status, TicketStatus::Waiting);
        // Only the next write fails.
        store.call(a.id, counter.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_due_counters_cascades() {
        let (store, topic, counter) = seeded().await;
        let a = store.reserve(new_ticket(topic.id, "A"), day(), t0()).await.unwrap();
        store.call(a.id, counter.id).await.unwrap();

        let query = ClosingQuery {
            // 16:00:30 local
            now: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 30).unwrap(),
            window: Duration::seconds(60),
            calendar: BusinessCalendar::default(),
        };
        let outcome = store.close_due_counters(query).await.unwrap();
        assert_eq!(outcome.closed, vec![counter.id]);
        assert_eq!(outcome.displaced.len(), 1);
        assert_eq!(outcome.displaced[0].status, TicketStatus::Called);
        assert!(!store.counter(counter.id).await.unwrap().unwrap().open);

        let again = store.close_due_counters(query).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_delete_tickets_before() {
        let (store, topic, _) = seeded().await;
        let old = t0() - Duration::days(31);
        let old_day = BusinessCalendar::default().day_window(old);
        store.reserve(new_ticket(topic.id, "A"), old_day, old).await.unwrap();
        store.reserve(new_ticket(topic.id, "B"), day(), t0()).await.unwrap();

        let removed = store
            .delete_tickets_before(t0() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.ticket_count(), 1);
    }

    #[tokio::test]
    async fn test_waiting_by_name_ignores_served_tickets() {
        let (store, topic, counter) = seeded().await;
        let a = store.reserve(new_ticket(topic.id, "Somchai"), day(), t0()).await.unwrap();
        assert_eq!(
            store
                .waiting_by_name("Somchai".into(), "Jaidee".into(), day())
                .await
                .unwrap()
                .map(|t| t.id),
            Some(a.id)
        );
        store.call(a.id, counter.id).await.unwrap();
        assert!(store
            .waiting_by_name("Somchai".into(), "Jaidee".into(), day())
            .await
            .unwrap()
            .is_none());
    }
}
