//! Store trait.
//!
//! Every mutating method is one transaction: it either commits all of its
//! writes or none of them. The compound mutations the engine relies on are
//! `reserve` (allocate-and-insert), `call` (promote-and-demote) and
//! `close_due_counters` (close-and-cascade).

use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use qflow_core::{
    BusinessCalendar, Counter, CounterId, DayWindow, DisplayNames, NewTicket, Ticket, TicketId,
    Topic, TopicId,
};

use crate::error::StoreResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Fields for a topic insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopic {
    pub names: DisplayNames,
    pub code: String,
}

/// Fields for a counter insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCounter {
    pub label: String,
    pub open: bool,
    pub closes_at: NaiveTime,
    pub topics: Vec<TopicId>,
}

/// Result of a committed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// The ticket now IN_PROGRESS at the counter.
    pub current: Ticket,
    /// The ticket the counter was serving before, now CALLED.
    pub displaced: Option<Ticket>,
}

/// Which counters are due for closing.
#[derive(Debug, Clone, Copy)]
pub struct ClosingQuery {
    pub now: DateTime<Utc>,
    pub window: Duration,
    pub calendar: BusinessCalendar,
}

impl ClosingQuery {
    /// An open counter whose closing time is within the window around `now`.
    pub fn is_due(&self, counter: &Counter) -> bool {
        counter.open
            && self
                .calendar
                .is_closing_due(counter.closes_at, self.now, self.window)
    }
}

/// Result of a committed closing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosingOutcome {
    /// Counters flipped from open to closed, ascending by id.
    pub closed: Vec<CounterId>,
    /// Tickets that were IN_PROGRESS at those counters, now CALLED.
    pub displaced: Vec<Ticket>,
}

impl ClosingOutcome {
    pub fn is_empty(&self) -> bool {
        self.closed.is_empty()
    }
}

/// Transactional persistence for topics, counters and tickets.
pub trait QueueStore: Send + Sync {
    fn insert_topic(&self, topic: NewTopic) -> BoxFuture<'_, StoreResult<Topic>>;

    fn insert_counter(&self, counter: NewCounter) -> BoxFuture<'_, StoreResult<Counter>>;

    fn set_counter_open(&self, id: CounterId, open: bool) -> BoxFuture<'_, StoreResult<Counter>>;

    fn topic(&self, id: TopicId) -> BoxFuture<'_, StoreResult<Option<Topic>>>;

    fn counter(&self, id: CounterId) -> BoxFuture<'_, StoreResult<Option<Counter>>>;

    fn ticket(&self, id: TicketId) -> BoxFuture<'_, StoreResult<Option<Ticket>>>;

    /// Allocate the topic's next number within `day` and insert the ticket.
    ///
    /// Reservations for one topic are serialized, so concurrent calls never
    /// read the same last number.
    fn reserve(
        &self,
        new: NewTicket,
        day: DayWindow,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Ticket>>;

    /// Promote `ticket` to IN_PROGRESS at `counter` and demote the ticket the
    /// counter was serving, if any, to CALLED.
    fn call(&self, ticket: TicketId, counter: CounterId) -> BoxFuture<'_, StoreResult<CallOutcome>>;

    /// Set the feedback flag on a CALLED ticket.
    fn record_feedback(&self, ticket: TicketId) -> BoxFuture<'_, StoreResult<Ticket>>;

    /// Remove a ticket. Returns the removed row.
    fn delete_ticket(&self, ticket: TicketId) -> BoxFuture<'_, StoreResult<Option<Ticket>>>;

    /// Close every due counter and finish the tickets they were serving.
    fn close_due_counters(&self, query: ClosingQuery) -> BoxFuture<'_, StoreResult<ClosingOutcome>>;

    /// Bulk delete tickets created before `cutoff`. Returns the row count.
    fn delete_tickets_before(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, StoreResult<u64>>;

    /// All tickets of a topic created within `day`, by ordinal.
    fn topic_tickets(&self, topic: TopicId, day: DayWindow) -> BoxFuture<'_, StoreResult<Vec<Ticket>>>;

    /// WAITING tickets of the given topics created within `day`, ordered by
    /// creation time then number.
    fn waiting_for_topics(
        &self,
        topics: Vec<TopicId>,
        day: DayWindow,
    ) -> BoxFuture<'_, StoreResult<Vec<Ticket>>>;

    /// The ticket IN_PROGRESS at `counter`.
    fn serving_at(&self, counter: CounterId) -> BoxFuture<'_, StoreResult<Option<Ticket>>>;

    /// Most recent WAITING ticket within `day` issued to this name.
    fn waiting_by_name(
        &self,
        first_name: String,
        last_name: String,
        day: DayWindow,
    ) -> BoxFuture<'_, StoreResult<Option<Ticket>>>;
}

/// Arc wrapper for QueueStore trait objects.
pub type DynStore = Arc<dyn QueueStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn counter(open: bool, closes_at: NaiveTime) -> Counter {
        Counter {
            id: CounterId(1),
            label: "1".to_string(),
            open,
            closes_at,
            topics: vec![],
        }
    }

    #[test]
    fn test_closing_query_requires_open_counter() {
        let query = ClosingQuery {
            // 16:00 local
            now: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            window: Duration::seconds(60),
            calendar: BusinessCalendar::default(),
        };
        let four_pm = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
        assert!(query.is_due(&counter(true, four_pm)));
        assert!(!query.is_due(&counter(false, four_pm)));
        let five_pm = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        assert!(!query.is_due(&counter(true, five_pm)));
    }
}
