//! Background loops.
//!
//! [`ClosingScheduler`] closes counters whose closing time has come and
//! finishes the tickets they were serving. [`RetentionSweeper`] purges old
//! tickets. Both tick on a fixed interval until cancelled; a failed cycle is
//! logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use qflow_core::{BusinessCalendar, Clock};
use qflow_hub::{HubEvent, HubHandle};
use qflow_store::{ClosingOutcome, ClosingQuery, DynStore};
use qflow_telemetry::Metrics;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::dispatcher::{publish, timed};
use crate::error::EngineResult;
use crate::notify::{Notification, NotificationSender};

/// Scheduler configuration.
#[derive(Debug, Clone, Copy)]
pub struct ClosingConfig {
    /// Time between cycles.
    pub interval: Duration,
    /// Half-width of the window around a counter's closing time.
    pub window: chrono::Duration,
}

impl Default for ClosingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            window: chrono::Duration::seconds(60),
        }
    }
}

/// Force-closes counters at their closing time.
pub struct ClosingScheduler {
    store: DynStore,
    hub: HubHandle,
    notifications: NotificationSender,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    config: ClosingConfig,
}

impl ClosingScheduler {
    pub fn new(
        store: DynStore,
        hub: HubHandle,
        notifications: NotificationSender,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
        config: ClosingConfig,
    ) -> Self {
        Self {
            store,
            hub,
            notifications,
            clock,
            calendar,
            config,
        }
    }

    /// Run one closing cycle.
    ///
    /// Closing and the ticket cascade commit together. After the commit the
    /// closed counter ids are broadcast, then every displaced ticket gets a
    /// `recallQueue` event and a queued feedback request.
    pub async fn run_once(&self) -> EngineResult<ClosingOutcome> {
        let query = ClosingQuery {
            now: self.clock.now(),
            window: self.config.window,
            calendar: self.calendar,
        };
        let outcome = timed("close_due_counters", self.store.close_due_counters(query)).await?;
        if outcome.is_empty() {
            debug!("No counters due for closing");
            return Ok(outcome);
        }

        info!(
            counters = ?outcome.closed,
            displaced = outcome.displaced.len(),
            "Counters closed"
        );
        Metrics::counters_closed(outcome.closed.len());
        publish(
            &self.hub,
            HubEvent::UpdateCounterStatus {
                counter_ids: outcome.closed.clone(),
            },
        );

        for ticket in &outcome.displaced {
            Metrics::ticket_finished("counter_closed");
            if let Some(counter) = ticket.counter_id {
                publish(
                    &self.hub,
                    HubEvent::RecallQueue {
                        no: ticket.no.clone(),
                        counter,
                    },
                );
            }
            self.notifications
                .enqueue(Notification::feedback_request(ticket));
        }

        Ok(outcome)
    }

    /// Tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = self.config.interval.as_secs(),
            window_secs = self.config.window.num_seconds(),
            "Closing scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(_) => Metrics::scheduler_cycle("closing", true),
                        Err(e) => {
                            error!(error = %e, retryable = e.is_retryable(), "Closing cycle failed, retrying next tick");
                            Metrics::scheduler_cycle("closing", false);
                        }
                    }
                }
            }
        }

        info!("Closing scheduler stopped");
    }
}

/// Deletes tickets past the retention period.
pub struct RetentionSweeper {
    store: DynStore,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    interval: Duration,
    retention_days: u32,
}

impl RetentionSweeper {
    pub fn new(
        store: DynStore,
        clock: Arc<dyn Clock>,
        calendar: BusinessCalendar,
        interval: Duration,
        retention_days: u32,
    ) -> Self {
        Self {
            store,
            clock,
            calendar,
            interval,
            retention_days,
        }
    }

    /// Delete every ticket created before the cutoff. Returns the count.
    pub async fn run_once(&self) -> EngineResult<u64> {
        let cutoff = self
            .calendar
            .retention_cutoff(self.clock.now(), self.retention_days);
        let purged = timed("delete_tickets_before", self.store.delete_tickets_before(cutoff)).await?;
        if purged > 0 {
            info!(purged, cutoff = %cutoff, "Expired tickets purged");
            Metrics::tickets_purged(purged);
        }
        Ok(purged)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = self.interval.as_secs(),
            retention_days = self.retention_days,
            "Retention sweeper started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(_) => Metrics::scheduler_cycle("retention", true),
                        Err(e) => {
                            error!(error = %e, "Retention sweep failed");
                            Metrics::scheduler_cycle("retention", false);
                        }
                    }
                }
            }
        }

        info!("Retention sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use qflow_core::{DisplayNames, ManualClock, NewTicket, Requester};
    use qflow_store::{MemoryStore, NewTopic, QueueStore};

    #[tokio::test]
    async fn test_retention_deletes_only_old_tickets() {
        let store = Arc::new(MemoryStore::new());
        let topic = store
            .insert_topic(NewTopic {
                names: DisplayNames {
                    th: "การเงิน".to_string(),
                    en: "Finance".to_string(),
                },
                code: "F".to_string(),
            })
            .await
            .unwrap();
        let calendar = BusinessCalendar::default();
        let old = Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap();
        let recent = Utc.with_ymd_and_hms(2026, 2, 20, 3, 0, 0).unwrap();
        for at in [old, recent] {
            store
                .reserve(
                    NewTicket {
                        topic_id: topic.id,
                        requester: Requester::walk_in("Dao", "Saengchan").unwrap(),
                        note: None,
                    },
                    calendar.day_window(at),
                    at,
                )
                .await
                .unwrap();
        }

        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap()));
        let sweeper = RetentionSweeper::new(
            store.clone(),
            clock,
            calendar,
            Duration::from_secs(3600),
            30,
        );
        assert_eq!(sweeper.run_once().await.unwrap(), 1);
        let left = store.all_tickets();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].created_at, recent);
        assert_eq!(left[0].topic_id, topic.id);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sweeper = RetentionSweeper::new(
            store,
            clock,
            BusinessCalendar::default(),
            Duration::from_millis(10),
            30,
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sweeper.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
