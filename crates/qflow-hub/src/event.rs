//! Events published to viewers.
//!
//! Wire shape: `{"event": "<name>", "data": {...}}` with camelCase fields.

use qflow_core::{CounterId, Ticket, TicketNo};
use serde::{Deserialize, Serialize};

use crate::error::{HubError, HubResult};

/// A state change published through the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum HubEvent {
    /// A ticket was issued.
    AddQueue { queue: Ticket, waiting: u32 },
    /// A counter called a ticket; `called` is the ticket it displaced.
    UpdateQueue {
        current: Ticket,
        called: Option<Ticket>,
        counter: CounterId,
        /// Tickets still waiting behind `current` in its topic.
        waiting: u32,
    },
    /// Counters closed by the scheduler.
    UpdateCounterStatus { counter_ids: Vec<CounterId> },
    /// A ticket was removed.
    DeleteQueue { queue: Ticket },
    /// A counter re-announced the ticket it is serving.
    RecallQueue { no: TicketNo, counter: CounterId },
}

impl HubEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddQueue { .. } => "addQueue",
            Self::UpdateQueue { .. } => "updateQueue",
            Self::UpdateCounterStatus { .. } => "updateCounterStatus",
            Self::DeleteQueue { .. } => "deleteQueue",
            Self::RecallQueue { .. } => "recallQueue",
        }
    }
}

/// An event together with its encoded text, shared by every viewer queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: HubEvent,
    pub text: String,
}

impl Frame {
    pub fn encode(event: HubEvent) -> HubResult<Self> {
        let text = serde_json::to_string(&event).map_err(|e| HubError::Encode(e.to_string()))?;
        Ok(Self { event, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_status_shape() {
        let event = HubEvent::UpdateCounterStatus {
            counter_ids: vec![CounterId(2), CounterId(5)],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "updateCounterStatus");
        assert_eq!(json["data"]["counterIds"], serde_json::json!([2, 5]));
        assert_eq!(event.name(), "updateCounterStatus");
    }

    #[test]
    fn test_recall_shape_and_decode() {
        let event = HubEvent::RecallQueue {
            no: TicketNo::new("B", 12).unwrap(),
            counter: CounterId(3),
        };
        let frame = Frame::encode(event.clone()).unwrap();
        assert_eq!(
            frame.text,
            r#"{"event":"recallQueue","data":{"no":"B012","counter":3}}"#
        );
        let back: HubEvent = serde_json::from_str(&frame.text).unwrap();
        assert_eq!(back, event);
    }
}
