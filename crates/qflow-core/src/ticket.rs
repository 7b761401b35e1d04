//! Tickets and the ticket status state machine.
//!
//! ```text
//!   WAITING ──call──▶ IN_PROGRESS ──displaced / counter closed──▶ CALLED
//! ```
//!
//! Transitions never skip a state and never regress. A ticket carries a
//! `counter_id` from the moment it is called onwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};
use crate::ids::{CounterId, TicketId, TopicId};
use crate::number::TicketNo;
use crate::requester::Requester;

/// Ticket status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Issued, not yet called by any counter.
    Waiting,
    /// Being served at a counter.
    InProgress,
    /// Done at the counter (terminal for dispatch).
    Called,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::InProgress => "IN_PROGRESS",
            Self::Called => "CALLED",
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::InProgress) | (Self::InProgress, Self::Called)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Called)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(Self::Waiting),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "CALLED" => Ok(Self::Called),
            other => Err(format!("unknown ticket status {other:?}")),
        }
    }
}

/// Fields supplied when reserving a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub topic_id: TopicId,
    pub requester: Requester,
    pub note: Option<String>,
}

/// A queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: TicketId,
    pub no: TicketNo,
    #[serde(flatten)]
    pub requester: Requester,
    pub topic_id: TopicId,
    pub note: Option<String>,
    pub status: TicketStatus,
    pub counter_id: Option<CounterId>,
    /// Whether the requester has submitted feedback for this visit.
    pub feedback: bool,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// Build a freshly issued ticket.
    pub fn issued(id: TicketId, no: TicketNo, new: NewTicket, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            no,
            requester: new.requester,
            topic_id: new.topic_id,
            note: new.note,
            status: TicketStatus::Waiting,
            counter_id: None,
            feedback: false,
            created_at,
        }
    }

    fn transition(&mut self, next: TicketStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                no: self.no.to_string(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// WAITING -> IN_PROGRESS at `counter`.
    pub fn start(&mut self, counter: CounterId) -> CoreResult<()> {
        self.transition(TicketStatus::InProgress)?;
        self.counter_id = Some(counter);
        Ok(())
    }

    /// IN_PROGRESS -> CALLED. The counter binding is kept.
    pub fn finish(&mut self) -> CoreResult<()> {
        self.transition(TicketStatus::Called)
    }

    /// Record submitted feedback. Only a CALLED ticket accepts feedback, once.
    pub fn record_feedback(&mut self) -> CoreResult<()> {
        if self.status != TicketStatus::Called {
            return Err(CoreError::FeedbackNotAllowed {
                no: self.no.to_string(),
                reason: "ticket has not been served yet",
            });
        }
        if self.feedback {
            return Err(CoreError::FeedbackNotAllowed {
                no: self.no.to_string(),
                reason: "feedback already submitted",
            });
        }
        self.feedback = true;
        Ok(())
    }

    /// Whether this ticket is being served at `counter`.
    pub fn is_serving_at(&self, counter: CounterId) -> bool {
        self.status == TicketStatus::InProgress && self.counter_id == Some(counter)
    }
}
