//! Core domain types for the qflow ticket dispatch engine.
//!
//! This crate provides the fundamental types used throughout the system:
//! - `TopicId`, `CounterId`, `TicketId`: typed identifiers
//! - `Topic`, `Counter`: service categories and service points
//! - `Ticket`, `TicketStatus`: the queue entry and its state machine
//! - `TicketNo`: fixed-width ticket number encode/decode (`A007`)
//! - `next_ticket_no`: per-topic daily sequence step
//! - `Requester`: who a ticket was issued to (authenticated or walk-in)
//! - `Clock`, `BusinessCalendar`: time source and local business-day arithmetic

pub mod calendar;
pub mod clock;
pub mod error;
pub mod ids;
pub mod model;
pub mod number;
pub mod requester;
pub mod sequence;
pub mod ticket;

pub use calendar::{BusinessCalendar, DayWindow, DEFAULT_UTC_OFFSET_MINUTES};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use ids::{CounterId, TicketId, TopicId};
pub use model::{Counter, DisplayNames, Topic};
pub use number::{TicketNo, MAX_ORDINAL, ORDINAL_WIDTH};
pub use requester::{IdentityClaims, Requester};
pub use sequence::next_ticket_no;
pub use ticket::{NewTicket, Ticket, TicketStatus};
