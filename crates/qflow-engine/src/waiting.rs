//! Waiting-position calculation.
//!
//! The reference point of a topic is the highest ordinal currently
//! IN_PROGRESS among its tickets of the day, or 0 when nothing is being
//! served. Tickets at or below the reference have been served or skipped.
//! Only WAITING tickets are counted; tickets already IN_PROGRESS at other
//! counters are not "ahead" of anyone.
//!
//! All functions take the topic's tickets of one business day and compare
//! only tickets that share the subject ticket's code.

use qflow_core::{Ticket, TicketStatus};

/// Highest IN_PROGRESS ordinal among `tickets` with `code`, or 0.
pub fn reference_ordinal(tickets: &[Ticket], code: &str) -> u16 {
    tickets
        .iter()
        .filter(|t| t.status == TicketStatus::InProgress && t.no.code() == code)
        .map(|t| t.no.ordinal())
        .max()
        .unwrap_or(0)
}

/// Number of WAITING tickets still ahead of `ticket`.
///
/// Counts tickets whose ordinal lies strictly between the reference point and
/// `ticket`'s own ordinal. Never counts `ticket` itself.
pub fn waiting_position(tickets: &[Ticket], ticket: &Ticket) -> u32 {
    let code = ticket.no.code();
    let reference = reference_ordinal(tickets, code);
    let own = ticket.no.ordinal();
    count_waiting(tickets, code, |ordinal| reference < ordinal && ordinal < own, ticket)
}

/// Number of WAITING tickets after the reference point of the topic, i.e.
/// the queue still in front of the counters.
pub fn waiting_after_reference(tickets: &[Ticket], current: &Ticket) -> u32 {
    let code = current.no.code();
    let reference = reference_ordinal(tickets, code);
    count_waiting(tickets, code, |ordinal| ordinal > reference, current)
}

fn count_waiting<F>(tickets: &[Ticket], code: &str, in_range: F, exclude: &Ticket) -> u32
where
    F: Fn(u16) -> bool,
{
    tickets
        .iter()
        .filter(|t| {
            t.id != exclude.id
                && t.status == TicketStatus::Waiting
                && t.topic_id == exclude.topic_id
                && t.no.code() == code
                && in_range(t.no.ordinal())
        })
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qflow_core::{CounterId, NewTicket, Requester, TicketId, TicketNo, TopicId};

    fn ticket(ordinal: u16, status: TicketStatus) -> Ticket {
        let mut t = Ticket::issued(
            TicketId(i64::from(ordinal)),
            TicketNo::new("A", ordinal).unwrap(),
            NewTicket {
                topic_id: TopicId(1),
                requester: Requester::walk_in("Visitor", "Test").unwrap(),
                note: None,
            },
            Utc::now(),
        );
        if status != TicketStatus::Waiting {
            t.start(CounterId(1)).unwrap();
        }
        if status == TicketStatus::Called {
            t.finish().unwrap();
        }
        t
    }

    #[test]
    fn test_nothing_in_progress_counts_all_earlier_waiting() {
        let tickets = vec![
            ticket(1, TicketStatus::Waiting),
            ticket(2, TicketStatus::Waiting),
        ];
        assert_eq!(waiting_position(&tickets, &tickets[0]), 0);
        assert_eq!(waiting_position(&tickets, &tickets[1]), 1);
    }

    #[test]
    fn test_reference_is_highest_in_progress() {
        let tickets = vec![
            ticket(1, TicketStatus::Called),
            ticket(2, TicketStatus::InProgress),
            ticket(3, TicketStatus::Waiting),
            ticket(4, TicketStatus::InProgress),
            ticket(5, TicketStatus::Waiting),
            ticket(6, TicketStatus::Waiting),
        ];
        assert_eq!(reference_ordinal(&tickets, "A"), 4);
        // A003 is below the reference (skipped), so only A005 is ahead of A006.
        assert_eq!(waiting_position(&tickets, &tickets[5]), 1);
        assert_eq!(waiting_after_reference(&tickets, &tickets[3]), 2);
    }

    #[test]
    fn test_position_never_negative_or_self() {
        let tickets = vec![
            ticket(1, TicketStatus::Waiting),
            ticket(2, TicketStatus::InProgress),
        ];
        // Below the reference point.
        assert_eq!(waiting_position(&tickets, &tickets[0]), 0);
        assert_eq!(waiting_position(&tickets, &tickets[1]), 0);
        assert_eq!(waiting_position(&[], &tickets[0]), 0);
    }

    #[test]
    fn test_other_codes_ignored() {
        let mut other = ticket(1, TicketStatus::Waiting);
        other.id = TicketId(100);
        other.no = TicketNo::new("B", 1).unwrap();
        let tickets = vec![other, ticket(3, TicketStatus::Waiting)];
        assert_eq!(waiting_position(&tickets, &tickets[1]), 0);
    }
}
