//! Per-topic daily sequence allocation.
//!
//! These functions are pure; stores call them while holding whatever lock
//! serializes minting for the topic, so the read of the last number and the
//! insert of the next one happen in one critical section.

use crate::error::CoreResult;
use crate::number::TicketNo;

/// Next ticket number for a topic, given the highest number issued today.
///
/// A last number that does not decode as `<code><3 digits>` is an error, never
/// a reason to start over at `001`.
pub fn next_ticket_no(code: &str, last_today: Option<&str>) -> CoreResult<TicketNo> {
    match last_today {
        None => TicketNo::first(code),
        Some(raw) => TicketNo::decode(code, raw)?.next(),
    }
}

/// Highest stored number among `numbers`, ordered by length then lexically.
///
/// For well-formed numbers of one code this is numeric order. A longer,
/// malformed number sorts first so that it surfaces as a decode error.
pub fn highest<'a, I>(numbers: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    numbers.into_iter().max_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn test_starts_at_one() {
        assert_eq!(next_ticket_no("A", None).unwrap().encode(), "A001");
    }

    #[test]
    fn test_increments_last() {
        assert_eq!(next_ticket_no("A", Some("A009")).unwrap().encode(), "A010");
        assert_eq!(next_ticket_no("A", Some("A099")).unwrap().encode(), "A100");
    }

    #[test]
    fn test_corrupt_last_is_an_error() {
        let err = next_ticket_no("A", Some("A1x3")).unwrap_err();
        assert!(matches!(err, CoreError::MalformedTicketNo { .. }));
    }

    #[test]
    fn test_exhausted() {
        assert!(matches!(
            next_ticket_no("A", Some("A999")),
            Err(CoreError::SequenceExhausted(_))
        ));
    }

    #[test]
    fn test_highest_orders_numerically() {
        let numbers = ["A009", "A010", "A002"];
        assert_eq!(highest(numbers.iter().copied()), Some("A010"));
        assert_eq!(highest(std::iter::empty()), None);
    }

    #[test]
    fn test_highest_surfaces_malformed_long_numbers() {
        let numbers = ["A010", "A0011"];
        let last = highest(numbers.iter().copied());
        assert_eq!(last, Some("A0011"));
        assert!(next_ticket_no("A", last).is_err());
    }
}
