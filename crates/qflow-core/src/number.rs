//! Ticket number encoding.
//!
//! A ticket number is the topic code followed by a zero-padded ordinal of
//! exactly [`ORDINAL_WIDTH`] digits: `A001`, `A002`, ... `A999`.
//! Ordinals restart at 1 every business day per topic.
//!
//! Decoding is strict. Anything other than `<code><3 ascii digits>` with a
//! non-zero ordinal is rejected, because treating a malformed stored number
//! as "no previous ticket" would mint a duplicate.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Number of digits in the ordinal suffix.
pub const ORDINAL_WIDTH: usize = 3;

/// Largest ordinal representable in [`ORDINAL_WIDTH`] digits.
pub const MAX_ORDINAL: u16 = 999;

/// Maximum topic code length.
const MAX_CODE_LEN: usize = 8;

/// Validate a topic code used as a ticket number prefix.
pub fn validate_code(code: &str) -> CoreResult<()> {
    if code.is_empty()
        || code.len() > MAX_CODE_LEN
        || !code.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(CoreError::InvalidTopicCode(code.to_string()));
    }
    Ok(())
}

/// A formatted ticket number (`<code><ordinal:03>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TicketNo {
    code: String,
    ordinal: u16,
}

impl TicketNo {
    /// Create a ticket number from its parts.
    pub fn new(code: &str, ordinal: u16) -> CoreResult<Self> {
        validate_code(code)?;
        if ordinal == 0 {
            return Err(CoreError::MalformedTicketNo {
                code: code.to_string(),
                raw: format!("{code}{ordinal:03}"),
            });
        }
        if ordinal > MAX_ORDINAL {
            return Err(CoreError::SequenceExhausted(code.to_string()));
        }
        Ok(Self {
            code: code.to_string(),
            ordinal,
        })
    }

    /// First number of the day for a topic (`<code>001`).
    pub fn first(code: &str) -> CoreResult<Self> {
        Self::new(code, 1)
    }

    /// Decode a stored number, requiring it to belong to `code`.
    pub fn decode(code: &str, raw: &str) -> CoreResult<Self> {
        let malformed = || CoreError::MalformedTicketNo {
            code: code.to_string(),
            raw: raw.to_string(),
        };

        let suffix = raw.strip_prefix(code).ok_or_else(malformed)?;
        if suffix.len() != ORDINAL_WIDTH || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let ordinal: u16 = suffix.parse().map_err(|_| malformed())?;
        if ordinal == 0 {
            return Err(malformed());
        }
        validate_code(code)?;

        Ok(Self {
            code: code.to_string(),
            ordinal,
        })
    }

    /// Decode a number without knowing its topic code.
    ///
    /// The code is everything before the trailing [`ORDINAL_WIDTH`] digits.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        if !raw.is_ascii() || raw.len() <= ORDINAL_WIDTH {
            return Err(CoreError::MalformedTicketNo {
                code: String::new(),
                raw: raw.to_string(),
            });
        }
        let (code, _) = raw.split_at(raw.len() - ORDINAL_WIDTH);
        Self::decode(code, raw)
    }

    /// The number following this one.
    pub fn next(&self) -> CoreResult<Self> {
        if self.ordinal >= MAX_ORDINAL {
            return Err(CoreError::SequenceExhausted(self.code.clone()));
        }
        Ok(Self {
            code: self.code.clone(),
            ordinal: self.ordinal + 1,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn ordinal(&self) -> u16 {
        self.ordinal
    }

    /// Render as the wire string.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TicketNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:0width$}", self.code, self.ordinal, width = ORDINAL_WIDTH)
    }
}

impl Serialize for TicketNo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TicketNo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_and_next() {
        let first = TicketNo::first("A").unwrap();
        assert_eq!(first.encode(), "A001");
        assert_eq!(first.next().unwrap().encode(), "A002");
    }

    #[test]
    fn test_zero_padding() {
        assert_eq!(TicketNo::new("B", 7).unwrap().to_string(), "B007");
        assert_eq!(TicketNo::new("B", 42).unwrap().to_string(), "B042");
        assert_eq!(TicketNo::new("B", 999).unwrap().to_string(), "B999");
    }

    #[test]
    fn test_decode_exact_pattern() {
        let no = TicketNo::decode("A", "A007").unwrap();
        assert_eq!(no.ordinal(), 7);
        assert_eq!(no.code(), "A");
    }

    #[test]
    fn test_decode_rejects_other_shapes() {
        for raw in ["A07", "A0007", "B007", "A00x", "A000", "a007", "", "007"] {
            assert!(
                matches!(
                    TicketNo::decode("A", raw),
                    Err(CoreError::MalformedTicketNo { .. })
                ),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_decode_multi_char_code() {
        let no = TicketNo::decode("AB1", "AB1012").unwrap();
        assert_eq!(no.ordinal(), 12);
        assert_eq!(TicketNo::parse("AB1012").unwrap(), no);
    }

    #[test]
    fn test_sequence_exhausted() {
        let last = TicketNo::new("A", MAX_ORDINAL).unwrap();
        assert_eq!(
            last.next(),
            Err(CoreError::SequenceExhausted("A".to_string()))
        );
    }

    #[test]
    fn test_invalid_codes() {
        assert!(TicketNo::first("").is_err());
        assert!(TicketNo::first("A B").is_err());
        assert!(TicketNo::first("ABCDEFGHI").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let no = TicketNo::new("C", 5).unwrap();
        assert_eq!(serde_json::to_string(&no).unwrap(), "\"C005\"");
        let back: TicketNo = serde_json::from_str("\"C005\"").unwrap();
        assert_eq!(back, no);
        assert!(serde_json::from_str::<TicketNo>("\"C05\"").is_err());
    }
}
