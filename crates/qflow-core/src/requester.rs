//! Ticket requesters.
//!
//! A ticket is issued either to a requester whose identity was verified from a
//! bearer credential, or to an anonymous walk-in who typed their name at a
//! kiosk. Both carry a first and last name; only verified requesters may carry
//! a student id.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Maximum student id length.
const MAX_STUDENT_ID_LEN: usize = 9;

/// Maximum length of a name component.
const MAX_NAME_LEN: usize = 100;

/// Claims returned by identity verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityClaims {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub student_id: Option<String>,
}

/// Origin of a ticket reservation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Requester {
    /// Identity verified from a bearer credential.
    Authenticated {
        first_name: String,
        last_name: String,
        student_id: Option<String>,
    },
    /// Anonymous walk-in.
    WalkIn {
        first_name: String,
        last_name: String,
    },
}

fn check_name(field: &str, value: &str) -> CoreResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidRequester(format!("{field} is required")));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(CoreError::InvalidRequester(format!("{field} is too long")));
    }
    Ok(trimmed.to_string())
}

impl Requester {
    /// Build a requester from verified identity claims.
    pub fn from_claims(claims: IdentityClaims) -> CoreResult<Self> {
        let first_name = check_name("firstName", &claims.first_name)?;
        let last_name = check_name("lastName", &claims.last_name)?;
        let student_id = match claims.student_id {
            Some(id) if !id.trim().is_empty() => {
                let id = id.trim().to_string();
                if id.len() > MAX_STUDENT_ID_LEN || !id.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(CoreError::InvalidRequester(format!(
                        "invalid studentId {id:?}"
                    )));
                }
                Some(id)
            }
            _ => None,
        };
        Ok(Self::Authenticated {
            first_name,
            last_name,
            student_id,
        })
    }

    /// Build an anonymous walk-in requester.
    pub fn walk_in(first_name: &str, last_name: &str) -> CoreResult<Self> {
        Ok(Self::WalkIn {
            first_name: check_name("firstName", first_name)?,
            last_name: check_name("lastName", last_name)?,
        })
    }

    pub fn first_name(&self) -> &str {
        match self {
            Self::Authenticated { first_name, .. } | Self::WalkIn { first_name, .. } => first_name,
        }
    }

    pub fn last_name(&self) -> &str {
        match self {
            Self::Authenticated { last_name, .. } | Self::WalkIn { last_name, .. } => last_name,
        }
    }

    pub fn student_id(&self) -> Option<&str> {
        match self {
            Self::Authenticated { student_id, .. } => student_id.as_deref(),
            Self::WalkIn { .. } => None,
        }
    }

    pub fn is_walk_in(&self) -> bool {
        matches!(self, Self::WalkIn { .. })
    }

    /// Whether this requester has the given name.
    pub fn has_name(&self, first_name: &str, last_name: &str) -> bool {
        self.first_name() == first_name.trim() && self.last_name() == last_name.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(student_id: Option<&str>) -> IdentityClaims {
        IdentityClaims {
            first_name: " Somchai ".to_string(),
            last_name: "Jaidee".to_string(),
            student_id: student_id.map(str::to_string),
        }
    }

    #[test]
    fn test_from_claims_trims_and_keeps_student_id() {
        let requester = Requester::from_claims(claims(Some("650610001"))).unwrap();
        assert_eq!(requester.first_name(), "Somchai");
        assert_eq!(requester.student_id(), Some("650610001"));
        assert!(!requester.is_walk_in());
    }

    #[test]
    fn test_from_claims_rejects_bad_student_id() {
        assert!(Requester::from_claims(claims(Some("12345678901"))).is_err());
        assert!(Requester::from_claims(claims(Some("65A"))).is_err());
        let blank = Requester::from_claims(claims(Some("  "))).unwrap();
        assert_eq!(blank.student_id(), None);
    }

    #[test]
    fn test_walk_in_requires_names() {
        assert!(Requester::walk_in("", "Jaidee").is_err());
        assert!(Requester::walk_in("Somchai", "  ").is_err());
        let walk_in = Requester::walk_in("Somchai", "Jaidee").unwrap();
        assert!(walk_in.is_walk_in());
        assert!(walk_in.has_name("Somchai", "Jaidee"));
    }

    #[test]
    fn test_serialized_shape() {
        let walk_in = Requester::walk_in("Somchai", "Jaidee").unwrap();
        let json = serde_json::to_value(&walk_in).unwrap();
        assert_eq!(json["origin"], "walkIn");
        assert_eq!(json["firstName"], "Somchai");

        let back: Requester = serde_json::from_value(json).unwrap();
        assert_eq!(back, walk_in);
    }
}
