//! Topics and counters.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::ids::{CounterId, TopicId};
use crate::number::validate_code;

/// Localized display names of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayNames {
    pub th: String,
    pub en: String,
}

/// A service category visitors can queue for.
///
/// `code` is the ticket number prefix. It is unique across topics; changing
/// it later does not renumber tickets already issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: TopicId,
    pub names: DisplayNames,
    pub code: String,
}

impl Topic {
    pub fn new(id: TopicId, names: DisplayNames, code: impl Into<String>) -> CoreResult<Self> {
        let code = code.into();
        validate_code(&code)?;
        Ok(Self { id, names, code })
    }
}

/// A service point that calls and serves tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counter {
    pub id: CounterId,
    pub label: String,
    /// Whether the counter is currently open.
    pub open: bool,
    /// Local time of day at which the counter is force-closed.
    pub closes_at: NaiveTime,
    /// Topics this counter may serve.
    pub topics: Vec<TopicId>,
}

impl Counter {
    /// Whether this counter is allowed to serve tickets of `topic`.
    pub fn serves(&self, topic: TopicId) -> bool {
        self.topics.contains(&topic)
    }
}
