use std::convert::Infallible;
use std::str::FromStr;

use serde::Serialize;

/// Lifecycle label the broker reports for a job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobState {
    /// Added, but not yet replicated to enough nodes.
    WaitRepl,
    /// Waiting in its queue for a consumer.
    Queued,
    /// Delivered to a consumer, not yet acknowledged.
    Active,
    /// Acknowledged, pending garbage collection.
    Acked,
    /// A label this client doesn't know about, kept verbatim.
    Other(String),
}

impl JobState {
    pub fn as_str(&self) -> &str {
        use JobState::*;

        match self {
            WaitRepl => "wait-repl",
            Queued => "queued",
            Active => "active",
            Acked => "acked",
            Other(label) => label,
        }
    }
}

impl From<&str> for JobState {
    fn from(s: &str) -> Self {
        use JobState::*;

        match s {
            "wait-repl" => WaitRepl,
            "queued" => Queued,
            "active" => Active,
            "acked" => Acked,
            other => Other(other.to_owned()),
        }
    }
}

impl FromStr for JobState {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.into())
    }
}

// Serialised as the broker's own label, so YAML output matches `SHOW`.
impl Serialize for JobState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
