use std::time::{Duration, SystemTime};

use serde::Serialize;

use super::states::JobState;
use crate::config::millis;

/// A job as known to the broker.
///
/// `id`, `data` and `queue` are always set. The optional fields are only
/// filled in by a detailed lookup (`Client::fetch`), and the delivery
/// counters by a lookup or a `get` with counters enabled.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub data: String,
    pub queue: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "millis::option::serialize"
    )]
    pub ttl: Option<Duration>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "millis::option::serialize"
    )]
    pub delay: Option<Duration>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "millis::option::serialize"
    )]
    pub retry: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<SystemTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<u32>,
    pub nacks: u64,
    pub additional_deliveries: u64,
}

impl Job {
    pub(crate) fn new(
        id: impl Into<String>,
        data: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
            queue: queue.into(),
            ..Default::default()
        }
    }
}
