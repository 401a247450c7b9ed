use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-operation settings for the job queue. Every field's zero value means
/// "don't send this parameter", leaving the broker's default in place.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Blocking operations fail after this long. Zero blocks indefinitely.
    /// Sent in whole milliseconds, rounding anything under 1ms up to 1ms.
    #[serde(with = "millis")]
    pub timeout: Duration,
    /// Replicate each added job to at least N nodes before `add` returns.
    pub replicate: u32,
    /// Only make an added job available for delivery after this long.
    #[serde(with = "millis")]
    pub delay: Duration,
    /// Requeue a delivered job if it isn't acknowledged within this long.
    #[serde(with = "millis")]
    pub retry_after: Duration,
    /// Discard a job this long after it was added, acknowledged or not.
    #[serde(with = "millis")]
    pub ttl: Duration,
    /// Fail `add` if the queue already holds at least N jobs.
    pub max_len: u64,
}

impl Config {
    /// The timeout in whole milliseconds, as sent on the wire. A positive
    /// sub-millisecond timeout becomes 1: the broker reads 0 as "forever".
    pub(crate) fn timeout_ms(&self) -> u64 {
        if self.timeout.is_zero() {
            return 0;
        }
        let ms = self.timeout.as_millis().try_into().unwrap_or(u64::MAX);
        ms.max(1)
    }
}

/// Converts a duration to whole seconds for the broker, or `None` when
/// disabled. A positive sub-second duration becomes 1: the broker treats 0 as
/// "unset".
pub(crate) fn whole_seconds(d: Duration) -> Option<u64> {
    if d.is_zero() {
        None
    } else {
        Some(d.as_secs().max(1))
    }
}

/// (De)serialises durations as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_u64(d.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub(crate) fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(d).map(Duration::from_millis)
    }

    pub(crate) mod option {
        use std::time::Duration;

        use serde::Serializer;

        pub(crate) fn serialize<S>(
            d: &Option<Duration>,
            s: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match d {
                Some(d) => super::serialize(d, s),
                None => s.serialize_none(),
            }
        }
    }
}
