//! Decodes broker replies into jobs and counts.
//!
//! Disque replies are positional: a job is an array whose meaning depends on
//! each element's offset. Every decoder here checks arity and element types up
//! front and fails with `InvalidReply` naming the offending field, so callers
//! never see a partially-populated `Job`.
use std::time::{Duration, UNIX_EPOCH};

use itertools::Itertools;

use crate::error::{Error, Result};
use crate::types::job::Job;
use crate::types::protocol::Reply;
use crate::types::states::JobState;

/// Elements in a `GETJOB` job entry: queue, id, body.
const GET_FIELDS: usize = 3;
/// As above plus `nacks <n> additional-deliveries <n>`.
const GET_FIELDS_WITH_COUNTERS: usize = 7;
/// Elements in a `SHOW` reply: 15 label/value pairs.
const SHOW_FIELDS: usize = 30;

/// Provides a minimal cursor over the elements of an array reply.
struct ParseState<'a> {
    from: &'a [Reply],
}

impl<'a> ParseState<'a> {
    /// Asserts there are no more elements to take.
    fn expect_done(&self) -> Result<()> {
        if self.from.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_reply("trailing elements"))
        }
    }

    /// Consumes an element of any type.
    fn expect_next(&mut self, field: &'static str) -> Result<&'a Reply> {
        let (first, rest) = self
            .from
            .split_first()
            .ok_or(Error::invalid_reply(field))?;
        self.from = rest;
        Ok(first)
    }

    /// Consumes a bulk or status string, which must be valid UTF-8.
    fn expect_next_string(&mut self, field: &'static str) -> Result<String> {
        match self.expect_next(field)? {
            Reply::Data(data) => String::from_utf8(data.to_vec())
                .map_err(|_| Error::invalid_reply(field)),
            Reply::Status(s) => Ok(s.clone()),
            _ => Err(Error::invalid_reply(field)),
        }
    }

    /// Consumes a non-negative integer.
    fn expect_next_u64(&mut self, field: &'static str) -> Result<u64> {
        match self.expect_next(field)? {
            Reply::Int(n) => {
                u64::try_from(*n).map_err(|_| Error::invalid_reply(field))
            },
            _ => Err(Error::invalid_reply(field)),
        }
    }

    /// Consumes a whole number of seconds.
    fn expect_next_secs(&mut self, field: &'static str) -> Result<Duration> {
        self.expect_next_u64(field).map(Duration::from_secs)
    }

    /// Consumes a label, which must read exactly `label`.
    fn expect_label(&mut self, label: &'static str) -> Result<()> {
        match self.expect_next(label)? {
            Reply::Data(data) if data == label.as_bytes() => Ok(()),
            Reply::Status(s) if s == label => Ok(()),
            _ => Err(Error::invalid_reply(label)),
        }
    }
}

impl<'a> From<&'a [Reply]> for ParseState<'a> {
    fn from(from: &'a [Reply]) -> Self {
        ParseState { from }
    }
}

/// Checks the reply is an array of exactly `len` elements.
fn expect_array<'a>(
    reply: &'a Reply,
    len: usize,
    field: &'static str,
) -> Result<&'a [Reply]> {
    match reply {
        Reply::Array(items) if items.len() == len => Ok(items),
        _ => Err(Error::invalid_reply(field)),
    }
}

/// Decodes an `ADDJOB` reply into the new job's ID.
pub fn parse_add(reply: &Reply) -> Result<String> {
    match reply {
        Reply::Nil => Err(Error::NoData),
        Reply::Data(_) | Reply::Status(_) => {
            ParseState::from(std::slice::from_ref(reply))
                .expect_next_string("id")
        },
        _ => Err(Error::invalid_reply("id")),
    }
}

/// Decodes a `GETJOB` reply holding a single job. A nil reply means the
/// timeout elapsed with no job available.
pub fn parse_get(reply: &Reply, with_counters: bool) -> Result<Job> {
    if *reply == Reply::Nil {
        return Err(Error::Timeout);
    }

    let jobs = expect_array(reply, 1, "jobs")?;
    let len = if with_counters {
        GET_FIELDS_WITH_COUNTERS
    } else {
        GET_FIELDS
    };
    let mut ps: ParseState = expect_array(&jobs[0], len, "job")?.into();

    let queue = ps.expect_next_string("queue")?;
    let id = ps.expect_next_string("id")?;
    let data = ps.expect_next_string("data")?;
    let mut job = Job::new(id, data, queue);

    if with_counters {
        // Label positions are ignored: only the values are positional.
        ps.expect_next("nacks")?;
        job.nacks = ps.expect_next_u64("nacks")?;
        ps.expect_next("additional-deliveries")?;
        job.additional_deliveries =
            ps.expect_next_u64("additional-deliveries")?;
    }

    ps.expect_done().map(|()| job)
}

/// Decodes a `SHOW` reply. A nil reply means the broker no longer knows the
/// job.
pub fn parse_show(reply: &Reply) -> Result<Job> {
    if *reply == Reply::Nil {
        return Err(Error::NoData);
    }

    let mut ps: ParseState = expect_array(reply, SHOW_FIELDS, "show")?.into();

    ps.expect_label("id")?;
    let id = ps.expect_next_string("id")?;
    ps.expect_label("queue")?;
    let queue = ps.expect_next_string("queue")?;
    ps.expect_label("state")?;
    let state = ps.expect_next_string("state")?;
    ps.expect_label("repl")?;
    let replication = u32::try_from(ps.expect_next_u64("repl")?)
        .map_err(|_| Error::invalid_reply("repl"))?;
    ps.expect_label("ttl")?;
    let ttl = ps.expect_next_secs("ttl")?;
    ps.expect_label("ctime")?;
    let created_at = UNIX_EPOCH
        .checked_add(Duration::from_nanos(ps.expect_next_u64("ctime")?))
        .ok_or(Error::invalid_reply("ctime"))?;
    ps.expect_label("delay")?;
    let delay = ps.expect_next_secs("delay")?;
    ps.expect_label("retry")?;
    let retry = ps.expect_next_secs("retry")?;
    ps.expect_label("nacks")?;
    let nacks = ps.expect_next_u64("nacks")?;
    ps.expect_label("additional-deliveries")?;
    let additional_deliveries = ps.expect_next_u64("additional-deliveries")?;

    // Node lists and scheduling hints aren't part of `Job`.
    for label in [
        "nodes-delivered",
        "nodes-confirmed",
        "next-requeue-within",
        "next-awake-within",
    ] {
        ps.expect_label(label)?;
        ps.expect_next(label)?;
    }

    ps.expect_label("body")?;
    let data = ps.expect_next_string("body")?;
    ps.expect_done()?;

    Ok(Job {
        state: Some(JobState::from(state.as_str())),
        ttl: Some(ttl),
        delay: Some(delay),
        retry: Some(retry),
        created_at: Some(created_at),
        replication: Some(replication),
        nacks,
        additional_deliveries,
        ..Job::new(id, data, queue)
    })
}

/// Decodes a `QLEN` reply.
pub fn parse_len(reply: &Reply) -> Result<u64> {
    ParseState::from(std::slice::from_ref(reply)).expect_next_u64("length")
}

/// Decodes a `JSCAN` reply, `[cursor, [id...]]`, into the number of IDs.
pub fn parse_active_len(reply: &Reply) -> Result<u64> {
    let mut ps: ParseState = expect_array(reply, 2, "scan")?.into();
    ps.expect_next("cursor")?;
    match ps.expect_next("ids")? {
        Reply::Array(ids) => Ok(ids.len() as u64),
        _ => Err(Error::invalid_reply("ids")),
    }
}

/// Decodes a `PING` reply.
pub fn parse_pong(reply: &Reply) -> Result<()> {
    match reply {
        Reply::Status(s) if s == "PONG" => Ok(()),
        _ => Err(Error::invalid_reply("pong")),
    }
}

/// The labels of a label/value pair reply, for logging layouts that fail to
/// decode.
pub(crate) fn labels(reply: &Reply) -> Vec<String> {
    match reply {
        Reply::Array(items) => items
            .iter()
            .tuples()
            .map(|(label, _): (&Reply, &Reply)| label.to_string())
            .collect(),
        _ => vec![],
    }
}
