use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use redis::{FromRedisValue, RedisResult, RedisWrite, ToRedisArgs, Value};
use serde::{Deserialize, Serialize};

use crate::config::{whole_seconds, Config};
use crate::util::escape_bytes;

/// How the broker expects a job to be handed back for redelivery. Older
/// brokers only understand `ENQUEUE`, newer ones have a dedicated `NACK` that
/// also bumps the job's nack counter.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NackStyle {
    Enqueue,
    Nack,
}

impl FromStr for NackStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enqueue" => Ok(Self::Enqueue),
            "nack" => Ok(Self::Nack),
            _ => Err(format!("unknown nack style {s:?}")),
        }
    }
}

/// Broker-version dependent protocol features. There's deliberately no
/// `Default`: which one applies depends on the deployment.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Capabilities {
    pub nack: NackStyle,
    /// Send `WITHCOUNTERS` on `GETJOB` and expect the 7-element job reply.
    pub counters: bool,
}

impl Capabilities {
    /// Brokers predating `NACK` and `WITHCOUNTERS`.
    pub const fn legacy() -> Self {
        Self {
            nack: NackStyle::Enqueue,
            counters: false,
        }
    }

    /// Brokers supporting `NACK` and `GETJOB ... WITHCOUNTERS`.
    pub const fn modern() -> Self {
        Self {
            nack: NackStyle::Nack,
            counters: true,
        }
    }
}

/// A single command argument.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Arg {
    Str(String),
    Int(u64),
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl ToRedisArgs for Arg {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        match self {
            Self::Str(s) => s.write_redis_args(out),
            Self::Int(n) => n.write_redis_args(out),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{}", escape_bytes(s.as_bytes())),
            Self::Int(n) => write!(f, "{n}"),
        }
    }
}

/// A command sent by the client to the broker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DisqueCommand {
    /// Adds a job to a queue. The broker replies with the new job's ID, or an
    /// error such as `MAXLEN` or `NOREPL`.
    ///
    /// On the wire: `ADDJOB <queue> <data> <timeout-ms> [REPLICATE <n>]
    /// [DELAY <sec>] [RETRY <sec>] [TTL <sec>] [MAXLEN <n>]`
    AddJob {
        queue: String,
        data: String,
        timeout_ms: u64,
        replicate: Option<u32>,
        delay: Option<u64>,
        retry: Option<u64>,
        ttl: Option<u64>,
        max_len: Option<u64>,
    },
    /// Takes the first available job from the listed queues, scanning them
    /// left to right. Replies nil if the timeout passes first.
    ///
    /// On the wire: `GETJOB TIMEOUT <ms> [WITHCOUNTERS] FROM <queue>...`
    GetJob {
        timeout_ms: u64,
        with_counters: bool,
        queues: Vec<String>,
    },
    /// Acknowledges a job, removing it from the cluster.
    ///
    /// On the wire: `ACKJOB <id>`
    AckJob { id: String },
    /// Puts a job back on its queue without touching its nack counter.
    ///
    /// On the wire: `ENQUEUE <id>`
    Enqueue { id: String },
    /// Puts a job back on its queue, counting a negative acknowledgement.
    ///
    /// On the wire: `NACK <id>`
    Nack { id: String },
    /// Describes a job as 15 label/value pairs, or nil if it's unknown.
    ///
    /// On the wire: `SHOW <id>`
    Show { id: String },
    /// Replies with the number of jobs queued.
    ///
    /// On the wire: `QLEN <queue>`
    QLen { queue: String },
    /// Lists the IDs of the queue's active jobs in a single, blocking scan.
    ///
    /// On the wire: `JSCAN 0 BUSYLOOP QUEUE <queue> STATE active`
    ScanActive { queue: String },
    /// On the wire: `PING`
    Ping,
}

impl DisqueCommand {
    pub fn add_job(
        conf: &Config,
        data: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self::AddJob {
            queue: queue.into(),
            data: data.into(),
            timeout_ms: conf.timeout_ms(),
            replicate: Some(conf.replicate).filter(|&n| n > 0),
            delay: whole_seconds(conf.delay),
            retry: whole_seconds(conf.retry_after),
            ttl: whole_seconds(conf.ttl),
            max_len: Some(conf.max_len).filter(|&n| n > 0),
        }
    }

    pub fn get_job<Q: AsRef<str>>(
        conf: &Config,
        caps: &Capabilities,
        queues: &[Q],
    ) -> Self {
        Self::GetJob {
            timeout_ms: conf.timeout_ms(),
            with_counters: caps.counters,
            queues: queues.iter().map(|q| q.as_ref().to_owned()).collect(),
        }
    }

    /// The command that hands a job back for redelivery in the given style.
    pub fn requeue(style: NackStyle, id: impl Into<String>) -> Self {
        let id = id.into();
        match style {
            NackStyle::Enqueue => Self::Enqueue { id },
            NackStyle::Nack => Self::Nack { id },
        }
    }

    pub fn name(&self) -> &'static str {
        use DisqueCommand::*;

        match self {
            AddJob { .. } => "ADDJOB",
            GetJob { .. } => "GETJOB",
            AckJob { .. } => "ACKJOB",
            Enqueue { .. } => "ENQUEUE",
            Nack { .. } => "NACK",
            Show { .. } => "SHOW",
            QLen { .. } => "QLEN",
            ScanActive { .. } => "JSCAN",
            Ping => "PING",
        }
    }

    /// The command's arguments, in wire order, excluding its name.
    pub fn args(&self) -> Vec<Arg> {
        use DisqueCommand::*;

        match self {
            AddJob {
                queue,
                data,
                timeout_ms,
                replicate,
                delay,
                retry,
                ttl,
                max_len,
            } => {
                let mut args: Vec<Arg> = vec![
                    queue.as_str().into(),
                    data.as_str().into(),
                    (*timeout_ms).into(),
                ];
                if let Some(n) = replicate {
                    args.extend([Arg::from("REPLICATE"), Arg::from(*n)]);
                }
                for (keyword, value) in
                    [("DELAY", delay), ("RETRY", retry), ("TTL", ttl)]
                {
                    if let Some(secs) = value {
                        args.extend([Arg::from(keyword), Arg::from(*secs)]);
                    }
                }
                if let Some(n) = max_len {
                    args.extend([Arg::from("MAXLEN"), Arg::from(*n)]);
                }
                args
            },
            GetJob {
                timeout_ms,
                with_counters,
                queues,
            } => {
                let mut args: Vec<Arg> =
                    vec!["TIMEOUT".into(), (*timeout_ms).into()];
                if *with_counters {
                    args.push("WITHCOUNTERS".into());
                }
                args.push("FROM".into());
                args.extend(queues.iter().map(|q| Arg::from(q.as_str())));
                args
            },
            AckJob { id } | Enqueue { id } | Nack { id } | Show { id } => {
                vec![id.as_str().into()]
            },
            QLen { queue } => vec![queue.as_str().into()],
            ScanActive { queue } => vec![
                0u64.into(),
                "BUSYLOOP".into(),
                "QUEUE".into(),
                queue.as_str().into(),
                "STATE".into(),
                "active".into(),
            ],
            Ping => vec![],
        }
    }
}

/// A decoded broker reply, independent of the connection library.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    Nil,
    Int(i64),
    Data(Bytes),
    Status(String),
    Array(Vec<Reply>),
}

impl FromRedisValue for Reply {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        Ok(match v {
            Value::Nil => Reply::Nil,
            Value::Int(n) => Reply::Int(*n),
            Value::Data(data) => Reply::Data(Bytes::copy_from_slice(data)),
            Value::Bulk(items) => Reply::Array(
                items
                    .iter()
                    .map(Reply::from_redis_value)
                    .collect::<RedisResult<_>>()?,
            ),
            Value::Status(s) => Reply::Status(s.clone()),
            Value::Okay => Reply::Status("OK".to_owned()),
        })
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reply::Nil => f.write_str("(nil)"),
            Reply::Int(n) => write!(f, "(integer) {n}"),
            Reply::Data(data) => write!(f, "\"{}\"", escape_bytes(data)),
            Reply::Status(s) => f.write_str(s),
            Reply::Array(items) => {
                write!(f, "({} elements)", items.len())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    // Asserts the command serialises to the given name and arguments.
    #[track_caller]
    fn wire(cmd: DisqueCommand, expected: &[&str]) {
        let mut line = vec![cmd.name().to_owned()];
        line.extend(cmd.args().iter().map(Arg::to_string));
        assert_eq!(line, expected);
    }

    #[test]
    fn test_add_job() {
        wire(
            DisqueCommand::add_job(&Config::default(), "payload", "emails"),
            &["ADDJOB", "emails", "payload", "0"],
        );

        let conf = Config {
            timeout: Duration::from_millis(1500),
            replicate: 2,
            delay: Duration::from_secs(10),
            retry_after: Duration::from_secs(120),
            ttl: Duration::from_secs(86400),
            max_len: 1000,
        };
        wire(
            DisqueCommand::add_job(&conf, "payload", "emails"),
            &[
                "ADDJOB",
                "emails",
                "payload",
                "1500",
                "REPLICATE",
                "2",
                "DELAY",
                "10",
                "RETRY",
                "120",
                "TTL",
                "86400",
                "MAXLEN",
                "1000",
            ],
        );
    }

    #[test]
    fn test_add_job_sub_second_rounds_up() {
        let conf = Config {
            delay: Duration::from_millis(1),
            retry_after: Duration::from_millis(500),
            ttl: Duration::from_nanos(1),
            ..Default::default()
        };
        wire(
            DisqueCommand::add_job(&conf, "d", "q"),
            &["ADDJOB", "q", "d", "0", "DELAY", "1", "RETRY", "1", "TTL", "1"],
        );

        // Truncates above one second.
        let conf = Config {
            delay: Duration::from_millis(2999),
            ..Default::default()
        };
        wire(
            DisqueCommand::add_job(&conf, "d", "q"),
            &["ADDJOB", "q", "d", "0", "DELAY", "2"],
        );
    }

    #[test]
    fn test_get_job() {
        let conf = Config {
            timeout: Duration::from_millis(250),
            ..Default::default()
        };

        wire(
            DisqueCommand::get_job(
                &conf,
                &Capabilities::legacy(),
                &["urgent", "high", "low"],
            ),
            &["GETJOB", "TIMEOUT", "250", "FROM", "urgent", "high", "low"],
        );
        wire(
            DisqueCommand::get_job(&conf, &Capabilities::modern(), &["q"]),
            &["GETJOB", "TIMEOUT", "250", "WITHCOUNTERS", "FROM", "q"],
        );
    }

    #[test]
    fn test_single_argument_commands() {
        wire(DisqueCommand::AckJob { id: "D-1".into() }, &["ACKJOB", "D-1"]);
        wire(
            DisqueCommand::requeue(NackStyle::Enqueue, "D-1"),
            &["ENQUEUE", "D-1"],
        );
        wire(DisqueCommand::requeue(NackStyle::Nack, "D-1"), &["NACK", "D-1"]);
        wire(DisqueCommand::Show { id: "D-1".into() }, &["SHOW", "D-1"]);
        wire(DisqueCommand::QLen { queue: "q".into() }, &["QLEN", "q"]);
        wire(
            DisqueCommand::ScanActive { queue: "q".into() },
            &["JSCAN", "0", "BUSYLOOP", "QUEUE", "q", "STATE", "active"],
        );
        wire(DisqueCommand::Ping, &["PING"]);
    }

    #[test]
    fn test_nack_style_from_str() {
        assert_eq!("enqueue".parse(), Ok(NackStyle::Enqueue));
        assert_eq!("nack".parse(), Ok(NackStyle::Nack));
        assert!("NACKJOB".parse::<NackStyle>().is_err());
    }

    #[test]
    fn test_reply_from_redis_value() {
        let value = Value::Bulk(vec![
            Value::Bulk(vec![
                Value::Data(b"q".to_vec()),
                Value::Data(b"D-1".to_vec()),
                Value::Nil,
            ]),
            Value::Int(7),
            Value::Okay,
        ]);

        assert_eq!(
            Reply::from_redis_value(&value).unwrap(),
            Reply::Array(vec![
                Reply::Array(vec![
                    Reply::Data("q".into()),
                    Reply::Data("D-1".into()),
                    Reply::Nil,
                ]),
                Reply::Int(7),
                Reply::Status("OK".into()),
            ])
        );
    }
}
