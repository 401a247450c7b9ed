//! A small pool of broker connections.
//!
//! Each connection is used by one request at a time, so a blocking `GETJOB`
//! never holds up unrelated calls. Idle connections are health-checked with
//! `PING` when borrowed and evicted once they've sat unused for
//! `idle_timeout`.
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use itertools::Itertools;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, RedisResult};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::millis;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::parser::parse_pong;
use crate::types::protocol::{Arg, Reply};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Most connections kept open while unused.
    pub max_idle: usize,
    /// Most connections open at once, idle or not. Must be at least 1.
    pub max_active: usize,
    /// Close idle connections after this long. Zero keeps them forever.
    #[serde(with = "millis")]
    pub idle_timeout: Duration,
    /// Whether to wait for a free connection when `max_active` are in use,
    /// rather than failing with `PoolExhausted`.
    pub wait: bool,
    /// Give up dialing the broker, or health-checking an idle connection,
    /// after this long. Zero waits indefinitely.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 64,
            max_active: 64,
            idle_timeout: Duration::from_secs(300),
            wait: true,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// A single, reused connection.
    pub fn single() -> Self {
        Self {
            max_idle: 1,
            max_active: 1,
            ..Default::default()
        }
    }
}

struct IdleConnection {
    conn: MultiplexedConnection,
    since: Instant,
}

pub struct Pool {
    client: redis::Client,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleConnection>>,
    permits: Semaphore,
}

/// Turns `host:port` into a connection URL, leaving full URLs alone.
fn connection_url(address: &str) -> String {
    if address.contains("://") {
        address.to_owned()
    } else {
        format!("redis://{address}")
    }
}

async fn ping(conn: &mut MultiplexedConnection) -> Result<()> {
    let reply: Reply = redis::cmd("PING").query_async(conn).await?;
    parse_pong(&reply)
}

fn timed_out(what: &str) -> Error {
    Error::Connection(RedisError::from(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("timed out {what}"),
    )))
}

impl Pool {
    /// Creates a pool for the broker at `address`, either `host:port` or a
    /// `redis://` URL. No connection is made until the first request.
    pub fn new(address: &str, config: PoolConfig) -> Result<Self> {
        if config.max_active == 0 {
            return Err(Error::InvalidArgument("max_active must be at least 1"));
        }

        let client = redis::Client::open(connection_url(address))?;
        debug!(%address, ?config, "created pool");

        Ok(Self {
            client,
            config,
            idle: Mutex::new(VecDeque::new()),
            permits: Semaphore::new(config.max_active),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of open connections not currently borrowed.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Closes all idle connections and fails every later borrow with
    /// `PoolClosed`. Borrowed connections close when they're returned.
    pub fn close(&self) {
        self.permits.close();
        self.idle.lock().clear();
        debug!("closed pool");
    }

    /// Borrows a connection, reusing a healthy idle one if possible.
    pub(crate) async fn get(&self) -> Result<PooledConnection<'_>> {
        let permit = if self.config.wait {
            self.permits.acquire().await.map_err(|_| Error::PoolClosed)?
        } else {
            self.permits.try_acquire().map_err(|e| match e {
                TryAcquireError::Closed => Error::PoolClosed,
                TryAcquireError::NoPermits => Error::PoolExhausted,
            })?
        };

        while let Some(mut conn) = self.take_idle() {
            match self.check(&mut conn).await {
                Ok(()) => {
                    return Ok(PooledConnection {
                        pool: self,
                        conn,
                        broken: false,
                        _permit: permit,
                    })
                },
                Err(error) => {
                    debug!(%error, "discarding unhealthy idle connection")
                },
            }
        }

        let conn = self.dial().await?;

        Ok(PooledConnection {
            pool: self,
            conn,
            broken: false,
            _permit: permit,
        })
    }

    /// Pops the most recently used idle connection, first dropping any that
    /// have been idle too long.
    fn take_idle(&self) -> Option<MultiplexedConnection> {
        let mut idle = self.idle.lock();

        let idle_timeout = self.config.idle_timeout;
        if !idle_timeout.is_zero() {
            let before = idle.len();
            idle.retain(|c| c.since.elapsed() < idle_timeout);
            if idle.len() < before {
                let evicted = before - idle.len();
                trace!(evicted, "evicted idle connections");
            }
        }

        idle.pop_back().map(|c| c.conn)
    }

    fn put(&self, conn: MultiplexedConnection) {
        if self.permits.is_closed() {
            return;
        }

        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_idle {
            idle.push_back(IdleConnection {
                conn,
                since: Instant::now(),
            });
        }
    }

    /// Health-checks an idle connection, bounded by `connect_timeout`.
    async fn check(&self, conn: &mut MultiplexedConnection) -> Result<()> {
        let limit = self.config.connect_timeout;
        if limit.is_zero() {
            return ping(conn).await;
        }

        match timeout(limit, ping(conn)).await {
            Ok(res) => res,
            Err(_) => Err(timed_out("checking idle connection")),
        }
    }

    async fn dial(&self) -> Result<MultiplexedConnection> {
        trace!("dialing broker");

        let connect = self.client.get_multiplexed_async_connection();
        let conn = if self.config.connect_timeout.is_zero() {
            connect.await?
        } else {
            match timeout(self.config.connect_timeout, connect).await {
                Ok(conn) => conn?,
                Err(_) => return Err(timed_out("connecting to broker")),
            }
        };

        debug!("connected to broker");
        Ok(conn)
    }
}

/// A borrowed connection. Goes back to the pool on drop unless marked broken.
pub(crate) struct PooledConnection<'a> {
    pool: &'a Pool,
    conn: MultiplexedConnection,
    broken: bool,
    _permit: SemaphorePermit<'a>,
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if !self.broken {
            self.pool.put(self.conn.clone());
        }
    }
}

#[async_trait]
impl Executor for Pool {
    async fn execute(&self, name: &str, args: &[Arg]) -> Result<Reply> {
        let mut pooled = self.get().await?;

        let mut cmd = redis::cmd(name);
        for arg in args {
            cmd.arg(arg);
        }

        trace!(command = name, args = %args.iter().join(" "), "sending");

        // Stays broken if this future is dropped mid-request: the broker may
        // still be blocked on the command.
        pooled.broken = true;
        let res: RedisResult<Reply> = cmd.query_async(&mut pooled.conn).await;
        let res = res.map_err(Error::from);
        pooled.broken = matches!(res, Err(ref e) if e.is_connection_error());

        res
    }
}
