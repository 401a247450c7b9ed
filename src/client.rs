use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, trace};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::parser;
use crate::pool::{Pool, PoolConfig};
use crate::settings::Settings;
use crate::types::job::Job;
use crate::types::protocol::{Capabilities, DisqueCommand, Reply};
use crate::util::join_queues;

/// How often `wait` checks whether a job still exists, unless overridden.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A handle on a job broker.
///
/// Cloning a client, or deriving one with `with` or a single-option setter
/// like `timeout`, is cheap: derived clients share the same connections but
/// each has its own `Config`.
pub struct Client<E = Pool> {
    executor: Arc<E>,
    config: Config,
    capabilities: Capabilities,
    poll_interval: Duration,
}

impl<E> Clone for Client<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            config: self.config,
            capabilities: self.capabilities,
            poll_interval: self.poll_interval,
        }
    }
}

impl Client<Pool> {
    /// Creates a client for the broker at `address` over a connection pool
    /// sized by `pool`. Use `PoolConfig::single()` for one shared connection.
    pub fn connect(
        address: &str,
        pool: PoolConfig,
        capabilities: Capabilities,
    ) -> Result<Self> {
        Ok(Self::with_executor(Pool::new(address, pool)?, capabilities))
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut client = Self::connect(
            &settings.address,
            settings.pool,
            settings.capabilities,
        )?
        .poll_interval(settings.poll_interval);
        client.use_config(settings.defaults);
        Ok(client)
    }

    /// Closes the underlying pool. Every client sharing it is affected.
    pub fn close(&self) {
        self.executor.close();
    }
}

impl<E: Executor> Client<E> {
    pub fn with_executor(executor: E, capabilities: Capabilities) -> Self {
        Self {
            executor: Arc::new(executor),
            config: Config::default(),
            capabilities,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Applies `conf` to every later operation through this client.
    pub fn use_config(&mut self, conf: Config) -> &mut Self {
        self.config = conf;
        self
    }

    /// A client sharing this one's connections, configured with `conf`.
    pub fn with(&self, conf: Config) -> Self {
        Self {
            config: conf,
            ..self.clone()
        }
    }

    /// A client with this one's configuration, but the given timeout.
    pub fn timeout(&self, timeout: Duration) -> Self {
        self.with(Config {
            timeout,
            ..self.config
        })
    }

    /// A client with this one's configuration, but the given replication
    /// factor.
    pub fn replicate(&self, replicate: u32) -> Self {
        self.with(Config {
            replicate,
            ..self.config
        })
    }

    /// A client with this one's configuration, but the given delay.
    pub fn delay(&self, delay: Duration) -> Self {
        self.with(Config {
            delay,
            ..self.config
        })
    }

    /// A client with this one's configuration, but the given retry interval.
    pub fn retry_after(&self, retry_after: Duration) -> Self {
        self.with(Config {
            retry_after,
            ..self.config
        })
    }

    /// A client with this one's configuration, but the given TTL.
    pub fn ttl(&self, ttl: Duration) -> Self {
        self.with(Config { ttl, ..self.config })
    }

    /// A client with this one's configuration, but the given maximum queue
    /// length.
    pub fn max_len(&self, max_len: u64) -> Self {
        self.with(Config {
            max_len,
            ..self.config
        })
    }

    /// A client that polls at `interval` in `wait`.
    pub fn poll_interval(&self, interval: Duration) -> Self {
        Self {
            poll_interval: interval,
            ..self.clone()
        }
    }

    async fn send(&self, cmd: &DisqueCommand) -> Result<Reply> {
        self.executor.execute(cmd.name(), &cmd.args()).await
    }

    /// Checks the broker is reachable and responding.
    pub async fn ping(&self) -> Result<()> {
        parser::parse_pong(&self.send(&DisqueCommand::Ping).await?)
    }

    /// Adds a job carrying `data` to `queue`.
    #[instrument(skip_all, fields(%queue))]
    pub async fn add(&self, data: &str, queue: &str) -> Result<Job> {
        let cmd = DisqueCommand::add_job(&self.config, data, queue);
        let id = parser::parse_add(&self.send(&cmd).await?)?;
        debug!(%id, "added job");

        Ok(Job::new(id, data, queue))
    }

    /// Takes the first available job from `queues`, in priority order: a job
    /// is only taken from a queue if every queue before it is empty. Fails
    /// with `Timeout` if none arrives within the configured timeout.
    #[instrument(skip_all, fields(queues = %join_queues(queues)))]
    pub async fn get<Q: AsRef<str>>(&self, queues: &[Q]) -> Result<Job> {
        if queues.is_empty() {
            return Err(Error::InvalidArgument("expected at least one queue"));
        }

        let cmd =
            DisqueCommand::get_job(&self.config, &self.capabilities, queues);
        let reply = self.send(&cmd).await?;
        let job = parser::parse_get(&reply, self.capabilities.counters)?;
        debug!(id = %job.id, queue = %job.queue, "got job");

        Ok(job)
    }

    /// Acknowledges a job, removing it for good.
    #[instrument(skip_all, fields(id = %job.id))]
    pub async fn ack(&self, job: &Job) -> Result<()> {
        self.send(&DisqueCommand::AckJob { id: job.id.clone() })
            .await
            .map(drop)
    }

    /// Hands a job back to its queue for immediate redelivery.
    #[instrument(skip_all, fields(id = %job.id))]
    pub async fn nack(&self, job: &Job) -> Result<()> {
        let cmd =
            DisqueCommand::requeue(self.capabilities.nack, job.id.as_str());
        self.send(&cmd).await.map(drop)
    }

    /// Looks up everything the broker knows about a job. Fails with `NoData`
    /// once the job is gone.
    #[instrument(skip_all, fields(%id))]
    pub async fn fetch(&self, id: &str) -> Result<Job> {
        let cmd = DisqueCommand::Show { id: id.to_owned() };
        let reply = self.send(&cmd).await?;
        parser::parse_show(&reply).map_err(|error| {
            if let Error::InvalidReply { .. } = error {
                let labels = parser::labels(&reply);
                debug!(?labels, "undecodable SHOW reply");
            }
            error
        })
    }

    /// Blocks until the broker no longer knows the job, i.e. it was
    /// acknowledged or expired.
    ///
    /// There's no push notification for this, so the job is polled with
    /// `SHOW` every poll interval. Fails with `Timeout` once the configured
    /// timeout passes; with no timeout it waits forever. A busy pool
    /// (`PoolExhausted`) only skips a poll; any other error ends the wait.
    #[instrument(skip_all, fields(id = %job.id))]
    pub async fn wait(&self, job: &Job) -> Result<()> {
        let started = Instant::now();
        let cmd = DisqueCommand::Show { id: job.id.clone() };

        loop {
            match self.send(&cmd).await {
                Ok(Reply::Nil) => {
                    debug!(elapsed = ?started.elapsed(), "job finished");
                    return Ok(());
                },
                Ok(_) => trace!("job still present"),
                Err(Error::PoolExhausted) => trace!("no free connection"),
                Err(error) => return Err(error),
            }

            let timeout = self.config.timeout;
            if !timeout.is_zero() && started.elapsed() >= timeout {
                return Err(Error::Timeout);
            }

            sleep(self.poll_interval).await;
        }
    }

    /// Number of jobs waiting in `queue`.
    pub async fn len(&self, queue: &str) -> Result<u64> {
        let cmd = DisqueCommand::QLen {
            queue: queue.to_owned(),
        };
        parser::parse_len(&self.send(&cmd).await?)
    }

    /// Number of jobs from `queue` delivered but not yet acknowledged.
    pub async fn active_len(&self, queue: &str) -> Result<u64> {
        let cmd = DisqueCommand::ScanActive {
            queue: queue.to_owned(),
        };
        parser::parse_active_len(&self.send(&cmd).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::types::protocol::{Arg, NackStyle};

    /// Records every command and answers from a script of replies.
    #[derive(Default)]
    struct Scripted {
        sent: Mutex<Vec<Vec<String>>>,
        replies: Mutex<VecDeque<Result<Reply>>>,
    }

    impl Scripted {
        fn new(replies: impl IntoIterator<Item = Result<Reply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                ..Default::default()
            }
        }

        fn sent(&self) -> Vec<Vec<String>> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Executor for Scripted {
        async fn execute(&self, name: &str, args: &[Arg]) -> Result<Reply> {
            let mut line = vec![name.to_owned()];
            line.extend(args.iter().map(Arg::to_string));
            self.sent.lock().push(line);

            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Err(Error::invalid_reply("script exhausted")))
        }
    }

    fn client(
        replies: impl IntoIterator<Item = Result<Reply>>,
    ) -> Client<Scripted> {
        Client::with_executor(Scripted::new(replies), Capabilities::legacy())
    }

    fn data(s: &str) -> Reply {
        Reply::Data(s.to_owned().into())
    }

    fn job_reply(queue: &str, id: &str, body: &str) -> Reply {
        let job = vec![data(queue), data(id), data(body)];
        Reply::Array(vec![Reply::Array(job)])
    }

    #[tokio::test]
    async fn test_add() {
        let jobs = client([Ok(data("D-1"))]);

        let job = jobs
            .replicate(2)
            .ttl(Duration::from_millis(10))
            .add("data1", "test:add")
            .await
            .unwrap();

        assert_eq!(job, Job::new("D-1", "data1", "test:add"));
        assert_eq!(
            jobs.executor().sent(),
            [["ADDJOB", "test:add", "data1", "0", "REPLICATE", "2", "TTL", "1"]]
        );
    }

    #[tokio::test]
    async fn test_add_broker_error() {
        let jobs = client([Err(Error::Broker {
            code: "MAXLEN".into(),
            message: "Queue is already longer than the specified MAXLEN count"
                .into(),
        })]);

        let res = jobs.max_len(1).add("data1", "test:maxlen").await;
        assert!(matches!(
            res,
            Err(Error::Broker { ref code, .. }) if code == "MAXLEN"
        ));
        assert_eq!(
            jobs.executor().sent(),
            [["ADDJOB", "test:maxlen", "data1", "0", "MAXLEN", "1"]]
        );
    }

    #[tokio::test]
    async fn test_get_priority_order() {
        let jobs = client([Ok(job_reply("test:high", "D-3", "data3"))]);

        let job = jobs
            .timeout(Duration::from_millis(250))
            .get(&["test:urgent", "test:high", "test:low"])
            .await
            .unwrap();

        assert_eq!(job.queue, "test:high");
        assert_eq!(job.data, "data3");
        assert_eq!(
            jobs.executor().sent(),
            [[
                "GETJOB",
                "TIMEOUT",
                "250",
                "FROM",
                "test:urgent",
                "test:high",
                "test:low"
            ]]
        );
    }

    #[tokio::test]
    async fn test_get_without_queues_sends_nothing() {
        let jobs = client([]);

        let res = jobs.get::<&str>(&[]).await;
        assert!(matches!(res, Err(Error::InvalidArgument(_))));
        assert!(jobs.executor().sent().is_empty());
    }

    #[tokio::test]
    async fn test_get_timeout_and_invalid_reply() {
        let jobs = client([Ok(Reply::Nil), Ok(Reply::Int(1))]);

        assert!(matches!(jobs.get(&["q"]).await, Err(Error::Timeout)));
        assert!(matches!(
            jobs.get(&["q"]).await,
            Err(Error::InvalidReply { field: "jobs" })
        ));
    }

    #[tokio::test]
    async fn test_get_with_counters() {
        let reply = Reply::Array(vec![Reply::Array(vec![
            data("q"),
            data("D-9"),
            data("body"),
            data("nacks"),
            Reply::Int(1),
            data("additional-deliveries"),
            Reply::Int(0),
        ])]);
        let jobs = Client::with_executor(
            Scripted::new([Ok(reply)]),
            Capabilities::modern(),
        );

        let job = jobs.get(&["q"]).await.unwrap();
        assert_eq!(job.nacks, 1);
        assert_eq!(
            jobs.executor().sent(),
            [["GETJOB", "TIMEOUT", "0", "WITHCOUNTERS", "FROM", "q"]]
        );
    }

    #[tokio::test]
    async fn test_ack_and_nack_styles() {
        let job = Job::new("D-1", "data1", "q");

        let jobs = client([Ok(Reply::Int(1)), Ok(Reply::Int(1))]);
        jobs.ack(&job).await.unwrap();
        jobs.nack(&job).await.unwrap();
        assert_eq!(
            jobs.executor().sent(),
            [["ACKJOB", "D-1"], ["ENQUEUE", "D-1"]]
        );

        let jobs = Client::with_executor(
            Scripted::new([Ok(Reply::Int(1))]),
            Capabilities {
                nack: NackStyle::Nack,
                counters: false,
            },
        );
        jobs.nack(&job).await.unwrap();
        assert_eq!(jobs.executor().sent(), [["NACK", "D-1"]]);
    }

    #[tokio::test]
    async fn test_fetch_gone() {
        let jobs = client([Ok(Reply::Nil)]);
        assert!(matches!(jobs.fetch("D-1").await, Err(Error::NoData)));
        assert_eq!(jobs.executor().sent(), [["SHOW", "D-1"]]);
    }

    #[tokio::test]
    async fn test_lengths() {
        let jobs = client([
            Ok(Reply::Int(100)),
            Ok(Reply::Array(vec![
                data("0"),
                Reply::Array(vec![data("D-1"), data("D-2"), data("D-3")]),
            ])),
        ]);

        assert_eq!(jobs.len("test:len").await.unwrap(), 100);
        assert_eq!(jobs.active_len("test:len").await.unwrap(), 3);
        assert_eq!(
            jobs.executor().sent(),
            [
                vec!["QLEN", "test:len"],
                vec![
                    "JSCAN", "0", "BUSYLOOP", "QUEUE", "test:len", "STATE",
                    "active"
                ],
            ]
        );
    }

    #[tokio::test]
    async fn test_ping() {
        let jobs = client([Ok(Reply::Status("PONG".into())), Ok(data("PONG"))]);
        jobs.ping().await.unwrap();
        assert!(jobs.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_wait_polls_until_gone() {
        let present = Reply::Array(vec![data("id"), data("D-1")]);
        let jobs = client([
            Ok(present.clone()),
            Ok(present.clone()),
            Ok(present),
            Ok(Reply::Nil),
        ])
        .poll_interval(Duration::from_millis(1));

        jobs.wait(&Job::new("D-1", "data1", "q")).await.unwrap();
        assert_eq!(jobs.executor().sent().len(), 4);
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let present = Reply::Array(vec![data("id"), data("D-1")]);
        let replies = std::iter::repeat_with(|| Ok(present.clone())).take(1000);
        let jobs = client(replies)
            .poll_interval(Duration::from_millis(10))
            .timeout(Duration::from_millis(45));

        let started = Instant::now();
        let res = jobs.wait(&Job::new("D-1", "data1", "q")).await;
        assert!(matches!(res, Err(Error::Timeout)));
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_wait_stops_on_error() {
        let jobs = client([
            Ok(Reply::Array(vec![])),
            Err(Error::Connection(redis::RedisError::from(
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"),
            ))),
        ])
        .poll_interval(Duration::from_millis(1));

        let res = jobs.wait(&Job::new("D-1", "data1", "q")).await;
        assert!(res.unwrap_err().is_connection_error());
    }

    #[tokio::test]
    async fn test_wait_retries_when_pool_exhausted() {
        let jobs = client([
            Ok(Reply::Array(vec![])),
            Err(Error::PoolExhausted),
            Ok(Reply::Nil),
        ])
        .poll_interval(Duration::from_millis(1));

        jobs.wait(&Job::new("D-1", "data1", "q")).await.unwrap();
        assert_eq!(jobs.executor().sent().len(), 3);
    }

    #[tokio::test]
    async fn test_wait_pool_exhausted_until_timeout() {
        let replies =
            std::iter::repeat_with(|| Err(Error::PoolExhausted)).take(1000);
        let jobs = client(replies)
            .poll_interval(Duration::from_millis(5))
            .timeout(Duration::from_millis(20));

        let res = jobs.wait(&Job::new("D-1", "data1", "q")).await;
        assert!(matches!(res, Err(Error::Timeout)));
        assert!(jobs.executor().sent().len() > 1);
    }

    #[test]
    fn test_derived_clients_are_independent() {
        let mut base = client([]);
        base.use_config(Config {
            replicate: 3,
            ..Default::default()
        });

        let short = base.timeout(Duration::from_millis(1));
        let delayed = base.delay(Duration::from_secs(5));

        assert_eq!(base.config().timeout, Duration::ZERO);
        assert_eq!(base.config().delay, Duration::ZERO);
        assert_eq!(short.config().timeout, Duration::from_millis(1));
        assert_eq!(short.config().delay, Duration::ZERO);
        assert_eq!(delayed.config().delay, Duration::from_secs(5));
        assert_eq!(delayed.config().timeout, Duration::ZERO);

        // Persistent settings carry through single-field overrides.
        assert_eq!(short.config().replicate, 3);
        assert_eq!(delayed.config().replicate, 3);

        // `with` replaces the whole configuration.
        let fresh = base.with(Config::default());
        assert_eq!(fresh.config().replicate, 0);
        assert_eq!(base.config().replicate, 3);

        // Chained overrides compose.
        let chained = base.retry_after(Duration::from_secs(1)).max_len(10);
        assert_eq!(chained.config().retry_after, Duration::from_secs(1));
        assert_eq!(chained.config().max_len, 10);
        assert_eq!(chained.config().replicate, 3);
        assert_eq!(base.config().max_len, 0);
    }

    #[tokio::test]
    async fn test_use_config_applies_to_later_calls() {
        let mut jobs = client([Ok(Reply::Nil), Ok(Reply::Nil)]);

        let conf = Config {
            timeout: Duration::from_millis(1),
            ..Default::default()
        };
        let res = jobs.with(conf).get(&["q"]).await;
        assert!(matches!(res, Err(Error::Timeout)));
        jobs.use_config(conf);
        assert!(matches!(jobs.get(&["q"]).await, Err(Error::Timeout)));

        assert_eq!(
            jobs.executor().sent(),
            [
                ["GETJOB", "TIMEOUT", "1", "FROM", "q"],
                ["GETJOB", "TIMEOUT", "1", "FROM", "q"],
            ]
        );
    }
}
