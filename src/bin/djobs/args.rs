use std::path::PathBuf;

use clap::{Parser, Subcommand};
use disque_jobs::NackStyle;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub(crate) struct Args {
    /// Broker address, as host:port or a redis:// URL.
    #[arg(short, long, default_value = "127.0.0.1:7711")]
    pub(crate) address: String,
    /// Loads the address, pool, capabilities and defaults from a YAML file,
    /// ignoring the other connection flags.
    #[arg(short, long)]
    pub(crate) settings: Option<PathBuf>,
    /// How the broker expects jobs to be requeued: enqueue or nack.
    #[arg(long, default_value = "enqueue")]
    pub(crate) nack_style: NackStyle,
    /// Asks the broker for delivery counters when getting jobs.
    #[arg(long, default_value_t)]
    pub(crate) counters: bool,
    /// Timeout for blocking operations, in milliseconds. 0 waits forever.
    #[arg(short, long)]
    pub(crate) timeout_ms: Option<u64>,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub(crate) debug: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Checks the broker is reachable.
    Ping,
    /// Adds a job, printing its ID.
    Add {
        queue: String,
        data: String,
        /// Replicate to at least N nodes before returning.
        #[arg(long, default_value_t)]
        replicate: u32,
        /// Seconds before the job becomes available.
        #[arg(long, default_value_t)]
        delay: u64,
        /// Seconds before an unacknowledged job is redelivered.
        #[arg(long, default_value_t)]
        retry: u64,
        /// Seconds before the job is discarded.
        #[arg(long, default_value_t)]
        ttl: u64,
        /// Fail if the queue already holds N jobs.
        #[arg(long, default_value_t)]
        max_len: u64,
    },
    /// Takes a job from the first non-empty queue, in the order given.
    Get {
        #[arg(required = true)]
        queues: Vec<String>,
        /// Acknowledges the job straight away.
        #[arg(long, default_value_t)]
        ack: bool,
    },
    /// Acknowledges a job.
    Ack { id: String },
    /// Requeues a job for redelivery.
    Nack { id: String },
    /// Prints everything the broker knows about a job, as YAML.
    Show { id: String },
    /// Waits until a job is acknowledged or expires.
    Wait {
        id: String,
        /// Milliseconds between checks.
        #[arg(long, default_value_t = 10)]
        poll_ms: u64,
    },
    /// Prints the number of queued jobs.
    Len { queue: String },
    /// Prints the number of delivered, unacknowledged jobs.
    ActiveLen { queue: String },
}
