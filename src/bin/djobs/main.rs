mod args;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use disque_jobs::{
    Capabilities, Client, Config, Error, Job, PoolConfig, Settings,
};
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Level};

use crate::args::{Args, Command};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .init();
    }

    // Cancellation on Ctrl-C, for the commands that can block indefinitely.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            };
            cancel.cancel();
        });
    }

    match run(args, cancel).await {
        Ok(code) => code,
        Err(error) => {
            error!("command failed: {error:#}");
            ExitCode::FAILURE
        },
    }
}

fn connect(args: &Args) -> Result<Client> {
    let mut client = match &args.settings {
        Some(path) => {
            let settings = Settings::from_path(path)
                .with_context(|| format!("loading {}", path.display()))?;
            Client::from_settings(&settings)?
        },
        None => Client::connect(
            &args.address,
            PoolConfig::single(),
            Capabilities {
                nack: args.nack_style,
                counters: args.counters,
            },
        )?,
    };

    if let Some(ms) = args.timeout_ms {
        client = client.timeout(Duration::from_millis(ms));
    }

    Ok(client)
}

async fn run(args: Args, cancel: CancellationToken) -> Result<ExitCode> {
    let jobs = connect(&args)?;
    debug!(command = ?args.command, "running");

    match args.command {
        Command::Ping => {
            jobs.ping().await.context("PING")?;
            println!("PONG");
        },
        Command::Add {
            queue,
            data,
            replicate,
            delay,
            retry,
            ttl,
            max_len,
        } => {
            let conf = Config {
                replicate,
                delay: Duration::from_secs(delay),
                retry_after: Duration::from_secs(retry),
                ttl: Duration::from_secs(ttl),
                max_len,
                ..*jobs.config()
            };
            let job = jobs.with(conf).add(&data, &queue).await?;
            println!("{}", job.id);
        },
        Command::Get { queues, ack } => {
            let job = select! {
                job = jobs.get(queues.as_slice()) => job,
                _ = cancel.cancelled() => return Ok(ExitCode::FAILURE),
            };
            let job = match job {
                Ok(job) => job,
                Err(Error::Timeout) => {
                    eprintln!("timed out");
                    return Ok(ExitCode::from(2));
                },
                Err(error) => return Err(error.into()),
            };

            if ack {
                jobs.ack(&job).await.context("acknowledging job")?;
            }
            println!("{}", serde_yaml::to_string(&job)?);
        },
        Command::Ack { id } => jobs.ack(&job_ref(id)).await?,
        Command::Nack { id } => jobs.nack(&job_ref(id)).await?,
        Command::Show { id } => match jobs.fetch(&id).await {
            Ok(job) => println!("{}", serde_yaml::to_string(&job)?),
            Err(Error::NoData) => {
                eprintln!("no such job");
                return Ok(ExitCode::from(2));
            },
            Err(error) => return Err(error.into()),
        },
        Command::Wait { id, poll_ms } => {
            let jobs = jobs.poll_interval(Duration::from_millis(poll_ms));
            let job = job_ref(id);
            select! {
                res = jobs.wait(&job) => res?,
                _ = cancel.cancelled() => return Ok(ExitCode::FAILURE),
            };
        },
        Command::Len { queue } => println!("{}", jobs.len(&queue).await?),
        Command::ActiveLen { queue } => {
            println!("{}", jobs.active_len(&queue).await?)
        },
    }

    Ok(ExitCode::SUCCESS)
}

/// A job known only by its ID, for commands that take nothing else.
fn job_ref(id: String) -> Job {
    Job {
        id,
        ..Default::default()
    }
}
