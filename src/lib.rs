//! A pooled async client for Disque-compatible job queue brokers.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use disque_jobs::{Capabilities, Client, PoolConfig};
//!
//! # async fn example() -> disque_jobs::Result<()> {
//! let jobs = Client::connect(
//!     "127.0.0.1:7711",
//!     PoolConfig::default(),
//!     Capabilities::legacy(),
//! )?;
//!
//! jobs.retry_after(Duration::from_secs(60))
//!     .add("resize:1234", "images")
//!     .await?;
//!
//! let job = jobs
//!     .timeout(Duration::from_secs(1))
//!     .get(&["images:urgent", "images"])
//!     .await?;
//! // ... process job.data ...
//! jobs.ack(&job).await?;
//! # Ok(())
//! # }
//! ```
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod parser;
pub mod pool;
pub mod settings;
pub mod types;
mod util;

pub use client::Client;
pub use config::Config;
pub use error::{Error, Result};
pub use executor::Executor;
pub use pool::{Pool, PoolConfig};
pub use settings::Settings;
pub use types::job::Job;
pub use types::protocol::{Capabilities, NackStyle};
pub use types::states::JobState;
