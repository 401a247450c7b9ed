use async_trait::async_trait;

use crate::error::Result;
use crate::types::protocol::{Arg, Reply};

/// Sends one command and waits for its decoded reply.
///
/// Implementations own connection handling: each call should borrow a
/// connection for its own duration only, and return transport failures as
/// `Error::Connection` and broker error replies as `Error::Broker`.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, name: &str, args: &[Arg]) -> Result<Reply>;
}

