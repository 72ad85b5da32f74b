use crate::error::{ArticleDbError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Time limits for outbound work. Reads get the network budget; writes get
/// the network budget plus an overhead margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadlines {
    pub network: Duration,
    pub write_overhead: Duration,
    pub storage: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            network: Duration::from_millis(2000),
            write_overhead: Duration::from_millis(3000),
            storage: Duration::from_millis(5000),
        }
    }
}

impl Deadlines {
    pub fn read(&self) -> Duration {
        self.network
    }

    pub fn write(&self) -> Duration {
        self.network + self.write_overhead
    }
}

/// Awaits `future` for at most `limit`.
pub async fn with_deadline<T, F>(limit: Duration, what: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(ArticleDbError::Timeout(format!(
            "{} exceeded {:?}",
            what, limit
        ))),
    }
}
