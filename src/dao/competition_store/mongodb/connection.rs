//! Connecting to MongoDB. The first ping is retried with a capped exponential
//! backoff so the server can start before its database.

use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::debug;

use super::error::{MongoDaoError, MongoResult};

/// Schedule of the initial connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConnectBackoff {
    max_attempts: u32,
    first_delay: Duration,
    ceiling: Duration,
}

impl ConnectBackoff {
    const STARTUP: Self = Self {
        max_attempts: 10,
        first_delay: Duration::from_millis(250),
        ceiling: Duration::from_secs(5),
    };

    /// Pause after failed attempt `attempt` (1-based); `None` once attempts are spent.
    fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        Some(self.first_delay.saturating_mul(factor).min(self.ceiling))
    }
}

/// Build a client for `database_name` and wait until the server answers a ping.
pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let backoff = ConnectBackoff::STARTUP;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Err(source) = database.run_command(doc! { "ping": 1 }).await else {
            return Ok((client, database));
        };
        match backoff.delay_after(attempt) {
            Some(delay) => {
                debug!(attempt, ?delay, database = database_name, error = %source, "MongoDB not reachable yet");
                sleep(delay).await;
            }
            None => {
                return Err(MongoDaoError::InitialPing {
                    attempts: attempt,
                    source,
                });
            }
        }
    }
}
