//! Blocking reconnect loop for the broker and the datastore.

use std::thread;
use std::time::Duration;

use tracing::{info, warn};

/// Default pause between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Something that can open a connection.
pub trait Connector {
    type Connection;
    type Error: core::fmt::Display;

    /// Where the connection goes, for logs. Must not contain credentials.
    fn endpoint(&self) -> &str;

    fn connect(&self) -> Result<Self::Connection, Self::Error>;
}

/// Keeps trying a [`Connector`] until it succeeds.
///
/// There is no attempt limit: a worker without its broker or datastore has nothing useful to
/// do, so it waits for them to come back.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionGuardian {
    retry_delay: Duration,
}

impl Default for ConnectionGuardian {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}

impl ConnectionGuardian {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Block until `connector` yields a connection.
    pub fn acquire<C: Connector>(&self, connector: &C) -> C::Connection {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match connector.connect() {
                Ok(connection) => {
                    if attempt > 1 {
                        info!(endpoint = connector.endpoint(), attempt, "connection restored");
                    } else {
                        info!(endpoint = connector.endpoint(), "connected");
                    }
                    return connection;
                }
                Err(err) => {
                    warn!(
                        endpoint = connector.endpoint(),
                        attempt,
                        error = %err,
                        retry_in_ms = self.retry_delay.as_millis() as u64,
                        "connection failed; retrying"
                    );
                    thread::sleep(self.retry_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct Flaky {
        failures_left: Cell<u32>,
        attempts: Cell<u32>,
    }

    impl Connector for Flaky {
        type Connection = &'static str;
        type Error = String;

        fn endpoint(&self) -> &str {
            "flaky://test"
        }

        fn connect(&self) -> Result<Self::Connection, Self::Error> {
            self.attempts.set(self.attempts.get() + 1);
            match self.failures_left.get() {
                0 => Ok("live"),
                n => {
                    self.failures_left.set(n - 1);
                    Err("refused".into())
                }
            }
        }
    }

    #[test]
    fn retries_until_connected() {
        let connector = Flaky {
            failures_left: Cell::new(3),
            attempts: Cell::new(0),
        };
        let guardian = ConnectionGuardian::new(Duration::from_millis(1));

        assert_eq!(guardian.acquire(&connector), "live");
        assert_eq!(connector.attempts.get(), 4);
    }

    #[test]
    fn default_delay_is_five_seconds() {
        assert_eq!(ConnectionGuardian::default().retry_delay(), Duration::from_secs(5));
    }
}
