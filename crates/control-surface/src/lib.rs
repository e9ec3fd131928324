//! The shared key-value control surface: a single logical cell,
//! `TRADING_ENABLED`, that the operator can flip via the command router and
//! that `TradeExecutor` consults before every order.
//!
//! Every read is best-effort and fails open: if the backing store cannot be
//! reached within the timeout, callers should treat the flag as `true` so a
//! wedged cache never wedges trading. This crate only surfaces the raw
//! read/write; the fail-open policy lives in [`is_trading_enabled`].

use std::time::Duration;

use redis::AsyncCommands;

pub mod error;
pub use error::ControlSurfaceError;

const TRADING_ENABLED_KEY: &str = "zenith:trading_enabled";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ControlSurface {
    client: redis::Client,
    timeout: Duration,
}

impl ControlSurface {
    pub fn new(redis_url: &str) -> Result<Self, ControlSurfaceError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    #[cfg(test)]
    fn with_timeout(redis_url: &str, timeout: Duration) -> Result<Self, ControlSurfaceError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            timeout,
        })
    }

    /// Raw read. Returns `None` on a missing key *or* an unreachable store —
    /// callers that need the fail-open contract should use
    /// [`ControlSurface::is_trading_enabled`] instead.
    pub async fn get(&self) -> Option<String> {
        let fut = async {
            let mut conn = self.client.get_multiplexed_async_connection().await.ok()?;
            conn.get::<_, Option<String>>(TRADING_ENABLED_KEY).await.ok()?
        };
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("control surface read timed out");
                None
            }
        }
    }

    pub async fn set(&self, value: &str) -> Result<(), ControlSurfaceError> {
        let fut = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            conn.set::<_, _, ()>(TRADING_ENABLED_KEY, value).await
        };
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(ControlSurfaceError::ClientBuild),
            Err(_) => Err(ControlSurfaceError::Timeout),
        }
    }

    /// Fail-open read: `"false"` disables trading, anything else (including
    /// an unreachable store, logged here) is treated as enabled.
    pub async fn is_trading_enabled(&self) -> bool {
        match self.get().await {
            Some(v) => v != "false",
            None => {
                tracing::warn!("control surface unreachable or unset; failing open to enabled");
                true
            }
        }
    }

    pub async fn enable(&self) -> Result<(), ControlSurfaceError> {
        self.set("true").await
    }

    pub async fn disable(&self) -> Result<(), ControlSurfaceError> {
        self.set("false").await
    }

    /// Reachability check for `GET /health` (§6): succeeds iff a connection
    /// can be established and a `PING` round-trips within the timeout.
    pub async fn ping(&self) -> Result<(), ControlSurfaceError> {
        let fut = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            redis::cmd("PING").query_async::<_, String>(&mut conn).await
        };
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map(|_| ()).map_err(ControlSurfaceError::ClientBuild),
            Err(_) => Err(ControlSurfaceError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points at a port nothing listens on, so reads/writes always fail —
    /// proves the fail-open contract without requiring a live Redis.
    fn unreachable_surface() -> ControlSurface {
        ControlSurface::with_timeout("redis://127.0.0.1:1", Duration::from_millis(200)).unwrap()
    }

    #[tokio::test]
    async fn unreachable_store_fails_open_to_enabled() {
        let cs = unreachable_surface();
        assert!(cs.is_trading_enabled().await);
    }

    #[tokio::test]
    async fn unreachable_write_surfaces_an_error() {
        let cs = unreachable_surface();
        assert!(cs.set("false").await.is_err());
    }
}
