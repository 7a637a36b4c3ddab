//! Caller-driven exponential-backoff reconnection for the push channel.
//!
//! The channel never retries on its own. When the session sees the state
//! drop to disconnected it calls [`reconnect`], which keeps retrying with
//! increasing delays until the channel is connected again or the
//! [`CancellationToken`] is triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::channel::TransportChannel;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Connected,
    Cancelled,
    /// There is no credential to reconnect with (logged out).
    NoCredential,
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Reconnect `channel` with exponential backoff.
///
/// The first attempt is made immediately.
pub async fn reconnect(
    channel: &TransportChannel,
    credential: Option<&str>,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> ReconnectOutcome {
    if !credential.map(str::trim).is_some_and(|t| !t.is_empty()) {
        tracing::info!("No credential, skipping reconnect");
        return ReconnectOutcome::NoCredential;
    }

    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tracing::info!(attempt, "Reconnecting push channel");

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reconnect cancelled");
                return ReconnectOutcome::Cancelled;
            }
            result = channel.connect(credential) => {
                match result {
                    Ok(()) if channel.is_connected() => {
                        tracing::info!(attempt, "Push channel reconnected");
                        return ReconnectOutcome::Connected;
                    }
                    Ok(()) => {
                        tracing::warn!(attempt, "Reconnect attempt returned without a connection");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "Reconnect attempt {attempt} failed",
                        );
                    }
                }
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return ReconnectOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::HeartbeatConfig;
    use crate::client::PushClient;

    #[test]
    fn next_delay_doubles() {
        let config = ReconnectConfig::default();
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = ReconnectConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_secs(8), &config), Duration::from_secs(10));
    }

    #[test]
    fn full_backoff_sequence() {
        let config = ReconnectConfig::default();
        let mut delay = config.initial_delay;
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];

        for &expected_secs in &expected {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = next_delay(delay, &config);
        }
    }

    fn unreachable_channel() -> TransportChannel {
        TransportChannel::new(PushClient::new("ws://127.0.0.1:9/ws"), HeartbeatConfig::default())
    }

    #[tokio::test]
    async fn cancelled_token_stops_reconnect() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = reconnect(
            &unreachable_channel(),
            Some("token"),
            &ReconnectConfig::default(),
            &cancel,
        )
        .await;
        assert_eq!(outcome, ReconnectOutcome::Cancelled);
    }

    #[tokio::test]
    async fn cancel_during_backoff() {
        let cancel = CancellationToken::new();
        let channel = unreachable_channel();
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(60),
            ..Default::default()
        };

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let outcome = reconnect(&channel, Some("token"), &config, &cancel).await;
        assert_eq!(outcome, ReconnectOutcome::Cancelled);
    }

    #[tokio::test]
    async fn missing_credential_is_reported() {
        let outcome = reconnect(
            &unreachable_channel(),
            None,
            &ReconnectConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome, ReconnectOutcome::NoCredential);
    }
}
