use std::fmt::Display;
use std::future::Future;

use tracing::debug;

use crate::network::network_config::NetworkConfig;

/// Runs `op` up to [NetworkConfig::max_retry_connect] times, sleeping [NetworkConfig::wait_retry]
///  between consecutive attempts, and returns the first success or the last attempt's error.
///
/// This is for establishing connections and binding listeners only: sending and receiving on an
///  established connection is never retried.
pub async fn with_retry<T, E, F, Fut>(config: &NetworkConfig, what: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_retry_connect.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt >= max_attempts => {
                debug!(attempt, %e, "{} failed, giving up", what);
                return Err(e);
            }
            Err(e) => {
                debug!(attempt, %e, "{} failed, retrying", what);
            }
        }
        attempt += 1;
        tokio::time::sleep(config.wait_retry).await;
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use rstest::rstest;
    use tokio::time::Instant;

    use super::*;

    fn config(max_retry_connect: u32) -> NetworkConfig {
        NetworkConfig {
            max_retry_connect,
            wait_retry: Duration::from_millis(100),
            ..Default::default()
        }
    }

    #[rstest]
    #[case::one_attempt(1)]
    #[case::five_attempts(5)]
    #[tokio::test(start_paused = true)]
    async fn test_exhausted(#[case] max_retry_connect: u32) {
        let attempts = &AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), String> = with_retry(&config(max_retry_connect), "test", || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("attempt {}", n))
        }).await;

        assert_eq!(result, Err(format!("attempt {}", max_retry_connect)));
        assert_eq!(attempts.load(Ordering::SeqCst), max_retry_connect);
        assert_eq!(start.elapsed(), Duration::from_millis(100) * (max_retry_connect - 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_failures() {
        let attempts = &AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<u32, String> = with_retry(&config(5), "test", || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err("not yet".to_string()) } else { Ok(n) }
        }).await;

        assert_eq!(result, Ok(3));
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }
}
