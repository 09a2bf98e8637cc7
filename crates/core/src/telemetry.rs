//! Tracing setup and scoped operation timing.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Install the global fmt subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Returns false when a subscriber was already installed (tests, embedding apps).
pub fn init_tracing(default_filter: &str, json: bool) -> bool {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}

/// Measures an operation from construction until drop.
///
/// Dropping the guard without calling [`ScopedTimer::succeed`] counts the
/// operation as failed, so early returns and `?` are reported too.
#[must_use = "the timer reports when it is dropped"]
pub struct ScopedTimer {
    event: String,
    start: Instant,
    succeeded: bool,
}

impl ScopedTimer {
    pub fn start(event: impl Into<String>) -> Self {
        let event = event.into();
        debug!(event = %event, "operation started");
        Self {
            event,
            start: Instant::now(),
            succeeded: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Mark the operation successful and report. Returns the elapsed time.
    pub fn succeed(mut self) -> Duration {
        self.succeeded = true;
        self.start.elapsed()
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        let status = if self.succeeded { "success" } else { "error" };
        if self.succeeded {
            debug!(event = %self.event, elapsed_ms, "operation completed");
        } else {
            error!(event = %self.event, elapsed_ms, "operation failed");
        }
        metrics::histogram!(
            "operation.duration_ms",
            "event" => self.event.clone(),
            "status" => status
        )
        .record(elapsed_ms);
    }
}

/// Run `fut` under a [`ScopedTimer`], marking success on `Ok`.
pub async fn timed<F, T, E>(event: impl Into<String>, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let timer = ScopedTimer::start(event);
    let result = fut.await;
    if result.is_ok() {
        timer.succeed();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_reports_elapsed() {
        let timer = ScopedTimer::start("unit.test");
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = timer.succeed();
        assert!(elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn test_timer_dropped_on_error_path() {
        fn fallible() -> Result<(), String> {
            let _timer = ScopedTimer::start("unit.fallible");
            let step: Result<(), String> = Err("boom".to_string());
            step?;
            Ok(())
        }
        assert!(fallible().is_err());
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing("shuttle=debug", false);
        assert!(!init_tracing("shuttle=debug", true));
    }
}
