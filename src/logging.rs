//! Tracing subscriber setup for binaries and tests that embed the transactor.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. With `json` set, events are
/// written as one JSON object per line. Returns `false` if a subscriber was
/// already installed, so calling this from several tests is harmless.
pub fn init_tracing(level: &str, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(fmt::layer().json()).try_init().is_ok()
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected_quietly() {
        init_tracing("debug", false);
        assert!(!init_tracing("info", true));
    }
}
