//! Subscriber initialisation: JSON lines filtered through `RUST_LOG`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init() {
    let initialised = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(true)
        .with_current_span(true)
        .try_init()
        .is_ok();

    if initialised {
        ::tracing::debug!(filter = %filter(), "tracing initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_noop() {
        init();
        init();
    }

    #[test]
    fn default_filter_is_used_without_rust_log() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(filter().to_string(), DEFAULT_FILTER);
        }
    }
}
