use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this more than once is
/// a no-op, which lets tests and embedding processes both call it.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        let logging = LoggingConfig {
            level: "debug".to_string(),
        };
        init_tracing(&logging);
        init_tracing(&logging);
        tracing::debug!("subscriber installed");
    }
}
