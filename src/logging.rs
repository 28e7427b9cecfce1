//! Log output setup.
//!
//! Configuration decides the final log level and format, so loading it runs
//! under a bootstrap subscriber. That way warnings raised while reading the
//! file and environment still reach stderr.

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Filter directive used until configuration is loaded.
const BOOTSTRAP_LEVEL: &str = "info";

/// `RUST_LOG` if set, otherwise `default_directive`.
fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global subscriber described by `logging`.
pub fn init(logging: &LoggingConfig) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&logging.level))
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Subscriber to scope configuration loading with, writing to stderr.
///
/// Use it through [`tracing::subscriber::with_default`] so it is dropped
/// before [`init`] installs the global one.
pub fn bootstrap() -> impl Subscriber + Send + Sync + 'static {
    bootstrap_with(env_filter(BOOTSTRAP_LEVEL), std::io::stderr)
}

fn bootstrap_with<W>(filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(writer)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::config::RatewallConfig;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_warnings_reach_bootstrap_subscriber() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = bootstrap_with(EnvFilter::new("info"), move || writer.clone());
        let vars = HashMap::from([("IP_LIMIT_PER_SECOND".to_string(), "lots".to_string())]);

        let config = tracing::subscriber::with_default(subscriber, || {
            RatewallConfig::load_with_env(None, vars)
        })
        .unwrap();

        assert_eq!(config.rate_limiting.anonymous_limit, 5);
        let output = capture.contents();
        assert!(output.contains("Ignoring unparseable environment variable"));
        assert!(output.contains("IP_LIMIT_PER_SECOND"));
    }

    #[test]
    fn test_bootstrap_respects_filter() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = bootstrap_with(EnvFilter::new("error"), move || writer.clone());
        let vars = HashMap::from([("IP_LIMIT_PER_SECOND".to_string(), "lots".to_string())]);

        tracing::subscriber::with_default(subscriber, || {
            RatewallConfig::load_with_env(None, vars)
        })
        .unwrap();

        assert!(capture.contents().is_empty());
    }
}
