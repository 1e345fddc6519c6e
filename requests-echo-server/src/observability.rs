//! Logging setup for the echo server binary.

use std::io;

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output.
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Reads the `LOG_FORMAT` environment variable.
    #[must_use]
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    /// `json` (any case) selects [`LogFormat::Json`]; anything else is pretty.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Installs the global subscriber.
///
/// Filtering follows `RUST_LOG` and defaults to `info`. Output goes to stderr.
///
/// # Examples
///
/// ```no_run
/// use requests_echo_server::observability::{LogFormat, init_observability};
///
/// init_observability(LogFormat::from_env());
/// ```
pub fn init_observability(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => {
            subscriber
                .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE).with_writer(io::stderr))
                .init();
        }
        LogFormat::Json => {
            subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_writer(io::stderr),
                )
                .init();
        }
    }
}
