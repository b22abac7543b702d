//! Structured logging setup shared by every binary and integration test in
//! the workspace.
//!
//! - `LOG_FORMAT=json` selects JSON output; anything else (including unset)
//!   selects human-readable text.
//! - `RUST_LOG` is the standard level filter, defaulting to `info`.
//!
//! Every pipeline stage already opens a span carrying `message_id` and
//! `component` (see `hero_pipeline::Pipeline::process`); handlers should
//! nest their own logging inside that span rather than repeating those
//! fields in the message string:
//!
//! ```rust,ignore
//! use tracing::{info_span, Instrument};
//!
//! let span = info_span!("handle", message_id = %envelope.message_id, component = "orders");
//! async { tracing::info!("processing"); }.instrument(span).await;
//! ```

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::{Layer, Layered, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Initializes the global subscriber for `service_name`. Call once, at
/// process startup. The two output shapes differ only in whether events are
/// framed as JSON, so both are built as a boxed [`Layer`] and installed
/// through the same `registry().with(..).init()` call.
pub fn init_logging(_service_name: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").unwrap_or_default().eq_ignore_ascii_case("json");

    let layer: Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync> = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(false)
            .with_target(true)
            .flatten_event(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(layer).init();
}

/// Initializes logging with the workspace's default service name.
pub fn init_default_logging() {
    init_logging("hero-messaging");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_falls_back_to_info() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        drop(filter);
    }
}
