use super::Severity;

/// Installs a compact stderr subscriber whose lines are wrapped to the terminal width.
///
/// `None` reads the filter from `RUST_LOG`. Installing twice only prints a complaint.
#[cfg(feature = "build-tracing")]
pub fn install_tracing_subscriber(severity: Option<Severity>) {
    use crate::util::format_writer::FormatWriter;
    use tracing_subscriber::{
        filter::LevelFilter, prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt, EnvFilter,
    };

    let formatter = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_thread_ids(false)
        .with_target(false)
        .without_time()
        .with_writer(|| FormatWriter::new(std::io::stderr(), "      "))
        .compact();

    let result = match severity {
        Some(severity) => {
            let filter = LevelFilter::from_level(severity.into_tracing_level());
            tracing_subscriber::registry()
                .with(formatter)
                .with(filter)
                .try_init()
        }
        None => tracing_subscriber::registry()
            .with(formatter)
            .with(EnvFilter::from_default_env())
            .try_init(),
    };

    result.unwrap_or_else(|_| eprintln!("Failed to set tracing subscriber."));
}

#[cfg(not(feature = "build-tracing"))]
pub fn install_tracing_subscriber(_severity: Option<Severity>) {}
