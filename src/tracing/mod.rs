pub mod shim_macros;
pub mod tracing_subscriber;

/// Verbosity passed to [`tracing_subscriber::install_tracing_subscriber`].
///
/// The graph logs its per-frame summary at `Info`, culled and merged passes at `Debug`
/// and every planned transition at `Trace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
    /// Parses the same spellings that `RUST_LOG` accepts for a bare level.
    pub fn parse(str: &str) -> Option<Self> {
        let severity = match str.trim().to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            _ => return None,
        };
        Some(severity)
    }
}

#[cfg(feature = "build-tracing")]
impl Severity {
    pub fn from_tracing_level(level: tracing::Level) -> Self {
        if level == tracing::Level::TRACE {
            Self::Trace
        } else if level == tracing::Level::DEBUG {
            Self::Debug
        } else if level == tracing::Level::INFO {
            Self::Info
        } else if level == tracing::Level::WARN {
            Self::Warn
        } else {
            Self::Error
        }
    }
    pub fn into_tracing_level(&self) -> tracing::Level {
        match self {
            Severity::Trace => tracing::Level::TRACE,
            Severity::Debug => tracing::Level::DEBUG,
            Severity::Info => tracing::Level::INFO,
            Severity::Warn => tracing::Level::WARN,
            Severity::Error => tracing::Level::ERROR,
        }
    }
}

#[test]
fn test_severity_parse() {
    assert_eq!(Severity::parse("TRACE"), Some(Severity::Trace));
    assert_eq!(Severity::parse(" warning "), Some(Severity::Warn));
    assert_eq!(Severity::parse("loud"), None);
    assert!(Severity::Trace < Severity::Error);
    assert_eq!(Severity::Info.name(), "info");
}
