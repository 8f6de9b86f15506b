//! Logging setup for the delivery tools.
//!
//! Filters come from `RUST_LOG` unless a config carries its own. HTTP
//! client internals are capped at `warn` so push traces stay readable.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Directives appended to every filter.
const QUIET_DEPENDENCIES: &str = "hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for a terminal.
    #[default]
    Pretty,
    Compact,
    /// One JSON object per line, for log shipping.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when neither `filter` nor `RUST_LOG` is set.
    pub level: Level,
    pub format: LogFormat,
    /// Include source file and line.
    pub include_location: bool,
    /// Log span enter/close, e.g. around each worker event.
    pub include_span_events: bool,
    /// Filter directives (e.g. "spoilme_push=debug"); overrides `RUST_LOG`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            include_span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Verbose local debugging.
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            include_location: true,
            include_span_events: true,
            ..Default::default()
        }
    }

    /// Structured output for deployed jobs.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    /// Preset for a command-line run: `debug()` when verbose, `production()`
    /// for JSON output, plain defaults otherwise. `format` always wins.
    pub fn for_cli(verbose: bool, format: LogFormat) -> Self {
        let base = match (verbose, format) {
            (true, _) => Self::debug(),
            (false, LogFormat::Json) => Self::production(),
            (false, _) => Self::default(),
        };
        base.with_format(format)
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Filter directives this config resolves to, given the `RUST_LOG` value.
    fn directives(&self, rust_log: Option<&str>) -> String {
        let base = self
            .filter
            .as_deref()
            .or(rust_log)
            .filter(|d| !d.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.level.to_string().to_lowercase());
        format!("{base},{QUIET_DEPENDENCIES}")
    }

    fn env_filter(&self) -> EnvFilter {
        let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        EnvFilter::try_new(self.directives(rust_log.as_deref()))
            .unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let span_events = if self.include_span_events {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        match self.format {
            LogFormat::Pretty => Box::new(
                fmt::layer()
                    .with_file(self.include_location)
                    .with_line_number(self.include_location)
                    .with_span_events(span_events),
            ),
            LogFormat::Compact => Box::new(fmt::layer().compact().with_span_events(span_events)),
            LogFormat::Json => Box::new(fmt::layer().json().with_span_events(span_events)),
        }
    }
}

/// Install the global subscriber. A second call is ignored.
pub fn init_logging(config: LogConfig) {
    let result = tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(config.env_filter())
        .try_init();

    if let Err(e) = result {
        tracing::debug!(error = %e, "Logging already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_presets() {
        let config = LogConfig::for_cli(false, LogFormat::Compact);
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Compact);
        assert!(!config.include_location);

        let config = LogConfig::for_cli(false, LogFormat::Json);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, Level::INFO);

        let config = LogConfig::for_cli(true, LogFormat::Json);
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.include_span_events);
    }

    #[test]
    fn test_directives_precedence() {
        let config = LogConfig::default();
        assert_eq!(
            config.directives(None),
            format!("info,{QUIET_DEPENDENCIES}")
        );
        assert_eq!(
            config.directives(Some("spoilme_sw=trace")),
            format!("spoilme_sw=trace,{QUIET_DEPENDENCIES}")
        );

        let config = config.with_filter("spoilme_push=debug");
        assert_eq!(
            config.directives(Some("spoilme_sw=trace")),
            format!("spoilme_push=debug,{QUIET_DEPENDENCIES}")
        );
        assert!(EnvFilter::try_new(config.directives(None)).is_ok());
    }

    #[test]
    fn test_blank_rust_log_falls_back_to_level() {
        let config = LogConfig::debug();
        assert_eq!(
            config.directives(Some("  ")),
            format!("debug,{QUIET_DEPENDENCIES}")
        );
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
