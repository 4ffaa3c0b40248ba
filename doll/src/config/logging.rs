use arc_swap::ArcSwap;
use clap::{ArgAction, ArgGroup, Parser};
use doll_config::prelude::{LogLevel, LogSettings, CONSOLE_TARGET};
use lazy_static::lazy_static;
use std::sync::Arc;
use tracing::{self, level_filters::LevelFilter, Level, Metadata};
use tracing_subscriber::{
    filter::filter_fn,
    fmt::{
        format::{Format, JsonFields, PrettyFields, Writer},
        time::{FormatTime, SystemTime},
    },
    layer::SubscriberExt,
    Layer, Registry,
};

lazy_static! {
    static ref IGNORED_MODULES: &'static [&'static str] = &[
        "want",
        "hyper",
        "mio",
        "tokio_threadpool",
        "tokio_reactor",
        "tower",
        "h2",
    ];

    /// Console settings of the live configuration, swapped on every reload.
    static ref CONSOLE_SETTINGS: ArcSwap<LogSettings> =
        ArcSwap::from_pointee(LogSettings::default());
}

#[derive(Parser, Debug)]
#[clap(group = ArgGroup::new("logging"))]
pub struct LoggingOpts {
    /// Cap output at debug, or at trace when repeated
    #[clap(short, long, action = ArgAction::Count, global(true), group = "logging")]
    pub debug: u8,

    /// Cap output at warnings
    #[clap(short, long, global(true), group = "logging")]
    pub warn: bool,

    /// Disable everything but error logging
    #[clap(short, long, global(true), group = "logging")]
    pub error: bool,
}

impl From<&LoggingOpts> for LevelFilter {
    fn from(opts: &LoggingOpts) -> Self {
        if opts.error {
            LevelFilter::ERROR
        } else if opts.warn {
            LevelFilter::WARN
        } else if opts.debug == 1 {
            LevelFilter::DEBUG
        } else {
            LevelFilter::TRACE
        }
    }
}

/// Makes the `log_level` and `log_time` of a configuration the ones in effect.
pub fn apply_log_settings(settings: &LogSettings) {
    CONSOLE_SETTINGS.store(Arc::new(settings.clone()));
}

fn console_level(level: &Level, target: &str) -> LogLevel {
    if target == CONSOLE_TARGET {
        return LogLevel::Log;
    }

    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warn,
        Level::INFO => LogLevel::Info,
        Level::DEBUG => LogLevel::Debug,
        Level::TRACE => LogLevel::Trace,
    }
}

fn console_enabled(metadata: &Metadata<'_>) -> bool {
    let ignored = metadata
        .module_path()
        .map(|x| IGNORED_MODULES.iter().any(|module| x.starts_with(module)))
        .unwrap_or(true);
    if ignored {
        return false;
    }

    metadata.is_span() || CONSOLE_SETTINGS
            .load()
            .levels
            .allows(console_level(metadata.level(), metadata.target()))
}

/// Wall-clock timestamps, unless the configuration turned them off.
#[derive(Debug, Clone, Copy, Default)]
struct ConsoleTime;

impl FormatTime for ConsoleTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        if CONSOLE_SETTINGS.load().time {
            SystemTime.format_time(w)
        } else {
            Ok(())
        }
    }
}

pub fn configure_logging(logging_opts: &LoggingOpts) -> Result<(), anyhow::Error> {
    let is_terminal = atty::is(atty::Stream::Stdout) && cfg!(debug_assertions);
    let pretty_logger = if is_terminal {
        Some(
            tracing_subscriber::fmt::layer()
                .event_format(Format::default().pretty().with_timer(ConsoleTime))
                .fmt_fields(PrettyFields::new())
                .with_filter(filter_fn(console_enabled)),
        )
    } else {
        None
    };

    let json_logger = if !is_terminal {
        Some(
            tracing_subscriber::fmt::layer()
                .event_format(
                    Format::default()
                        .json()
                        .flatten_event(true)
                        .with_timer(ConsoleTime),
                )
                .fmt_fields(JsonFields::new())
                .with_filter(filter_fn(console_enabled)),
        )
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(LevelFilter::from(logging_opts))
        .with(json_logger)
        .with(pretty_logger);

    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    Ok(())
}

#[test]
fn test_console_level_mapping() {
    assert_eq!(LogLevel::Log, console_level(&Level::INFO, CONSOLE_TARGET));
    assert_eq!(LogLevel::Info, console_level(&Level::INFO, "doll::server"));
    assert_eq!(LogLevel::Error, console_level(&Level::ERROR, "doll_config"));
    assert_eq!(LogLevel::Trace, console_level(&Level::TRACE, "doll_plugin"));
}

#[test]
fn test_level_filter_from_opts() {
    let opts = LoggingOpts {
        debug: 0,
        warn: false,
        error: false,
    };
    assert_eq!(LevelFilter::TRACE, LevelFilter::from(&opts));
    let opts = LoggingOpts {
        debug: 0,
        warn: true,
        error: false,
    };
    assert_eq!(LevelFilter::WARN, LevelFilter::from(&opts));
}
