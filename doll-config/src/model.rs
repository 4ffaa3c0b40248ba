use http::{HeaderMap, Method, StatusCode};
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    net::Ipv4Addr,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use crate::target::RequestTarget;

/// Port used when neither the launch parameters nor the file provide a usable one.
pub const DEFAULT_PORT: u16 = 8000;

/// Target used for plain console messages, the `log` level of the configuration.
pub const CONSOLE_TARGET: &str = "doll::console";

/// Methods a rule may be restricted to. Matching is case-sensitive.
pub const HTTP_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "OPTIONS", "PUT", "PATCH", "DELETE", "TRACE", "CONNECT",
];

/// A fully compiled configuration. Instances are never mutated once built,
/// a reload produces a new one.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub port: u16,
    pub log: LogSettings,
    pub security: Security,
    pub rules: Vec<ResponseRule>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            log: Default::default(),
            security: Default::default(),
            rules: Vec::new(),
        }
    }
}

/// Who is allowed to talk to the server. A missing field disables that check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Security {
    pub username: Option<String>,
    pub password: Option<String>,
    pub allowed_ips: Option<BTreeSet<Ipv4Addr>>,
}

impl Security {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none() && self.allowed_ips.is_none()
    }
}

/// One configured request-to-response mapping.
#[derive(Debug, Clone)]
pub struct ResponseRule {
    /// Position in the source list, also used as the rule identity.
    pub index: usize,
    pub name: Option<String>,
    /// The path exactly as configured, query included.
    pub path: String,
    pub target: RequestTarget,
    /// `None` matches any method.
    pub method: Option<Method>,
    /// Explicit `params`, stringified.
    pub params: BTreeMap<String, String>,
    /// Query parameters embedded in `path` overlaid with `params`.
    pub required_params: BTreeMap<String, String>,
    pub body: ResponseBody,
    pub status: StatusCode,
    pub delay: Duration,
    pub headers: HeaderMap,
}

impl ResponseRule {
    /// Name used in diagnostics: the configured name, or the position.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.index.to_string(),
        }
    }
}

/// Where the body of a response comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Forward to another server. Not supported, the fallback is served instead.
    Proxy {
        target: String,
        fallback: Box<ResponseBody>,
    },
    /// File contents; the literal is used when the file can't be read.
    File {
        path: PathBuf,
        fallback: Option<String>,
    },
    Literal(String),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Trace,
    Error,
    Warn,
    Info,
    Log,
    None,
}

impl LogLevel {
    pub const ALL: [LogLevel; 7] = [
        LogLevel::Debug,
        LogLevel::Trace,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Log,
        LogLevel::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Log => "log",
            LogLevel::None => "none",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::ALL
            .iter()
            .find(|level| level.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown log level {:?}", s))
    }
}

/// The set of levels that reach the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLevels(BTreeSet<LogLevel>);

impl LogLevels {
    pub fn new(levels: impl IntoIterator<Item = LogLevel>) -> Self {
        Self(levels.into_iter().collect())
    }

    /// `none` anywhere in the set silences everything.
    pub fn allows(&self, level: LogLevel) -> bool {
        !self.0.contains(&LogLevel::None) && self.0.contains(&level)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLevel> {
        self.0.iter()
    }
}

impl Default for LogLevels {
    fn default() -> Self {
        Self::new([LogLevel::Log, LogLevel::Info, LogLevel::Warn, LogLevel::Error])
    }
}

impl fmt::Display for LogLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.0.iter().map(LogLevel::as_str).collect();
        f.write_str(&names.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub levels: LogLevels,
    pub time: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            levels: Default::default(),
            time: true,
        }
    }
}

#[test]
fn test_log_levels_none_silences() {
    let levels = LogLevels::new([LogLevel::Info, LogLevel::None]);
    assert!(!levels.allows(LogLevel::Info));
    assert!(!levels.allows(LogLevel::None));

    let defaults = LogLevels::default();
    assert!(defaults.allows(LogLevel::Log));
    assert!(defaults.allows(LogLevel::Error));
    assert!(!defaults.allows(LogLevel::Debug));
}

#[test]
fn test_log_level_from_str() {
    assert_eq!(Ok(LogLevel::Warn), "warn".parse::<LogLevel>());
    assert!("WARN".parse::<LogLevel>().is_err());
    assert!("bogus".parse::<LogLevel>().is_err());
}
