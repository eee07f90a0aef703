//! 日志初始化
//!
//! 基于 `tracing-subscriber`，配置既可以用代码构建，也可以从环境变量
//! 或 [`Environment`] 的 `logging.*` 属性读取：
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "json"
//! levels = ["sprig_tx=debug", "sprig_aop=warn"]
//! ```

use std::collections::BTreeMap;
use std::str::FromStr;

use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Environment;

const LEVEL_NAMES: [(&str, LogLevel); 7] = [
    ("trace", LogLevel::Trace),
    ("debug", LogLevel::Debug),
    ("info", LogLevel::Info),
    ("warn", LogLevel::Warn),
    ("warning", LogLevel::Warn),
    ("error", LogLevel::Error),
    ("off", LogLevel::Off),
];

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to initialize logging: {0}")]
    InitFailed(String),

    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Invalid logging property '{key}': {value}")]
    InvalidProperty { key: String, value: String },
}

/// 日志级别，`Off` 关闭对应目标的输出
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        LEVEL_NAMES
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, level)| *level)
            .ok_or_else(|| format!("Invalid log level: {}", s))
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Json,
    /// 多行输出，适合本地开发
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ("compact", LogFormat::Compact),
            ("full", LogFormat::Full),
            ("json", LogFormat::Json),
            ("pretty", LogFormat::Pretty),
        ]
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(s.trim()))
        .map(|(_, format)| format)
        .ok_or_else(|| format!("Invalid log format: {}", s))
    }
}

/// 日志配置
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// 根级别
    pub level: LogLevel,
    pub format: LogFormat,
    pub show_timestamp: bool,
    pub show_target: bool,
    pub show_thread: bool,
    /// 按目标覆盖根级别，例如 `sprig_tx -> debug`
    pub levels: BTreeMap<String, LogLevel>,
    /// 完整的 `EnvFilter` 指令，设置后忽略 `level` 与 `levels`
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            show_timestamp: true,
            show_target: false,
            show_thread: false,
            levels: BTreeMap::new(),
            filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn show_timestamp(mut self, show: bool) -> Self {
        self.show_timestamp = show;
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn show_thread(mut self, show: bool) -> Self {
        self.show_thread = show;
        self
    }

    pub fn target_level(mut self, target: impl Into<String>, level: LogLevel) -> Self {
        self.levels.insert(target.into(), level);
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// 读取 `RUST_LOG`、`LOG_LEVEL` 与 `LOG_FORMAT`，无法解析的值被忽略
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.filter = std::env::var("RUST_LOG").ok().filter(|v| !v.trim().is_empty());
        if let Some(level) = std::env::var("LOG_LEVEL").ok().and_then(|v| v.parse().ok()) {
            config.level = level;
        }
        if let Some(format) = std::env::var("LOG_FORMAT").ok().and_then(|v| v.parse().ok()) {
            config.format = format;
        }
        config
    }

    /// 读取 `logging.*` 属性，与 `from_env` 不同，非法值会报错
    pub fn from_environment(environment: &Environment) -> Result<Self, LoggingError> {
        let invalid = |key: &str, value: &str| LoggingError::InvalidProperty {
            key: key.to_string(),
            value: value.to_string(),
        };
        let mut config = Self::default();

        if let Some(level) = environment.get_string("logging.level") {
            config.level = level.parse().map_err(|_| invalid("logging.level", &level))?;
        }
        if let Some(format) = environment.get_string("logging.format") {
            config.format = format.parse().map_err(|_| invalid("logging.format", &format))?;
        }
        config.show_timestamp = environment.get_bool_or("logging.show-timestamp", config.show_timestamp);
        config.show_target = environment.get_bool_or("logging.show-target", config.show_target);
        config.show_thread = environment.get_bool_or("logging.show-thread", config.show_thread);
        config.filter = environment.get_string("logging.filter");

        for entry in environment.get_string_array("logging.levels").unwrap_or_default() {
            let (target, level) = entry
                .split_once('=')
                .ok_or_else(|| invalid("logging.levels", &entry))?;
            let level = level.parse().map_err(|_| invalid("logging.levels", &entry))?;
            config.levels.insert(target.trim().to_string(), level);
        }
        Ok(config)
    }

    /// 由根级别与目标级别拼出过滤指令
    pub fn directives(&self) -> String {
        match &self.filter {
            Some(filter) => filter.clone(),
            None => std::iter::once(self.level.to_string())
                .chain(self.levels.iter().map(|(target, level)| format!("{}={}", target, level)))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        let directives = self.directives();
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from(self.level).into())
            .parse(&directives)
            .map_err(|e| LoggingError::InvalidFilter {
                filter: directives,
                message: e.to_string(),
            })
    }

    /// 安装全局 subscriber，只能成功一次
    pub fn init(self) -> Result<(), LoggingError> {
        let builder = fmt()
            .with_env_filter(self.env_filter()?)
            .with_target(self.show_target)
            .with_thread_ids(self.show_thread)
            .with_thread_names(self.show_thread);

        macro_rules! install {
            ($builder:expr, $timestamp:expr) => {
                if $timestamp {
                    $builder.try_init()
                } else {
                    $builder.without_time().try_init()
                }
            };
        }

        let result = match self.format {
            LogFormat::Compact => install!(builder.compact(), self.show_timestamp),
            LogFormat::Full => install!(builder, self.show_timestamp),
            LogFormat::Json => install!(builder.json(), self.show_timestamp),
            LogFormat::Pretty => install!(builder.pretty(), self.show_timestamp),
        };
        result.map_err(|e| LoggingError::InitFailed(e.to_string()))?;

        tracing::debug!("Logging initialized with filter '{}'", self.directives());
        Ok(())
    }
}
