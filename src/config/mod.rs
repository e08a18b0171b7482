/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和配置验证
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Webview 主配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebviewConfig {
    /// 启用开发者工具
    pub debug: bool,

    /// 原生库配置
    pub library: LibraryConfig,

    /// 线程配置
    pub threading: ThreadingConfig,

    /// 互操作配置
    pub interop: InteropConfig,

    /// 日志配置
    pub logging: LoggingConfig,
}

impl WebviewConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("WEBVIEW_DEBUG") {
            self.debug = parse_flag(&val).unwrap_or(self.debug);
        }
        if let Ok(val) = env::var("WEBVIEW_LIBRARY_PATH") {
            if !val.is_empty() {
                self.library.path = Some(PathBuf::from(val));
            }
        }
        if let Ok(val) = env::var("WEBVIEW_IGNORE_NOT_MAIN_THREAD") {
            self.threading.ignore_not_main_thread =
                parse_flag(&val).unwrap_or(self.threading.ignore_not_main_thread);
        }
        if let Ok(val) = env::var("WEBVIEW_INCLUDE_ERROR_TRACE") {
            self.interop.include_error_trace =
                parse_flag(&val).unwrap_or(self.interop.include_error_trace);
        }
        if let Ok(val) = env::var("WEBVIEW_LOG_LEVEL") {
            if let Ok(level) = val.parse() {
                self.logging.level = level;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.library.validate()
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./webview.toml
    /// 2. ./webview.json
    /// 3. ~/.config/webview_bridge/config.toml
    /// 4. 使用默认配置
    ///
    /// 环境变量覆盖总是最后应用。
    pub fn load_or_default() -> Self {
        let mut config = Self::discover();
        config.apply_env_overrides();
        config
    }

    fn discover() -> Self {
        if let Ok(config) = Self::from_toml_file("webview.toml") {
            tracing::debug!(target: "webview::config", "Loaded config from webview.toml");
            return config;
        }

        if let Ok(config) = Self::from_json_file("webview.json") {
            tracing::debug!(target: "webview::config", "Loaded config from webview.json");
            return config;
        }

        if let Some(home) = env::var_os("HOME") {
            let config_path = PathBuf::from(home)
                .join(".config")
                .join("webview_bridge")
                .join("config.toml");

            if let Ok(config) = Self::from_toml_file(&config_path) {
                tracing::debug!(target: "webview::config", path = ?config_path, "Loaded config");
                return config;
            }
        }

        tracing::debug!(target: "webview::config", "Using default configuration");
        Self::default()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// 原生库配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// 显式库路径；为空时按平台文件名在加载器搜索路径中查找
    pub path: Option<PathBuf>,
}

impl LibraryConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        match &self.path {
            Some(path) if path.as_os_str().is_empty() => Err(ConfigError::ValidationError(
                "library.path must not be empty".to_string(),
            )),
            Some(path) if path.is_dir() => Err(ConfigError::ValidationError(format!(
                "library.path {:?} is a directory",
                path
            ))),
            _ => Ok(()),
        }
    }
}

/// 线程配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadingConfig {
    /// 不在主线程创建时不再发出警告
    pub ignore_not_main_thread: bool,
}

/// 互操作配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteropConfig {
    /// 错误响应中包含回溯信息
    pub include_error_trace: bool,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（`RUST_LOG` 优先）
    pub level: LogLevel,

    /// 输出日志目标
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_target: true,
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    /// `EnvFilter` directive for this level.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_directive())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(ConfigError::ParseError(format!(
                "unknown log level: {}",
                other
            ))),
        }
    }
}
