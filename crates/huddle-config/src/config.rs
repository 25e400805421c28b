use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 主配置结构体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// 获取配置值的快捷方法
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["version"] => Some(self.version.clone()),
            ["server", "host"] => Some(self.server.host.clone()),
            ["server", "port"] => Some(self.server.port.to_string()),
            ["server", "ws_path"] => Some(self.server.ws_path.clone()),
            ["server", "max_connections"] => Some(self.server.max_connections.to_string()),
            ["server", "outbound_buffer"] => Some(self.server.outbound_buffer.to_string()),
            ["server", "allow_query_token"] => Some(self.server.allow_query_token.to_string()),
            ["server", "expose_room_stats"] => Some(self.server.expose_room_stats.to_string()),
            ["auth", "verifier"] => Some(self.auth.verifier.kind().to_string()),
            ["logging", "level"] => Some(self.logging.level.as_str().to_string()),
            ["logging", "json_format"] => Some(self.logging.json_format.to_string()),
            ["logging", "file"] => self.logging.file.clone(),
            _ => None,
        }
    }

    /// 设置配置值
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["server", "host"] => {
                self.server.host = value.to_string();
            }
            ["server", "port"] => {
                self.server.port = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid port number: {}", value))
                })?;
            }
            ["server", "ws_path"] => {
                self.server.ws_path = value.to_string();
            }
            ["server", "max_connections"] => {
                self.server.max_connections = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid number: {}", value))
                })?;
            }
            ["server", "outbound_buffer"] => {
                self.server.outbound_buffer = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid number: {}", value))
                })?;
            }
            ["server", "allow_query_token"] => {
                self.server.allow_query_token = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid boolean: {}", value))
                })?;
            }
            ["server", "expose_room_stats"] => {
                self.server.expose_room_stats = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid boolean: {}", value))
                })?;
            }
            ["logging", "level"] => {
                self.logging.level = value.parse()?;
            }
            ["logging", "json_format"] => {
                self.logging.json_format = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid boolean: {}", value))
                })?;
            }
            ["logging", "file"] => {
                self.logging.file = Some(value.to_string());
            }
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }
}

/// 信令服务监听配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// WebSocket 升级路径
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// 最大并发连接数
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// 每个连接的出站消息缓冲区大小
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// 是否允许通过 `?token=` 查询参数传递凭证
    #[serde(default)]
    pub allow_query_token: bool,
    /// 是否开放 `/rooms` 诊断接口
    #[serde(default = "default_true")]
    pub expose_room_stats: bool,
}

fn default_ws_path() -> String {
    "/signaling".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            ws_path: default_ws_path(),
            max_connections: default_max_connections(),
            outbound_buffer: default_outbound_buffer(),
            allow_query_token: false,
            expose_room_stats: true,
        }
    }
}

/// 认证配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AuthConfig {
    #[serde(flatten)]
    pub verifier: VerifierSettings,
}

/// Token 校验方式
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "verifier", rename_all = "snake_case")]
pub enum VerifierSettings {
    /// Fixed token table, for development and tests
    Static {
        tokens: HashMap<String, PrincipalSettings>,
    },
    /// Delegate to the identity service over HTTP
    Http {
        url: String,
        #[serde(default = "default_verify_timeout")]
        timeout_seconds: u64,
    },
}

fn default_verify_timeout() -> u64 {
    5
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self::Static {
            tokens: HashMap::new(),
        }
    }
}

impl VerifierSettings {
    /// Short name used by `get_value` and startup logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Static { .. } => "static",
            Self::Http { .. } => "http",
        }
    }
}

/// 静态 token 对应的身份
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalSettings {
    pub user_id: String,
    pub role: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    #[serde(default)]
    pub json_format: bool,
    /// 日志文件路径，按天滚动
    #[serde(default)]
    pub file: Option<String>,
    /// 模块级别覆盖，例如 `{"huddle_gateway": "debug"}`
    #[serde(default)]
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            file: None,
            module_levels: HashMap::new(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
