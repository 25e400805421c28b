pub mod config;
pub mod manager;

pub use config::{
    AuthConfig, Config, ConfigError, ConfigResult, LogLevel, LoggingConfig, PrincipalSettings,
    ServerConfig, VerifierSettings,
};
pub use manager::ConfigManager;

use std::path::PathBuf;

/// 获取 Huddle 配置目录路径
pub fn huddle_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".huddle"))
}

/// 获取默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    huddle_dir().map(|dir| dir.join("config.json"))
}

/// 展开路径中的 ~ 为用户主目录
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}
