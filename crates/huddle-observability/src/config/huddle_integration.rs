//! Huddle Config 集成模块
//!
//! 将 huddle-config 的日志配置转换为观测性配置。

use crate::config::{Config as ObservabilityConfig, LoggingConfig};

impl From<&huddle_config::LoggingConfig> for LoggingConfig {
    fn from(config: &huddle_config::LoggingConfig) -> Self {
        Self {
            level: config.level.as_str().to_string(),
            json_format: config.json_format,
            file_path: config
                .file
                .as_deref()
                .and_then(huddle_config::expand_tilde),
            module_levels: config.module_levels.clone(),
            ansi_colors: !config.json_format,
            ..Self::default()
        }
    }
}

/// 从 huddle-config 配置构建观测性配置
pub fn from_huddle_config(config: &huddle_config::Config) -> ObservabilityConfig {
    ObservabilityConfig {
        logging: LoggingConfig::from(&config.logging),
        ..ObservabilityConfig::default()
    }
}
