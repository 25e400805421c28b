//! Huddle Observability Infrastructure
//!
//! 提供统一的日志初始化、运行时日志级别调整与 span 辅助函数。

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::{ObservabilityError, Result};
pub use logging::LogManager;

#[cfg(feature = "huddle-config")]
pub use config::huddle_integration::from_huddle_config;

/// 便捷导入模块
pub mod prelude {
    //! 常用类型的便捷导入

    pub use crate::{Config, LogManager, Result};

    pub use crate::logging::{connection_span, session_span};
    pub use tracing::{debug, error, info, instrument, trace, warn, Span};
}
