//! 结构化日志模块
//!
//! 提供基于 tracing 的结构化日志功能。

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::MakeWriter,
    layer::{Layered, SubscriberExt},
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::{Config, LoggingConfig};
use crate::error::{ObservabilityError, Result};

/// 日志级别重新加载句柄类型
type ReloadHandle = Handle<EnvFilter, Registry>;

/// 过滤层之上的订阅者类型
type Filtered = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

/// 输出层
type BoxedLayer = Box<dyn Layer<Filtered> + Send + Sync + 'static>;

/// 日志管理器
#[derive(Debug)]
pub struct LogManager {
    /// 配置
    config: LoggingConfig,

    /// 过滤器重新加载句柄
    reload_handle: ReloadHandle,

    /// 文件输出的后台写入守卫，drop 时刷新缓冲
    _file_guard: Option<WorkerGuard>,
}

impl LogManager {
    /// 创建并安装全局日志订阅者
    ///
    /// 进程内只能安装一次，重复调用返回 `ObservabilityError::Init`。
    pub fn new(config: &Config) -> Result<Self> {
        let logging = config.logging.clone();

        let filter = build_filter(&logging)?;
        let (filter, reload_handle) = reload::Layer::new(filter);

        let mut layers: Vec<BoxedLayer> = vec![fmt_layer(
            &logging,
            std::io::stdout,
            logging.ansi_colors,
        )];

        let file_guard = match logging.file_path.as_deref() {
            Some(path) => {
                let (writer, guard) = file_writer(path, &config.app_name)?;
                layers.push(fmt_layer(&logging, writer, false));
                Some(guard)
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(layers)
            .try_init()
            .map_err(|e| ObservabilityError::init(format!("Failed to install subscriber: {}", e)))?;

        tracing::info!(
            target: "huddle_observability",
            "Log manager initialized with level: {}",
            logging.level
        );

        Ok(Self {
            config: logging,
            reload_handle,
            _file_guard: file_guard,
        })
    }

    /// 动态更新日志级别
    pub fn update_level(&mut self, level: &str) -> Result<()> {
        let mut next = self.config.clone();
        next.level = level.to_string();
        let new_filter = build_filter(&next)?;

        self.reload_handle
            .modify(|filter| {
                *filter = new_filter;
            })
            .map_err(|e| ObservabilityError::logging(format!("Failed to update log level: {}", e)))?;

        self.config = next;

        tracing::info!(
            target: "huddle_observability",
            "Log level updated to: {}",
            level
        );

        Ok(())
    }

    /// 获取当前配置
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }
}

/// 构建环境过滤器
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| ObservabilityError::logging(format!("Invalid log level: {}", e)))?;

    for (module, level) in &config.module_levels {
        filter = filter.add_directive(
            format!("{}={}", module, level)
                .parse()
                .map_err(|e| ObservabilityError::logging(format!("Invalid directive: {}", e)))?,
        );
    }

    Ok(filter)
}

fn fmt_layer<W>(config: &LoggingConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_id)
        .with_ansi(ansi);

    if config.json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

fn file_writer(
    path: &Path,
    app_name: &str,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.log", app_name));

    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// 创建带有连接上下文的 span
pub fn connection_span(connection_id: &str, user_id: &str) -> tracing::Span {
    tracing::info_span!(
        "connection",
        connection_id = %connection_id,
        user_id = %user_id,
    )
}

/// 创建带有会话上下文的 span
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!(
        "session",
        session_id = %session_id,
    )
}
