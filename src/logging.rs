//! 日志初始化
//!
//! 两路输出：
//! - 文件：`<log_dir>/bot.<日期>.log`，按天轮转，保留最近 3 份，级别由 `RUST_LOG` 控制
//! - 终端（stderr）：只输出 WARN 及以上，避免淹没交互界面
//!
//! 返回的 [`WorkerGuard`] 必须存活到进程退出，否则缓冲中的日志会丢失。

use crate::error::{BotError, Result};
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const DEFAULT_FILTER: &str = "brain_bot=info,reqwest=warn,hyper=warn";
pub const LOG_FILE_PREFIX: &str = "bot";
pub const MAX_LOG_FILES: usize = 3;

/// 创建按天轮转的非阻塞文件 writer
pub fn rolling_writer(log_dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)?;
    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)
        .map_err(|e| BotError::Other(format!("无法创建日志文件: {e}")))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// 安装全局 subscriber
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    let (writer, guard) = rolling_writer(log_dir)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(filter),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(LevelFilter::WARN),
        )
        .try_init()
        .map_err(|e| BotError::Other(format!("日志初始化失败: {e}")))?;
    Ok(guard)
}
