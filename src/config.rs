//! 进程级配置
//!
//! 从可选的 YAML 文件加载，所有字段都有默认值；provider 的端点与凭据再由环境变量覆盖
//! （见 [`crate::llm::config`]）。缺少凭据属于致命错误，进程拒绝启动。
//!
//! ```yaml
//! memory:
//!   data_dir: ./data
//!   max_entries: 200
//! monitor:
//!   high_mb: 500
//!   critical_mb: 1000
//! runtime:
//!   worker_pool_size: 10
//! ```

use crate::error::{ConfigError, Result};
use crate::llm::config::ProvidersConfig;
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 记忆存储的容量与扫描窗口
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub data_dir: PathBuf,
    pub transcript_file: String,
    pub profiles_file: String,
    /// 对话记录最多保留的条数，超出后最旧的先淘汰
    pub max_entries: usize,
    /// 用户画像最多保留的个数（0 = 不限制）
    pub max_profiles: usize,
    /// 单条用户消息 / 机器人回复的截断长度（字符）
    pub max_message_chars: usize,
    /// 整行记录的长度上限（字符，含截断标记）
    pub max_entry_chars: usize,
    /// 查询某用户历史时只扫描最近这么多行
    pub user_history_window: usize,
    /// 查询消息线索时只扫描最近这么多行
    pub thread_window: usize,
    /// 超过这么多天没有互动的画像在压缩时删除
    pub inactivity_days: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            transcript_file: "brain_chat_memory.txt".to_string(),
            profiles_file: "user_personalities.json".to_string(),
            max_entries: 200,
            max_profiles: 20,
            max_message_chars: 200,
            max_entry_chars: 500,
            user_history_window: 25,
            thread_window: 50,
            inactivity_days: 30,
        }
    }
}

/// 磁盘压力监控
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    /// 统计占用的目录
    pub watch_dir: PathBuf,
    pub high_mb: f64,
    pub critical_mb: f64,
    pub interval_secs: u64,
    /// 超过阈值时顺带清理临时文件和多余的轮转日志
    pub cleanup_stale_files: bool,
    pub log_dir: PathBuf,
    pub keep_logs: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("."),
            high_mb: 500.0,
            critical_mb: 1000.0,
            interval_secs: 6 * 60 * 60,
            cleanup_stale_files: true,
            log_dir: PathBuf::from("logs"),
            keep_logs: 3,
        }
    }
}

/// 调度、超时与回复相关的运行期参数
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    /// 阻塞线程池大小，同时也是并发上游调用的上限
    pub worker_pool_size: usize,
    pub request_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// 单条外发消息的最大字符数，超出后按固定边界切分
    pub max_message_chars: usize,
    pub flush_interval_secs: u64,
    pub cache_refresh_interval_secs: u64,
    /// 系统提示中附带的该用户最近记录行数
    pub context_history_lines: usize,
    /// 备用 provider 的回复是否写入记忆
    pub record_secondary_replies: bool,
    pub system_prompt: String,
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with memory. You can remember conversations and user personalities. \
Use this information to provide more personalized and contextual responses. \
Always respond in a friendly and helpful manner.";

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 10,
            request_timeout_secs: 30,
            tool_timeout_secs: 60,
            max_message_chars: 2000,
            flush_interval_secs: 30 * 60,
            cache_refresh_interval_secs: 60 * 60,
            context_history_lines: 2,
            record_secondary_replies: true,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BotConfig {
    pub providers: ProvidersConfig,
    pub memory: MemoryConfig,
    pub monitor: MonitorConfig,
    pub runtime: RuntimeConfig,
}

impl BotConfig {
    /// 加载配置：YAML（可选）→ `.env` → 进程环境变量 → 校验
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let file = std::fs::File::open(path)
                    .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
                serde_yaml::from_reader(file)?
            }
            None => Self::default(),
        };
        dotenv().ok();
        config.providers.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.runtime.worker_pool_size == 0 {
            return Err(invalid("runtime.worker_pool_size", "must be at least 1"));
        }
        if self.runtime.max_message_chars == 0 {
            return Err(invalid("runtime.max_message_chars", "must be positive"));
        }
        if self.memory.max_entry_chars <= 3 {
            return Err(invalid("memory.max_entry_chars", "must be greater than 3"));
        }
        if self.monitor.high_mb > self.monitor.critical_mb {
            return Err(invalid(
                "monitor.high_mb",
                "must not exceed monitor.critical_mb",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> crate::error::BotError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BotError;

    #[test]
    fn test_empty_yaml_is_all_defaults() {
        let config = BotConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.memory.max_entries, 200);
        assert_eq!(config.memory.user_history_window, 25);
        assert_eq!(config.memory.thread_window, 50);
        assert_eq!(config.monitor.high_mb, 500.0);
        assert_eq!(config.runtime.worker_pool_size, 10);
        assert_eq!(config.runtime.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.providers.secondary.label, "Grok-3");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let yaml = "memory:\n  max_entries: 50\nmonitor:\n  high_mb: 10\n  critical_mb: 20\n";
        let config = BotConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.memory.max_entries, 50);
        assert_eq!(config.memory.max_entry_chars, 500);
        assert_eq!(config.monitor.critical_mb, 20.0);
    }

    #[test]
    fn test_partial_secondary_section_keeps_secondary_defaults() {
        let config =
            BotConfig::from_yaml_str("providers:\n  secondary:\n    model: xai/grok-4\n").unwrap();
        let secondary = &config.providers.secondary;
        assert_eq!(secondary.model, "xai/grok-4");
        assert_eq!(secondary.label, "Grok-3");
        assert!(!secondary.send_tools);
        assert_eq!(secondary.top_p, Some(1.0));
        assert_eq!(config.providers.primary.label, "OpenAI");
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let yaml = "monitor:\n  high_mb: 900\n  critical_mb: 100\n";
        let err = BotConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, BotError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_missing_file_reported() {
        let err = BotConfig::load(Some(Path::new("/nonexistent/brain_bot.yaml"))).unwrap_err();
        assert!(matches!(err, BotError::Config(ConfigError::FileNotFound(_))));
    }
}
