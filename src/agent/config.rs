//! 编排器配置

use crate::config::{DEFAULT_SYSTEM_PROMPT, RuntimeConfig};
use std::time::Duration;

/// 编排器运行时配置
///
/// 通过构建器链式调用设置各项参数，再传入 [`Orchestrator::new`](super::Orchestrator::new)。
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub(crate) system_prompt: String,
    /// 每次上游调用的超时
    pub(crate) request_timeout: Duration,
    /// 系统提示中附带的该用户最近记录行数
    pub(crate) context_history_lines: usize,
    /// 备用 provider 的回复是否写入记忆（默认 true）
    pub(crate) record_secondary_replies: bool,
    /// 同时进行的上游调用上限
    pub(crate) max_concurrent_calls: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl OrchestratorConfig {
    pub fn new(system_prompt: &str) -> Self {
        Self {
            system_prompt: system_prompt.to_string(),
            request_timeout: Duration::from_secs(30),
            context_history_lines: 2,
            record_secondary_replies: true,
            max_concurrent_calls: 10,
        }
    }

    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self::new(&runtime.system_prompt)
            .request_timeout(runtime.request_timeout())
            .context_history_lines(runtime.context_history_lines)
            .record_secondary_replies(runtime.record_secondary_replies)
            .max_concurrent_calls(runtime.worker_pool_size)
    }

    pub fn system_prompt(mut self, system_prompt: &str) -> Self {
        self.system_prompt = system_prompt.to_string();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn context_history_lines(mut self, lines: usize) -> Self {
        self.context_history_lines = lines;
        self
    }

    pub fn record_secondary_replies(mut self, enabled: bool) -> Self {
        self.record_secondary_replies = enabled;
        self
    }

    /// 至少为 1
    pub fn max_concurrent_calls(mut self, limit: usize) -> Self {
        self.max_concurrent_calls = limit.max(1);
        self
    }
}
