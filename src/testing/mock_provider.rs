//! Mock provider，用于在不发起真实 HTTP 请求的情况下测试编排器的降级路径。
//!
//! # 示例
//!
//! ```rust
//! use brain_bot::testing::MockProvider;
//! use brain_bot::llm::{Provider, ProviderCallResult};
//! use brain_bot::llm::types::Message;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mock = MockProvider::new("primary")
//!     .with_rate_limit("60")
//!     .with_success("第二次响应");
//!
//! let r1 = mock.send(&[Message::user("hi".to_string())], None).await;
//! assert_eq!(r1, ProviderCallResult::RateLimited("60".to_string()));
//! assert_eq!(mock.call_count(), 1);
//! # }
//! ```

use crate::llm::types::{Message, ToolDefinition};
use crate::llm::{Provider, ProviderCallResult, RequestedToolCall};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// 单次调用的记录
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub conversation: Vec<Message>,
    /// 本次调用是否附带了工具目录
    pub offered_tools: bool,
}

/// 可脚本化的 Mock Provider。
///
/// 按顺序返回预设结果；队列耗尽后返回最后一个预设结果（若从未预设则返回 `Failed`），
/// 方便表达 "总是限流" 这类场景。
#[derive(Clone)]
pub struct MockProvider {
    label: String,
    supports_tools: bool,
    responses: Arc<Mutex<VecDeque<ProviderCallResult>>>,
    last: Arc<Mutex<Option<ProviderCallResult>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockProvider {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            supports_tools: true,
            responses: Arc::new(Mutex::new(VecDeque::new())),
            last: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn without_tools(mut self) -> Self {
        self.supports_tools = false;
        self
    }

    pub fn with_result(self, result: ProviderCallResult) -> Self {
        self.responses.lock().unwrap().push_back(result);
        self
    }

    pub fn with_success(self, text: impl Into<String>) -> Self {
        self.with_result(ProviderCallResult::Success(text.into()))
    }

    pub fn with_rate_limit(self, retry_after: impl Into<String>) -> Self {
        self.with_result(ProviderCallResult::RateLimited(retry_after.into()))
    }

    pub fn with_failure(self, detail: impl Into<String>) -> Self {
        self.with_result(ProviderCallResult::Failed(detail.into()))
    }

    pub fn with_tool_call(
        self,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        self.with_result(ProviderCallResult::FunctionCallRequested(vec![
            RequestedToolCall::new(call_id, tool_name, arguments.to_string()),
        ]))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> Option<RecordedCall> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn label(&self) -> &str {
        &self.label
    }

    fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    async fn send(
        &self,
        conversation: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> ProviderCallResult {
        self.calls.lock().unwrap().push(RecordedCall {
            conversation: conversation.to_vec(),
            offered_tools: tools.is_some_and(|t| !t.is_empty()),
        });

        let next = self.responses.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last
                .clone()
                .unwrap_or_else(|| ProviderCallResult::Failed("mock exhausted".to_string())),
        }
    }
}
