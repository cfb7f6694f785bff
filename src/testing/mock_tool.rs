//! Mock 工具，用于在不依赖外部服务的情况下测试编排器的工具调用行为。
//!
//! # 示例
//!
//! ```rust
//! use brain_bot::testing::MockTool;
//! use brain_bot::tools::Tool;
//! use std::collections::HashMap;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let tool = MockTool::new("lookup").with_response(r#"{"hit":true}"#);
//!
//! let result = tool.execute(HashMap::new()).await.unwrap();
//! assert!(result.success);
//! assert_eq!(tool.call_count(), 1);
//! # }
//! ```

use crate::error::Result;
use crate::tools::{Tool, ToolParameters, ToolResult};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum MockToolResponse {
    Success(String),
    Failure(String),
}

/// 可脚本化的 Mock Tool。
///
/// 按顺序返回预设的执行结果；队列耗尽后返回默认成功响应 `"mock response"`。
pub struct MockTool {
    name: String,
    description: String,
    parameters: Value,
    delay: Option<Duration>,
    responses: Arc<Mutex<VecDeque<MockToolResponse>>>,
    /// 每次调用时收到的参数，按顺序记录
    calls: Arc<Mutex<Vec<ToolParameters>>>,
}

impl MockTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "A mock tool for testing".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            delay: None,
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// 每次执行前等待，用于测试超时
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    /// 追加一条成功响应文本
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(MockToolResponse::Success(text.into()));
        self
    }

    /// 追加一条失败响应
    pub fn with_failure(self, msg: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(MockToolResponse::Failure(msg.into()));
        self
    }

    /// 工具注册进 `ToolManager` 后仍可观察调用记录
    pub fn calls_handle(&self) -> Arc<Mutex<Vec<ToolParameters>>> {
        self.calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_args(&self) -> Option<ToolParameters> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, params: ToolParameters) -> Result<ToolResult> {
        self.calls.lock().unwrap().push(params);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.lock().unwrap().pop_front();
        match response {
            Some(MockToolResponse::Success(text)) => Ok(ToolResult::success(text)),
            Some(MockToolResponse::Failure(msg)) => Ok(ToolResult::error(msg)),
            None => Ok(ToolResult::success("mock response".to_string())),
        }
    }
}
