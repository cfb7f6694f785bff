//! 工具系统
//!
//! 定义 [`Tool`] trait 和 [`ToolManager`]（按名称注册、查找、带超时执行）。
//! 工具目录是固定的：启动时注册，运行期不增删。

pub mod flight;

use crate::error::{Result, ToolError};
use crate::llm::types::ToolDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// 工具执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// JSON 可序列化的输出文本，作为 tool 消息内容回传给模型
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
        }
    }
}

/// 工具执行配置
#[derive(Debug, Clone)]
pub struct ToolExecutionConfig {
    /// 单次工具执行超时（毫秒）。0 = 不限制。默认 60_000，需要调用外部命令的工具也够用
    pub timeout_ms: u64,
}

impl Default for ToolExecutionConfig {
    fn default() -> Self {
        Self { timeout_ms: 60_000 }
    }
}

pub type ToolParameters = HashMap<String, serde_json::Value>;

/// 工具接口，所有可被模型调用的本地函数均实现此 trait
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// 工具参数的 JSON Schema 定义
    fn parameters(&self) -> serde_json::Value;
    async fn execute(&self, parameters: ToolParameters) -> Result<ToolResult>;
}

pub struct ToolManager {
    tools: HashMap<String, Box<dyn Tool>>,
    config: ToolExecutionConfig,
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolManager {
    pub fn new() -> Self {
        Self::new_with_config(ToolExecutionConfig::default())
    }

    pub fn new_with_config(config: ToolExecutionConfig) -> Self {
        Self {
            tools: HashMap::new(),
            config,
        }
    }

    /// 内置工具目录
    pub fn with_builtin_tools(config: ToolExecutionConfig) -> Self {
        let mut manager = Self::new_with_config(config);
        manager.register(Box::new(flight::FlightInfoTool));
        manager
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn list_tools(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|name| name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn get_tool(&self, tool_name: &str) -> Option<&dyn Tool> {
        self.tools.get(tool_name).map(|tool| &**tool)
    }

    pub fn get_tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition::from_tool(&**tool))
            .collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    pub async fn execute_tool(
        &self,
        tool_name: &str,
        parameters: ToolParameters,
    ) -> Result<ToolResult> {
        let tool = self
            .get_tool(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;

        if self.config.timeout_ms == 0 {
            return tool.execute(parameters).await;
        }
        match tokio::time::timeout(
            Duration::from_millis(self.config.timeout_ms),
            tool.execute(parameters),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(ToolError::Timeout(tool_name.to_string()).into()),
        }
    }

    /// 解析模型给出的参数字符串并执行工具。
    ///
    /// 未注册的工具返回 `None`（调用方跳过该调用）；参数无法解析时按空参数执行，
    /// 由工具自行给出 "not found" 结果；执行错误转成 JSON 错误对象，不向上抛出。
    pub async fn invoke(&self, tool_name: &str, raw_arguments: &str) -> Option<String> {
        if self.get_tool(tool_name).is_none() {
            warn!(tool = %tool_name, "模型请求了未注册的工具，已跳过");
            return None;
        }

        let parameters: ToolParameters = match serde_json::from_str(raw_arguments) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => {
                warn!(tool = %tool_name, "工具参数无法解析，按空参数处理");
                ToolParameters::new()
            }
        };

        info!(tool = %tool_name, arguments = %raw_arguments, "🔧 调用工具");
        let output = match self.execute_tool(tool_name, parameters).await {
            Ok(result) if result.success => result.output,
            Ok(result) => serde_json::json!({
                "error": result.error.unwrap_or_else(|| "tool failed".to_string())
            })
            .to_string(),
            Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
        };
        info!(tool = %tool_name, output = %output, "工具返回");
        Some(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTool;

    #[tokio::test]
    async fn test_unknown_tool_is_skipped() {
        let manager = ToolManager::with_builtin_tools(ToolExecutionConfig::default());
        assert!(manager.invoke("bookHotel", "{}").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_tool_becomes_error_json() {
        let mut manager = ToolManager::new();
        let tool = MockTool::new("lookup").with_failure("backend down");
        manager.register(Box::new(tool));
        let output = manager.invoke("lookup", "{}").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["error"], "backend down");
    }

    #[tokio::test]
    async fn test_malformed_arguments_become_empty_parameters() {
        let mut manager = ToolManager::new();
        let tool = MockTool::new("lookup").with_response("{\"ok\":true}");
        let calls = tool.calls_handle();
        manager.register(Box::new(tool));
        let output = manager.invoke("lookup", "{not json").await.unwrap();
        assert_eq!(output, "{\"ok\":true}");
        assert!(calls.lock().unwrap()[0].is_empty());
    }

    #[tokio::test]
    async fn test_slow_tool_times_out() {
        let mut manager = ToolManager::new_with_config(ToolExecutionConfig { timeout_ms: 20 });
        manager.register(Box::new(MockTool::new("slow").with_delay_ms(500)));
        let err = manager
            .execute_tool("slow", ToolParameters::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_definitions_are_sorted() {
        let mut manager = ToolManager::with_builtin_tools(ToolExecutionConfig::default());
        manager.register(Box::new(MockTool::new("aardvark")));
        let names: Vec<String> = manager
            .get_tool_definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(names, vec!["aardvark", "getFlightInfo"]);
        assert_eq!(manager.list_tools(), vec!["aardvark", "getFlightInfo"]);
    }
}
