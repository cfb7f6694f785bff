//! 上游模型调用接口
//!
//! 每个 provider 都是无状态的请求/响应函数：对话（可选附带工具目录）进，
//! [`ProviderCallResult`] 出。客户端内部不做重试，重试与降级策略全部在编排器中。

use crate::error::{BotError, LlmError};
use crate::llm::client::{post, truncate_diagnostic};
use crate::llm::config::ProviderConfig;
use crate::llm::types::{ChatCompletionRequest, Message, ToolCall, ToolDefinition};
use crate::llm::assemble_req_header;
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// 模型请求的一次工具调用
#[derive(Debug, Clone, PartialEq)]
pub struct RequestedToolCall {
    pub call_id: String,
    pub tool_name: String,
    /// 模型给出的原始 JSON 参数字符串（可能格式错误）
    pub arguments: String,
}

impl RequestedToolCall {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments: arguments.into(),
        }
    }

    /// 还原为 assistant 消息中携带的 `tool_calls` 元素
    pub fn to_tool_call(&self) -> ToolCall {
        ToolCall {
            id: self.call_id.clone(),
            call_type: "function".to_string(),
            function: crate::llm::types::FunctionCall {
                name: self.tool_name.clone(),
                arguments: self.arguments.clone(),
            },
        }
    }
}

/// 一次上游调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCallResult {
    /// 模型给出了最终文本
    Success(String),
    /// 模型以工具调用结束本轮
    FunctionCallRequested(Vec<RequestedToolCall>),
    /// 被限流；提示为等待秒数或 `"unknown"`
    RateLimited(String),
    /// 其他失败（状态码、网络、超时、格式），附带简短诊断
    Failed(String),
}

impl fmt::Display for ProviderCallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(text) => write!(f, "success ({} chars)", text.chars().count()),
            Self::FunctionCallRequested(calls) => {
                write!(f, "tool calls requested ({})", calls.len())
            }
            Self::RateLimited(hint) => write!(f, "rate limited (retry after {})", hint),
            Self::Failed(detail) => write!(f, "failed: {}", detail),
        }
    }
}

/// 所有上游模型的统一调用接口
#[async_trait]
pub trait Provider: Send + Sync {
    /// 展示名，用于日志和备用回复标签
    fn label(&self) -> &str;

    /// 是否接受工具目录
    fn supports_tools(&self) -> bool;

    async fn send(
        &self,
        conversation: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> ProviderCallResult;
}

/// OpenAI 兼容 `/chat/completions` 接口的 provider
///
/// 主备 provider 只在 [`ProviderConfig`] 上不同。
pub struct OpenAiCompatProvider {
    client: Arc<Client>,
    config: ProviderConfig,
    timeout: Duration,
}

impl OpenAiCompatProvider {
    pub fn new(client: Arc<Client>, config: ProviderConfig, timeout: Duration) -> Self {
        Self {
            client,
            config,
            timeout,
        }
    }

    fn build_request(
        &self,
        conversation: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> ChatCompletionRequest {
        let tools = tools
            .filter(|t| self.config.send_tools && !t.is_empty())
            .map(<[ToolDefinition]>::to_vec);
        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: conversation.to_vec(),
            tools,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn label(&self) -> &str {
        &self.config.label
    }

    fn supports_tools(&self) -> bool {
        self.config.send_tools
    }

    async fn send(
        &self,
        conversation: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> ProviderCallResult {
        let header_map = match assemble_req_header(&self.config) {
            Ok(h) => h,
            Err(e) => return ProviderCallResult::Failed(truncate_diagnostic(&e.to_string())),
        };
        let request = self.build_request(conversation, tools);
        let url = self.config.completions_url();

        let outcome = tokio::time::timeout(
            self.timeout,
            post(self.client.clone(), &request, header_map, &url),
        )
        .await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(BotError::Llm(LlmError::RateLimited { retry_after }))) => {
                warn!(provider = %self.config.label, retry_after = %retry_after, "⏳ 上游限流");
                return ProviderCallResult::RateLimited(retry_after);
            }
            Ok(Err(e)) => {
                error!(provider = %self.config.label, error = %e, "上游调用失败");
                return ProviderCallResult::Failed(truncate_diagnostic(&e.to_string()));
            }
            Err(_) => {
                let e = LlmError::Timeout(self.timeout.as_secs());
                error!(provider = %self.config.label, error = %e, "上游调用超时");
                return ProviderCallResult::Failed(e.to_string());
            }
        };

        let Some(choice) = response.choices.into_iter().next() else {
            return ProviderCallResult::Failed(LlmError::EmptyResponse.to_string());
        };

        let tool_calls = choice.message.tool_calls.unwrap_or_default();
        if choice.finish_reason.as_deref() == Some("tool_calls") && !tool_calls.is_empty() {
            let calls = tool_calls
                .into_iter()
                .filter(|c| c.call_type == "function")
                .map(|c| RequestedToolCall::new(c.id, c.function.name, c.function.arguments))
                .collect();
            return ProviderCallResult::FunctionCallRequested(calls);
        }

        match choice.message.content {
            Some(text) if !text.trim().is_empty() => ProviderCallResult::Success(text),
            _ => ProviderCallResult::Failed(LlmError::EmptyResponse.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(config: ProviderConfig) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(Arc::new(Client::new()), config, Duration::from_secs(30))
    }

    fn catalogue() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            tool_type: "function".to_string(),
            function: crate::llm::types::FunctionSpec {
                name: "getFlightInfo".to_string(),
                description: "flights".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            },
        }]
    }

    #[test]
    fn test_secondary_never_sends_tools() {
        let p = provider(ProviderConfig::secondary());
        let tools = catalogue();
        let req = p.build_request(&[Message::user("hi".to_string())], Some(&tools));
        assert!(req.tools.is_none());
        assert_eq!(req.model, "xai/grok-3");
        assert_eq!(req.top_p, Some(1.0));
    }

    #[test]
    fn test_primary_sends_tools_and_sampling() {
        let p = provider(ProviderConfig::primary());
        let tools = catalogue();
        let req = p.build_request(&[Message::user("hi".to_string())], Some(&tools));
        assert_eq!(req.tools.map(|t| t.len()), Some(1));
        assert_eq!(req.max_tokens, Some(1000));
        assert_eq!(req.temperature, Some(0.7));
    }

    #[test]
    fn test_requested_call_round_trips_to_tool_call() {
        let call = RequestedToolCall::new("call_1", "getFlightInfo", "{}");
        let tc = call.to_tool_call();
        assert_eq!(tc.id, "call_1");
        assert_eq!(tc.call_type, "function");
        assert_eq!(tc.function.name, "getFlightInfo");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_failed() {
        let mut config = ProviderConfig::primary();
        config.apikey = "test".to_string();
        config.baseurl = "http://127.0.0.1:9".to_string();
        let p = OpenAiCompatProvider::new(
            Arc::new(Client::new()),
            config,
            Duration::from_secs(5),
        );
        let result = p.send(&[Message::user("hi".to_string())], None).await;
        assert!(matches!(result, ProviderCallResult::Failed(_)));
    }
}
