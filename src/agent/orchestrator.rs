use super::config::OrchestratorConfig;
use super::fallback::{LocalFallback, OFFLINE_TAG};
use super::{InboundMessage, Reply, ReplySource};
use crate::llm::types::{Message, ToolDefinition};
use crate::llm::{Provider, ProviderCallResult, RequestedToolCall};
use crate::memory::MemoryStore;
use crate::tools::ToolManager;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

/// 被回复消息在记录中的占位回复
const REPLIED_PLACEHOLDER: &str = "[Message was replied to]";

/// 仍带有这些标记的文本不写入记忆
const UNRECORDABLE_MARKERS: &[&str] = &["Rate limit reached", "API error"];

pub struct Orchestrator {
    config: OrchestratorConfig,
    system_prompt: RwLock<String>,
    providers: Vec<Arc<dyn Provider>>,
    tools: Arc<ToolManager>,
    memory: Arc<MemoryStore>,
    permits: Arc<Semaphore>,
    fallback: LocalFallback,
}

impl Orchestrator {
    /// `providers` 按优先级排列，第一个为主 provider
    pub fn new(
        config: OrchestratorConfig,
        providers: Vec<Arc<dyn Provider>>,
        tools: Arc<ToolManager>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_calls));
        let system_prompt = RwLock::new(config.system_prompt.clone());
        Self {
            config,
            system_prompt,
            providers,
            tools,
            memory,
            permits,
            fallback: LocalFallback,
        }
    }

    pub fn provider_labels(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.label()).collect()
    }

    pub async fn set_system_prompt(&self, prompt: &str) {
        *self.system_prompt.write().await = prompt.to_string();
        info!("System prompt updated");
    }

    pub async fn system_prompt(&self) -> String {
        self.system_prompt.read().await.clone()
    }

    /// 停止接受新的上游调用；进行中的调用不受影响
    pub fn close(&self) {
        self.permits.close();
    }

    /// 生成回复，并在回复可信时写入记忆
    pub async fn respond(&self, inbound: &InboundMessage) -> Reply {
        if let Some(replied) = &inbound.replied_to {
            self.memory
                .record_exchange(
                    &replied.author_id,
                    &replied.author_name,
                    &replied.text,
                    REPLIED_PLACEHOLDER,
                    Some(&replied.message_id),
                )
                .await;
        }

        let conversation = vec![
            Message::system(self.build_system_prompt(&inbound.user_id).await),
            Message::user(build_user_turn(inbound)),
        ];
        let reply = self.run_chain(conversation, &inbound.text).await;

        if self.is_recordable(&reply) {
            let replied_id = inbound.replied_to.as_ref().map(|r| r.message_id.as_str());
            self.memory
                .record_exchange(
                    &inbound.user_id,
                    &inbound.user_name,
                    &inbound.text,
                    &reply.text,
                    replied_id,
                )
                .await;
            self.memory
                .update_profile(&inbound.user_id, &inbound.user_name, &inbound.text)
                .await;
        } else {
            debug!(user = %inbound.user_id, source = ?reply.source, "Reply not recorded");
        }
        reply
    }

    /// 兜底回复、仍带错误标记的文本，以及（按配置）备用 provider 的回复都不写入记忆
    pub fn is_recordable(&self, reply: &Reply) -> bool {
        match reply.source {
            ReplySource::Fallback => return false,
            ReplySource::Secondary(_) if !self.config.record_secondary_replies => return false,
            _ => {}
        }
        !UNRECORDABLE_MARKERS
            .iter()
            .any(|marker| reply.text.contains(marker))
    }

    async fn build_system_prompt(&self, user_id: &str) -> String {
        let mut prompt = self.system_prompt.read().await.clone();
        let digest = self.memory.user_context(user_id).await;
        if !digest.is_empty() {
            prompt.push_str("\nUser context: ");
            prompt.push_str(&digest);
        }
        let history = self
            .memory
            .user_history(user_id, self.config.context_history_lines)
            .await;
        if !history.is_empty() {
            prompt.push_str("\nRecent chat: ");
            prompt.push_str(&history);
        }
        prompt
    }

    async fn run_chain(&self, conversation: Vec<Message>, raw_text: &str) -> Reply {
        let catalogue = self.tools.get_tool_definitions();

        for (idx, provider) in self.providers.iter().enumerate() {
            let is_primary = idx == 0;
            let offered = (is_primary && provider.supports_tools() && !catalogue.is_empty())
                .then_some(catalogue.as_slice());

            let mut result = self.call(provider.as_ref(), &conversation, offered).await;
            if let ProviderCallResult::FunctionCallRequested(calls) = result {
                result = match offered {
                    Some(tools) => {
                        self.resolve_tools(provider.as_ref(), conversation.clone(), calls, tools)
                            .await
                    }
                    None => ProviderCallResult::Failed(
                        "tool call requested without a tool catalogue".to_string(),
                    ),
                };
            }

            match result {
                ProviderCallResult::Success(text) if is_primary => {
                    return Reply {
                        text,
                        source: ReplySource::Primary,
                    };
                }
                ProviderCallResult::Success(text) => {
                    info!(provider = %provider.label(), "Answered by fallback provider");
                    return Reply {
                        text: format!("🤖 [{}] {}", provider.label(), text),
                        source: ReplySource::Secondary(provider.label().to_string()),
                    };
                }
                ProviderCallResult::RateLimited(hint) => {
                    warn!(provider = %provider.label(), retry_after = %hint, "Provider rate limited, failing over");
                }
                ProviderCallResult::Failed(detail) => {
                    warn!(provider = %provider.label(), error = %detail, "Provider failed, failing over");
                }
                ProviderCallResult::FunctionCallRequested(_) => {
                    warn!(provider = %provider.label(), "Provider requested a second tool round, failing over");
                }
            }
        }

        warn!("All providers unavailable, using local fallback");
        Reply {
            text: format!("{OFFLINE_TAG}{}", self.fallback.respond(raw_text)),
            source: ReplySource::Fallback,
        }
    }

    /// 执行一轮工具调用，再向同一 provider 发起恰好一次后续请求
    async fn resolve_tools(
        &self,
        provider: &dyn Provider,
        mut conversation: Vec<Message>,
        calls: Vec<RequestedToolCall>,
        tools: &[ToolDefinition],
    ) -> ProviderCallResult {
        let mut resolved = Vec::new();
        let mut outputs = Vec::new();
        for call in calls {
            if let Some(output) = self.tools.invoke(&call.tool_name, &call.arguments).await {
                outputs.push(Message::tool_result(
                    call.call_id.clone(),
                    call.tool_name.clone(),
                    output,
                ));
                resolved.push(call.to_tool_call());
            }
        }
        if !resolved.is_empty() {
            conversation.push(Message::assistant_with_tools(resolved));
            conversation.extend(outputs);
        }

        match self.call(provider, &conversation, Some(tools)).await {
            ProviderCallResult::FunctionCallRequested(_) => {
                ProviderCallResult::Failed("only one tool round is supported".to_string())
            }
            other => other,
        }
    }

    async fn call(
        &self,
        provider: &dyn Provider,
        conversation: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> ProviderCallResult {
        let Ok(_permit) = self.permits.acquire().await else {
            return ProviderCallResult::Failed("worker pool is shut down".to_string());
        };
        debug!(provider = %provider.label(), messages = conversation.len(), "Calling provider");
        match tokio::time::timeout(
            self.config.request_timeout,
            provider.send(conversation, tools),
        )
        .await
        {
            Ok(result) => {
                debug!(provider = %provider.label(), result = %result, "Provider returned");
                result
            }
            Err(_) => ProviderCallResult::Failed(format!(
                "request timed out after {}s",
                self.config.request_timeout.as_secs()
            )),
        }
    }
}

fn build_user_turn(inbound: &InboundMessage) -> String {
    let mut turn = String::new();
    if let Some(replied) = &inbound.replied_to {
        turn.push_str(&format!(
            "[Replying to {}: {}] ",
            replied.author_name, replied.text
        ));
    }
    turn.push_str(&inbound.text);
    if !inbound.attachments.is_empty() {
        turn.push_str(&format!("\n[Attachments: {}]", inbound.attachments.join(", ")));
    }
    turn
}
