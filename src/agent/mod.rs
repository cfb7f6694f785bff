//! 回复编排
//!
//! [`Orchestrator`] 按 provider 链依次尝试：首个 provider 可以发起一轮工具调用，
//! 限流或失败时切到下一个，全部不可用时由 [`LocalFallback`] 给出兜底回复。

pub use config::OrchestratorConfig;
pub use fallback::{APOLOGIES, LocalFallback, OFFLINE_TAG};
pub use orchestrator::Orchestrator;

mod config;
mod fallback;
mod orchestrator;

/// 被回复的那条消息
#[derive(Debug, Clone, PartialEq)]
pub struct RepliedMessage {
    pub message_id: String,
    pub author_id: String,
    pub author_name: String,
    pub text: String,
}

/// 聊天界面送来的一条消息
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub attachments: Vec<String>,
    pub replied_to: Option<RepliedMessage>,
}

impl InboundMessage {
    pub fn new(user_id: &str, user_name: &str, text: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            text: text.to_string(),
            attachments: Vec::new(),
            replied_to: None,
        }
    }

    pub fn with_attachment(mut self, url: &str) -> Self {
        self.attachments.push(url.to_string());
        self
    }

    pub fn replying_to(mut self, replied: RepliedMessage) -> Self {
        self.replied_to = Some(replied);
        self
    }
}

/// 回复来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplySource {
    Primary,
    /// 链中靠后的 provider，附带其标签
    Secondary(String),
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub source: ReplySource,
}

impl Reply {
    pub fn is_fallback(&self) -> bool {
        self.source == ReplySource::Fallback
    }
}
