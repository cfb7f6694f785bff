pub mod agent;
pub mod config;
pub mod console;
pub mod error;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod service;
pub mod testing;
pub mod tools;

pub mod prelude {
    pub use crate::agent::{InboundMessage, Orchestrator, OrchestratorConfig, RepliedMessage, Reply, ReplySource};
    pub use crate::config::BotConfig;
    pub use crate::error::{BotError, Result};
    pub use crate::llm::{Provider, ProviderCallResult};
    pub use crate::memory::MemoryStore;
    pub use crate::service::BotService;
    pub use crate::tools::{Tool, ToolManager, ToolParameters, ToolResult};
}
