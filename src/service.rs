//! 服务对象
//!
//! [`BotService`] 显式持有所有组件，初始化顺序固定：
//!
//! ```text
//! 配置 → 日志 → 记忆存储（加载）→ 工具注册表 → provider → 编排器 → 服务 → start()
//! ```
//!
//! `start()` 拉起三个周期任务（落盘、磁盘检查、名字缓存刷新）；`shutdown()` 是唯一的
//! 关闭路径：落盘 → 取消周期任务 → 等待任务退出 → 关闭上游调用许可。

use crate::agent::{InboundMessage, Orchestrator, OrchestratorConfig, Reply};
use crate::config::BotConfig;
use crate::error::Result;
use crate::llm::config::ProviderConfig;
use crate::llm::{OpenAiCompatProvider, Provider};
use crate::memory::{DiskMonitor, MemoryStats, MemoryStore, UserProfile};
use crate::tools::{ToolExecutionConfig, ToolManager};
use reqwest::Client;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// user id → 最近已知的显示名
#[derive(Default)]
pub struct NameCache {
    names: RwLock<HashMap<String, String>>,
}

impl NameCache {
    pub async fn get(&self, user_id: &str) -> Option<String> {
        self.names.read().await.get(user_id).cloned()
    }

    pub async fn insert(&self, user_id: &str, name: &str) {
        self.names
            .write()
            .await
            .insert(user_id.to_string(), name.to_string());
    }

    /// 整体替换，返回缓存条数
    pub async fn replace(&self, entries: Vec<(String, String)>) -> usize {
        let mut names = self.names.write().await;
        *names = entries.into_iter().collect();
        names.len()
    }
}

pub struct BotService {
    config: BotConfig,
    memory: Arc<MemoryStore>,
    orchestrator: Arc<Orchestrator>,
    monitor: Arc<DiskMonitor>,
    names: Arc<NameCache>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    shut_down: AtomicBool,
}

impl BotService {
    /// 按配置构建全部组件（日志需在此之前初始化）
    pub async fn from_config(config: BotConfig) -> Result<Self> {
        let memory = Arc::new(MemoryStore::open(config.memory.clone()).await);

        let tools = Arc::new(ToolManager::with_builtin_tools(ToolExecutionConfig {
            timeout_ms: config.runtime.tool_timeout().as_millis() as u64,
        }));

        let client = Arc::new(
            Client::builder()
                .timeout(config.runtime.request_timeout())
                .build()?,
        );
        let providers: Vec<Arc<dyn Provider>> = [
            config.providers.primary.clone(),
            config.providers.secondary.clone(),
        ]
        .into_iter()
        .map(|p: ProviderConfig| {
            Arc::new(OpenAiCompatProvider::new(
                client.clone(),
                p,
                config.runtime.request_timeout(),
            )) as Arc<dyn Provider>
        })
        .collect();

        let orchestrator = Arc::new(Orchestrator::new(
            OrchestratorConfig::from_runtime(&config.runtime),
            providers,
            tools,
            memory.clone(),
        ));
        let monitor = Arc::new(DiskMonitor::for_directory(
            config.monitor.clone(),
            memory.clone(),
        ));

        Ok(Self::new(config, memory, orchestrator, monitor))
    }

    /// 由现成组件组装（测试中注入 mock provider / 固定磁盘读数）
    pub fn new(
        config: BotConfig,
        memory: Arc<MemoryStore>,
        orchestrator: Arc<Orchestrator>,
        monitor: Arc<DiskMonitor>,
    ) -> Self {
        Self {
            config,
            memory,
            orchestrator,
            monitor,
            names: Arc::new(NameCache::default()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// 拉起周期任务
    pub fn start(&self) {
        let runtime = &self.config.runtime;

        let memory = self.memory.clone();
        self.spawn_periodic(
            "flush",
            Duration::from_secs(runtime.flush_interval_secs),
            false,
            move || {
                let memory = memory.clone();
                async move { memory.flush().await }
            },
        );

        let memory = self.memory.clone();
        let names = self.names.clone();
        self.spawn_periodic(
            "name-cache",
            Duration::from_secs(runtime.cache_refresh_interval_secs),
            true,
            move || {
                let memory = memory.clone();
                let names = names.clone();
                async move {
                    let count = names.replace(memory.known_names().await).await;
                    info!(users = count, "Updated username cache");
                }
            },
        );

        self.tracker
            .spawn(self.monitor.clone().run(self.cancel.child_token()));

        info!(
            providers = ?self.orchestrator.provider_labels(),
            "🚀 Bot service started"
        );
    }

    fn spawn_periodic<F, Fut>(&self, name: &'static str, period: Duration, immediate: bool, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(Duration::from_secs(1));
        let cancel = self.cancel.child_token();
        self.tracker.spawn(async move {
            let start = if immediate {
                Instant::now()
            } else {
                Instant::now() + period
            };
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => job().await,
                }
            }
            debug!(task = name, "Periodic task stopped");
        });
    }

    /// 唯一的关闭路径，可重复调用
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down, flushing memory");
        self.memory.flush().await;
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.orchestrator.close();
        info!("👋 Shutdown complete");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// 处理一条入站消息，返回按长度切分后的回复；空白消息不回复
    pub async fn handle(&self, inbound: InboundMessage) -> Vec<String> {
        if inbound.text.trim().is_empty() {
            debug!(user = %inbound.user_id, "Ignoring blank message");
            return Vec::new();
        }
        self.names.insert(&inbound.user_id, &inbound.user_name).await;
        let reply = self.respond(&inbound).await;
        split_chunks(&reply.text, self.config.runtime.max_message_chars)
    }

    /// 不切分的完整回复（带来源）
    pub async fn respond(&self, inbound: &InboundMessage) -> Reply {
        let reply = self.orchestrator.respond(inbound).await;
        if reply.is_fallback() {
            warn!(user = %inbound.user_id, "Replied with local fallback");
        }
        reply
    }

    pub async fn stats(&self) -> MemoryStats {
        self.memory.stats().await
    }

    pub async fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.memory.profile(user_id).await
    }

    /// 删除用户画像并立即落盘
    pub async fn forget_user(&self, user_id: &str) -> bool {
        let existed = self.memory.forget_user(user_id).await;
        if existed {
            self.memory.flush().await;
            info!(user = %user_id, "Forgot user");
        }
        existed
    }

    pub async fn thread(&self, message_id: &str, limit: usize) -> Vec<String> {
        self.memory.thread(message_id, limit).await
    }

    pub async fn recent(&self, limit: usize) -> String {
        self.memory.recent_context(limit).await
    }

    pub async fn display_name(&self, user_id: &str) -> Option<String> {
        self.names.get(user_id).await
    }

    pub async fn set_system_prompt(&self, prompt: &str) {
        self.orchestrator.set_system_prompt(prompt).await;
    }
}

/// 按字符数切分；非空输入至少产生一段
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{APOLOGIES, OFFLINE_TAG};
    use crate::config::{MemoryConfig, MonitorConfig};
    use crate::testing::{MockProvider, StaticFootprint};
    use tempfile::TempDir;

    fn service(dir: &TempDir, primary: MockProvider, secondary: MockProvider) -> BotService {
        let mut config = BotConfig::default();
        config.memory = MemoryConfig {
            data_dir: dir.path().to_path_buf(),
            ..MemoryConfig::default()
        };
        config.monitor = MonitorConfig {
            watch_dir: dir.path().to_path_buf(),
            log_dir: dir.path().join("logs"),
            ..MonitorConfig::default()
        };
        config.runtime.max_message_chars = 10;

        let memory = Arc::new(MemoryStore::new(config.memory.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            OrchestratorConfig::from_runtime(&config.runtime),
            vec![Arc::new(primary) as Arc<dyn Provider>, Arc::new(secondary)],
            Arc::new(ToolManager::with_builtin_tools(ToolExecutionConfig::default())),
            memory.clone(),
        ));
        let monitor = Arc::new(DiskMonitor::new(
            config.monitor.clone(),
            Arc::new(StaticFootprint(1.0)),
            memory.clone(),
        ));
        BotService::new(config, memory, orchestrator, monitor)
    }

    #[test]
    fn test_split_chunks_exact_boundaries() {
        let text = "a".repeat(4500);
        let chunks = split_chunks(&text, 2000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 2000);
        assert_eq!(chunks[2].len(), 500);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_chunks_counts_chars() {
        let chunks = split_chunks("ééééé", 2);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
        assert_eq!(split_chunks("", 10), vec![String::new()]);
    }

    #[tokio::test]
    async fn test_failover_reply_is_tagged() {
        let dir = TempDir::new().unwrap();
        let svc = service(
            &dir,
            MockProvider::new("OpenAI").with_rate_limit("unknown"),
            MockProvider::new("Grok-3").with_success("X"),
        );
        let chunks = svc.handle(InboundMessage::new("1", "alice", "hi")).await;
        let text = chunks.concat();
        assert!(text.contains("X"));
        assert!(text.starts_with("🤖 [Grok-3]"));
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[tokio::test]
    async fn test_double_failure_apology_without_memory_writes() {
        let dir = TempDir::new().unwrap();
        let svc = service(
            &dir,
            MockProvider::new("OpenAI").with_failure("down"),
            MockProvider::new("Grok-3").with_failure("down"),
        );
        let text = svc
            .handle(InboundMessage::new("1", "alice", "zzz"))
            .await
            .concat();
        let apology = text.strip_prefix(OFFLINE_TAG).unwrap();
        assert!(APOLOGIES.contains(&apology));
        let stats = svc.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.users, 0);
    }

    #[tokio::test]
    async fn test_blank_message_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let primary = MockProvider::new("OpenAI").with_success("never");
        let svc = service(&dir, primary.clone(), MockProvider::new("Grok-3"));
        assert!(svc.handle(InboundMessage::new("1", "a", "   \n")).await.is_empty());
        assert_eq!(primary.call_count(), 0);
    }

    #[tokio::test]
    async fn test_display_name_tracks_latest_message() {
        let dir = TempDir::new().unwrap();
        let svc = service(
            &dir,
            MockProvider::new("OpenAI").with_success("ok"),
            MockProvider::new("Grok-3"),
        );
        svc.handle(InboundMessage::new("1", "alice", "hi")).await;
        assert_eq!(svc.display_name("1").await.as_deref(), Some("alice"));
        assert_eq!(svc.display_name("2").await, None);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let svc = service(
            &dir,
            MockProvider::new("OpenAI").with_success("ok"),
            MockProvider::new("Grok-3"),
        );
        svc.start();
        svc.handle(InboundMessage::new("1", "alice", "hi")).await;

        svc.shutdown().await;
        assert!(svc.is_shut_down());
        assert!(svc.memory().transcript_path().exists());
        assert!(svc.memory().profiles_path().exists());
        svc.shutdown().await;

        let after = svc.handle(InboundMessage::new("1", "alice", "hello")).await;
        assert_eq!(after, vec![format!("{OFFLINE_TAG}Hello! 👋")]);
    }

    #[tokio::test]
    async fn test_forget_user_persists() {
        let dir = TempDir::new().unwrap();
        let svc = service(
            &dir,
            MockProvider::new("OpenAI").with_success("ok"),
            MockProvider::new("Grok-3"),
        );
        svc.handle(InboundMessage::new("1", "alice", "hi")).await;
        assert!(svc.profile("1").await.is_some());
        assert!(svc.forget_user("1").await);

        let raw = std::fs::read_to_string(svc.memory().profiles_path()).unwrap();
        assert!(!raw.contains("alice"));
    }
}
