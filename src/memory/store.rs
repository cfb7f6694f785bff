//! 有界记忆存储
//!
//! 同时持有滚动对话记录和用户画像表，两者各自独立持久化：
//!
//! - 对话记录：UTF-8 文本文件，一行一条（`brain_chat_memory.txt`）
//! - 用户画像：JSON 对象，user id → 画像（`user_personalities.json`）
//!
//! 每次 `flush` 都整体重写文件（先写临时文件再 rename）。任何一侧读写失败只记日志，
//! 不影响另一侧，也不会向调用方返回错误。
//!
//! ```rust,no_run
//! use brain_bot::config::MemoryConfig;
//! use brain_bot::memory::MemoryStore;
//!
//! # async fn example() {
//! let store = MemoryStore::open(MemoryConfig::default()).await;
//! store.record_exchange("42", "alice", "hello", "hi there", None).await;
//! store.update_profile("42", "alice", "hello").await;
//! println!("{}", store.user_context("42").await);
//! store.flush().await;
//! # }
//! ```

use super::profile::{ProfileTable, UserProfile};
use super::transcript::{Transcript, TranscriptEntry};
use super::{CompactionReport, Compactor, MemoryStats};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub struct MemoryStore {
    config: MemoryConfig,
    transcript: RwLock<Transcript>,
    profiles: RwLock<ProfileTable>,
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl MemoryStore {
    /// 创建空存储（不读盘）
    pub fn new(config: MemoryConfig) -> Self {
        let transcript = Transcript::new(config.max_entries);
        Self {
            config,
            transcript: RwLock::new(transcript),
            profiles: RwLock::new(ProfileTable::default()),
        }
    }

    /// 创建并立即从磁盘加载
    pub async fn open(config: MemoryConfig) -> Self {
        let store = Self::new(config);
        store.load().await;
        store
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.transcript_file)
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.profiles_file)
    }

    // ── 持久化 ──────────────────────────────────────────────────────────────

    /// 从磁盘加载两个集合；文件缺失或损坏时该集合从空开始
    pub async fn load(&self) {
        let transcript = match tokio::fs::read_to_string(self.transcript_path()).await {
            Ok(raw) => Transcript::from_lines(raw.lines(), self.config.max_entries),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.transcript_path().display(), "No transcript on disk, starting empty");
                Transcript::new(self.config.max_entries)
            }
            Err(e) => {
                error!(path = %self.transcript_path().display(), error = %e, "Failed to read transcript, starting empty");
                Transcript::new(self.config.max_entries)
            }
        };

        let mut profiles = match tokio::fs::read_to_string(self.profiles_path()).await {
            Ok(raw) => serde_json::from_str::<ProfileTable>(&raw).unwrap_or_else(|e| {
                error!(path = %self.profiles_path().display(), error = %e, "Profile file is corrupt, starting empty");
                ProfileTable::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.profiles_path().display(), "No profile table on disk, starting empty");
                ProfileTable::default()
            }
            Err(e) => {
                error!(path = %self.profiles_path().display(), error = %e, "Failed to read profiles, starting empty");
                ProfileTable::default()
            }
        };
        let evicted = profiles.enforce_cap(self.config.max_profiles);
        if evicted > 0 {
            info!(evicted, "Profile table over cap at load, evicted stalest");
        }

        info!(
            entries = transcript.len(),
            users = profiles.len(),
            "🧠 Memory loaded"
        );
        *self.transcript.write().await = transcript;
        *self.profiles.write().await = profiles;
    }

    /// 把两个集合整体写回磁盘
    pub async fn flush(&self) {
        let transcript_body = {
            let transcript = self.transcript.read().await;
            let mut body = String::new();
            for line in transcript.iter() {
                body.push_str(line);
                body.push('\n');
            }
            body
        };
        if let Err(e) = write_atomic(&self.transcript_path(), transcript_body.as_bytes()).await {
            error!(error = %e, "Failed to persist transcript");
        }

        let profiles_body = {
            let profiles = self.profiles.read().await;
            serde_json::to_string_pretty(&*profiles)
        };
        match profiles_body {
            Ok(body) => {
                if let Err(e) = write_atomic(&self.profiles_path(), body.as_bytes()).await {
                    error!(error = %e, "Failed to persist profiles");
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize profiles"),
        }
        debug!(dir = %self.config.data_dir.display(), "💾 Memory flushed");
    }

    // ── 写入 ────────────────────────────────────────────────────────────────

    /// 追加一次交互，超出条数上限时淘汰最旧的记录
    pub async fn record_exchange(
        &self,
        user_id: &str,
        user_name: &str,
        message: &str,
        response: &str,
        replied_to: Option<&str>,
    ) {
        let line = TranscriptEntry {
            timestamp: now(),
            author_id: user_id,
            author_name: user_name,
            message,
            response,
            replied_to,
        }
        .render(self.config.max_message_chars, self.config.max_entry_chars);
        self.transcript.write().await.push(line);
    }

    /// 更新（必要时创建）用户画像
    pub async fn update_profile(&self, user_id: &str, user_name: &str, message: &str) {
        let evicted = self.profiles.write().await.observe(
            user_id,
            user_name,
            message,
            now(),
            self.config.max_profiles,
        );
        if let Some(id) = evicted {
            info!(evicted = %id, "Profile table full, evicted least recently active user");
        }
    }

    /// 删除一个用户的画像，返回是否存在
    pub async fn forget_user(&self, user_id: &str) -> bool {
        self.profiles.write().await.remove(user_id).is_some()
    }

    // ── 读取 ────────────────────────────────────────────────────────────────

    /// 用户画像摘要；没有画像时为空串
    pub async fn user_context(&self, user_id: &str) -> String {
        self.profiles
            .read()
            .await
            .get(user_id)
            .map(UserProfile::digest)
            .unwrap_or_default()
    }

    /// 最近 `limit` 条记录，换行分隔，最新的在最后
    pub async fn recent_context(&self, limit: usize) -> String {
        self.transcript.read().await.recent(limit).join("\n")
    }

    /// 该用户最近的记录（只扫描最近 `user_history_window` 行）
    pub async fn user_history(&self, user_id: &str, limit: usize) -> String {
        self.transcript
            .read()
            .await
            .user_history(user_id, self.config.user_history_window, limit)
            .join("\n")
    }

    /// 提到某条消息 id 的记录（只扫描最近 `thread_window` 行）
    pub async fn thread(&self, message_id: &str, limit: usize) -> Vec<String> {
        self.transcript
            .read()
            .await
            .thread(message_id, self.config.thread_window, limit)
            .into_iter()
            .map(String::from)
            .collect()
    }

    pub async fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles.read().await.get(user_id).cloned()
    }

    /// (user id, 显示名) 列表
    pub async fn known_names(&self) -> Vec<(String, String)> {
        self.profiles
            .read()
            .await
            .iter()
            .map(|(id, p)| (id.clone(), p.username.clone()))
            .collect()
    }

    pub async fn stats(&self) -> MemoryStats {
        let entries = self.transcript.read().await.len();
        let profiles = self.profiles.read().await;
        MemoryStats {
            users: profiles.len(),
            entries,
            most_active: profiles.most_active(),
        }
    }

    // ── 压缩 ────────────────────────────────────────────────────────────────

    /// 记录减半，删除不活跃或时间戳损坏的画像
    pub async fn compact(&self) -> CompactionReport {
        let (entries_before, entries_after) = {
            let mut transcript = self.transcript.write().await;
            let before = transcript.len();
            transcript.halve();
            (before, transcript.len())
        };
        let removed = self
            .profiles
            .write()
            .await
            .prune_inactive(now(), self.config.inactivity_days);
        if !removed.is_empty() {
            info!(count = removed.len(), "Cleaned up inactive users");
        }
        CompactionReport {
            entries_before,
            entries_after,
            profiles_removed: removed.len(),
        }
    }
}

#[async_trait]
impl Compactor for MemoryStore {
    async fn compact(&self) -> CompactionReport {
        MemoryStore::compact(self).await
    }
}

/// 先写同目录下的临时文件，再 rename 覆盖目标
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| MemoryError::IoError(format!("创建目录失败: {e}")))?;
    }
    let mut swap = path.as_os_str().to_owned();
    swap.push(".swap");
    let swap = PathBuf::from(swap);

    tokio::fs::write(&swap, contents)
        .await
        .map_err(|e| MemoryError::IoError(format!("写入 {} 失败: {e}", swap.display())))?;
    if let Err(e) = tokio::fs::rename(&swap, path).await {
        warn!(path = %path.display(), error = %e, "rename failed, removing swap file");
        let _ = tokio::fs::remove_file(&swap).await;
        return Err(MemoryError::IoError(format!("替换 {} 失败: {e}", path.display())).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> MemoryConfig {
        MemoryConfig {
            data_dir: dir.path().to_path_buf(),
            ..MemoryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_transcript_never_exceeds_cap_and_is_fifo() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(MemoryConfig {
            max_entries: 5,
            ..config_in(&dir)
        });
        for i in 0..12 {
            store
                .record_exchange("1", "alice", &format!("msg-{i}"), "ok", None)
                .await;
            assert!(store.stats().await.entries <= 5);
        }
        let recent = store.recent_context(10).await;
        let lines: Vec<&str> = recent.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("msg-7"));
        assert!(lines[4].contains("msg-11"));
    }

    #[tokio::test]
    async fn test_entries_respect_length_caps() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(config_in(&dir));
        let long = "y".repeat(1000);
        store.record_exchange("1", "alice", &long, &long, Some("99")).await;
        let line = store.recent_context(1).await;
        assert!(line.chars().count() <= 500);
        assert!(!line.contains(&"y".repeat(201)));
    }

    #[tokio::test]
    async fn test_update_profile_n_times() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(config_in(&dir));
        for _ in 0..7 {
            store.update_profile("7", "bob", "hello").await;
        }
        let profile = store.profile("7").await.unwrap();
        assert_eq!(profile.message_count, 7);
        assert_eq!(store.stats().await.users, 1);
    }

    #[tokio::test]
    async fn test_user_context_empty_without_profile() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(config_in(&dir));
        assert_eq!(store.user_context("nobody").await, "");
        assert_eq!(store.recent_context(5).await, "");
    }

    #[tokio::test]
    async fn test_flush_then_load_reproduces_state() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(config_in(&dir));
        store.record_exchange("1", "alice", "hello\nthere", "hi", None).await;
        store.record_exchange("2", "bob", "game time", "sure", Some("555")).await;
        store.update_profile("1", "alice", "hello").await;
        store.update_profile("2", "bob", "game time").await;
        store.flush().await;

        let reloaded = MemoryStore::open(config_in(&dir)).await;
        assert_eq!(
            reloaded.recent_context(10).await,
            store.recent_context(10).await
        );
        assert_eq!(reloaded.profile("1").await, store.profile("1").await);
        assert_eq!(reloaded.profile("2").await, store.profile("2").await);
        assert_eq!(reloaded.thread("555", 5).await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_applies_lowered_caps() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(config_in(&dir));
        for i in 0..10 {
            store.record_exchange("1", "a", &format!("m{i}"), "r", None).await;
            store.update_profile(&format!("u{i}"), "x", "hi").await;
        }
        store.flush().await;

        let smaller = MemoryStore::open(MemoryConfig {
            max_entries: 4,
            max_profiles: 3,
            ..config_in(&dir)
        })
        .await;
        let stats = smaller.stats().await;
        assert_eq!(stats.entries, 4);
        assert_eq!(stats.users, 3);
        assert!(smaller.recent_context(1).await.contains("m9"));
    }

    #[tokio::test]
    async fn test_corrupt_profiles_do_not_block_transcript() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        std::fs::write(dir.path().join(&config.profiles_file), "{not json").unwrap();
        std::fs::write(
            dir.path().join(&config.transcript_file),
            "[2024-05-07 10:00:00] a (1): x | Bot: y\n\n",
        )
        .unwrap();

        let store = MemoryStore::open(config).await;
        let stats = store.stats().await;
        assert_eq!(stats.users, 0);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_missing_files_start_empty() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::open(MemoryConfig {
            data_dir: dir.path().join("not-yet-created"),
            ..MemoryConfig::default()
        })
        .await;
        assert_eq!(store.stats().await.entries, 0);
        store.record_exchange("1", "a", "b", "c", None).await;
        store.flush().await;
        assert!(store.transcript_path().exists());
    }

    #[tokio::test]
    async fn test_compact_halves_and_prunes_exactly_stale() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(config_in(&dir));
        for i in 0..9 {
            store.record_exchange("1", "a", &format!("m{i}"), "r", None).await;
        }
        store.update_profile("fresh", "f", "hi").await;
        store.update_profile("stale", "s", "hi").await;
        store.update_profile("broken", "b", "hi").await;
        {
            let mut profiles = store.profiles.write().await;
            profiles.get_mut("stale").unwrap().last_interaction =
                crate::memory::profile::format_timestamp(now() - Duration::days(45));
            profiles.get_mut("broken").unwrap().last_interaction = "??".to_string();
        }

        let report = store.compact().await;
        assert_eq!(report.entries_before, 9);
        assert!(report.entries_after <= 9 / 2);
        assert_eq!(report.profiles_removed, 2);
        assert!(store.profile("fresh").await.is_some());
        assert!(store.profile("stale").await.is_none());
    }

    #[tokio::test]
    async fn test_forget_user_and_known_names() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(config_in(&dir));
        store.update_profile("1", "alice", "x").await;
        store.update_profile("2", "bob", "x").await;
        store.update_profile("2", "bob", "x").await;

        let stats = store.stats().await;
        assert_eq!(stats.most_active, Some(("bob".to_string(), 2)));

        assert!(store.forget_user("1").await);
        assert!(!store.forget_user("1").await);
        assert_eq!(
            store.known_names().await,
            vec![("2".to_string(), "bob".to_string())]
        );
    }

    #[tokio::test]
    async fn test_flush_leaves_no_swap_files() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(config_in(&dir));
        store.update_profile("1", "alice", "x").await;
        store.flush().await;
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".swap"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
