//! 记忆系统
//!
//! | 组件 | 实现 | 作用 |
//! |------|------|------|
//! | 对话记录 | [`transcript::Transcript`] | 有界滚动记录，为请求提供短期上下文 |
//! | 用户画像 | [`profile::ProfileTable`] | 每用户累积的统计、话题与性格特征 |
//! | 存储 | [`MemoryStore`] | 同时持有两者，负责加载 / 落盘 / 压缩 |
//! | 磁盘监控 | [`monitor::DiskMonitor`] | 定期测量占用，超阈值时触发压缩 |
//!
//! 压缩目标抽象为 [`Compactor`]，监控器只依赖这个接口。

pub mod monitor;
pub mod profile;
pub mod store;
pub mod transcript;

pub use monitor::{DirectoryFootprint, DiskMonitor, FootprintProbe, PressureLevel};
pub use profile::{ProfileTable, UserProfile};
pub use store::MemoryStore;
pub use transcript::{Transcript, TranscriptEntry};

use async_trait::async_trait;

/// 一次压缩的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub entries_before: usize,
    pub entries_after: usize,
    pub profiles_removed: usize,
}

/// 磁盘压力下可被压缩的对象
#[async_trait]
pub trait Compactor: Send + Sync {
    async fn compact(&self) -> CompactionReport;
}

/// 存储概况
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub users: usize,
    pub entries: usize,
    /// 消息数最多的用户（显示名, 消息数）
    pub most_active: Option<(String, u64)>,
}
