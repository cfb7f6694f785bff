//! 测试基础设施
//!
//! 提供在不依赖真实 LLM / 外部服务的情况下测试各组件的工具集。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockProvider`] | 替代真实上游模型，脚本化返回 `ProviderCallResult`，用于测试降级与工具回合 |
//! | [`MockTool`] | 替代真实工具，用于测试工具调用 / 错误处理行为 |
//! | [`StaticFootprint`] | 固定磁盘占用读数，用于测试磁盘压力监控 |
//! | [`CountingCompactor`] | 只计数的压缩目标 |
//!
//! 所有 Mock 都完全在内存中运行，内部使用 `Arc<Mutex<_>>`，可在多任务测试中共享。

mod mock_provider;
mod mock_tool;

pub use mock_provider::{MockProvider, RecordedCall};
pub use mock_tool::MockTool;

use crate::memory::monitor::FootprintProbe;
use crate::memory::{CompactionReport, Compactor};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 永远报告固定占用（MB）的探针
pub struct StaticFootprint(pub f64);

impl FootprintProbe for StaticFootprint {
    fn footprint_mb(&self) -> f64 {
        self.0
    }
}

/// 记录 `compact()` 被调用次数的压缩目标
#[derive(Default)]
pub struct CountingCompactor {
    calls: AtomicUsize,
}

impl CountingCompactor {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Compactor for CountingCompactor {
    async fn compact(&self) -> CompactionReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        CompactionReport::default()
    }
}
