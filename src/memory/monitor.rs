//! 磁盘压力监控
//!
//! 按固定周期独立于请求流量运行：遍历目录累加文件大小（单个文件出错跳过），
//! 超过 `high_mb` 记警告并压缩，超过 `critical_mb` 同样压缩。每个检查周期最多压缩一次。

use super::Compactor;
use crate::config::MonitorConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// 占用测量；阻塞实现，由监控器放到阻塞线程池里执行
pub trait FootprintProbe: Send + Sync {
    fn footprint_mb(&self) -> f64;
}

/// 递归统计目录下所有文件的大小
pub struct DirectoryFootprint {
    root: PathBuf,
}

impl DirectoryFootprint {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FootprintProbe for DirectoryFootprint {
    fn footprint_mb(&self) -> f64 {
        let bytes: u64 = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum();
        bytes as f64 / BYTES_PER_MB
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    Normal,
    High,
    Critical,
}

pub struct DiskMonitor {
    config: MonitorConfig,
    probe: Arc<dyn FootprintProbe>,
    compactor: Arc<dyn Compactor>,
}

impl DiskMonitor {
    pub fn new(
        config: MonitorConfig,
        probe: Arc<dyn FootprintProbe>,
        compactor: Arc<dyn Compactor>,
    ) -> Self {
        Self {
            config,
            probe,
            compactor,
        }
    }

    /// 以 `watch_dir` 为测量目录
    pub fn for_directory(config: MonitorConfig, compactor: Arc<dyn Compactor>) -> Self {
        let probe = Arc::new(DirectoryFootprint::new(config.watch_dir.clone()));
        Self::new(config, probe, compactor)
    }

    pub fn classify(&self, footprint_mb: f64) -> PressureLevel {
        if footprint_mb > self.config.critical_mb {
            PressureLevel::Critical
        } else if footprint_mb > self.config.high_mb {
            PressureLevel::High
        } else {
            PressureLevel::Normal
        }
    }

    async fn measure(&self) -> f64 {
        let probe = self.probe.clone();
        match tokio::task::spawn_blocking(move || probe.footprint_mb()).await {
            Ok(mb) => mb,
            Err(e) => {
                error!(error = %e, "Footprint measurement task failed");
                0.0
            }
        }
    }

    /// 执行一次检查周期
    pub async fn check(&self) -> PressureLevel {
        let footprint = self.measure().await;
        let level = self.classify(footprint);
        match level {
            PressureLevel::Normal => {
                debug!(footprint_mb = footprint, "Disk usage normal");
                return level;
            }
            PressureLevel::High => warn!(
                footprint_mb = footprint,
                threshold_mb = self.config.high_mb,
                "⚠️ High disk usage, compacting memory"
            ),
            PressureLevel::Critical => warn!(
                footprint_mb = footprint,
                threshold_mb = self.config.critical_mb,
                "🚨 Critical disk usage, compacting memory"
            ),
        }

        let report = self.compactor.compact().await;
        info!(
            entries_before = report.entries_before,
            entries_after = report.entries_after,
            profiles_removed = report.profiles_removed,
            "Memory compacted"
        );

        if self.config.cleanup_stale_files {
            let watch_dir = self.config.watch_dir.clone();
            let log_dir = self.config.log_dir.clone();
            let keep = self.config.keep_logs;
            match tokio::task::spawn_blocking(move || remove_stale_files(&watch_dir, &log_dir, keep))
                .await
            {
                Ok(removed) if removed > 0 => info!(removed, "Removed stale files"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Stale file cleanup task failed"),
            }
        }
        level
    }

    /// 周期运行直到 `cancel` 被触发；第一次检查立即执行
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Disk monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.check().await;
                }
            }
        }
    }
}

/// 删除 `watch_dir` 顶层的 `*.tmp` / `*.temp` 文件，以及 `log_dir` 下超出
/// 最新 `keep_logs` 份的 `bot.*` 轮转日志。返回删除数量。
pub fn remove_stale_files(watch_dir: &Path, log_dir: &Path, keep_logs: usize) -> usize {
    let mut removed = 0;

    for entry in WalkDir::new(watch_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        if (name.ends_with(".tmp") || name.ends_with(".temp"))
            && std::fs::remove_file(entry.path()).is_ok()
        {
            removed += 1;
        }
    }

    let mut logs: Vec<PathBuf> = WalkDir::new(log_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().starts_with("bot."))
        .map(|e| e.into_path())
        .collect();
    // 文件名带日期，字典序即时间序
    logs.sort();
    let excess = logs.len().saturating_sub(keep_logs);
    for path in logs.into_iter().take(excess) {
        if std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingCompactor, StaticFootprint};
    use tempfile::TempDir;

    fn monitor(mb: f64, compactor: Arc<CountingCompactor>, dir: &TempDir) -> DiskMonitor {
        let config = MonitorConfig {
            watch_dir: dir.path().to_path_buf(),
            log_dir: dir.path().join("logs"),
            ..MonitorConfig::default()
        };
        DiskMonitor::new(config, Arc::new(StaticFootprint(mb)), compactor)
    }

    #[tokio::test]
    async fn test_high_pressure_compacts_once_per_cycle() {
        let dir = TempDir::new().unwrap();
        let compactor = Arc::new(CountingCompactor::default());
        let m = monitor(600.0, compactor.clone(), &dir);

        assert_eq!(m.check().await, PressureLevel::High);
        assert_eq!(compactor.call_count(), 1);
        m.check().await;
        assert_eq!(compactor.call_count(), 2);
    }

    /// 收集 fmt layer 输出的内存 writer
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_high_pressure_logs_warning() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = TempDir::new().unwrap();
        let compactor = Arc::new(CountingCompactor::default());
        let m = monitor(600.0, compactor.clone(), &dir);
        m.check().await;

        let output = logs.contents();
        assert_eq!(output.matches("WARN").count(), 1);
        assert!(output.contains("High disk usage"));
        assert!(output.contains("threshold_mb"));
        assert_eq!(compactor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_critical_pressure_compacts_once() {
        let dir = TempDir::new().unwrap();
        let compactor = Arc::new(CountingCompactor::default());
        let m = monitor(1500.0, compactor.clone(), &dir);
        assert_eq!(m.check().await, PressureLevel::Critical);
        assert_eq!(compactor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_normal_pressure_does_nothing() {
        let dir = TempDir::new().unwrap();
        let compactor = Arc::new(CountingCompactor::default());
        std::fs::write(dir.path().join("scratch.tmp"), "x").unwrap();
        let m = monitor(10.0, compactor.clone(), &dir);
        assert_eq!(m.check().await, PressureLevel::Normal);
        assert_eq!(compactor.call_count(), 0);
        assert!(dir.path().join("scratch.tmp").exists());
    }

    #[test]
    fn test_directory_footprint_sums_nested_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 512 * 1024]).unwrap();
        std::fs::write(dir.path().join("nested/b.bin"), vec![0u8; 512 * 1024]).unwrap();
        let mb = DirectoryFootprint::new(dir.path()).footprint_mb();
        assert!((mb - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_footprint_of_missing_dir_is_zero() {
        let mb = DirectoryFootprint::new("/nonexistent/brain_bot_dir").footprint_mb();
        assert_eq!(mb, 0.0);
    }

    #[test]
    fn test_remove_stale_files() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs).unwrap();
        std::fs::write(dir.path().join("a.tmp"), "x").unwrap();
        std::fs::write(dir.path().join("b.temp"), "x").unwrap();
        std::fs::write(dir.path().join("brain_chat_memory.txt"), "x").unwrap();
        std::fs::write(dir.path().join("brain_chat_memory.txt.swap"), "x").unwrap();
        for day in ["01", "02", "03", "04", "05"] {
            std::fs::write(logs.join(format!("bot.2024-05-{day}.log")), "x").unwrap();
        }

        let removed = remove_stale_files(dir.path(), &logs, 3);
        assert_eq!(removed, 4);
        assert!(dir.path().join("brain_chat_memory.txt").exists());
        assert!(dir.path().join("brain_chat_memory.txt.swap").exists());
        assert!(!logs.join("bot.2024-05-02.log").exists());
        assert!(logs.join("bot.2024-05-03.log").exists());
        assert!(logs.join("bot.2024-05-05.log").exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let compactor = Arc::new(CountingCompactor::default());
        let m = Arc::new(monitor(600.0, compactor.clone(), &dir));
        let cancel = CancellationToken::new();
        cancel.cancel();
        m.run(cancel).await;
    }
}
