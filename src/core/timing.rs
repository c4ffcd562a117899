//! 耗时报告

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::info;

/// 记录一个任务的开始和耗时（秒，保留 4 位小数）
pub struct DurationReport {
    label: String,
    start: Instant,
}

impl DurationReport {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("开始 {} ...", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        info!("{} 完成，耗时 {}", self.label, format_seconds(elapsed));
        elapsed
    }
}

/// 运行一个异步任务并报告耗时，失败时同样报告
pub async fn timed<T, F>(label: impl Into<String>, task: F) -> T
where
    F: Future<Output = T>,
{
    let report = DurationReport::start(label);
    let output = task.await;
    report.finish();
    output
}

pub fn format_seconds(duration: Duration) -> String {
    format!("{:.4} 秒", duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_seconds_has_four_decimals() {
        assert_eq!(format_seconds(Duration::from_millis(1500)), "1.5000 秒");
        assert_eq!(format_seconds(Duration::ZERO), "0.0000 秒");
    }

    #[tokio::test]
    async fn test_timed_returns_task_output() {
        let value = timed("test", async { 42 }).await;
        assert_eq!(value, 42);
    }
}
