//! 进程内传输配置
//!
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 进程内管理器配置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedConfig {
    /// 同时处理的批次数上限
    pub worker_concurrency: usize,
    /// 分发失败时传输层的最大重投次数
    pub max_redeliveries: u32,
    /// 节点未声明重试间隔时使用的默认值，0 表示立即重投
    pub default_retry_interval_ms: u64,
    /// 传输层重投前的等待时间
    pub redelivery_delay_ms: u64,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 10,
            max_redeliveries: 5,
            default_retry_interval_ms: 0,
            redelivery_delay_ms: 0,
        }
    }
}

impl EmbeddedConfig {
    pub fn default_retry_interval(&self) -> Option<Duration> {
        non_zero_millis(self.default_retry_interval_ms)
    }

    pub fn redelivery_delay(&self) -> Option<Duration> {
        non_zero_millis(self.redelivery_delay_ms)
    }
}

fn non_zero_millis(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}
