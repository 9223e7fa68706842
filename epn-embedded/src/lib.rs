//! 进程内事件处理网络（epn-embedded）
//!
//! 将 `epn-core` 的注册表绑定到进程内批次队列：
//! - `BatchQueue`：无界 mpsc 队列，支持延迟投递（重试间隔、重投间隔）；
//! - `QueueChannel`/`QueueRetryChannel`：以信封形式把批次投递到目标节点；
//! - `EmbeddedContext`：解析通道并把耗尽重试的事件交给死信接收器；
//! - `EmbeddedEpnManager`：按有限并发消费队列，分发失败时进行有上限的传输层重投。
//!
pub mod channel;
pub mod config;
pub mod context;
pub mod dead_letter;
pub mod envelope;
pub mod manager;

pub use channel::{QueueChannel, QueueRetryChannel};
pub use config::EmbeddedConfig;
pub use context::EmbeddedContext;
pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetterSink, LoggingDeadLetterSink};
pub use envelope::{BatchEnvelope, BatchQueue};
pub use manager::{EmbeddedEpnManager, ManagerHandle};
