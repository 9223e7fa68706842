//! 事件处理网络核心库（epn-core）
//!
//! 提供事件处理网络（Event Processor Network, EPN）的运行时抽象：
//! - 批次与路由地址（`event_list`、`destination`）
//! - 业务扩展点（`processor`、`predicate`）：由使用方注入
//! - 传输抽象（`channel`、`context`）：由宿主运行时提供
//! - 拓扑（`node`、`network`）：逐批处理、结果扇出、重试与死信
//! - 注册表（`manager`、`listener`）：按名称管理网络、分发批次并通知监听器
//! - 声明式拓扑配置（`config`）
//!
//! 本 crate 不绑定任何具体传输实现，`epn-embedded` 提供基于进程内队列的实现。
//!
//! 典型用法：
//! 1. 为事件类型实现 `EventProcessor`（以及可选的 `Predicate`）；
//! 2. 通过 `Node::builder()`/`Network::builder()` 或 `config::NetworkDescriptor` 构建拓扑；
//! 3. 交给某个 `EpnManager` 实现注册，由其调用 `Network::init` 完成通道解析；
//! 4. 传输层投递批次，`NetworkRegistry::dispatch` 驱动节点处理。
//!
pub mod channel;
pub mod config;
pub mod context;
pub mod destination;
pub mod error;
pub mod event_list;
pub mod listener;
pub mod manager;
pub mod network;
pub mod node;
pub mod predicate;
pub mod processor;

pub use channel::{Channel, RetryChannel};
pub use context::EpnContext;
pub use destination::Destination;
pub use error::{EpnError, EpnResult};
pub use event_list::{Event, EventList};
pub use listener::NodeListener;
pub use manager::{EpnManager, NetworkRegistry, NodeRef};
pub use network::{Network, NetworkState};
pub use node::{BatchOutcome, DEFAULT_MAX_RETRIES, Node};
pub use predicate::Predicate;
pub use processor::EventProcessor;
