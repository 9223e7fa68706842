//! 统一错误定义
//!
//! 覆盖拓扑校验、注册表、生命周期、传输与配置等失败类型。
//! 单个事件的处理失败不在此列：节点就地捕获并转入重试流程，不会越过节点边界。
//!
use crate::network::NetworkState;
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EpnError {
    // --- 拓扑校验 ---
    #[error("network {network} does not contain a root node of name '{root}'")]
    RootNodeNotFound { network: String, root: String },
    #[error("event processor has not been configured for node '{node}'")]
    MissingEventProcessor { node: String },
    #[error("duplicate node name: network={network}, node={node}")]
    DuplicateNode { network: String, node: String },

    // --- 注册表 ---
    #[error("network already registered: {network}")]
    NetworkAlreadyRegistered { network: String },
    #[error("no network '{network}' was found")]
    NetworkNotFound { network: String },
    #[error("no node '{node}' was found in network '{network}'")]
    NodeNotFound { network: String, node: String },

    // --- 生命周期 ---
    #[error("invalid network state: network={network}, state={state:?}, expected={expected:?}")]
    InvalidNetworkState {
        network: String,
        state: NetworkState,
        expected: NetworkState,
    },
    #[error("node '{node}' is not active")]
    NodeNotActive { node: String },
    #[error("lifecycle error: component={component}, reason={reason}")]
    Lifecycle { component: String, reason: String },
    #[error("close failed: {component}: {}", .failures.join("; "))]
    Close {
        component: String,
        failures: Vec<String>,
    },

    // --- 传输 ---
    #[error("channel error: destination={destination}, reason={reason}")]
    Channel { destination: String, reason: String },
    #[error("retry channel error: node={node}, reason={reason}")]
    RetryChannel { node: String, reason: String },
    #[error("failed to resolve channel: destination={destination}, reason={reason}")]
    ChannelResolution { destination: String, reason: String },
    #[error("transport error: {reason}")]
    Transport { reason: String },

    // --- 配置 ---
    #[error("config error: {reason}")]
    Config { reason: String },
    #[error("unknown component: kind={kind}, type={type_name}")]
    UnknownComponent {
        kind: &'static str,
        type_name: String,
    },
    #[error("component already registered: kind={kind}, type={type_name}")]
    ComponentAlreadyRegistered {
        kind: &'static str,
        type_name: String,
    },
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// 统一 Result 类型别名
pub type EpnResult<T> = Result<T, EpnError>;

impl EpnError {
    pub fn transport(reason: impl Into<String>) -> Self {
        EpnError::Transport {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        EpnError::Config {
            reason: reason.into(),
        }
    }

    pub fn lifecycle(component: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        EpnError::Lifecycle {
            component: component.into(),
            reason: reason.to_string(),
        }
    }

    /// 是否属于拓扑/配置类错误（注册期即失败，重投无意义）
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EpnError::RootNodeNotFound { .. }
                | EpnError::MissingEventProcessor { .. }
                | EpnError::DuplicateNode { .. }
                | EpnError::ChannelResolution { .. }
                | EpnError::Config { .. }
                | EpnError::UnknownComponent { .. }
                | EpnError::ComponentAlreadyRegistered { .. }
        )
    }

    /// 目标网络/节点不存在或已不可用
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            EpnError::NetworkNotFound { .. }
                | EpnError::NodeNotFound { .. }
                | EpnError::NodeNotActive { .. }
                | EpnError::InvalidNetworkState { .. }
        )
    }

    /// 传输层重投是否可能成功；配置与路由错误重投后结果不变
    pub fn is_retryable(&self) -> bool {
        !(self.is_configuration() || self.is_routing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_error_joins_failures() {
        let err = EpnError::Close {
            component: "network n".into(),
            failures: vec!["node a: boom".into(), "node b: bang".into()],
        };
        assert_eq!(
            err.to_string(),
            "close failed: network n: node a: boom; node b: bang"
        );
    }

    #[test]
    fn configuration_errors_are_classified() {
        let missing = EpnError::MissingEventProcessor { node: "n1".into() };
        assert!(missing.is_configuration());
        assert!(!EpnError::transport("queue closed").is_configuration());
    }

    #[test]
    fn routing_errors_are_not_retryable() {
        let unknown = EpnError::NodeNotFound {
            network: "n".into(),
            node: "x".into(),
        };
        assert!(unknown.is_routing());
        assert!(!unknown.is_retryable());
        assert!(!EpnError::NodeNotActive { node: "x".into() }.is_retryable());
        assert!(
            !EpnError::UnknownComponent {
                kind: "predicate",
                type_name: "missing".into()
            }
            .is_retryable()
        );
        assert!(EpnError::transport("queue closed").is_retryable());
        assert!(
            EpnError::Channel {
                destination: "n/x".into(),
                reason: "closed".into()
            }
            .is_retryable()
        );
    }
}
