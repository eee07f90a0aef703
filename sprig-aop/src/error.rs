use sprig_core::{ContainerError, InvocationError};
use thiserror::Error;

/// AOP 配置与调用错误
#[derive(Debug, Error)]
pub enum AopError {
    /// 代理配置无效（创建代理时立即报告）
    #[error("Invalid AOP configuration: {0}")]
    Config(String),

    #[error("Cannot proxy target class '{target}': interface '{interface}' is neither implemented nor introduced")]
    InterfaceNotImplemented {
        interface: String,
        target: String,
    },

    /// 接口代理收到不属于任何代理接口的方法
    #[error("Method '{method}' is not exposed by proxy interfaces {interfaces:?}")]
    MethodNotExposed {
        method: String,
        interfaces: Vec<String>,
    },

    #[error("No target available for invocation of '{method}'")]
    NoTarget { method: String },

    #[error("Invalid pointcut expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },

    #[error("Cannot modify advisors: proxy configuration is frozen")]
    Frozen,

    #[error(transparent)]
    Container(#[from] ContainerError),
}

pub type AopResult<T> = Result<T, AopError>;

impl From<AopError> for InvocationError {
    fn from(error: AopError) -> Self {
        InvocationError::unchecked(error)
    }
}

impl From<AopError> for ContainerError {
    fn from(error: AopError) -> Self {
        match error {
            AopError::Container(inner) => inner,
            other => ContainerError::Other(other.into()),
        }
    }
}
