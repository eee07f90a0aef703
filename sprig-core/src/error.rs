//! 容器错误类型
//!
//! 查找错误、生命周期错误和循环依赖错误都在这里定义。
//! 用户回调（构造器、init/destroy 方法、属性设置）使用 `anyhow`，
//! 进入容器后统一包装成 [`ContainerError::BeanCreation`]。

use thiserror::Error;

/// 容器统一结果类型
pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// 错误源类型（保留原始错误链）
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 容器错误
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("No bean named '{name}' available")]
    NoSuchBean { name: String },

    #[error("No qualifying bean of type '{type_name}' available")]
    NoSuchBeanOfType { type_name: String },

    #[error(
        "No qualifying bean of type '{type_name}' available: expected single matching bean but found {}: {}",
        .candidates.len(),
        .candidates.join(",")
    )]
    NotUnique {
        type_name: String,
        candidates: Vec<String>,
    },

    #[error("Bean named '{name}' is expected to be of type '{expected}' but was actually of type '{actual}'")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Error creating bean with name '{name}': Requested bean is currently in creation: Is there an unresolvable circular reference?")]
    CurrentlyInCreation { name: String },

    #[error("Circular depends-on relationship between '{bean}' and '{dependency}'")]
    DependsOnCycle { bean: String, dependency: String },

    #[error("Error creating bean with name '{name}': {source}")]
    BeanCreation {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("Invalid bean definition with name '{name}': {message}")]
    InvalidDefinition { name: String, message: String },

    #[error("Bean definition '{name}' is abstract")]
    AbstractBean { name: String },

    #[error("Cannot register bean definition for bean '{name}': there is already a definition bound and overriding is disabled")]
    DefinitionOverride { name: String },

    #[error("Could not register object under bean name '{name}': there is already an object bound")]
    SingletonExists { name: String },

    #[error("Bean factory configuration is frozen: {0}")]
    ConfigurationFrozen(String),

    #[error("Cannot register alias '{alias}' for name '{name}': {message}")]
    Alias {
        alias: String,
        name: String,
        message: String,
    },

    #[error("Bean named '{name}' is not a factory bean")]
    NotAFactoryBean { name: String },

    #[error("Could not resolve placeholder '{0}'")]
    UnresolvablePlaceholder(String),

    #[error("Could not read resource '{location}': {source}")]
    Resource {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Bean factory is no longer available")]
    FactoryDropped,

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ContainerError {
    /// 包装 Bean 创建失败
    ///
    /// 循环引用和 depends-on 循环错误保持原样，不再包装
    pub fn creation(name: &str, error: impl Into<ContainerError>) -> Self {
        match error.into() {
            e @ ContainerError::CurrentlyInCreation { .. } => e,
            e @ ContainerError::DependsOnCycle { .. } => e,
            e => ContainerError::BeanCreation {
                name: name.to_string(),
                source: Box::new(e),
            },
        }
    }

    /// 用户回调失败时使用
    pub fn from_callback(name: &str, error: anyhow::Error) -> Self {
        match error.downcast::<ContainerError>() {
            Ok(inner) => Self::creation(name, inner),
            Err(other) => ContainerError::BeanCreation {
                name: name.to_string(),
                source: other.into(),
            },
        }
    }

    /// 是否为循环引用错误（包括被包装的情况）
    pub fn is_currently_in_creation(&self) -> bool {
        match self {
            ContainerError::CurrentlyInCreation { .. } => true,
            ContainerError::BeanCreation { source, .. } => source
                .downcast_ref::<ContainerError>()
                .map(ContainerError::is_currently_in_creation)
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_keeps_circular_errors_unwrapped() {
        let err = ContainerError::creation(
            "a",
            ContainerError::CurrentlyInCreation { name: "b".into() },
        );
        assert!(matches!(err, ContainerError::CurrentlyInCreation { ref name } if name == "b"));

        let err = ContainerError::creation(
            "a",
            ContainerError::DependsOnCycle {
                bean: "a".into(),
                dependency: "b".into(),
            },
        );
        assert!(matches!(err, ContainerError::DependsOnCycle { .. }));
    }

    #[test]
    fn test_creation_wraps_with_bean_name() {
        let err = ContainerError::creation("userService", ContainerError::NoSuchBean { name: "repo".into() });
        let message = err.to_string();
        assert!(message.contains("userService"));
        assert!(message.contains("repo"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_from_callback_unwraps_container_errors() {
        let err = ContainerError::from_callback(
            "a",
            anyhow::Error::new(ContainerError::CurrentlyInCreation { name: "a".into() }),
        );
        assert!(err.is_currently_in_creation());

        let err = ContainerError::from_callback("a", anyhow::anyhow!("boom"));
        assert!(matches!(err, ContainerError::BeanCreation { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_not_unique_message_lists_candidates() {
        let err = ContainerError::NotUnique {
            type_name: "Repo".into(),
            candidates: vec!["a".into(), "b".into()],
        };
        assert!(err.to_string().contains("found 2: a,b"));
    }
}
