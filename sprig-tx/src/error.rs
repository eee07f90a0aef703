//! 事务错误类型

use std::fmt;

use sprig_core::error::BoxError;
use sprig_core::{ContainerError, InvocationError};
use thiserror::Error;

pub type TransactionResult<T> = std::result::Result<T, TransactionError>;

/// 事务错误
#[derive(Debug, Error)]
pub enum TransactionError {
    /// 无法开启事务（获取资源或 begin 失败）
    #[error("{message}: {source}")]
    CannotCreateTransaction {
        message: String,
        #[source]
        source: BoxError,
    },

    /// 传播行为或状态使用不当
    #[error("{0}")]
    IllegalTransactionState(String),

    #[error("{0}")]
    NestedTransactionNotSupported(String),

    /// 事务被标记为只回滚，提交请求实际执行了回滚
    #[error("{0}")]
    UnexpectedRollback(String),

    #[error("Transaction timed out: deadline was exceeded by {0:?}")]
    TimedOut(std::time::Duration),

    /// 提交或回滚失败；被它覆盖的应用错误保存在 `application_error` 中
    #[error("{message}: {source}")]
    System {
        message: String,
        #[source]
        source: BoxError,
        application_error: Option<Box<InvocationError>>,
    },

    #[error(transparent)]
    DataAccess(#[from] DataAccessError),

    /// 同步回调（before_commit / after_commit）失败
    #[error("Transaction synchronization callback failed: {0}")]
    Synchronization(#[source] BoxError),

    #[error(transparent)]
    Container(#[from] ContainerError),
}

impl TransactionError {
    pub fn cannot_create(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        TransactionError::CannotCreateTransaction {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn system(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        TransactionError::System {
            message: message.into(),
            source: source.into(),
            application_error: None,
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        TransactionError::IllegalTransactionState(message.into())
    }

    /// 记录被本错误覆盖的应用错误，已有记录时保持不变
    pub fn with_application_error(mut self, error: InvocationError) -> Self {
        if let TransactionError::System { application_error, .. } = &mut self {
            if application_error.is_none() {
                *application_error = Some(Box::new(error));
            }
        }
        self
    }

    pub fn application_error(&self) -> Option<&InvocationError> {
        match self {
            TransactionError::System { application_error, .. } => application_error.as_deref(),
            _ => None,
        }
    }
}

impl From<TransactionError> for InvocationError {
    fn from(error: TransactionError) -> Self {
        InvocationError::unchecked(error)
    }
}

/// 底层资源（连接）返回的原始错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ResourceError {
    message: String,
    sql_state: Option<String>,
    vendor_code: Option<i32>,
}

impl ResourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
            vendor_code: None,
        }
    }

    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    pub fn with_vendor_code(mut self, vendor_code: i32) -> Self {
        self.vendor_code = Some(vendor_code);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn sql_state(&self) -> Option<&str> {
        self.sql_state.as_deref()
    }

    pub fn vendor_code(&self) -> Option<i32> {
        self.vendor_code
    }
}

/// 数据访问错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAccessKind {
    /// 连接失败（SQL state 08）
    ResourceFailure,
    /// 约束冲突（SQL state 23）
    DataIntegrityViolation,
    /// 死锁或序列化失败（SQL state 40）
    ConcurrencyFailure,
    /// 语法或访问规则错误（SQL state 42）
    BadGrammar,
    Uncategorized,
}

impl DataAccessKind {
    pub fn from_sql_state(sql_state: &str) -> Self {
        match sql_state.get(..2) {
            Some("08") => DataAccessKind::ResourceFailure,
            Some("23") => DataAccessKind::DataIntegrityViolation,
            Some("40") => DataAccessKind::ConcurrencyFailure,
            Some("42") => DataAccessKind::BadGrammar,
            _ => DataAccessKind::Uncategorized,
        }
    }

    /// 重试可能成功的错误
    pub fn is_transient(&self) -> bool {
        matches!(self, DataAccessKind::ConcurrencyFailure)
    }
}

impl fmt::Display for DataAccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DataAccessKind::ResourceFailure => "data access resource failure",
            DataAccessKind::DataIntegrityViolation => "data integrity violation",
            DataAccessKind::ConcurrencyFailure => "concurrency failure",
            DataAccessKind::BadGrammar => "bad grammar",
            DataAccessKind::Uncategorized => "uncategorized data access error",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
#[error("{task}; {kind}: {source}")]
pub struct DataAccessError {
    pub kind: DataAccessKind,
    pub task: String,
    #[source]
    pub source: ResourceError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("insufficient funds")]
    struct InsufficientFunds;

    #[test]
    fn test_application_error_is_kept() {
        let error = TransactionError::system("JDBC rollback failed", ResourceError::new("connection reset"))
            .with_application_error(InvocationError::checked(InsufficientFunds));
        assert_eq!(error.to_string(), "JDBC rollback failed: connection reset");
        assert!(error.application_error().unwrap().is::<InsufficientFunds>());

        // 只保留第一次记录的应用错误
        let error = error.with_application_error(InvocationError::unchecked(anyhow::anyhow!("later")));
        assert!(error.application_error().unwrap().is_checked());

        let other = TransactionError::illegal_state("misuse").with_application_error(InvocationError::checked(InsufficientFunds));
        assert!(other.application_error().is_none());
    }

    #[test]
    fn test_sql_state_classification() {
        assert_eq!(DataAccessKind::from_sql_state("08001"), DataAccessKind::ResourceFailure);
        assert_eq!(DataAccessKind::from_sql_state("23505"), DataAccessKind::DataIntegrityViolation);
        assert!(DataAccessKind::from_sql_state("40001").is_transient());
        assert_eq!(DataAccessKind::from_sql_state("42P01"), DataAccessKind::BadGrammar);
        assert_eq!(DataAccessKind::from_sql_state("X"), DataAccessKind::Uncategorized);
    }

    #[test]
    fn test_converts_to_unchecked_invocation_error() {
        let error: InvocationError = TransactionError::illegal_state("no transaction").into();
        assert!(!error.is_checked());
        assert!(error.is::<TransactionError>());
    }
}
