//! 事务定义：传播行为、隔离级别、超时、只读和名称

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransactionError;

/// 事务传播行为
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Propagation {
    /// 加入已有事务，没有则新建
    #[default]
    #[serde(rename = "PROPAGATION_REQUIRED")]
    Required,

    /// 加入已有事务，没有则以非事务方式执行
    #[serde(rename = "PROPAGATION_SUPPORTS")]
    Supports,

    /// 必须在已有事务中执行
    #[serde(rename = "PROPAGATION_MANDATORY")]
    Mandatory,

    /// 挂起已有事务并开启独立的新事务
    #[serde(rename = "PROPAGATION_REQUIRES_NEW")]
    RequiresNew,

    /// 挂起已有事务，以非事务方式执行
    #[serde(rename = "PROPAGATION_NOT_SUPPORTED")]
    NotSupported,

    /// 存在事务时报错
    #[serde(rename = "PROPAGATION_NEVER")]
    Never,

    /// 在已有事务中创建保存点，没有则等同于 Required
    #[serde(rename = "PROPAGATION_NESTED")]
    Nested,
}

impl Propagation {
    pub const ALL: [Propagation; 7] = [
        Propagation::Required,
        Propagation::Supports,
        Propagation::Mandatory,
        Propagation::RequiresNew,
        Propagation::NotSupported,
        Propagation::Never,
        Propagation::Nested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Propagation::Required => "PROPAGATION_REQUIRED",
            Propagation::Supports => "PROPAGATION_SUPPORTS",
            Propagation::Mandatory => "PROPAGATION_MANDATORY",
            Propagation::RequiresNew => "PROPAGATION_REQUIRES_NEW",
            Propagation::NotSupported => "PROPAGATION_NOT_SUPPORTED",
            Propagation::Never => "PROPAGATION_NEVER",
            Propagation::Nested => "PROPAGATION_NESTED",
        }
    }

    /// 没有已有事务时是否会开启新事务
    pub fn creates_transaction(&self) -> bool {
        matches!(
            self,
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested
        )
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Propagation {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Propagation::ALL
            .into_iter()
            .find(|p| p.as_str() == s || p.as_str()["PROPAGATION_".len()..].eq_ignore_ascii_case(s))
            .ok_or_else(|| TransactionError::illegal_state(format!("Unknown propagation behavior '{}'", s)))
    }
}

/// 事务隔离级别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Isolation {
    /// 使用资源的默认隔离级别
    #[default]
    #[serde(rename = "ISOLATION_DEFAULT")]
    Default,

    #[serde(rename = "ISOLATION_READ_UNCOMMITTED")]
    ReadUncommitted,

    #[serde(rename = "ISOLATION_READ_COMMITTED")]
    ReadCommitted,

    #[serde(rename = "ISOLATION_REPEATABLE_READ")]
    RepeatableRead,

    #[serde(rename = "ISOLATION_SERIALIZABLE")]
    Serializable,
}

impl Isolation {
    pub const ALL: [Isolation; 5] = [
        Isolation::Default,
        Isolation::ReadUncommitted,
        Isolation::ReadCommitted,
        Isolation::RepeatableRead,
        Isolation::Serializable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Isolation::Default => "ISOLATION_DEFAULT",
            Isolation::ReadUncommitted => "ISOLATION_READ_UNCOMMITTED",
            Isolation::ReadCommitted => "ISOLATION_READ_COMMITTED",
            Isolation::RepeatableRead => "ISOLATION_REPEATABLE_READ",
            Isolation::Serializable => "ISOLATION_SERIALIZABLE",
        }
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Isolation {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Isolation::ALL
            .into_iter()
            .find(|i| i.as_str() == s || i.as_str()["ISOLATION_".len()..].eq_ignore_ascii_case(s))
            .ok_or_else(|| TransactionError::illegal_state(format!("Unknown isolation level '{}'", s)))
    }
}

const TIMEOUT_PREFIX: &str = "timeout_";
const READ_ONLY_MARKER: &str = "readOnly";

/// 事务定义
///
/// 文本形式与 Spring 一致，例如 `PROPAGATION_REQUIRED,ISOLATION_DEFAULT,timeout_30,readOnly`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionDefinition {
    propagation: Propagation,
    isolation: Isolation,
    timeout_seconds: Option<u64>,
    read_only: bool,
    name: Option<String>,
}

impl TransactionDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn set_timeout_seconds(&mut self, seconds: Option<u64>) {
        self.timeout_seconds = seconds;
    }

    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    pub fn timeout_seconds(&self) -> Option<u64> {
        self.timeout_seconds
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Display for TransactionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.propagation, self.isolation)?;
        if let Some(timeout) = self.timeout_seconds {
            write!(f, ",{}{}", TIMEOUT_PREFIX, timeout)?;
        }
        if self.read_only {
            write!(f, ",{}", READ_ONLY_MARKER)?;
        }
        Ok(())
    }
}

impl FromStr for TransactionDefinition {
    type Err = TransactionError;

    /// 解析逗号分隔的属性列表；回滚规则（`+Type` / `-Type`）由 [`TransactionAttribute`](crate::attribute::TransactionAttribute) 处理
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut definition = TransactionDefinition::default();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token.starts_with("PROPAGATION_") {
                definition.propagation = token.parse()?;
            } else if token.starts_with("ISOLATION_") {
                definition.isolation = token.parse()?;
            } else if let Some(seconds) = token.strip_prefix(TIMEOUT_PREFIX) {
                let seconds = seconds.parse::<u64>().map_err(|_| {
                    TransactionError::illegal_state(format!("Invalid transaction timeout '{}'", token))
                })?;
                definition.timeout_seconds = Some(seconds);
            } else if token == READ_ONLY_MARKER {
                definition.read_only = true;
            } else {
                return Err(TransactionError::illegal_state(format!(
                    "Invalid transaction attribute token: [{}]",
                    token
                )));
            }
        }
        Ok(definition)
    }
}
