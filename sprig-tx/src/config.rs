//! 事务配置
//!
//! 可以直接从 TOML 读取：
//!
//! ```toml
//! default-timeout = 30
//! nested-transaction-allowed = true
//! synchronization = "on-actual-transaction"
//!
//! [attributes]
//! "get*" = "PROPAGATION_SUPPORTS,readOnly"
//! "transfer" = "PROPAGATION_REQUIRED,ISOLATION_SERIALIZABLE,-InsufficientFunds"
//! ```
//!
//! 也可以从 [`Environment`] 的 `sprig.transaction.*` 读取开关。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sprig_core::{ContainerError, Environment};

use crate::attribute::NameMatchTransactionAttributeSource;
use crate::error::{TransactionError, TransactionResult};
use crate::manager::SynchronizationMode;

const PREFIX: &str = "sprig.transaction";

/// 事务管理器配置，未给出的项保持管理器默认值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TransactionProperties {
    /// 定义未指定超时时使用的秒数
    pub default_timeout: Option<u64>,
    pub nested_transaction_allowed: Option<bool>,
    pub validate_existing_transaction: Option<bool>,
    pub global_rollback_on_participation_failure: Option<bool>,
    pub fail_early_on_global_rollback_only: Option<bool>,
    pub rollback_on_commit_failure: Option<bool>,
    pub synchronization: Option<SynchronizationMode>,
    /// 方法名模式 -> 事务属性字符串
    pub attributes: BTreeMap<String, String>,
}

impl TransactionProperties {
    pub fn from_toml_str(content: &str) -> TransactionResult<Self> {
        toml::from_str(content).map_err(|e| {
            TransactionError::Container(ContainerError::Other(
                anyhow::Error::new(e).context("Invalid transaction properties"),
            ))
        })
    }

    /// 从环境读取 `sprig.transaction.*`
    pub fn from_environment(environment: &Environment) -> TransactionResult<Self> {
        let key = |name: &str| format!("{}.{}", PREFIX, name);

        let default_timeout = match environment.get_i64(&key("default-timeout")) {
            Some(seconds) => Some(u64::try_from(seconds).map_err(|_| {
                TransactionError::illegal_state(format!("Invalid default timeout: {}", seconds))
            })?),
            None => None,
        };
        let synchronization = environment
            .get_string(&key("synchronization"))
            .map(|mode| mode.parse::<SynchronizationMode>())
            .transpose()?;

        Ok(Self {
            default_timeout,
            nested_transaction_allowed: environment.get_bool(&key("nested-transaction-allowed")),
            validate_existing_transaction: environment.get_bool(&key("validate-existing-transaction")),
            global_rollback_on_participation_failure: environment
                .get_bool(&key("global-rollback-on-participation-failure")),
            fail_early_on_global_rollback_only: environment.get_bool(&key("fail-early-on-global-rollback-only")),
            rollback_on_commit_failure: environment.get_bool(&key("rollback-on-commit-failure")),
            synchronization,
            attributes: BTreeMap::new(),
        })
    }

    /// 用 `attributes` 构建按方法名匹配的属性源
    pub fn attribute_source(&self) -> TransactionResult<NameMatchTransactionAttributeSource> {
        NameMatchTransactionAttributeSource::from_properties(
            self.attributes.iter().map(|(name, value)| (name.as_str(), value.as_str())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::TransactionAttributeSource;
    use crate::definition::{Isolation, Propagation};
    use sprig_core::{MapPropertySource, Method};

    #[test]
    fn test_from_toml() {
        let properties = TransactionProperties::from_toml_str(
            r#"
            default-timeout = 30
            rollback-on-commit-failure = true
            synchronization = "never"

            [attributes]
            "get*" = "PROPAGATION_SUPPORTS,readOnly"
            "transfer" = "PROPAGATION_REQUIRED,ISOLATION_SERIALIZABLE,-InsufficientFunds"
            "#,
        )
        .unwrap();

        assert_eq!(properties.default_timeout, Some(30));
        assert_eq!(properties.rollback_on_commit_failure, Some(true));
        assert_eq!(properties.synchronization, Some(SynchronizationMode::Never));
        assert_eq!(properties.nested_transaction_allowed, None);

        let source = properties.attribute_source().unwrap();
        let get = source
            .transaction_attribute(&Method::new("AccountService", "get_balance"), "AccountService")
            .unwrap();
        assert_eq!(get.definition().propagation(), Propagation::Supports);
        assert!(get.definition().is_read_only());

        let transfer = source
            .transaction_attribute(&Method::new("AccountService", "transfer"), "AccountService")
            .unwrap();
        assert_eq!(transfer.definition().isolation(), Isolation::Serializable);
        assert_eq!(transfer.rollback_rules().len(), 1);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(TransactionProperties::from_toml_str("default-timeout = \"soon\"").is_err());
        let properties = TransactionProperties::from_toml_str("[attributes]\nsave = \"PROPAGATION_SOMETIMES\"").unwrap();
        assert!(properties.attribute_source().is_err());
    }

    #[test]
    fn test_from_environment() {
        let environment = Environment::new();
        environment.add_property_source(Box::new(
            MapPropertySource::new("tx")
                .with_property("sprig.transaction.default-timeout", 5i64)
                .with_property("sprig.transaction.fail-early-on-global-rollback-only", true)
                .with_property("sprig.transaction.synchronization", "SYNCHRONIZATION_NEVER"),
        ));

        let properties = TransactionProperties::from_environment(&environment).unwrap();
        assert_eq!(properties.default_timeout, Some(5));
        assert_eq!(properties.fail_early_on_global_rollback_only, Some(true));
        assert_eq!(properties.synchronization, Some(SynchronizationMode::Never));
        assert_eq!(properties.validate_existing_transaction, None);
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let environment = Environment::new();
        environment.add_property_source(Box::new(
            MapPropertySource::new("tx").with_property("sprig.transaction.default-timeout", -1i64),
        ));
        assert!(TransactionProperties::from_environment(&environment).is_err());
    }
}
