//! 事务状态

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use sprig_core::AsAny;

use crate::definition::Isolation;
use crate::synchronization::TransactionSynchronization;

/// 事务管理器内部的事务对象，对调用方不透明
pub trait TransactionObject: AsAny {
    /// 底层资源是否已被标记为只回滚（全局只回滚）
    fn is_rollback_only(&self) -> bool {
        false
    }
}

/// 挂起的资源
///
/// REQUIRES_NEW 与 NOT_SUPPORTED 挂起外层事务时保存，内层事务完成后恢复
pub struct SuspendedResourcesHolder {
    pub(crate) resources: Option<Box<dyn Any + Send>>,
    pub(crate) synchronizations: Option<Vec<Arc<dyn TransactionSynchronization>>>,
    pub(crate) name: Option<String>,
    pub(crate) read_only: bool,
    pub(crate) isolation: Option<Isolation>,
    pub(crate) was_active: bool,
}

impl SuspendedResourcesHolder {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn has_resources(&self) -> bool {
        self.resources.is_some()
    }

    pub fn was_active(&self) -> bool {
        self.was_active
    }
}

impl fmt::Debug for SuspendedResourcesHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendedResourcesHolder")
            .field("name", &self.name)
            .field("has_resources", &self.resources.is_some())
            .field(
                "synchronizations",
                &self.synchronizations.as_ref().map(|s| s.len()),
            )
            .field("was_active", &self.was_active)
            .finish()
    }
}

/// 一次事务尝试的状态
///
/// 由 `get_transaction` 创建，`commit` 或 `rollback` 之后进入完成状态。
/// 只回滚标记和完成标记都是单调的，一旦设置不会清除。
pub struct TransactionStatus {
    transaction: Option<Box<dyn TransactionObject>>,
    new_transaction: bool,
    new_synchronization: bool,
    read_only: bool,
    name: Option<String>,
    rollback_only: bool,
    completed: bool,
    savepoint: Option<Box<dyn Any + Send>>,
    suspended: Option<SuspendedResourcesHolder>,
}

impl TransactionStatus {
    pub(crate) fn new(
        transaction: Option<Box<dyn TransactionObject>>,
        new_transaction: bool,
        new_synchronization: bool,
        read_only: bool,
        name: Option<String>,
        suspended: Option<SuspendedResourcesHolder>,
    ) -> Self {
        Self {
            transaction,
            new_transaction,
            new_synchronization,
            read_only,
            name,
            rollback_only: false,
            completed: false,
            savepoint: None,
            suspended,
        }
    }

    /// 标记为只回滚，提交时会改为回滚
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// 本地或全局只回滚
    pub fn is_rollback_only(&self) -> bool {
        self.is_local_rollback_only() || self.is_global_rollback_only()
    }

    pub fn is_local_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// 外层事务（底层资源）是否已被参与者标记为只回滚
    pub fn is_global_rollback_only(&self) -> bool {
        self.transaction
            .as_ref()
            .map_or(false, |transaction| transaction.is_rollback_only())
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// 是否开启了新的物理事务（加入已有事务时为 false）
    pub fn is_new_transaction(&self) -> bool {
        self.has_transaction() && self.new_transaction
    }

    /// 是否处在实际事务中（SUPPORTS 等以非事务方式执行时为 false）
    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn is_new_synchronization(&self) -> bool {
        self.new_synchronization
    }

    pub fn has_savepoint(&self) -> bool {
        self.savepoint.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn has_suspended_resources(&self) -> bool {
        self.suspended.is_some()
    }

    pub(crate) fn transaction(&self) -> Option<&dyn TransactionObject> {
        self.transaction.as_deref()
    }

    pub(crate) fn transaction_mut(&mut self) -> Option<&mut Box<dyn TransactionObject>> {
        self.transaction.as_mut()
    }

    pub(crate) fn set_completed(&mut self) {
        self.completed = true;
    }

    pub(crate) fn set_savepoint(&mut self, savepoint: Box<dyn Any + Send>) {
        self.savepoint = Some(savepoint);
    }

    pub(crate) fn take_savepoint(&mut self) -> Option<Box<dyn Any + Send>> {
        self.savepoint.take()
    }

    pub(crate) fn take_suspended(&mut self) -> Option<SuspendedResourcesHolder> {
        self.suspended.take()
    }
}

impl fmt::Debug for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStatus")
            .field("name", &self.name)
            .field("has_transaction", &self.has_transaction())
            .field("new_transaction", &self.new_transaction)
            .field("new_synchronization", &self.new_synchronization)
            .field("read_only", &self.read_only)
            .field("rollback_only", &self.rollback_only)
            .field("completed", &self.completed)
            .field("has_savepoint", &self.savepoint.is_some())
            .field("suspended", &self.suspended)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FlagTransaction {
        rollback_only: AtomicBool,
    }

    impl TransactionObject for FlagTransaction {
        fn is_rollback_only(&self) -> bool {
            self.rollback_only.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_rollback_only_is_local_or_global() {
        let mut status = TransactionStatus::new(
            Some(Box::new(FlagTransaction::default())),
            true,
            true,
            false,
            Some("transfer".to_string()),
            None,
        );
        assert!(status.is_new_transaction());
        assert!(!status.is_rollback_only());

        status
            .transaction()
            .and_then(|t| AsAny::as_any(t).downcast_ref::<FlagTransaction>())
            .unwrap()
            .rollback_only
            .store(true, Ordering::SeqCst);
        assert!(status.is_global_rollback_only());
        assert!(!status.is_local_rollback_only());
        assert!(status.is_rollback_only());

        status.set_rollback_only();
        assert!(status.is_local_rollback_only());
    }

    #[test]
    fn test_empty_transaction_is_never_new() {
        let status = TransactionStatus::new(None, true, false, true, None, None);
        assert!(!status.has_transaction());
        assert!(!status.is_new_transaction());
        assert!(!status.is_global_rollback_only());
        assert!(status.is_read_only());
        assert!(!status.is_completed());
        assert!(!status.has_savepoint());
    }
}
