//! 事务管理器
//!
//! [`TransactionManager`] 实现与资源无关的传播引擎：判断已有事务、按传播行为加入、挂起、
//! 新建或创建保存点，提交时处理只回滚标记、同步回调和提交失败，完成后清理并恢复挂起的事务。
//! 与具体资源相关的部分由 [`TransactionBackend`] 提供。

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sprig_core::{AsAny, Bean, CallContext};

use crate::config::TransactionProperties;
use crate::definition::{Isolation, Propagation, TransactionDefinition};
use crate::error::{TransactionError, TransactionResult};
use crate::status::{SuspendedResourcesHolder, TransactionObject, TransactionStatus};
use crate::synchronization::{
    self, CompletionStatus, TransactionSynchronization, TransactionSynchronizationManager as Tsm,
};

const COMPLETED_MESSAGE: &str =
    "Transaction is already completed - do not call commit or rollback more than once per transaction";

/// 由事务管理器创建的保存点，对调用方不透明
pub struct Savepoint(Box<dyn Any + Send>);

impl fmt::Debug for Savepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Savepoint")
    }
}

/// 事务管理器接口
pub trait PlatformTransactionManager: Send + Sync {
    /// 按传播行为返回当前事务或新建事务
    fn get_transaction(
        &self,
        ctx: &mut CallContext,
        definition: &TransactionDefinition,
    ) -> TransactionResult<TransactionStatus>;

    /// 提交；状态被标记为只回滚时改为回滚
    fn commit(&self, ctx: &mut CallContext, status: &mut TransactionStatus) -> TransactionResult<()>;

    fn rollback(&self, ctx: &mut CallContext, status: &mut TransactionStatus) -> TransactionResult<()>;

    fn create_savepoint(&self, ctx: &mut CallContext, status: &mut TransactionStatus) -> TransactionResult<Savepoint>;

    fn rollback_to_savepoint(
        &self,
        ctx: &mut CallContext,
        status: &mut TransactionStatus,
        savepoint: &Savepoint,
    ) -> TransactionResult<()>;

    fn release_savepoint(
        &self,
        ctx: &mut CallContext,
        status: &mut TransactionStatus,
        savepoint: Savepoint,
    ) -> TransactionResult<()>;

    /// 通知同步回调把会话修改刷到底层资源
    fn flush(&self, ctx: &mut CallContext, status: &TransactionStatus) {
        if status.has_transaction() && Tsm::is_synchronization_active(ctx) {
            synchronization::trigger_flush(ctx);
        }
    }

    fn name(&self) -> &str {
        "PlatformTransactionManager"
    }
}

/// 资源相关的事务操作
pub trait TransactionBackend: Send + Sync + 'static {
    type Transaction: TransactionObject;
    type Suspended: Send + 'static;
    type Savepoint: Send + 'static;

    fn name(&self) -> &str;

    /// 为当前调用上下文创建事务对象，已有事务时反映已绑定的资源
    fn get_transaction(&self, ctx: &mut CallContext) -> TransactionResult<Self::Transaction>;

    fn is_existing_transaction(&self, transaction: &Self::Transaction) -> bool;

    fn begin(
        &self,
        ctx: &mut CallContext,
        transaction: &mut Self::Transaction,
        definition: &TransactionDefinition,
    ) -> TransactionResult<()>;

    /// 解绑资源并返回，供之后恢复
    fn suspend(&self, ctx: &mut CallContext, transaction: &mut Self::Transaction) -> TransactionResult<Self::Suspended>;

    fn resume(&self, ctx: &mut CallContext, suspended: Self::Suspended) -> TransactionResult<()>;

    fn commit(&self, ctx: &mut CallContext, transaction: &mut Self::Transaction) -> TransactionResult<()>;

    fn rollback(&self, ctx: &mut CallContext, transaction: &mut Self::Transaction) -> TransactionResult<()>;

    /// 参与者失败时把外层事务标记为只回滚
    fn set_rollback_only(&self, ctx: &mut CallContext, transaction: &mut Self::Transaction) -> TransactionResult<()>;

    /// 新事务完成后释放资源
    fn cleanup_after_completion(&self, _ctx: &mut CallContext, _transaction: &mut Self::Transaction) {}

    fn supports_savepoints(&self, _transaction: &Self::Transaction) -> bool {
        false
    }

    fn create_savepoint(
        &self,
        _ctx: &mut CallContext,
        _transaction: &mut Self::Transaction,
    ) -> TransactionResult<Self::Savepoint> {
        Err(TransactionError::NestedTransactionNotSupported(format!(
            "Transaction object of [{}] does not support savepoints",
            self.name()
        )))
    }

    fn rollback_to_savepoint(
        &self,
        _ctx: &mut CallContext,
        _transaction: &mut Self::Transaction,
        _savepoint: &Self::Savepoint,
    ) -> TransactionResult<()> {
        Err(TransactionError::NestedTransactionNotSupported(format!(
            "Transaction object of [{}] does not support savepoints",
            self.name()
        )))
    }

    fn release_savepoint(
        &self,
        _ctx: &mut CallContext,
        _transaction: &mut Self::Transaction,
        _savepoint: Self::Savepoint,
    ) -> TransactionResult<()> {
        Err(TransactionError::NestedTransactionNotSupported(format!(
            "Transaction object of [{}] does not support savepoints",
            self.name()
        )))
    }

    /// 提交时发现全局只回滚是否仍然提交（例如由外部协调者决定结果）
    fn should_commit_on_global_rollback_only(&self) -> bool {
        false
    }
}

/// 何时激活事务同步
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SynchronizationMode {
    /// 总是激活，包括 SUPPORTS 等以非事务方式执行的"空"事务
    #[default]
    Always,
    /// 只在实际事务中激活
    OnActualTransaction,
    Never,
}

impl FromStr for SynchronizationMode {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches("SYNCHRONIZATION_").replace('_', "-").to_ascii_lowercase();
        match normalized.as_str() {
            "always" => Ok(SynchronizationMode::Always),
            "on-actual-transaction" => Ok(SynchronizationMode::OnActualTransaction),
            "never" => Ok(SynchronizationMode::Never),
            _ => Err(TransactionError::illegal_state(format!(
                "Unknown transaction synchronization mode '{}'",
                s
            ))),
        }
    }
}

/// 事务管理器的行为开关
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    pub synchronization: SynchronizationMode,
    /// 定义没有指定超时时使用
    pub default_timeout: Option<u64>,
    pub nested_transaction_allowed: bool,
    /// 加入已有事务时校验隔离级别和只读设置是否兼容
    pub validate_existing_transaction: bool,
    /// 参与者失败时是否把整个事务标记为只回滚
    pub global_rollback_on_participation_failure: bool,
    /// 参与者提交时发现全局只回滚就立即报错，而不是等外层提交
    pub fail_early_on_global_rollback_only: bool,
    /// 提交失败后是否尝试回滚
    pub rollback_on_commit_failure: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            synchronization: SynchronizationMode::Always,
            default_timeout: None,
            nested_transaction_allowed: false,
            validate_existing_transaction: false,
            global_rollback_on_participation_failure: true,
            fail_early_on_global_rollback_only: false,
            rollback_on_commit_failure: false,
        }
    }
}

/// 提交过程中的失败
enum CommitFailure {
    /// 全局只回滚，事务实际被回滚
    UnexpectedRollback,
    /// 资源提交或释放保存点失败
    Completion(TransactionError),
    /// before_commit 回调失败
    Callback(TransactionError),
}

/// 通用传播引擎
pub struct TransactionManager<B: TransactionBackend> {
    backend: B,
    settings: ManagerSettings,
}

impl<B: TransactionBackend> TransactionManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            settings: ManagerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ManagerSettings {
        &mut self.settings
    }

    pub fn set_nested_transaction_allowed(&mut self, allowed: bool) {
        self.settings.nested_transaction_allowed = allowed;
    }

    pub fn set_synchronization(&mut self, mode: SynchronizationMode) {
        self.settings.synchronization = mode;
    }

    /// 应用配置中给出的开关，未给出的保持不变
    pub fn configure(&mut self, properties: &TransactionProperties) {
        let settings = &mut self.settings;
        if let Some(timeout) = properties.default_timeout {
            settings.default_timeout = Some(timeout);
        }
        if let Some(allowed) = properties.nested_transaction_allowed {
            settings.nested_transaction_allowed = allowed;
        }
        if let Some(validate) = properties.validate_existing_transaction {
            settings.validate_existing_transaction = validate;
        }
        if let Some(global) = properties.global_rollback_on_participation_failure {
            settings.global_rollback_on_participation_failure = global;
        }
        if let Some(fail_early) = properties.fail_early_on_global_rollback_only {
            settings.fail_early_on_global_rollback_only = fail_early;
        }
        if let Some(rollback) = properties.rollback_on_commit_failure {
            settings.rollback_on_commit_failure = rollback;
        }
        if let Some(mode) = properties.synchronization {
            settings.synchronization = mode;
        }
        tracing::debug!("Configured transaction manager [{}]: {:?}", self.backend.name(), self.settings);
    }

    fn effective_definition(&self, definition: &TransactionDefinition) -> TransactionDefinition {
        let mut definition = definition.clone();
        if definition.timeout_seconds().is_none() {
            definition.set_timeout_seconds(self.settings.default_timeout);
        }
        definition
    }

    fn transaction_of(status: &mut TransactionStatus) -> TransactionResult<&mut B::Transaction> {
        status
            .transaction_mut()
            .and_then(|transaction| AsAny::as_any_mut(transaction.as_mut()).downcast_mut::<B::Transaction>())
            .ok_or_else(|| {
                TransactionError::illegal_state("Transaction status was not created by this transaction manager")
            })
    }

    fn handle_existing_transaction(
        &self,
        ctx: &mut CallContext,
        definition: &TransactionDefinition,
        mut transaction: B::Transaction,
    ) -> TransactionResult<TransactionStatus> {
        let name = definition.name().unwrap_or_default();
        match definition.propagation() {
            Propagation::Never => {
                return Err(TransactionError::illegal_state(
                    "Existing transaction found for transaction marked with propagation 'never'",
                ))
            }
            Propagation::NotSupported => {
                tracing::debug!("Suspending current transaction");
                let suspended = self.suspend(ctx, Some(&mut transaction))?;
                let new_synchronization = self.settings.synchronization == SynchronizationMode::Always;
                return self.prepare_transaction_status(ctx, definition, None, false, new_synchronization, suspended);
            }
            Propagation::RequiresNew => {
                tracing::debug!("Suspending current transaction, creating new transaction with name [{}]", name);
                let suspended = self.suspend(ctx, Some(&mut transaction))?;
                return self.start_transaction(ctx, definition, transaction, suspended);
            }
            Propagation::Nested => {
                if !self.settings.nested_transaction_allowed {
                    return Err(TransactionError::NestedTransactionNotSupported(
                        "Transaction manager does not allow nested transactions by default - \
                         specify 'nestedTransactionAllowed' property with value 'true'"
                            .to_string(),
                    ));
                }
                if self.backend.supports_savepoints(&transaction) {
                    tracing::debug!("Creating nested transaction with name [{}]", name);
                    let savepoint = self.backend.create_savepoint(ctx, &mut transaction)?;
                    let mut status = self.prepare_transaction_status(
                        ctx,
                        definition,
                        Some(Box::new(transaction)),
                        false,
                        false,
                        None,
                    )?;
                    status.set_savepoint(Box::new(savepoint));
                    return Ok(status);
                }
                tracing::debug!(
                    "Savepoints not supported by [{}] - nested transaction [{}] participates in existing transaction",
                    self.backend.name(),
                    name
                );
            }
            Propagation::Required | Propagation::Supports | Propagation::Mandatory => {}
        }

        tracing::debug!("Participating in existing transaction");
        if self.settings.validate_existing_transaction {
            self.validate_participation(ctx, definition)?;
        }
        let new_synchronization = self.settings.synchronization != SynchronizationMode::Never;
        self.prepare_transaction_status(
            ctx,
            definition,
            Some(Box::new(transaction)),
            false,
            new_synchronization,
            None,
        )
    }

    fn validate_participation(&self, ctx: &CallContext, definition: &TransactionDefinition) -> TransactionResult<()> {
        if definition.isolation() != Isolation::Default {
            let current = Tsm::current_transaction_isolation_level(ctx);
            if current != Some(definition.isolation()) {
                return Err(TransactionError::illegal_state(format!(
                    "Participating transaction with definition [{}] specifies isolation level which is incompatible \
                     with existing transaction: {}",
                    definition,
                    current.map_or("(unknown)", |isolation| isolation.as_str())
                )));
            }
        }
        if !definition.is_read_only() && Tsm::is_current_transaction_read_only(ctx) {
            return Err(TransactionError::illegal_state(format!(
                "Participating transaction with definition [{}] is not marked as read-only but existing transaction is",
                definition
            )));
        }
        Ok(())
    }

    fn start_transaction(
        &self,
        ctx: &mut CallContext,
        definition: &TransactionDefinition,
        mut transaction: B::Transaction,
        suspended: Option<SuspendedResourcesHolder>,
    ) -> TransactionResult<TransactionStatus> {
        if let Err(e) = self.backend.begin(ctx, &mut transaction, definition) {
            return Err(self.resume_after_begin_failure(ctx, suspended, e));
        }
        let new_synchronization = self.settings.synchronization != SynchronizationMode::Never;
        self.prepare_transaction_status(
            ctx,
            definition,
            Some(Box::new(transaction)),
            true,
            new_synchronization,
            suspended,
        )
    }

    fn resume_after_begin_failure(
        &self,
        ctx: &mut CallContext,
        suspended: Option<SuspendedResourcesHolder>,
        begin_error: TransactionError,
    ) -> TransactionError {
        match self.resume(ctx, suspended) {
            Ok(()) => begin_error,
            Err(resume_error) => {
                tracing::error!(
                    "Inner transaction begin exception overridden by outer transaction resume exception: {}",
                    begin_error
                );
                resume_error
            }
        }
    }

    fn prepare_transaction_status(
        &self,
        ctx: &mut CallContext,
        definition: &TransactionDefinition,
        transaction: Option<Box<dyn TransactionObject>>,
        new_transaction: bool,
        new_synchronization: bool,
        suspended: Option<SuspendedResourcesHolder>,
    ) -> TransactionResult<TransactionStatus> {
        let actual_new_synchronization = new_synchronization && !Tsm::is_synchronization_active(ctx);
        let status = TransactionStatus::new(
            transaction,
            new_transaction,
            actual_new_synchronization,
            definition.is_read_only(),
            definition.name().map(str::to_string),
            suspended,
        );

        if actual_new_synchronization {
            let isolation = (definition.isolation() != Isolation::Default).then_some(definition.isolation());
            Tsm::set_actual_transaction_active(ctx, status.has_transaction());
            Tsm::set_current_transaction_isolation_level(ctx, isolation);
            Tsm::set_current_transaction_read_only(ctx, definition.is_read_only());
            Tsm::set_current_transaction_name(ctx, definition.name().map(str::to_string));
            Tsm::init_synchronization(ctx)?;
        }
        Ok(status)
    }

    /// 挂起当前事务和同步回调
    fn suspend(
        &self,
        ctx: &mut CallContext,
        transaction: Option<&mut B::Transaction>,
    ) -> TransactionResult<Option<SuspendedResourcesHolder>> {
        if Tsm::is_synchronization_active(ctx) {
            let synchronizations = self.suspend_synchronizations(ctx)?;
            let resources = match transaction {
                Some(transaction) => match self.backend.suspend(ctx, transaction) {
                    Ok(resources) => Some(Box::new(resources) as Box<dyn Any + Send>),
                    Err(e) => {
                        self.resume_synchronizations(ctx, synchronizations)?;
                        return Err(e);
                    }
                },
                None => None,
            };

            let holder = SuspendedResourcesHolder {
                resources,
                synchronizations: Some(synchronizations),
                name: Tsm::current_transaction_name(ctx),
                read_only: Tsm::is_current_transaction_read_only(ctx),
                isolation: Tsm::current_transaction_isolation_level(ctx),
                was_active: Tsm::is_actual_transaction_active(ctx),
            };
            Tsm::set_current_transaction_name(ctx, None);
            Tsm::set_current_transaction_read_only(ctx, false);
            Tsm::set_current_transaction_isolation_level(ctx, None);
            Tsm::set_actual_transaction_active(ctx, false);
            Ok(Some(holder))
        } else if let Some(transaction) = transaction {
            let resources = self.backend.suspend(ctx, transaction)?;
            Ok(Some(SuspendedResourcesHolder {
                resources: Some(Box::new(resources)),
                synchronizations: None,
                name: None,
                read_only: false,
                isolation: None,
                was_active: false,
            }))
        } else {
            Ok(None)
        }
    }

    fn resume(&self, ctx: &mut CallContext, holder: Option<SuspendedResourcesHolder>) -> TransactionResult<()> {
        let Some(holder) = holder else {
            return Ok(());
        };
        if let Some(resources) = holder.resources {
            let suspended = resources.downcast::<B::Suspended>().map_err(|_| {
                TransactionError::illegal_state("Suspended resources were not created by this transaction manager")
            })?;
            self.backend.resume(ctx, *suspended)?;
        }
        if let Some(synchronizations) = holder.synchronizations {
            Tsm::set_actual_transaction_active(ctx, holder.was_active);
            Tsm::set_current_transaction_isolation_level(ctx, holder.isolation);
            Tsm::set_current_transaction_read_only(ctx, holder.read_only);
            Tsm::set_current_transaction_name(ctx, holder.name);
            self.resume_synchronizations(ctx, synchronizations)?;
        }
        Ok(())
    }

    fn suspend_synchronizations(
        &self,
        ctx: &mut CallContext,
    ) -> TransactionResult<Vec<Arc<dyn TransactionSynchronization>>> {
        let synchronizations = Tsm::synchronizations(ctx)?;
        for synchronization in &synchronizations {
            synchronization.suspend(ctx);
        }
        Tsm::clear_synchronization(ctx)?;
        Ok(synchronizations)
    }

    fn resume_synchronizations(
        &self,
        ctx: &mut CallContext,
        synchronizations: Vec<Arc<dyn TransactionSynchronization>>,
    ) -> TransactionResult<()> {
        Tsm::init_synchronization(ctx)?;
        for synchronization in synchronizations {
            synchronization.resume(ctx);
            Tsm::register_synchronization(ctx, synchronization)?;
        }
        Ok(())
    }

    fn process_commit(&self, ctx: &mut CallContext, status: &mut TransactionStatus) -> TransactionResult<()> {
        let mut before_completion_invoked = false;
        let result = match self.commit_steps(ctx, status, &mut before_completion_invoked) {
            Ok(()) => {
                let after_commit = if status.is_new_synchronization() {
                    tracing::trace!("Triggering afterCommit synchronization");
                    synchronization::trigger_after_commit(ctx)
                } else {
                    Ok(())
                };
                self.trigger_after_completion(ctx, status, CompletionStatus::Committed);
                after_commit
            }
            Err(CommitFailure::UnexpectedRollback) => {
                self.trigger_after_completion(ctx, status, CompletionStatus::RolledBack);
                Err(TransactionError::UnexpectedRollback(
                    "Transaction silently rolled back because it has been marked as rollback-only".to_string(),
                ))
            }
            Err(CommitFailure::Completion(e)) => {
                if self.settings.rollback_on_commit_failure {
                    Err(self.rollback_on_commit_failure(ctx, status, e))
                } else {
                    self.trigger_after_completion(ctx, status, CompletionStatus::Unknown);
                    Err(e)
                }
            }
            Err(CommitFailure::Callback(e)) => {
                if !before_completion_invoked && status.is_new_synchronization() {
                    synchronization::trigger_before_completion(ctx);
                }
                Err(self.rollback_on_commit_failure(ctx, status, e))
            }
        };
        self.finish(ctx, status, result)
    }

    fn commit_steps(
        &self,
        ctx: &mut CallContext,
        status: &mut TransactionStatus,
        before_completion_invoked: &mut bool,
    ) -> Result<(), CommitFailure> {
        if status.is_new_synchronization() {
            tracing::trace!("Triggering beforeCommit synchronization");
            synchronization::trigger_before_commit(ctx, status.is_read_only()).map_err(CommitFailure::Callback)?;
            tracing::trace!("Triggering beforeCompletion synchronization");
            synchronization::trigger_before_completion(ctx);
        }
        *before_completion_invoked = true;

        let unexpected_rollback = if status.has_savepoint() {
            tracing::debug!("Releasing transaction savepoint");
            let unexpected = status.is_global_rollback_only();
            self.release_held_savepoint(ctx, status).map_err(CommitFailure::Completion)?;
            unexpected
        } else if status.is_new_transaction() {
            tracing::debug!("Initiating transaction commit");
            let unexpected = status.is_global_rollback_only();
            let transaction = Self::transaction_of(status).map_err(CommitFailure::Completion)?;
            self.backend.commit(ctx, transaction).map_err(CommitFailure::Completion)?;
            unexpected
        } else {
            self.settings.fail_early_on_global_rollback_only && status.is_global_rollback_only()
        };

        if unexpected_rollback {
            return Err(CommitFailure::UnexpectedRollback);
        }
        Ok(())
    }

    /// 提交失败后回滚，返回最终要报告的错误
    fn rollback_on_commit_failure(
        &self,
        ctx: &mut CallContext,
        status: &mut TransactionStatus,
        commit_error: TransactionError,
    ) -> TransactionError {
        let rollback_result = if status.is_new_transaction() {
            tracing::debug!("Initiating transaction rollback after commit exception");
            Self::transaction_of(status).and_then(|transaction| self.backend.rollback(ctx, transaction))
        } else if status.has_transaction() && self.settings.global_rollback_on_participation_failure {
            tracing::debug!("Marking existing transaction as rollback-only after commit exception");
            Self::transaction_of(status).and_then(|transaction| self.backend.set_rollback_only(ctx, transaction))
        } else {
            Ok(())
        };

        match rollback_result {
            Ok(()) => {
                self.trigger_after_completion(ctx, status, CompletionStatus::RolledBack);
                commit_error
            }
            Err(rollback_error) => {
                tracing::error!("Commit exception overridden by rollback exception: {}", commit_error);
                self.trigger_after_completion(ctx, status, CompletionStatus::Unknown);
                rollback_error
            }
        }
    }

    fn process_rollback(
        &self,
        ctx: &mut CallContext,
        status: &mut TransactionStatus,
        unexpected: bool,
    ) -> TransactionResult<()> {
        let result = match self.rollback_steps(ctx, status, unexpected) {
            Ok(unexpected_rollback) => {
                self.trigger_after_completion(ctx, status, CompletionStatus::RolledBack);
                if unexpected_rollback {
                    Err(TransactionError::UnexpectedRollback(
                        "Transaction rolled back because it has been marked as rollback-only".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
            Err(e) => {
                self.trigger_after_completion(ctx, status, CompletionStatus::Unknown);
                Err(e)
            }
        };
        self.finish(ctx, status, result)
    }

    /// 执行回滚，返回是否仍需报告意外回滚
    fn rollback_steps(
        &self,
        ctx: &mut CallContext,
        status: &mut TransactionStatus,
        unexpected: bool,
    ) -> TransactionResult<bool> {
        if status.is_new_synchronization() {
            tracing::trace!("Triggering beforeCompletion synchronization");
            synchronization::trigger_before_completion(ctx);
        }

        if status.has_savepoint() {
            tracing::debug!("Rolling back transaction to savepoint");
            self.rollback_to_held_savepoint(ctx, status)?;
            return Ok(unexpected);
        }
        if status.is_new_transaction() {
            tracing::debug!("Initiating transaction rollback");
            let transaction = Self::transaction_of(status)?;
            self.backend.rollback(ctx, transaction)?;
            return Ok(unexpected);
        }

        if status.has_transaction() {
            if status.is_local_rollback_only() || self.settings.global_rollback_on_participation_failure {
                tracing::debug!("Participating transaction failed - marking existing transaction as rollback-only");
                let transaction = Self::transaction_of(status)?;
                self.backend.set_rollback_only(ctx, transaction)?;
            } else {
                tracing::debug!(
                    "Participating transaction failed - letting transaction originator decide on rollback"
                );
            }
        } else {
            tracing::debug!("Should roll back transaction but cannot - no transaction available");
        }
        Ok(unexpected && self.settings.fail_early_on_global_rollback_only)
    }

    fn trigger_after_completion(&self, ctx: &mut CallContext, status: &TransactionStatus, completion: CompletionStatus) {
        if !status.is_new_synchronization() {
            return;
        }
        let mut synchronizations = Tsm::take_synchronizations(ctx).unwrap_or_default();
        synchronizations.sort_by_key(|s| s.order());

        if !status.has_transaction() || status.is_new_transaction() {
            synchronization::invoke_after_completion(ctx, &synchronizations, completion);
        } else if !synchronizations.is_empty() {
            tracing::debug!(
                "Cannot register after-completion synchronization with existing transaction - \
                 processing after-completion callbacks immediately, with outcome status 'unknown'"
            );
            synchronization::invoke_after_completion(ctx, &synchronizations, CompletionStatus::Unknown);
        }
    }

    /// 完成后清理，清理失败不覆盖已有的错误
    fn finish(
        &self,
        ctx: &mut CallContext,
        status: &mut TransactionStatus,
        result: TransactionResult<()>,
    ) -> TransactionResult<()> {
        match (result, self.cleanup_after_completion(ctx, status)) {
            (Err(e), Err(cleanup_error)) => {
                tracing::error!("Transaction cleanup failed after completion error: {}", cleanup_error);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn cleanup_after_completion(&self, ctx: &mut CallContext, status: &mut TransactionStatus) -> TransactionResult<()> {
        status.set_completed();
        if status.is_new_synchronization() {
            Tsm::clear(ctx);
        }
        if status.is_new_transaction() {
            if let Ok(transaction) = Self::transaction_of(status) {
                self.backend.cleanup_after_completion(ctx, transaction);
            }
        }
        if let Some(suspended) = status.take_suspended() {
            tracing::debug!("Resuming suspended transaction after completion of inner transaction");
            self.resume(ctx, Some(suspended))?;
        }
        Ok(())
    }

    fn take_held_savepoint(status: &mut TransactionStatus) -> TransactionResult<B::Savepoint> {
        let savepoint = status
            .take_savepoint()
            .ok_or_else(|| TransactionError::illegal_state("Cannot roll back to savepoint - no savepoint associated with current transaction"))?;
        savepoint
            .downcast::<B::Savepoint>()
            .map(|savepoint| *savepoint)
            .map_err(|_| TransactionError::illegal_state("Savepoint was not created by this transaction manager"))
    }

    fn rollback_to_held_savepoint(&self, ctx: &mut CallContext, status: &mut TransactionStatus) -> TransactionResult<()> {
        let savepoint = Self::take_held_savepoint(status)?;
        let transaction = Self::transaction_of(status)?;
        self.backend.rollback_to_savepoint(ctx, transaction, &savepoint)?;
        self.backend.release_savepoint(ctx, transaction, savepoint)
    }

    fn release_held_savepoint(&self, ctx: &mut CallContext, status: &mut TransactionStatus) -> TransactionResult<()> {
        let savepoint = Self::take_held_savepoint(status)?;
        let transaction = Self::transaction_of(status)?;
        self.backend.release_savepoint(ctx, transaction, savepoint)
    }

    fn savepoint_transaction(status: &mut TransactionStatus) -> TransactionResult<&mut B::Transaction> {
        if status.is_completed() {
            return Err(TransactionError::illegal_state(
                "Transaction is already completed - savepoint operations are no longer valid",
            ));
        }
        if !status.has_transaction() {
            return Err(TransactionError::NestedTransactionNotSupported(
                "Transaction status has no transaction object - savepoints are not available".to_string(),
            ));
        }
        Self::transaction_of(status)
    }
}

impl<B: TransactionBackend> PlatformTransactionManager for TransactionManager<B> {
    fn get_transaction(
        &self,
        ctx: &mut CallContext,
        definition: &TransactionDefinition,
    ) -> TransactionResult<TransactionStatus> {
        let definition = self.effective_definition(definition);
        let transaction = self.backend.get_transaction(ctx)?;

        if self.backend.is_existing_transaction(&transaction) {
            return self.handle_existing_transaction(ctx, &definition, transaction);
        }

        match definition.propagation() {
            Propagation::Mandatory => Err(TransactionError::illegal_state(
                "No existing transaction found for transaction marked with propagation 'mandatory'",
            )),
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested => {
                let suspended = self.suspend(ctx, None)?;
                tracing::debug!(
                    "Creating new transaction with name [{}]: {}",
                    definition.name().unwrap_or_default(),
                    definition
                );
                self.start_transaction(ctx, &definition, transaction, suspended)
            }
            Propagation::Supports | Propagation::NotSupported | Propagation::Never => {
                if definition.isolation() != Isolation::Default {
                    tracing::warn!(
                        "Custom isolation level specified but no actual transaction initiated; \
                         isolation level will effectively be ignored: {}",
                        definition
                    );
                }
                let new_synchronization = self.settings.synchronization == SynchronizationMode::Always;
                self.prepare_transaction_status(ctx, &definition, None, true, new_synchronization, None)
            }
        }
    }

    fn commit(&self, ctx: &mut CallContext, status: &mut TransactionStatus) -> TransactionResult<()> {
        if status.is_completed() {
            return Err(TransactionError::illegal_state(COMPLETED_MESSAGE));
        }
        if status.is_local_rollback_only() {
            tracing::debug!("Transactional code has requested rollback");
            return self.process_rollback(ctx, status, false);
        }
        if !self.backend.should_commit_on_global_rollback_only() && status.is_global_rollback_only() {
            tracing::debug!("Global transaction is marked as rollback-only but transactional code requested commit");
            return self.process_rollback(ctx, status, true);
        }
        self.process_commit(ctx, status)
    }

    fn rollback(&self, ctx: &mut CallContext, status: &mut TransactionStatus) -> TransactionResult<()> {
        if status.is_completed() {
            return Err(TransactionError::illegal_state(COMPLETED_MESSAGE));
        }
        self.process_rollback(ctx, status, false)
    }

    fn create_savepoint(&self, ctx: &mut CallContext, status: &mut TransactionStatus) -> TransactionResult<Savepoint> {
        let transaction = Self::savepoint_transaction(status)?;
        if !self.backend.supports_savepoints(transaction) {
            return Err(TransactionError::NestedTransactionNotSupported(format!(
                "Transaction object of [{}] does not support savepoints",
                self.backend.name()
            )));
        }
        let savepoint = self.backend.create_savepoint(ctx, transaction)?;
        Ok(Savepoint(Box::new(savepoint)))
    }

    fn rollback_to_savepoint(
        &self,
        ctx: &mut CallContext,
        status: &mut TransactionStatus,
        savepoint: &Savepoint,
    ) -> TransactionResult<()> {
        let transaction = Self::savepoint_transaction(status)?;
        let savepoint = savepoint
            .0
            .downcast_ref::<B::Savepoint>()
            .ok_or_else(|| TransactionError::illegal_state("Savepoint was not created by this transaction manager"))?;
        self.backend.rollback_to_savepoint(ctx, transaction, savepoint)
    }

    fn release_savepoint(
        &self,
        ctx: &mut CallContext,
        status: &mut TransactionStatus,
        savepoint: Savepoint,
    ) -> TransactionResult<()> {
        let transaction = Self::savepoint_transaction(status)?;
        let savepoint = savepoint
            .0
            .downcast::<B::Savepoint>()
            .map_err(|_| TransactionError::illegal_state("Savepoint was not created by this transaction manager"))?;
        self.backend.release_savepoint(ctx, transaction, *savepoint)
    }

    fn name(&self) -> &str {
        self.backend.name()
    }
}

impl<B: TransactionBackend> Bean for TransactionManager<B> {}

impl<B: TransactionBackend> fmt::Debug for TransactionManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("backend", &self.backend.name())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::DataSourceTransactionManager;
    use crate::test_support::{RecordingDataSource, SyncLog};

    fn manager(data_source: &RecordingDataSource) -> DataSourceTransactionManager {
        DataSourceTransactionManager::with_data_source(Arc::new(data_source.clone()))
    }

    fn definition(propagation: Propagation) -> TransactionDefinition {
        TransactionDefinition::new()
            .with_propagation(propagation)
            .with_name(format!("{:?}", propagation))
    }

    mod propagation {
        use super::*;

        #[test]
        fn test_required_starts_and_commits() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut status = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            assert!(status.is_new_transaction());
            assert!(Tsm::is_actual_transaction_active(&ctx));
            assert_eq!(Tsm::current_transaction_name(&ctx).as_deref(), Some("Required"));

            manager.commit(&mut ctx, &mut status).unwrap();
            assert!(status.is_completed());
            assert!(!Tsm::is_synchronization_active(&ctx));
            assert_eq!(
                data_source.operations(),
                vec!["c1:open", "c1:set_auto_commit(false)", "c1:commit", "c1:set_auto_commit(true)", "c1:close"]
            );
        }

        #[test]
        fn test_required_joins_existing_transaction() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut outer = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let mut inner = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            assert!(inner.has_transaction());
            assert!(!inner.is_new_transaction());
            assert!(!inner.is_new_synchronization());

            manager.commit(&mut ctx, &mut inner).unwrap();
            assert!(Tsm::is_synchronization_active(&ctx));
            manager.commit(&mut ctx, &mut outer).unwrap();

            // 只有一个物理连接和一次提交
            assert_eq!(data_source.opened(), 1);
            assert_eq!(data_source.count("commit"), 1);
        }

        #[test]
        fn test_requires_new_suspends_and_resumes() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();
            let sync_log = SyncLog::default();

            let mut outer = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            Tsm::register_synchronization(&mut ctx, sync_log.synchronization("outer")).unwrap();

            let mut inner = manager.get_transaction(&mut ctx, &definition(Propagation::RequiresNew)).unwrap();
            assert!(inner.is_new_transaction());
            assert!(inner.has_suspended_resources());
            assert_eq!(Tsm::current_transaction_name(&ctx).as_deref(), Some("RequiresNew"));
            assert_eq!(Tsm::synchronizations(&ctx).unwrap().len(), 0);

            manager.rollback(&mut ctx, &mut inner).unwrap();
            assert_eq!(Tsm::current_transaction_name(&ctx).as_deref(), Some("Required"));
            assert_eq!(Tsm::synchronizations(&ctx).unwrap().len(), 1);

            manager.commit(&mut ctx, &mut outer).unwrap();
            assert_eq!(
                data_source.operations(),
                vec![
                    "c1:open",
                    "c1:set_auto_commit(false)",
                    "c2:open",
                    "c2:set_auto_commit(false)",
                    "c2:rollback",
                    "c2:set_auto_commit(true)",
                    "c2:close",
                    "c1:commit",
                    "c1:set_auto_commit(true)",
                    "c1:close",
                ]
            );
            assert_eq!(
                sync_log.entries(),
                vec![
                    "outer:suspend",
                    "outer:resume",
                    "outer:before_commit",
                    "outer:before_completion",
                    "outer:after_commit",
                    "outer:after_completion(COMMITTED)",
                ]
            );
        }

        #[test]
        fn test_mandatory_without_transaction_fails() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let error = manager
                .get_transaction(&mut ctx, &definition(Propagation::Mandatory))
                .unwrap_err();
            assert!(matches!(error, TransactionError::IllegalTransactionState(ref m) if m.contains("'mandatory'")));
            assert_eq!(data_source.opened(), 0);
        }

        #[test]
        fn test_never_with_transaction_fails() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut outer = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let error = manager.get_transaction(&mut ctx, &definition(Propagation::Never)).unwrap_err();
            assert!(matches!(error, TransactionError::IllegalTransactionState(ref m) if m.contains("'never'")));
            manager.commit(&mut ctx, &mut outer).unwrap();
        }

        #[test]
        fn test_supports_without_transaction_is_empty() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut status = manager.get_transaction(&mut ctx, &definition(Propagation::Supports)).unwrap();
            assert!(!status.has_transaction());
            assert!(status.is_new_synchronization());
            assert!(!Tsm::is_actual_transaction_active(&ctx));
            manager.commit(&mut ctx, &mut status).unwrap();
            assert_eq!(data_source.opened(), 0);
        }

        #[test]
        fn test_not_supported_suspends_existing() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut outer = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let mut inner = manager
                .get_transaction(&mut ctx, &definition(Propagation::NotSupported))
                .unwrap();
            assert!(!inner.has_transaction());
            assert!(!Tsm::is_actual_transaction_active(&ctx));
            assert!(!ctx.has_resource(&data_source.resource_key()));

            manager.commit(&mut ctx, &mut inner).unwrap();
            assert!(Tsm::is_actual_transaction_active(&ctx));
            assert!(ctx.has_resource(&data_source.resource_key()));
            manager.commit(&mut ctx, &mut outer).unwrap();
            assert_eq!(data_source.count("commit"), 1);
        }

        #[test]
        fn test_nested_uses_savepoint() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut outer = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let mut nested = manager.get_transaction(&mut ctx, &definition(Propagation::Nested)).unwrap();
            assert!(nested.has_savepoint());
            assert!(!nested.is_new_transaction());

            manager.rollback(&mut ctx, &mut nested).unwrap();
            assert!(!outer.is_rollback_only());
            manager.commit(&mut ctx, &mut outer).unwrap();

            assert_eq!(
                data_source.operations(),
                vec![
                    "c1:open",
                    "c1:set_auto_commit(false)",
                    "c1:set_savepoint(SAVEPOINT_1)",
                    "c1:rollback_to_savepoint(SAVEPOINT_1)",
                    "c1:release_savepoint(SAVEPOINT_1)",
                    "c1:commit",
                    "c1:set_auto_commit(true)",
                    "c1:close",
                ]
            );
        }

        #[test]
        fn test_nested_commit_releases_savepoint() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut outer = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let mut nested = manager.get_transaction(&mut ctx, &definition(Propagation::Nested)).unwrap();
            manager.commit(&mut ctx, &mut nested).unwrap();
            manager.commit(&mut ctx, &mut outer).unwrap();
            assert_eq!(data_source.count("release_savepoint"), 1);
            assert_eq!(data_source.count("rollback"), 0);
        }

        #[test]
        fn test_nested_without_savepoint_support_participates() {
            let data_source = RecordingDataSource::new("main").without_savepoints();
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut outer = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let mut nested = manager.get_transaction(&mut ctx, &definition(Propagation::Nested)).unwrap();
            assert!(nested.has_transaction());
            assert!(!nested.has_savepoint());
            assert!(!nested.is_new_transaction());

            manager.commit(&mut ctx, &mut nested).unwrap();
            manager.commit(&mut ctx, &mut outer).unwrap();
            assert_eq!(data_source.count("set_savepoint"), 0);
            assert_eq!(data_source.count("commit"), 1);
        }

        #[test]
        fn test_nested_rejected_when_not_allowed() {
            let data_source = RecordingDataSource::new("main");
            let mut manager = manager(&data_source);
            manager.set_nested_transaction_allowed(false);
            let mut ctx = CallContext::new();

            let mut outer = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let error = manager.get_transaction(&mut ctx, &definition(Propagation::Nested)).unwrap_err();
            assert!(matches!(error, TransactionError::NestedTransactionNotSupported(_)));
            manager.rollback(&mut ctx, &mut outer).unwrap();
        }

        #[test]
        fn test_nested_without_outer_starts_new_transaction() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut status = manager.get_transaction(&mut ctx, &definition(Propagation::Nested)).unwrap();
            assert!(status.is_new_transaction());
            assert!(!status.has_savepoint());
            manager.commit(&mut ctx, &mut status).unwrap();
        }
    }

    mod completion {
        use super::*;

        #[test]
        fn test_commit_twice_is_misuse() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut status = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            manager.commit(&mut ctx, &mut status).unwrap();
            let error = manager.commit(&mut ctx, &mut status).unwrap_err();
            assert!(matches!(error, TransactionError::IllegalTransactionState(ref m) if m.contains("already completed")));
            assert!(manager.rollback(&mut ctx, &mut status).is_err());
            assert!(manager.create_savepoint(&mut ctx, &mut status).is_err());
            assert_eq!(data_source.count("commit"), 1);
        }

        #[test]
        fn test_commit_on_rollback_only_rolls_back() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut status = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            status.set_rollback_only();
            manager.commit(&mut ctx, &mut status).unwrap();
            assert!(status.is_completed());
            assert_eq!(data_source.count("commit"), 0);
            assert_eq!(data_source.count("rollback"), 1);
        }

        #[test]
        fn test_participant_rollback_marks_global_rollback_only() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut outer = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let mut inner = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            manager.rollback(&mut ctx, &mut inner).unwrap();
            assert!(outer.is_global_rollback_only());
            assert!(!outer.is_local_rollback_only());

            let error = manager.commit(&mut ctx, &mut outer).unwrap_err();
            assert!(matches!(error, TransactionError::UnexpectedRollback(_)));
            assert_eq!(data_source.count("commit"), 0);
            assert_eq!(data_source.count("rollback"), 1);
            assert!(outer.is_completed());
        }

        #[test]
        fn test_participation_failure_can_leave_decision_to_originator() {
            let data_source = RecordingDataSource::new("main");
            let mut manager = manager(&data_source);
            manager.settings_mut().global_rollback_on_participation_failure = false;
            let mut ctx = CallContext::new();

            let mut outer = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let mut inner = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            manager.rollback(&mut ctx, &mut inner).unwrap();
            assert!(!outer.is_rollback_only());
            manager.commit(&mut ctx, &mut outer).unwrap();
            assert_eq!(data_source.count("commit"), 1);
        }

        #[test]
        fn test_fail_early_on_global_rollback_only() {
            let data_source = RecordingDataSource::new("main");
            let mut manager = manager(&data_source);
            manager.settings_mut().fail_early_on_global_rollback_only = true;
            let mut ctx = CallContext::new();

            let mut outer = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let mut first = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            manager.rollback(&mut ctx, &mut first).unwrap();

            let mut second = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let error = manager.commit(&mut ctx, &mut second).unwrap_err();
            assert!(matches!(error, TransactionError::UnexpectedRollback(_)));
            assert!(manager.commit(&mut ctx, &mut outer).is_err());
        }

        #[test]
        fn test_commit_failure_reports_error_and_cleans_up() {
            let data_source = RecordingDataSource::new("main").failing_on("commit");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();
            let sync_log = SyncLog::default();

            let mut status = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            Tsm::register_synchronization(&mut ctx, sync_log.synchronization("s")).unwrap();
            let error = manager.commit(&mut ctx, &mut status).unwrap_err();
            assert!(matches!(error, TransactionError::System { .. }));
            assert!(status.is_completed());
            assert!(!ctx.has_resource(&data_source.resource_key()));
            assert_eq!(data_source.count("rollback"), 0);
            assert!(sync_log.entries().contains(&"s:after_completion(UNKNOWN)".to_string()));
        }

        #[test]
        fn test_rollback_on_commit_failure() {
            let data_source = RecordingDataSource::new("main").failing_on("commit");
            let mut manager = manager(&data_source);
            manager.settings_mut().rollback_on_commit_failure = true;
            let mut ctx = CallContext::new();

            let mut status = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            assert!(manager.commit(&mut ctx, &mut status).is_err());
            assert_eq!(data_source.count("rollback"), 1);
        }

        #[test]
        fn test_before_commit_failure_rolls_back() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();
            let sync_log = SyncLog::default();

            let mut status = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            Tsm::register_synchronization(&mut ctx, sync_log.failing_before_commit("s")).unwrap();
            let error = manager.commit(&mut ctx, &mut status).unwrap_err();
            assert!(matches!(error, TransactionError::Synchronization(_)));
            assert_eq!(data_source.count("commit"), 0);
            assert_eq!(data_source.count("rollback"), 1);
            assert_eq!(
                sync_log.entries(),
                vec!["s:before_commit", "s:before_completion", "s:after_completion(ROLLED_BACK)"]
            );
        }

        #[test]
        fn test_begin_failure_resumes_outer_transaction() {
            let data_source = RecordingDataSource::new("main").failing_on("open#2");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut outer = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let error = manager
                .get_transaction(&mut ctx, &definition(Propagation::RequiresNew))
                .unwrap_err();
            assert!(matches!(error, TransactionError::CannotCreateTransaction { .. }));
            assert!(ctx.has_resource(&data_source.resource_key()));
            assert_eq!(Tsm::current_transaction_name(&ctx).as_deref(), Some("Required"));
            manager.commit(&mut ctx, &mut outer).unwrap();
        }

        #[test]
        fn test_validate_existing_transaction() {
            let data_source = RecordingDataSource::new("main");
            let mut manager = manager(&data_source);
            manager.settings_mut().validate_existing_transaction = true;
            let mut ctx = CallContext::new();

            let read_only = definition(Propagation::Required).with_read_only(true);
            let mut outer = manager.get_transaction(&mut ctx, &read_only).unwrap();

            let error = manager
                .get_transaction(&mut ctx, &definition(Propagation::Required))
                .unwrap_err();
            assert!(matches!(error, TransactionError::IllegalTransactionState(ref m) if m.contains("read-only")));

            let serializable = read_only.clone().with_isolation(Isolation::Serializable);
            assert!(manager.get_transaction(&mut ctx, &serializable).is_err());
            manager.commit(&mut ctx, &mut outer).unwrap();
        }
    }

    mod savepoints {
        use super::*;

        #[test]
        fn test_programmatic_savepoints() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut status = manager.get_transaction(&mut ctx, &definition(Propagation::Required)).unwrap();
            let first = manager.create_savepoint(&mut ctx, &mut status).unwrap();
            manager.rollback_to_savepoint(&mut ctx, &mut status, &first).unwrap();
            manager.release_savepoint(&mut ctx, &mut status, first).unwrap();
            manager.commit(&mut ctx, &mut status).unwrap();

            assert_eq!(data_source.count("set_savepoint(SAVEPOINT_1)"), 1);
            assert_eq!(data_source.count("rollback_to_savepoint(SAVEPOINT_1)"), 1);
            assert_eq!(data_source.count("release_savepoint(SAVEPOINT_1)"), 1);
        }

        #[test]
        fn test_savepoint_requires_transaction() {
            let data_source = RecordingDataSource::new("main");
            let manager = manager(&data_source);
            let mut ctx = CallContext::new();

            let mut status = manager.get_transaction(&mut ctx, &definition(Propagation::Supports)).unwrap();
            let error = manager.create_savepoint(&mut ctx, &mut status).unwrap_err();
            assert!(matches!(error, TransactionError::NestedTransactionNotSupported(_)));
        }
    }

    #[test]
    fn test_configure_from_properties() {
        let data_source = RecordingDataSource::new("main");
        let mut manager = manager(&data_source);
        let properties = TransactionProperties::from_toml_str(
            "default-timeout = 15\nnested-transaction-allowed = false\nsynchronization = \"on-actual-transaction\"",
        )
        .unwrap();
        manager.configure(&properties);

        assert_eq!(manager.settings().default_timeout, Some(15));
        assert!(!manager.settings().nested_transaction_allowed);
        assert_eq!(manager.settings().synchronization, SynchronizationMode::OnActualTransaction);
        assert!(manager.settings().global_rollback_on_participation_failure);

        let mut ctx = CallContext::new();
        let mut status = manager.get_transaction(&mut ctx, &definition(Propagation::Supports)).unwrap();
        assert!(!Tsm::is_synchronization_active(&ctx));
        manager.commit(&mut ctx, &mut status).unwrap();
    }

    #[test]
    fn test_synchronization_mode_parsing() {
        assert_eq!("always".parse::<SynchronizationMode>().unwrap(), SynchronizationMode::Always);
        assert_eq!(
            "SYNCHRONIZATION_ON_ACTUAL_TRANSACTION".parse::<SynchronizationMode>().unwrap(),
            SynchronizationMode::OnActualTransaction
        );
        assert!("sometimes".parse::<SynchronizationMode>().is_err());
    }
}
