//! 事务同步
//!
//! 同步回调注册在 [`CallContext`] 上，事务管理器在提交、回滚、挂起、恢复时触发。
//! [`TransactionSynchronizationManager`] 同时保存当前事务的名称、只读、隔离级别等信息，
//! 资源持有者（例如数据源连接）借此决定是否把资源绑定到当前事务。

use std::fmt;
use std::sync::Arc;

use sprig_core::CallContext;

use crate::definition::Isolation;
use crate::error::{TransactionError, TransactionResult};

/// 事务完成状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Committed,
    RolledBack,
    /// 提交或回滚过程中发生错误，结果未知
    Unknown,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CompletionStatus::Committed => "COMMITTED",
            CompletionStatus::RolledBack => "ROLLED_BACK",
            CompletionStatus::Unknown => "UNKNOWN",
        };
        f.write_str(text)
    }
}

/// 事务同步回调，全部方法都有空的默认实现
pub trait TransactionSynchronization: Send + Sync {
    /// 数值越小越先执行
    fn order(&self) -> i32 {
        i32::MAX
    }

    /// 事务被挂起，应解绑自己持有的资源
    fn suspend(&self, _ctx: &mut CallContext) {}

    fn resume(&self, _ctx: &mut CallContext) {}

    /// 把会话中的修改刷到底层资源
    fn flush(&self, _ctx: &mut CallContext) {}

    /// 提交之前调用，失败会导致事务回滚
    fn before_commit(&self, _ctx: &mut CallContext, _read_only: bool) -> anyhow::Result<()> {
        Ok(())
    }

    /// 提交或回滚之前调用，失败只记录日志
    fn before_completion(&self, _ctx: &mut CallContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// 提交成功之后调用，失败会传给提交的调用方
    fn after_commit(&self, _ctx: &mut CallContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// 事务完成之后调用，失败只记录日志
    fn after_completion(&self, _ctx: &mut CallContext, _status: CompletionStatus) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct SynchronizationState {
    synchronizations: Option<Vec<Arc<dyn TransactionSynchronization>>>,
    current_name: Option<String>,
    read_only: bool,
    isolation: Option<Isolation>,
    actual_active: bool,
}

/// 当前调用上下文的事务同步状态
pub struct TransactionSynchronizationManager;

impl TransactionSynchronizationManager {
    fn state(ctx: &CallContext) -> Option<&SynchronizationState> {
        ctx.extension::<SynchronizationState>()
    }

    fn state_mut(ctx: &mut CallContext) -> &mut SynchronizationState {
        ctx.extension_or_default::<SynchronizationState>()
    }

    pub fn is_synchronization_active(ctx: &CallContext) -> bool {
        Self::state(ctx).map_or(false, |state| state.synchronizations.is_some())
    }

    pub fn init_synchronization(ctx: &mut CallContext) -> TransactionResult<()> {
        if Self::is_synchronization_active(ctx) {
            return Err(TransactionError::illegal_state(
                "Cannot activate transaction synchronization - already active",
            ));
        }
        tracing::trace!("Initializing transaction synchronization");
        Self::state_mut(ctx).synchronizations = Some(Vec::new());
        Ok(())
    }

    pub fn register_synchronization(
        ctx: &mut CallContext,
        synchronization: Arc<dyn TransactionSynchronization>,
    ) -> TransactionResult<()> {
        match Self::state_mut(ctx).synchronizations.as_mut() {
            Some(synchronizations) => {
                synchronizations.push(synchronization);
                Ok(())
            }
            None => Err(TransactionError::illegal_state(
                "Transaction synchronization is not active",
            )),
        }
    }

    /// 按 order 排序后的同步回调快照
    pub fn synchronizations(ctx: &CallContext) -> TransactionResult<Vec<Arc<dyn TransactionSynchronization>>> {
        let mut synchronizations = Self::state(ctx)
            .and_then(|state| state.synchronizations.clone())
            .ok_or_else(|| TransactionError::illegal_state("Transaction synchronization is not active"))?;
        synchronizations.sort_by_key(|s| s.order());
        Ok(synchronizations)
    }

    pub fn clear_synchronization(ctx: &mut CallContext) -> TransactionResult<()> {
        if !Self::is_synchronization_active(ctx) {
            return Err(TransactionError::illegal_state(
                "Cannot deactivate transaction synchronization - not active",
            ));
        }
        tracing::trace!("Clearing transaction synchronization");
        Self::state_mut(ctx).synchronizations = None;
        Ok(())
    }

    pub(crate) fn take_synchronizations(ctx: &mut CallContext) -> Option<Vec<Arc<dyn TransactionSynchronization>>> {
        ctx.extension_mut::<SynchronizationState>()
            .and_then(|state| state.synchronizations.take())
    }

    pub fn set_current_transaction_name(ctx: &mut CallContext, name: Option<String>) {
        Self::state_mut(ctx).current_name = name;
    }

    pub fn current_transaction_name(ctx: &CallContext) -> Option<String> {
        Self::state(ctx).and_then(|state| state.current_name.clone())
    }

    pub fn set_current_transaction_read_only(ctx: &mut CallContext, read_only: bool) {
        Self::state_mut(ctx).read_only = read_only;
    }

    pub fn is_current_transaction_read_only(ctx: &CallContext) -> bool {
        Self::state(ctx).map_or(false, |state| state.read_only)
    }

    pub fn set_current_transaction_isolation_level(ctx: &mut CallContext, isolation: Option<Isolation>) {
        Self::state_mut(ctx).isolation = isolation;
    }

    pub fn current_transaction_isolation_level(ctx: &CallContext) -> Option<Isolation> {
        Self::state(ctx).and_then(|state| state.isolation)
    }

    pub fn set_actual_transaction_active(ctx: &mut CallContext, active: bool) {
        Self::state_mut(ctx).actual_active = active;
    }

    /// 当前是否处在实际事务中（区别于仅激活了同步的非事务执行）
    pub fn is_actual_transaction_active(ctx: &CallContext) -> bool {
        Self::state(ctx).map_or(false, |state| state.actual_active)
    }

    /// 清除全部同步状态
    pub fn clear(ctx: &mut CallContext) {
        ctx.remove_extension::<SynchronizationState>();
    }
}

fn current_synchronizations(ctx: &CallContext) -> Vec<Arc<dyn TransactionSynchronization>> {
    TransactionSynchronizationManager::synchronizations(ctx).unwrap_or_default()
}

pub(crate) fn trigger_flush(ctx: &mut CallContext) {
    for synchronization in current_synchronizations(ctx) {
        synchronization.flush(ctx);
    }
}

pub(crate) fn trigger_before_commit(ctx: &mut CallContext, read_only: bool) -> TransactionResult<()> {
    for synchronization in current_synchronizations(ctx) {
        synchronization
            .before_commit(ctx, read_only)
            .map_err(|e| TransactionError::Synchronization(e.into()))?;
    }
    Ok(())
}

pub(crate) fn trigger_before_completion(ctx: &mut CallContext) {
    for synchronization in current_synchronizations(ctx) {
        if let Err(e) = synchronization.before_completion(ctx) {
            tracing::error!("TransactionSynchronization.beforeCompletion threw exception: {:#}", e);
        }
    }
}

pub(crate) fn trigger_after_commit(ctx: &mut CallContext) -> TransactionResult<()> {
    for synchronization in current_synchronizations(ctx) {
        synchronization
            .after_commit(ctx)
            .map_err(|e| TransactionError::Synchronization(e.into()))?;
    }
    Ok(())
}

/// 对给定的同步列表调用 after_completion；调用前同步可能已被清除
pub(crate) fn invoke_after_completion(
    ctx: &mut CallContext,
    synchronizations: &[Arc<dyn TransactionSynchronization>],
    status: CompletionStatus,
) {
    tracing::trace!("Triggering afterCompletion synchronization");
    for synchronization in synchronizations {
        if let Err(e) = synchronization.after_completion(ctx, status) {
            tracing::error!("TransactionSynchronization.afterCompletion threw exception: {:#}", e);
        }
    }
}
