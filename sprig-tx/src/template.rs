//! 编程式事务

use std::sync::Arc;

use sprig_core::{CallContext, InvocationError};

use crate::definition::TransactionDefinition;
use crate::manager::PlatformTransactionManager;
use crate::status::TransactionStatus;

/// 事务模板
///
/// 回调返回错误时回滚，否则提交（回调把状态标记为只回滚时也会回滚）。
/// 回滚失败的错误优先于回调的错误。
#[derive(Clone)]
pub struct TransactionTemplate {
    manager: Arc<dyn PlatformTransactionManager>,
    definition: TransactionDefinition,
}

impl TransactionTemplate {
    pub fn new(manager: Arc<dyn PlatformTransactionManager>) -> Self {
        Self {
            manager,
            definition: TransactionDefinition::default(),
        }
    }

    pub fn with_definition(mut self, definition: TransactionDefinition) -> Self {
        self.definition = definition;
        self
    }

    pub fn definition(&self) -> &TransactionDefinition {
        &self.definition
    }

    pub fn definition_mut(&mut self) -> &mut TransactionDefinition {
        &mut self.definition
    }

    pub fn execute<T, F>(&self, ctx: &mut CallContext, action: F) -> Result<T, InvocationError>
    where
        F: FnOnce(&mut CallContext, &mut TransactionStatus) -> Result<T, InvocationError>,
    {
        let mut status = self.manager.get_transaction(ctx, &self.definition)?;
        match action(ctx, &mut status) {
            Ok(value) => {
                self.manager.commit(ctx, &mut status)?;
                Ok(value)
            }
            Err(error) => {
                tracing::debug!("Initiating transaction rollback on application exception: {}", error);
                if let Err(rollback_error) = self.manager.rollback(ctx, &mut status) {
                    tracing::error!("Application exception overridden by rollback exception: {}", error);
                    return Err(rollback_error.with_application_error(error).into());
                }
                Err(error)
            }
        }
    }

    /// 不需要返回值的回调
    pub fn execute_without_result<F>(&self, ctx: &mut CallContext, action: F) -> Result<(), InvocationError>
    where
        F: FnOnce(&mut CallContext, &mut TransactionStatus) -> Result<(), InvocationError>,
    {
        self.execute(ctx, action)
    }
}

impl std::fmt::Debug for TransactionTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTemplate")
            .field("manager", &self.manager.name())
            .field("definition", &self.definition)
            .finish()
    }
}
