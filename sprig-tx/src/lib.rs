// sprig-tx: 事务管理
//
// 提供：
// - 事务定义（传播行为、隔离级别、超时、只读）与带回滚规则的事务属性
// - 通用的传播引擎：挂起与恢复、同步回调、只回滚、保存点
// - 基于数据源连接的事务管理器
// - 声明式事务拦截器与编程式事务模板

pub mod attribute;
pub mod config;
pub mod datasource;
pub mod definition;
pub mod error;
pub mod interceptor;
pub mod manager;
pub mod status;
pub mod synchronization;
pub mod template;

#[cfg(test)]
pub(crate) mod test_support;

// 重新导出常用类型
pub use attribute::{
    CompositeTransactionAttributeSource, MatchAlwaysTransactionAttributeSource, MethodMapTransactionAttributeSource,
    NameMatchTransactionAttributeSource, RollbackRule, TransactionAttribute, TransactionAttributeSource,
};
pub use config::TransactionProperties;
pub use datasource::{
    Connection, ConnectionHolder, DataSource, DataSourceBackend, DataSourceTransactionManager, DataSourceUtils,
    DefaultExceptionTranslator, ExceptionTranslator, SqlStateExceptionTranslator,
};
pub use definition::{Isolation, Propagation, TransactionDefinition};
pub use error::{DataAccessError, DataAccessKind, ResourceError, TransactionError, TransactionResult};
pub use interceptor::{
    current_transaction_status, transaction_advisor, TransactionAttributeSourcePointcut, TransactionInterceptor,
};
pub use manager::{
    ManagerSettings, PlatformTransactionManager, Savepoint, SynchronizationMode, TransactionBackend,
    TransactionManager,
};
pub use status::{SuspendedResourcesHolder, TransactionObject, TransactionStatus};
pub use synchronization::{CompletionStatus, TransactionSynchronization, TransactionSynchronizationManager};
pub use template::TransactionTemplate;

/// 预导入模块
pub mod prelude {
    pub use crate::attribute::{RollbackRule, TransactionAttribute, TransactionAttributeSource};
    pub use crate::datasource::{DataSource, DataSourceTransactionManager, DataSourceUtils};
    pub use crate::definition::{Isolation, Propagation, TransactionDefinition};
    pub use crate::error::{TransactionError, TransactionResult};
    pub use crate::interceptor::{current_transaction_status, transaction_advisor, TransactionInterceptor};
    pub use crate::manager::PlatformTransactionManager;
    pub use crate::status::TransactionStatus;
    pub use crate::template::TransactionTemplate;
}
