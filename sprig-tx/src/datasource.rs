//! 基于数据源的事务
//!
//! - [`DataSource`] / [`Connection`]：外部提供的连接抽象
//! - [`ConnectionHolder`]：绑定在调用上下文中的连接，记录事务活跃、只回滚、超时等状态
//! - [`DataSourceBackend`]：事务管理器的连接实现，`DataSourceTransactionManager` 即
//!   `TransactionManager<DataSourceBackend>`
//! - [`DataSourceUtils`]：让数据访问代码使用当前事务的连接

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sprig_core::CallContext;

use crate::definition::{Isolation, TransactionDefinition};
use crate::error::{DataAccessError, DataAccessKind, ResourceError, TransactionError, TransactionResult};
use crate::manager::{TransactionBackend, TransactionManager};
use crate::status::TransactionObject;
use crate::synchronization::{
    CompletionStatus, TransactionSynchronization, TransactionSynchronizationManager as Tsm,
};

/// 数据库连接
pub trait Connection: Send {
    /// 连接标识，用于日志
    fn id(&self) -> &str;

    fn auto_commit(&self) -> Result<bool, ResourceError>;

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ResourceError>;

    fn is_read_only(&self) -> Result<bool, ResourceError>;

    fn set_read_only(&mut self, read_only: bool) -> Result<(), ResourceError>;

    fn isolation(&self) -> Result<Isolation, ResourceError>;

    fn set_isolation(&mut self, isolation: Isolation) -> Result<(), ResourceError>;

    /// 执行语句，返回受影响的行数
    fn execute(&mut self, statement: &str) -> Result<u64, ResourceError>;

    fn commit(&mut self) -> Result<(), ResourceError>;

    fn rollback(&mut self) -> Result<(), ResourceError>;

    fn supports_savepoints(&self) -> bool {
        false
    }

    fn set_savepoint(&mut self, name: &str) -> Result<(), ResourceError> {
        Err(unsupported_savepoint(name))
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), ResourceError> {
        Err(unsupported_savepoint(name))
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), ResourceError> {
        Err(unsupported_savepoint(name))
    }

    fn close(&mut self) -> Result<(), ResourceError>;
}

fn unsupported_savepoint(name: &str) -> ResourceError {
    ResourceError::new(format!("Savepoint [{}] is not supported by this connection", name)).with_sql_state("0A000")
}

/// 数据源
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    fn get_connection(&self) -> Result<Box<dyn Connection>, ResourceError>;
}

/// 连接持有者在调用上下文中的 key
pub fn resource_key(data_source: &dyn DataSource) -> String {
    format!("sprig.datasource:{}", data_source.name())
}

/// 把资源错误翻译成事务错误
pub trait ExceptionTranslator: Send + Sync {
    fn translate(&self, task: &str, error: ResourceError) -> TransactionError;
}

/// 统一翻译为系统错误
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExceptionTranslator;

impl ExceptionTranslator for DefaultExceptionTranslator {
    fn translate(&self, task: &str, error: ResourceError) -> TransactionError {
        TransactionError::system(format!("{} failed", task), error)
    }
}

/// 按 SQL state 分类为数据访问错误，没有 SQL state 时翻译为系统错误
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlStateExceptionTranslator;

impl ExceptionTranslator for SqlStateExceptionTranslator {
    fn translate(&self, task: &str, error: ResourceError) -> TransactionError {
        match error.sql_state().map(DataAccessKind::from_sql_state) {
            Some(kind) => DataAccessError {
                kind,
                task: task.to_string(),
                source: error,
            }
            .into(),
            None => DefaultExceptionTranslator.translate(task, error),
        }
    }
}

struct HolderState {
    connection: Mutex<Option<Box<dyn Connection>>>,
    connection_id: String,
    transaction_active: AtomicBool,
    synchronized_with_transaction: AtomicBool,
    rollback_only: AtomicBool,
    deadline: Mutex<Option<Instant>>,
    savepoint_counter: AtomicUsize,
}

/// 连接持有者
///
/// 克隆共享同一个连接
#[derive(Clone)]
pub struct ConnectionHolder {
    state: Arc<HolderState>,
}

impl ConnectionHolder {
    pub fn new(connection: Box<dyn Connection>) -> Self {
        let connection_id = connection.id().to_string();
        Self {
            state: Arc::new(HolderState {
                connection: Mutex::new(Some(connection)),
                connection_id,
                transaction_active: AtomicBool::new(false),
                synchronized_with_transaction: AtomicBool::new(false),
                rollback_only: AtomicBool::new(false),
                deadline: Mutex::new(None),
                savepoint_counter: AtomicUsize::new(0),
            }),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.state.connection_id
    }

    pub fn has_connection(&self) -> bool {
        self.state.connection.lock().is_some()
    }

    /// 在持有的连接上执行操作
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut dyn Connection) -> Result<R, ResourceError>,
    ) -> Result<R, ResourceError> {
        let mut guard = self.state.connection.lock();
        match guard.as_mut() {
            Some(connection) => f(connection.as_mut()),
            None => Err(ResourceError::new(format!(
                "Connection [{}] has already been released",
                self.state.connection_id
            ))),
        }
    }

    pub fn is_transaction_active(&self) -> bool {
        self.state.transaction_active.load(Ordering::SeqCst)
    }

    pub fn set_transaction_active(&self, active: bool) {
        self.state.transaction_active.store(active, Ordering::SeqCst);
    }

    pub fn is_synchronized_with_transaction(&self) -> bool {
        self.state.synchronized_with_transaction.load(Ordering::SeqCst)
    }

    pub fn set_synchronized_with_transaction(&self, synchronized: bool) {
        self.state.synchronized_with_transaction.store(synchronized, Ordering::SeqCst);
    }

    pub fn is_rollback_only(&self) -> bool {
        self.state.rollback_only.load(Ordering::SeqCst)
    }

    pub fn set_rollback_only(&self) {
        self.state.rollback_only.store(true, Ordering::SeqCst);
    }

    pub fn reset_rollback_only(&self) {
        self.state.rollback_only.store(false, Ordering::SeqCst);
    }

    pub fn set_timeout(&self, timeout: Duration) {
        *self.state.deadline.lock() = Some(Instant::now() + timeout);
    }

    pub fn has_timeout(&self) -> bool {
        self.state.deadline.lock().is_some()
    }

    /// 剩余时间；超过截止时间时把事务标记为只回滚并返回超时错误
    pub fn time_to_live(&self) -> TransactionResult<Option<Duration>> {
        let Some(deadline) = *self.state.deadline.lock() else {
            return Ok(None);
        };
        let now = Instant::now();
        if now >= deadline {
            self.set_rollback_only();
            return Err(TransactionError::TimedOut(now - deadline));
        }
        Ok(Some(deadline - now))
    }

    fn next_savepoint_name(&self) -> String {
        let n = self.state.savepoint_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("SAVEPOINT_{}", n)
    }

    /// 关闭并释放连接
    pub fn release(&self) {
        if let Some(mut connection) = self.state.connection.lock().take() {
            if let Err(e) = connection.close() {
                tracing::debug!("Could not close JDBC Connection [{}]: {}", self.state.connection_id, e);
            }
        }
    }

    /// 重置事务相关的状态
    pub fn clear(&self) {
        self.set_synchronized_with_transaction(false);
        self.reset_rollback_only();
        *self.state.deadline.lock() = None;
    }

    pub fn ptr_eq(&self, other: &ConnectionHolder) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for ConnectionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHolder")
            .field("connection", &self.state.connection_id)
            .field("transaction_active", &self.is_transaction_active())
            .field("rollback_only", &self.is_rollback_only())
            .finish()
    }
}

/// 数据源事务对象
#[derive(Debug, Default)]
pub struct DataSourceTransaction {
    holder: Option<ConnectionHolder>,
    new_holder: bool,
    must_restore_auto_commit: bool,
    previous_isolation: Option<Isolation>,
    read_only: bool,
}

impl DataSourceTransaction {
    pub fn holder(&self) -> Option<&ConnectionHolder> {
        self.holder.as_ref()
    }

    pub fn is_new_holder(&self) -> bool {
        self.new_holder
    }

    fn holder_or_err(&self) -> TransactionResult<&ConnectionHolder> {
        self.holder
            .as_ref()
            .ok_or_else(|| TransactionError::illegal_state("No JDBC Connection bound to transaction"))
    }
}

impl TransactionObject for DataSourceTransaction {
    fn is_rollback_only(&self) -> bool {
        self.holder.as_ref().map_or(false, ConnectionHolder::is_rollback_only)
    }
}

/// 数据源事务的资源实现
pub struct DataSourceBackend {
    data_source: Arc<dyn DataSource>,
    resource_key: String,
    enforce_read_only: bool,
    translator: Arc<dyn ExceptionTranslator>,
}

impl DataSourceBackend {
    pub fn new(data_source: Arc<dyn DataSource>) -> Self {
        let resource_key = resource_key(data_source.as_ref());
        Self {
            data_source,
            resource_key,
            enforce_read_only: false,
            translator: Arc::new(DefaultExceptionTranslator),
        }
    }

    pub fn data_source(&self) -> &Arc<dyn DataSource> {
        &self.data_source
    }

    pub fn resource_key(&self) -> &str {
        &self.resource_key
    }

    /// 只读事务开始时执行 `SET TRANSACTION READ ONLY`
    pub fn set_enforce_read_only(&mut self, enforce: bool) {
        self.enforce_read_only = enforce;
    }

    pub fn set_exception_translator(&mut self, translator: Arc<dyn ExceptionTranslator>) {
        self.translator = translator;
    }

    fn prepare_connection(
        &self,
        holder: &ConnectionHolder,
        transaction: &mut DataSourceTransaction,
        definition: &TransactionDefinition,
    ) -> Result<(), ResourceError> {
        holder.with_connection(|connection| {
            if definition.is_read_only() {
                tracing::debug!("Setting JDBC Connection [{}] read-only", connection.id());
                connection.set_read_only(true)?;
            }

            if definition.isolation() != Isolation::Default {
                let current = connection.isolation()?;
                if current != definition.isolation() {
                    tracing::debug!(
                        "Changing isolation level of JDBC Connection [{}] to {}",
                        connection.id(),
                        definition.isolation()
                    );
                    connection.set_isolation(definition.isolation())?;
                    transaction.previous_isolation = Some(current);
                }
            }
            transaction.read_only = definition.is_read_only();

            if connection.auto_commit()? {
                transaction.must_restore_auto_commit = true;
                tracing::debug!("Switching JDBC Connection [{}] to manual commit", connection.id());
                connection.set_auto_commit(false)?;
            }

            if self.enforce_read_only && definition.is_read_only() {
                connection.execute("SET TRANSACTION READ ONLY")?;
            }
            Ok(())
        })
    }

    fn reset_connection(&self, holder: &ConnectionHolder, transaction: &DataSourceTransaction) {
        let result = holder.with_connection(|connection| {
            if transaction.must_restore_auto_commit {
                connection.set_auto_commit(true)?;
            }
            if let Some(previous) = transaction.previous_isolation {
                tracing::debug!(
                    "Resetting isolation level of JDBC Connection [{}] to {}",
                    connection.id(),
                    previous
                );
                connection.set_isolation(previous)?;
            }
            if transaction.read_only {
                tracing::debug!("Resetting read-only flag of JDBC Connection [{}]", connection.id());
                connection.set_read_only(false)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            tracing::debug!("Could not reset JDBC Connection after transaction: {}", e);
        }
    }
}

impl TransactionBackend for DataSourceBackend {
    type Transaction = DataSourceTransaction;
    type Suspended = ConnectionHolder;
    type Savepoint = String;

    fn name(&self) -> &str {
        "DataSourceTransactionManager"
    }

    fn get_transaction(&self, ctx: &mut CallContext) -> TransactionResult<DataSourceTransaction> {
        Ok(DataSourceTransaction {
            holder: ctx.resource::<ConnectionHolder>(&self.resource_key).cloned(),
            ..DataSourceTransaction::default()
        })
    }

    fn is_existing_transaction(&self, transaction: &DataSourceTransaction) -> bool {
        transaction
            .holder
            .as_ref()
            .map_or(false, ConnectionHolder::is_transaction_active)
    }

    fn begin(
        &self,
        ctx: &mut CallContext,
        transaction: &mut DataSourceTransaction,
        definition: &TransactionDefinition,
    ) -> TransactionResult<()> {
        let holder = match &transaction.holder {
            Some(holder) if !holder.is_synchronized_with_transaction() => holder.clone(),
            _ => {
                let connection = self.data_source.get_connection().map_err(|e| {
                    TransactionError::cannot_create("Could not open JDBC Connection for transaction", e)
                })?;
                tracing::debug!("Acquired Connection [{}] for JDBC transaction", connection.id());
                let holder = ConnectionHolder::new(connection);
                transaction.holder = Some(holder.clone());
                transaction.new_holder = true;
                holder
            }
        };
        holder.set_synchronized_with_transaction(true);

        let prepared = self.prepare_connection(&holder, transaction, definition);
        let bound = prepared
            .map_err(|e| TransactionError::cannot_create("Could not open JDBC Connection for transaction", e))
            .and_then(|()| {
                holder.set_transaction_active(true);
                if let Some(timeout) = definition.timeout() {
                    holder.set_timeout(timeout);
                }
                if transaction.new_holder {
                    ctx.bind(self.resource_key.clone(), holder.clone())?;
                }
                Ok(())
            });

        if bound.is_err() && transaction.new_holder {
            holder.release();
            transaction.holder = None;
            transaction.new_holder = false;
        }
        bound
    }

    fn suspend(&self, ctx: &mut CallContext, transaction: &mut DataSourceTransaction) -> TransactionResult<ConnectionHolder> {
        transaction.holder = None;
        let resource = ctx.unbind_resource(&self.resource_key)?;
        resource
            .downcast::<ConnectionHolder>()
            .map(|holder| *holder)
            .map_err(|_| {
                TransactionError::illegal_state(format!(
                    "Resource bound for key [{}] is not a ConnectionHolder",
                    self.resource_key
                ))
            })
    }

    fn resume(&self, ctx: &mut CallContext, suspended: ConnectionHolder) -> TransactionResult<()> {
        ctx.bind(self.resource_key.clone(), suspended)?;
        Ok(())
    }

    fn commit(&self, _ctx: &mut CallContext, transaction: &mut DataSourceTransaction) -> TransactionResult<()> {
        let holder = transaction.holder_or_err()?;
        tracing::debug!("Committing JDBC transaction on Connection [{}]", holder.connection_id());
        holder
            .with_connection(|connection| connection.commit())
            .map_err(|e| self.translator.translate("JDBC commit", e))
    }

    fn rollback(&self, _ctx: &mut CallContext, transaction: &mut DataSourceTransaction) -> TransactionResult<()> {
        let holder = transaction.holder_or_err()?;
        tracing::debug!("Rolling back JDBC transaction on Connection [{}]", holder.connection_id());
        holder
            .with_connection(|connection| connection.rollback())
            .map_err(|e| self.translator.translate("JDBC rollback", e))
    }

    fn set_rollback_only(&self, _ctx: &mut CallContext, transaction: &mut DataSourceTransaction) -> TransactionResult<()> {
        let holder = transaction.holder_or_err()?;
        tracing::debug!("Setting JDBC transaction [{}] rollback-only", holder.connection_id());
        holder.set_rollback_only();
        Ok(())
    }

    fn cleanup_after_completion(&self, ctx: &mut CallContext, transaction: &mut DataSourceTransaction) {
        if transaction.new_holder {
            ctx.unbind_resource_if_possible(&self.resource_key);
        }
        let Some(holder) = transaction.holder.as_ref() else {
            return;
        };

        self.reset_connection(holder, transaction);
        if transaction.new_holder {
            tracing::debug!("Releasing JDBC Connection [{}] after transaction", holder.connection_id());
            holder.release();
        }
        holder.set_transaction_active(false);
        holder.clear();
    }

    fn supports_savepoints(&self, transaction: &DataSourceTransaction) -> bool {
        transaction.holder.as_ref().map_or(false, |holder| {
            holder
                .with_connection(|connection| Ok(connection.supports_savepoints()))
                .unwrap_or(false)
        })
    }

    fn create_savepoint(&self, _ctx: &mut CallContext, transaction: &mut DataSourceTransaction) -> TransactionResult<String> {
        let holder = transaction.holder_or_err()?;
        let name = holder.next_savepoint_name();
        holder
            .with_connection(|connection| connection.set_savepoint(&name))
            .map_err(|e| TransactionError::cannot_create("Could not create JDBC savepoint", e))?;
        Ok(name)
    }

    fn rollback_to_savepoint(
        &self,
        _ctx: &mut CallContext,
        transaction: &mut DataSourceTransaction,
        savepoint: &String,
    ) -> TransactionResult<()> {
        let holder = transaction.holder_or_err()?;
        holder
            .with_connection(|connection| connection.rollback_to_savepoint(savepoint))
            .map_err(|e| TransactionError::system("Could not roll back to JDBC savepoint", e))?;
        holder.reset_rollback_only();
        Ok(())
    }

    fn release_savepoint(
        &self,
        _ctx: &mut CallContext,
        transaction: &mut DataSourceTransaction,
        savepoint: String,
    ) -> TransactionResult<()> {
        let holder = transaction.holder_or_err()?;
        if let Err(e) = holder.with_connection(|connection| connection.release_savepoint(&savepoint)) {
            tracing::debug!("Could not explicitly release JDBC savepoint [{}]: {}", savepoint, e);
        }
        Ok(())
    }
}

/// 数据源事务管理器，默认允许嵌套事务
pub type DataSourceTransactionManager = TransactionManager<DataSourceBackend>;

impl TransactionManager<DataSourceBackend> {
    pub fn with_data_source(data_source: Arc<dyn DataSource>) -> Self {
        let mut manager = TransactionManager::new(DataSourceBackend::new(data_source));
        manager.set_nested_transaction_allowed(true);
        manager
    }
}

/// 非事务执行但同步已激活时，把连接绑定到同步作用域，作用域结束时释放
pub struct ConnectionSynchronization {
    holder: ConnectionHolder,
    resource_key: String,
    holder_active: AtomicBool,
}

impl ConnectionSynchronization {
    const ORDER: i32 = 1000;

    pub fn new(holder: ConnectionHolder, resource_key: impl Into<String>) -> Self {
        Self {
            holder,
            resource_key: resource_key.into(),
            holder_active: AtomicBool::new(true),
        }
    }

    fn release(&self, ctx: &mut CallContext) {
        if self.holder_active.swap(false, Ordering::SeqCst) {
            ctx.unbind_resource_if_possible(&self.resource_key);
            self.holder.release();
        }
    }
}

impl TransactionSynchronization for ConnectionSynchronization {
    fn order(&self) -> i32 {
        Self::ORDER
    }

    fn suspend(&self, ctx: &mut CallContext) {
        if self.holder_active.load(Ordering::SeqCst) {
            ctx.unbind_resource_if_possible(&self.resource_key);
        }
    }

    fn resume(&self, ctx: &mut CallContext) {
        if self.holder_active.load(Ordering::SeqCst) {
            if let Err(e) = ctx.bind(self.resource_key.clone(), self.holder.clone()) {
                tracing::warn!("Could not rebind JDBC Connection [{}]: {}", self.holder.connection_id(), e);
            }
        }
    }

    fn before_completion(&self, ctx: &mut CallContext) -> anyhow::Result<()> {
        self.release(ctx);
        Ok(())
    }

    fn after_completion(&self, ctx: &mut CallContext, _status: CompletionStatus) -> anyhow::Result<()> {
        self.release(ctx);
        self.holder.clear();
        Ok(())
    }
}

/// 数据访问代码获取连接的入口
pub struct DataSourceUtils;

impl DataSourceUtils {
    /// 在当前事务的连接上执行 `f`
    ///
    /// - 已绑定连接：直接使用，并检查事务超时（超时会把事务标记为只回滚）
    /// - 未绑定但同步已激活：获取新连接并绑定到同步作用域
    /// - 否则：使用一次性连接，执行后关闭
    pub fn do_with_connection<R>(
        ctx: &mut CallContext,
        data_source: &dyn DataSource,
        f: impl FnOnce(&mut dyn Connection) -> Result<R, ResourceError>,
    ) -> TransactionResult<R> {
        let key = resource_key(data_source);
        let translator = SqlStateExceptionTranslator;

        if let Some(holder) = ctx.resource::<ConnectionHolder>(&key).cloned() {
            if holder.has_connection() {
                holder.time_to_live()?;
                return holder
                    .with_connection(f)
                    .map_err(|e| translator.translate("Connection callback", e));
            }
        }

        tracing::debug!("Fetching JDBC Connection from DataSource [{}]", data_source.name());
        let mut connection = data_source
            .get_connection()
            .map_err(|e| translator.translate("Failed to obtain JDBC Connection", e))?;

        if Tsm::is_synchronization_active(ctx) {
            tracing::debug!("Registering transaction synchronization for JDBC Connection");
            let holder = ConnectionHolder::new(connection);
            holder.set_synchronized_with_transaction(true);
            ctx.bind(key.clone(), holder.clone())?;
            Tsm::register_synchronization(ctx, Arc::new(ConnectionSynchronization::new(holder.clone(), key)))?;
            return holder
                .with_connection(f)
                .map_err(|e| translator.translate("Connection callback", e));
        }

        let result = f(connection.as_mut()).map_err(|e| translator.translate("Connection callback", e));
        if let Err(e) = connection.close() {
            tracing::debug!("Could not close JDBC Connection [{}]: {}", connection.id(), e);
        }
        result
    }

    /// 当前调用上下文是否绑定了该数据源的事务连接
    pub fn is_connection_transactional(ctx: &CallContext, data_source: &dyn DataSource) -> bool {
        ctx.resource::<ConnectionHolder>(&resource_key(data_source))
            .map_or(false, ConnectionHolder::is_transaction_active)
    }
}
