//! 测试用的数据源与同步回调，记录每一步操作

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sprig_core::CallContext;

use crate::datasource::{Connection, DataSource};
use crate::definition::Isolation;
use crate::error::ResourceError;
use crate::synchronization::{CompletionStatus, TransactionSynchronization};

struct Recorder {
    name: String,
    savepoints: bool,
    failing: Vec<String>,
    attempts: AtomicUsize,
    opened: AtomicUsize,
    operations: Mutex<Vec<String>>,
}

impl Recorder {
    fn record(&self, connection: &str, operation: &str) -> Result<(), ResourceError> {
        self.operations.lock().push(format!("{}:{}", connection, operation));
        if self.should_fail(operation) {
            return Err(ResourceError::new(format!("simulated failure of {}", operation))
                .with_sql_state("23505")
                .with_vendor_code(1));
        }
        Ok(())
    }

    fn should_fail(&self, operation: &str) -> bool {
        let name = operation.split('(').next().unwrap_or(operation);
        self.failing.iter().any(|f| f == operation || f == name)
    }
}

/// 记录所有连接操作的数据源，连接依次编号为 c1、c2……
#[derive(Clone)]
pub(crate) struct RecordingDataSource {
    inner: Arc<Recorder>,
}

impl RecordingDataSource {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(Recorder {
                name: name.to_string(),
                savepoints: true,
                failing: Vec::new(),
                attempts: AtomicUsize::new(0),
                opened: AtomicUsize::new(0),
                operations: Mutex::new(Vec::new()),
            }),
        }
    }

    fn rebuild(self, f: impl FnOnce(&mut Recorder)) -> Self {
        let mut recorder = Recorder {
            name: self.inner.name.clone(),
            savepoints: self.inner.savepoints,
            failing: self.inner.failing.clone(),
            attempts: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            operations: Mutex::new(Vec::new()),
        };
        f(&mut recorder);
        Self {
            inner: Arc::new(recorder),
        }
    }

    pub(crate) fn without_savepoints(self) -> Self {
        self.rebuild(|r| r.savepoints = false)
    }

    /// 让指定操作失败；`open#N` 表示第 N 次获取连接失败
    pub(crate) fn failing_on(self, operation: &str) -> Self {
        let operation = operation.to_string();
        self.rebuild(|r| r.failing.push(operation))
    }

    pub(crate) fn operations(&self) -> Vec<String> {
        self.inner.operations.lock().clone()
    }

    pub(crate) fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// 统计操作次数，`op` 可以是完整操作或不带参数的操作名
    pub(crate) fn count(&self, op: &str) -> usize {
        let prefix = format!("{}(", op);
        self.operations()
            .iter()
            .filter_map(|entry| entry.split_once(':').map(|(_, operation)| operation.to_string()))
            .filter(|operation| operation == op || operation.starts_with(&prefix))
            .count()
    }

    pub(crate) fn resource_key(&self) -> String {
        format!("sprig.datasource:{}", self.inner.name)
    }
}

impl DataSource for RecordingDataSource {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn get_connection(&self) -> Result<Box<dyn Connection>, ResourceError> {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("c{}", attempt);
        if self.inner.failing.iter().any(|f| *f == format!("open#{}", attempt)) {
            return Err(ResourceError::new(format!("connection refused for {}", id)).with_sql_state("08001"));
        }
        self.inner.record(&id, "open")?;
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingConnection {
            id,
            recorder: self.inner.clone(),
            auto_commit: true,
            read_only: false,
            isolation: Isolation::ReadCommitted,
        }))
    }
}

struct RecordingConnection {
    id: String,
    recorder: Arc<Recorder>,
    auto_commit: bool,
    read_only: bool,
    isolation: Isolation,
}

impl RecordingConnection {
    fn record(&self, operation: impl AsRef<str>) -> Result<(), ResourceError> {
        self.recorder.record(&self.id, operation.as_ref())
    }
}

impl Connection for RecordingConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn auto_commit(&self) -> Result<bool, ResourceError> {
        Ok(self.auto_commit)
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ResourceError> {
        self.record(format!("set_auto_commit({})", auto_commit))?;
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn is_read_only(&self) -> Result<bool, ResourceError> {
        Ok(self.read_only)
    }

    fn set_read_only(&mut self, read_only: bool) -> Result<(), ResourceError> {
        self.record(format!("set_read_only({})", read_only))?;
        self.read_only = read_only;
        Ok(())
    }

    fn isolation(&self) -> Result<Isolation, ResourceError> {
        Ok(self.isolation)
    }

    fn set_isolation(&mut self, isolation: Isolation) -> Result<(), ResourceError> {
        self.record(format!("set_isolation({})", isolation))?;
        self.isolation = isolation;
        Ok(())
    }

    fn execute(&mut self, statement: &str) -> Result<u64, ResourceError> {
        self.record(format!("execute({})", statement))?;
        Ok(1)
    }

    fn commit(&mut self) -> Result<(), ResourceError> {
        self.record("commit")
    }

    fn rollback(&mut self) -> Result<(), ResourceError> {
        self.record("rollback")
    }

    fn supports_savepoints(&self) -> bool {
        self.recorder.savepoints
    }

    fn set_savepoint(&mut self, name: &str) -> Result<(), ResourceError> {
        self.record(format!("set_savepoint({})", name))
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), ResourceError> {
        self.record(format!("rollback_to_savepoint({})", name))
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), ResourceError> {
        self.record(format!("release_savepoint({})", name))
    }

    fn close(&mut self) -> Result<(), ResourceError> {
        self.record("close")
    }
}

/// 记录同步回调顺序
#[derive(Default, Clone)]
pub(crate) struct SyncLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl SyncLog {
    pub(crate) fn synchronization(&self, id: &str) -> Arc<dyn TransactionSynchronization> {
        Arc::new(LoggingSynchronization {
            id: id.to_string(),
            log: self.clone(),
            fail_before_commit: false,
        })
    }

    pub(crate) fn failing_before_commit(&self, id: &str) -> Arc<dyn TransactionSynchronization> {
        Arc::new(LoggingSynchronization {
            id: id.to_string(),
            log: self.clone(),
            fail_before_commit: true,
        })
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    fn push(&self, id: &str, event: impl AsRef<str>) {
        self.entries.lock().push(format!("{}:{}", id, event.as_ref()));
    }
}

struct LoggingSynchronization {
    id: String,
    log: SyncLog,
    fail_before_commit: bool,
}

impl TransactionSynchronization for LoggingSynchronization {
    fn suspend(&self, _ctx: &mut CallContext) {
        self.log.push(&self.id, "suspend");
    }

    fn resume(&self, _ctx: &mut CallContext) {
        self.log.push(&self.id, "resume");
    }

    fn before_commit(&self, _ctx: &mut CallContext, _read_only: bool) -> anyhow::Result<()> {
        self.log.push(&self.id, "before_commit");
        if self.fail_before_commit {
            anyhow::bail!("before_commit rejected by {}", self.id);
        }
        Ok(())
    }

    fn before_completion(&self, _ctx: &mut CallContext) -> anyhow::Result<()> {
        self.log.push(&self.id, "before_completion");
        Ok(())
    }

    fn after_commit(&self, _ctx: &mut CallContext) -> anyhow::Result<()> {
        self.log.push(&self.id, "after_commit");
        Ok(())
    }

    fn after_completion(&self, _ctx: &mut CallContext, status: CompletionStatus) -> anyhow::Result<()> {
        self.log.push(&self.id, format!("after_completion({})", status));
        Ok(())
    }
}
