//! 应用事件
//!
//! 监听器通过 [`ApplicationEventMulticaster`] 注册，事件默认在发布线程上同步分发；
//! 注入 [`TaskExecutor`] 后由执行器调度。

use std::any::Any;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::utils::naming::short_type_name;

/// 事件 trait - 所有事件都必须实现此 trait
pub trait Event: Any + Send + Sync {
    fn event_name(&self) -> &str;

    fn timestamp(&self) -> SystemTime;

    /// 触发此事件的对象
    fn source(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// 容器刷新完成事件
#[derive(Debug, Clone)]
pub struct ContextRefreshedEvent {
    pub context_id: String,
    pub bean_count: usize,
    pub timestamp: SystemTime,
}

impl ContextRefreshedEvent {
    pub fn new(context_id: impl Into<String>, bean_count: usize) -> Self {
        Self {
            context_id: context_id.into(),
            bean_count,
            timestamp: SystemTime::now(),
        }
    }
}

impl Event for ContextRefreshedEvent {
    fn event_name(&self) -> &str {
        "ContextRefreshedEvent"
    }

    fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 容器关闭事件
#[derive(Debug, Clone)]
pub struct ContextClosedEvent {
    pub context_id: String,
    pub timestamp: SystemTime,
}

impl ContextClosedEvent {
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            timestamp: SystemTime::now(),
        }
    }
}

impl Event for ContextClosedEvent {
    fn event_name(&self) -> &str {
        "ContextClosedEvent"
    }

    fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 单例 Bean 创建完成事件
#[derive(Debug, Clone)]
pub struct BeanCreatedEvent {
    pub bean_name: String,
    pub type_name: &'static str,
    pub timestamp: SystemTime,
}

impl BeanCreatedEvent {
    pub fn new(bean_name: impl Into<String>, type_name: &'static str) -> Self {
        Self {
            bean_name: bean_name.into(),
            type_name,
            timestamp: SystemTime::now(),
        }
    }
}

impl Event for BeanCreatedEvent {
    fn event_name(&self) -> &str {
        "BeanCreatedEvent"
    }

    fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 包装任意负载的事件，事件名是负载类型的短名称
#[derive(Debug, Clone)]
pub struct PayloadEvent<T> {
    pub payload: T,
    pub timestamp: SystemTime,
}

impl<T: Any + Send + Sync> PayloadEvent<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            timestamp: SystemTime::now(),
        }
    }
}

impl<T: Any + Send + Sync> Event for PayloadEvent<T> {
    fn event_name(&self) -> &str {
        short_type_name(std::any::type_name::<T>())
    }

    fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 事件监听器 trait
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: Arc<dyn Event>) -> anyhow::Result<()>;

    fn listener_name(&self) -> &str {
        "AnonymousListener"
    }

    /// 是否支持该事件类型（默认支持所有事件）
    fn supports_event(&self, event_name: &str) -> bool {
        let _ = event_name;
        true
    }
}

/// 类型化事件监听器 trait
pub trait TypedEventListener<E: Event>: Send + Sync {
    fn on_event(&self, event: &E) -> anyhow::Result<()>;

    fn listener_name(&self) -> &str {
        "AnonymousTypedListener"
    }
}

/// 将 `TypedEventListener<E>` 适配为 `EventListener`
pub struct TypedEventListenerAdapter<E: Event, L: TypedEventListener<E>> {
    listener: Arc<L>,
    _phantom: std::marker::PhantomData<fn(E)>,
}

impl<E: Event, L: TypedEventListener<E>> TypedEventListenerAdapter<E, L> {
    pub fn new(listener: Arc<L>) -> Self {
        Self {
            listener,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E: Event, L: TypedEventListener<E> + 'static> EventListener for TypedEventListenerAdapter<E, L> {
    fn on_event(&self, event: Arc<dyn Event>) -> anyhow::Result<()> {
        match event.as_any().downcast_ref::<E>() {
            Some(typed) => self.listener.on_event(typed),
            None => Ok(()),
        }
    }

    fn listener_name(&self) -> &str {
        self.listener.listener_name()
    }

    fn supports_event(&self, event_name: &str) -> bool {
        event_name == short_type_name(std::any::type_name::<E>())
    }
}

/// 闭包监听器
pub struct FnEventListener<F> {
    name: String,
    handler: F,
}

impl<F> FnEventListener<F>
where
    F: Fn(Arc<dyn Event>) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> EventListener for FnEventListener<F>
where
    F: Fn(Arc<dyn Event>) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: Arc<dyn Event>) -> anyhow::Result<()> {
        (self.handler)(event)
    }

    fn listener_name(&self) -> &str {
        &self.name
    }
}

/// 监听器出错（返回错误或 panic）时的处理器
pub type ErrorHandler = Arc<dyn Fn(&dyn EventListener, &Arc<dyn Event>, &anyhow::Error) + Send + Sync>;

/// 任务执行器
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// 在调用线程上直接执行
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncTaskExecutor;

impl TaskExecutor for SyncTaskExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        task()
    }
}

/// 提交到当前 tokio 运行时；没有运行时时退回到调用线程
#[derive(Debug, Default, Clone)]
pub struct TokioTaskExecutor {
    handle: Option<tokio::runtime::Handle>,
}

impl TokioTaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 固定使用指定的运行时
    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle: Some(handle) }
    }
}

impl TaskExecutor for TokioTaskExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        let handle = self
            .handle
            .clone()
            .or_else(|| tokio::runtime::Handle::try_current().ok());
        match handle {
            Some(handle) => {
                handle.spawn(async move { task() });
            }
            None => {
                tracing::warn!("No tokio runtime available, falling back to sync execution");
                task()
            }
        }
    }
}

/// 事件多播器 trait
pub trait ApplicationEventMulticaster: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn EventListener>);

    fn remove_listener(&self, listener_name: &str);

    fn remove_all_listeners(&self);

    /// 广播事件到所有支持它的监听器
    fn multicast_event(&self, event: Arc<dyn Event>);

    fn listener_count(&self) -> usize;
}

/// 事件发布入口
pub trait ApplicationEventPublisher: Send + Sync {
    fn publish_event(&self, event: Arc<dyn Event>);
}

impl dyn ApplicationEventPublisher {
    /// 把任意值包装成 [`PayloadEvent`] 发布
    pub fn publish<T: Any + Send + Sync>(&self, payload: T) {
        self.publish_event(Arc::new(PayloadEvent::new(payload)));
    }
}

/// 简单事件多播器
///
/// 监听器按注册顺序调用。没有设置执行器时同步执行；没有错误处理器时，
/// 监听器错误只记录日志，panic 会继续向发布者传播。
pub struct SimpleApplicationEventMulticaster {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    executor: RwLock<Option<Arc<dyn TaskExecutor>>>,
    error_handler: RwLock<Option<ErrorHandler>>,
}

impl SimpleApplicationEventMulticaster {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            executor: RwLock::new(None),
            error_handler: RwLock::new(None),
        }
    }

    pub fn with_executor(executor: Arc<dyn TaskExecutor>) -> Self {
        let multicaster = Self::new();
        multicaster.set_task_executor(Some(executor));
        multicaster
    }

    pub fn set_task_executor(&self, executor: Option<Arc<dyn TaskExecutor>>) {
        *self.executor.write() = executor;
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&dyn EventListener, &Arc<dyn Event>, &anyhow::Error) + Send + Sync + 'static,
    {
        *self.error_handler.write() = Some(Arc::new(handler));
    }

    pub fn remove_error_handler(&self) {
        *self.error_handler.write() = None;
    }

    fn invoke_listener(listener: &Arc<dyn EventListener>, event: Arc<dyn Event>, error_handler: Option<&ErrorHandler>) {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener.on_event(Arc::clone(&event))));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => match error_handler {
                Some(handler) => handler(listener.as_ref(), &event, &err),
                None => tracing::error!(
                    "Listener '{}' failed while handling event '{}': {}",
                    listener.listener_name(),
                    event.event_name(),
                    err
                ),
            },
            Err(panic) => match error_handler {
                Some(handler) => {
                    let err = anyhow::anyhow!("Listener panicked: {:?}", panic_message(&*panic));
                    handler(listener.as_ref(), &event, &err);
                }
                None => {
                    tracing::error!(
                        "Listener '{}' panicked while handling event '{}': {}",
                        listener.listener_name(),
                        event.event_name(),
                        panic_message(&*panic)
                    );
                    std::panic::resume_unwind(panic);
                }
            },
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Default for SimpleApplicationEventMulticaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationEventMulticaster for SimpleApplicationEventMulticaster {
    fn add_listener(&self, listener: Arc<dyn EventListener>) {
        tracing::debug!("Added event listener: {}", listener.listener_name());
        self.listeners.write().push(listener);
    }

    fn remove_listener(&self, listener_name: &str) {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.listener_name() != listener_name);
        if listeners.len() != before {
            tracing::debug!("Removed event listener: {}", listener_name);
        }
    }

    fn remove_all_listeners(&self) {
        self.listeners.write().clear();
        tracing::debug!("Removed all event listeners");
    }

    fn multicast_event(&self, event: Arc<dyn Event>) {
        let event_name = event.event_name().to_string();
        let targets: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .iter()
            .filter(|l| l.supports_event(&event_name))
            .cloned()
            .collect();
        let executor = self.executor.read().clone();
        let error_handler = self.error_handler.read().clone();

        tracing::debug!(
            "Multicasting event: {} to {} listener(s) (executor: {})",
            event_name,
            targets.len(),
            executor.is_some()
        );

        for listener in targets {
            match &executor {
                Some(executor) => {
                    let event = Arc::clone(&event);
                    let error_handler = error_handler.clone();
                    executor.execute(Box::new(move || {
                        Self::invoke_listener(&listener, event, error_handler.as_ref())
                    }));
                }
                None => Self::invoke_listener(&listener, Arc::clone(&event), error_handler.as_ref()),
            }
        }
    }

    fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl ApplicationEventPublisher for SimpleApplicationEventMulticaster {
    fn publish_event(&self, event: Arc<dyn Event>) {
        self.multicast_event(event);
    }
}
