use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::bean::BeanInstance;
use crate::bean_definition::BeanDefinition;
use crate::bean_factory::{
    BeanFactory, BeanFactoryExt, ConfigurableBeanFactory, ConfigurableListableBeanFactory,
    DefaultListableBeanFactory, ListableBeanFactory, ListableBeanFactoryExt,
};
use crate::config::{Environment, PropertySource};
use crate::error::{ContainerError, ContainerResult};
use crate::event::{
    ApplicationEventMulticaster, ApplicationEventPublisher, ContextClosedEvent, ContextRefreshedEvent, Event,
    EventListener, SimpleApplicationEventMulticaster, TaskExecutor,
};
use crate::lifecycle::{BeanFactoryPostProcessor, BeanPostProcessor};
use crate::utils::dependency::{validate_dependency_graph, DependencyValidationError};

/// Shutdown hook 类型
pub type ShutdownHook = Box<dyn Fn() -> ContainerResult<()> + Send + Sync>;

const STATE_CREATED: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// 应用上下文
///
/// 持有 BeanFactory、Environment 和事件多播器。注册阶段完成后调用
/// [`refresh`](Self::refresh) 启动，调用 [`close`](Self::close) 关闭。
pub struct ApplicationContext {
    id: String,
    bean_factory: Arc<DefaultListableBeanFactory>,
    environment: Arc<Environment>,
    multicaster: Arc<SimpleApplicationEventMulticaster>,
    bean_factory_post_processors: RwLock<Vec<Arc<dyn BeanFactoryPostProcessor>>>,
    shutdown_hooks: RwLock<Vec<ShutdownHook>>,
    state: AtomicU8,
    lifecycle_lock: Mutex<()>,
}

impl ApplicationContext {
    pub fn new() -> Self {
        Self::with_parts("application", Arc::new(Environment::new()), SimpleApplicationEventMulticaster::new())
    }

    pub fn builder() -> ApplicationContextBuilder {
        ApplicationContextBuilder::new()
    }

    fn with_parts(id: &str, environment: Arc<Environment>, multicaster: SimpleApplicationEventMulticaster) -> Self {
        let bean_factory = DefaultListableBeanFactory::new();
        let multicaster = Arc::new(multicaster);
        bean_factory.set_environment(Arc::clone(&environment));
        let publisher: Arc<dyn ApplicationEventPublisher> = multicaster.clone();
        bean_factory.set_event_publisher(Some(publisher));

        Self {
            id: id.to_string(),
            bean_factory,
            environment,
            multicaster,
            bean_factory_post_processors: RwLock::new(Vec::new()),
            shutdown_hooks: RwLock::new(Vec::new()),
            state: AtomicU8::new(STATE_CREATED),
            lifecycle_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bean_factory(&self) -> &Arc<DefaultListableBeanFactory> {
        &self.bean_factory
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn multicaster(&self) -> &Arc<SimpleApplicationEventMulticaster> {
        &self.multicaster
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_ACTIVE
    }

    pub fn register_bean_definition(&self, name: &str, definition: BeanDefinition) -> ContainerResult<()> {
        self.bean_factory.register_bean_definition(name, definition)
    }

    pub fn register_singleton(&self, name: &str, instance: BeanInstance) -> ContainerResult<()> {
        crate::bean_factory::SingletonBeanRegistry::register_singleton(self.bean_factory.as_ref(), name, instance)
    }

    pub fn register_alias(&self, name: &str, alias: &str) -> ContainerResult<()> {
        self.bean_factory.register_alias(name, alias)
    }

    pub fn add_bean_post_processor(&self, processor: Arc<dyn BeanPostProcessor>) {
        self.bean_factory.add_bean_post_processor(processor);
    }

    /// 注册 BeanFactoryPostProcessor（刷新时按 order 升序执行）
    pub fn add_bean_factory_post_processor(&self, processor: Arc<dyn BeanFactoryPostProcessor>) {
        let mut processors = self.bean_factory_post_processors.write();
        processors.push(processor);
        processors.sort_by_key(|p| p.order());
        tracing::debug!("Registered BeanFactoryPostProcessor, total: {}", processors.len());
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.multicaster.add_listener(listener);
    }

    /// 注册 shutdown hook，关闭时按注册顺序执行
    pub fn register_shutdown_hook<F>(&self, hook: F)
    where
        F: Fn() -> ContainerResult<()> + Send + Sync + 'static,
    {
        let mut hooks = self.shutdown_hooks.write();
        hooks.push(Box::new(hook));
        tracing::debug!("Registered shutdown hook, total: {}", hooks.len());
    }

    /// 检查 depends-on 图：缺失的依赖和循环依赖
    pub fn validate_dependencies(&self) -> ContainerResult<()> {
        let graph = self.bean_factory.dependency_graph();
        validate_dependency_graph(&graph).map_err(|e| match e {
            DependencyValidationError::CircularDependency { cycle } => ContainerError::DependsOnCycle {
                bean: cycle.first().cloned().unwrap_or_default(),
                dependency: cycle.get(1).cloned().unwrap_or_default(),
            },
            DependencyValidationError::MissingDependency { bean, missing } => ContainerError::InvalidDefinition {
                name: bean,
                message: format!("depends on missing bean '{}'", missing),
            },
        })?;
        tracing::debug!("Dependency validation passed for {} bean(s)", graph.len());
        Ok(())
    }

    fn invoke_bean_factory_post_processors(&self) -> ContainerResult<()> {
        let processors = self.bean_factory_post_processors.read().clone();
        if processors.is_empty() {
            tracing::debug!("No BeanFactoryPostProcessors to invoke");
            return Ok(());
        }

        tracing::debug!("Invoking {} BeanFactoryPostProcessor(s)", processors.len());
        let factory: &dyn ConfigurableListableBeanFactory = self.bean_factory.as_ref();
        for processor in processors {
            processor.post_process_bean_factory(factory)?;
        }
        Ok(())
    }

    /// 启动上下文
    ///
    /// 校验依赖图、执行 BeanFactoryPostProcessor、冻结配置、预实例化单例，
    /// 最后发布 `ContextRefreshedEvent`。失败时销毁已经创建的单例。
    pub fn refresh(&self) -> ContainerResult<()> {
        let _guard = self.lifecycle_lock.lock();
        match self.state.load(Ordering::Acquire) {
            STATE_ACTIVE => {
                return Err(ContainerError::IllegalState(format!(
                    "Application context '{}' has already been refreshed",
                    self.id
                )))
            }
            STATE_CLOSED => {
                return Err(ContainerError::IllegalState(format!(
                    "Application context '{}' has been closed already",
                    self.id
                )))
            }
            _ => {}
        }

        tracing::info!("Refreshing application context '{}'", self.id);

        let result = self
            .validate_dependencies()
            .and_then(|_| self.invoke_bean_factory_post_processors())
            .and_then(|_| {
                self.bean_factory.freeze_configuration();
                self.bean_factory.preinstantiate_singletons()
            });

        if let Err(e) = result {
            tracing::warn!("Exception encountered during context initialization - cancelling refresh attempt: {}", e);
            self.bean_factory.destroy_singletons();
            self.state.store(STATE_CLOSED, Ordering::Release);
            return Err(e);
        }

        self.state.store(STATE_ACTIVE, Ordering::Release);
        let bean_count = self.bean_factory.bean_definition_count();
        self.publish_event(Arc::new(ContextRefreshedEvent::new(self.id.clone(), bean_count)));
        tracing::info!("Application context '{}' refreshed with {} bean definition(s)", self.id, bean_count);
        Ok(())
    }

    /// 关闭上下文；重复关闭是空操作
    pub fn close(&self) {
        let _guard = self.lifecycle_lock.lock();
        if self.state.swap(STATE_CLOSED, Ordering::AcqRel) != STATE_ACTIVE {
            return;
        }

        tracing::info!("Closing application context '{}'", self.id);
        self.publish_event(Arc::new(ContextClosedEvent::new(self.id.clone())));

        let hooks = self.shutdown_hooks.read();
        for (idx, hook) in hooks.iter().enumerate() {
            match hook() {
                Ok(()) => tracing::debug!("Shutdown hook {} executed successfully", idx + 1),
                Err(e) => tracing::warn!("Shutdown hook {} failed: {}", idx + 1, e),
            }
        }
        drop(hooks);

        self.bean_factory.destroy_singletons();
        tracing::info!("Application context '{}' closed", self.id);
    }

    fn assert_active(&self) -> ContainerResult<()> {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => Err(ContainerError::IllegalState(format!(
                "Application context '{}' has been closed already",
                self.id
            ))),
            _ => Ok(()),
        }
    }

    pub fn get_bean(&self, name: &str) -> ContainerResult<BeanInstance> {
        self.assert_active()?;
        self.bean_factory.get_bean(name)
    }

    pub fn get_bean_as<T: Any + Send + Sync>(&self, name: &str) -> ContainerResult<Arc<T>> {
        self.assert_active()?;
        self.bean_factory.get_bean_as::<T>(name)
    }

    pub fn get_bean_of_type<T: Any + Send + Sync>(&self) -> ContainerResult<Arc<T>> {
        self.assert_active()?;
        self.bean_factory.get_bean_of_type::<T>()
    }

    pub fn contains_bean(&self, name: &str) -> bool {
        self.bean_factory.contains_bean(name)
    }

    pub fn bean_definition_names(&self) -> Vec<String> {
        self.bean_factory.bean_definition_names()
    }
}

impl Default for ApplicationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationEventPublisher for ApplicationContext {
    fn publish_event(&self, event: Arc<dyn Event>) {
        tracing::trace!("Publishing event '{}' in context '{}'", event.event_name(), self.id);
        self.multicaster.multicast_event(event);
    }
}

/// 应用上下文构建器
pub struct ApplicationContextBuilder {
    id: String,
    environment: Arc<Environment>,
    executor: Option<Arc<dyn TaskExecutor>>,
    profiles: Vec<String>,
}

impl ApplicationContextBuilder {
    pub fn new() -> Self {
        Self {
            id: "application".to_string(),
            environment: Arc::new(Environment::new()),
            executor: None,
            profiles: Vec::new(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// 使用已有的 Environment
    pub fn environment(mut self, environment: Arc<Environment>) -> Self {
        self.environment = environment;
        self
    }

    pub fn add_property_source(self, source: Box<dyn PropertySource>) -> Self {
        self.environment.add_property_source(source);
        self
    }

    pub fn active_profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }

    /// 事件监听器在此执行器上运行（默认同步执行）
    pub fn task_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> ApplicationContext {
        if !self.profiles.is_empty() {
            self.environment.set_active_profiles(self.profiles);
        }
        let multicaster = match self.executor {
            Some(executor) => SimpleApplicationEventMulticaster::with_executor(executor),
            None => SimpleApplicationEventMulticaster::new(),
        };
        ApplicationContext::with_parts(&self.id, self.environment, multicaster)
    }
}

impl Default for ApplicationContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bean::Bean;
    use crate::bean_definition::BeanValue;
    use crate::config::{MapPropertySource, PlaceholderConfigurer};
    use crate::event::FnEventListener;
    use crate::value::Value;

    #[derive(Default)]
    struct Server {
        port: i64,
    }

    impl Bean for Server {
        fn set_property(&mut self, name: &str, value: Value) -> anyhow::Result<()> {
            match name {
                "port" => self.port = value.as_i64()?,
                _ => anyhow::bail!("unknown property '{}'", name),
            }
            Ok(())
        }
    }

    fn recording_listener(events: &Arc<Mutex<Vec<String>>>) -> Arc<dyn EventListener> {
        let events = Arc::clone(events);
        Arc::new(FnEventListener::new("recorder", move |event: Arc<dyn Event>| {
            events.lock().push(event.event_name().to_string());
            Ok(())
        }))
    }

    #[test]
    fn test_refresh_and_close_lifecycle() {
        let context = ApplicationContext::builder()
            .id("test")
            .add_property_source(Box::new(MapPropertySource::new("props").with_property("server.port", 9090_i64)))
            .build();
        let events = Arc::new(Mutex::new(Vec::new()));
        context.add_listener(recording_listener(&events));
        context
            .register_bean_definition(
                "server",
                BeanDefinition::of_default::<Server>().with_property("port", BeanValue::placeholder("${server.port}")),
            )
            .unwrap();
        context.add_bean_factory_post_processor(Arc::new(PlaceholderConfigurer::new(Arc::clone(context.environment()))));

        context.refresh().unwrap();
        assert!(context.is_active());
        assert_eq!(context.get_bean_as::<Server>("server").unwrap().port, 9090);
        assert!(matches!(context.refresh(), Err(ContainerError::IllegalState(_))));
        assert!(matches!(
            context.register_bean_definition("late", BeanDefinition::of_default::<Server>()),
            Err(ContainerError::ConfigurationFrozen(_))
        ));

        context.close();
        assert!(!context.is_active());
        assert!(context.get_bean("server").is_err());

        let events = events.lock();
        assert_eq!(events.first().map(String::as_str), Some("BeanCreatedEvent"));
        assert!(events.contains(&"ContextRefreshedEvent".to_string()));
        assert_eq!(events.last().map(String::as_str), Some("ContextClosedEvent"));
    }

    #[test]
    fn test_refresh_rejects_invalid_dependency_graph() {
        let context = ApplicationContext::new();
        context
            .register_bean_definition("a", BeanDefinition::of_default::<Server>().depends_on("missing"))
            .unwrap();
        assert!(matches!(
            context.refresh(),
            Err(ContainerError::InvalidDefinition { ref name, .. }) if name == "a"
        ));

        let context = ApplicationContext::new();
        context
            .register_bean_definition("a", BeanDefinition::of_default::<Server>().depends_on("b"))
            .unwrap();
        context
            .register_bean_definition("b", BeanDefinition::of_default::<Server>().depends_on("a"))
            .unwrap();
        assert!(matches!(context.refresh(), Err(ContainerError::DependsOnCycle { .. })));
    }

    #[test]
    fn test_close_before_refresh_skips_hooks() {
        let context = ApplicationContext::new();
        let ran = Arc::new(Mutex::new(0));
        {
            let ran = Arc::clone(&ran);
            context.register_shutdown_hook(move || {
                *ran.lock() += 1;
                Ok(())
            });
        }
        context.register_shutdown_hook(|| Err(ContainerError::IllegalState("hook failed".to_string())));

        context.close();
        assert_eq!(*ran.lock(), 0);

        context.refresh().unwrap_err();
    }

    #[test]
    fn test_close_runs_hooks_once() {
        let context = ApplicationContext::new();
        let ran = Arc::new(Mutex::new(0));
        {
            let ran = Arc::clone(&ran);
            context.register_shutdown_hook(move || {
                *ran.lock() += 1;
                Ok(())
            });
        }
        context.refresh().unwrap();
        context.close();
        context.close();
        assert_eq!(*ran.lock(), 1);
    }
}
