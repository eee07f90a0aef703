// sprig-core: 类似 Spring 的依赖注入容器
//
// 提供：
// - Bean 定义、单例注册表和完整的 Bean 生命周期引擎
// - 循环引用的早期引用解析
// - FactoryBean、父子定义、别名
// - 基于 MethodDispatch 的方法分派模型（AOP 代理的基础）
// - 配置环境、事件和应用上下文

pub mod alias;
pub mod bean;
pub mod bean_definition;
pub mod bean_factory;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod logging;
pub mod resource;
pub mod scope;
pub mod singleton_registry;
pub mod utils;
pub mod value;

// 重新导出常用类型
pub use alias::AliasRegistry;
pub use bean::{AsAny, Bean, BeanInstance, DisposableBean, FactoryBean};
pub use bean_definition::{BeanDefinition, BeanType, BeanValue, ConstructorArgumentValues, Instantiator};
pub use bean_factory::{
    BeanFactory, BeanFactoryExt, ConfigurableBeanFactory, ConfigurableListableBeanFactory,
    DefaultListableBeanFactory, ListableBeanFactory, ListableBeanFactoryExt, ObjectProvider,
    SingletonBeanRegistry, FACTORY_BEAN_PREFIX,
};
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PlaceholderConfigurer,
    PropertySource, TomlPropertySource,
};
pub use context::{ApplicationContext, ApplicationContextBuilder, ShutdownHook};
pub use dispatch::{
    ret, Arguments, CallContext, ErrorKind, InvocationError, InvocationResult, Method, MethodDispatch,
    NoSuchMethod, ReturnValue,
};
pub use error::{ContainerError, ContainerResult};
pub use event::{
    ApplicationEventMulticaster, ApplicationEventPublisher, BeanCreatedEvent, ContextClosedEvent,
    ContextRefreshedEvent, Event, EventListener, FnEventListener, PayloadEvent, SimpleApplicationEventMulticaster,
    SyncTaskExecutor, TaskExecutor, TokioTaskExecutor, TypedEventListener, TypedEventListenerAdapter,
};
pub use lifecycle::{BeanFactoryPostProcessor, BeanPostProcessor};
pub use logging::{LogFormat, LogLevel, LoggingConfig, LoggingError};
pub use resource::{ByteArrayResource, DefaultResourceLoader, FileSystemResource, Resource, ResourceLoader};
pub use scope::{Role, Scope};
pub use singleton_registry::DefaultSingletonBeanRegistry;
pub use value::{BeanRef, Value};

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::bean::{Bean, BeanInstance, DisposableBean, FactoryBean};
    pub use crate::bean_definition::{BeanDefinition, BeanValue};
    pub use crate::bean_factory::{
        BeanFactory, BeanFactoryExt, ConfigurableBeanFactory, ConfigurableListableBeanFactory,
        DefaultListableBeanFactory, ListableBeanFactory, ListableBeanFactoryExt, SingletonBeanRegistry,
    };
    pub use crate::config::{self, ConfigValue, Environment, MapPropertySource, PropertySource};
    pub use crate::context::ApplicationContext;
    pub use crate::dispatch::{ret, Arguments, CallContext, InvocationError, InvocationResult, Method, MethodDispatch};
    pub use crate::error::{ContainerError, ContainerResult};
    pub use crate::event::{ApplicationEventPublisher, Event, EventListener};
    pub use crate::lifecycle::{BeanFactoryPostProcessor, BeanPostProcessor};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use crate::scope::{Role, Scope};
    pub use crate::utils;
    pub use crate::value::{BeanRef, Value};
    pub use anyhow::{anyhow, Context};
}
