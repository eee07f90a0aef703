//! 目标源（TargetSource）
//!
//! 代理每次调用时通过目标源取得当前目标，目标可以是固定的单例、
//! 每次新建的原型、首次调用时才获取的懒加载 Bean，或者可以运行时替换的对象。

use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use sprig_core::{BeanFactory, ContainerError, MethodDispatch};

use crate::error::{AopError, AopResult};

/// 目标源
pub trait TargetSource: Send + Sync {
    /// 目标类型名称；未知时返回 None
    fn target_class(&self) -> Option<&'static str>;

    /// 每次 `get_target` 是否返回同一个对象
    fn is_static(&self) -> bool;

    /// 取得当前目标；只有拦截器的代理返回 None
    fn get_target(&self) -> AopResult<Option<Arc<dyn MethodDispatch>>>;

    /// 调用结束后归还目标
    fn release_target(&self, _target: &Arc<dyn MethodDispatch>) {}
}

/// 固定目标
pub struct SingletonTargetSource {
    target: Arc<dyn MethodDispatch>,
}

impl SingletonTargetSource {
    pub fn new(target: Arc<dyn MethodDispatch>) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &Arc<dyn MethodDispatch> {
        &self.target
    }
}

impl TargetSource for SingletonTargetSource {
    fn target_class(&self) -> Option<&'static str> {
        Some(self.target.target_class())
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> AopResult<Option<Arc<dyn MethodDispatch>>> {
        Ok(Some(Arc::clone(&self.target)))
    }
}

impl fmt::Debug for SingletonTargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SingletonTargetSource for target object [{}]", self.target.target_class())
    }
}

/// 没有目标，调用必须由拦截器处理
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyTargetSource {
    target_class: Option<&'static str>,
}

impl EmptyTargetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_class(target_class: &'static str) -> Self {
        Self {
            target_class: Some(target_class),
        }
    }
}

impl TargetSource for EmptyTargetSource {
    fn target_class(&self) -> Option<&'static str> {
        self.target_class
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> AopResult<Option<Arc<dyn MethodDispatch>>> {
        Ok(None)
    }
}

/// 基于容器 Bean 的目标源共用的部分
struct BeanFactoryTarget {
    bean_factory: Weak<dyn BeanFactory>,
    bean_name: String,
    target_class: Option<&'static str>,
}

impl BeanFactoryTarget {
    fn new(bean_factory: Weak<dyn BeanFactory>, bean_name: impl Into<String>) -> AopResult<Self> {
        let bean_name = bean_name.into();
        let factory = bean_factory.upgrade().ok_or(ContainerError::FactoryDropped)?;
        if !factory.contains_bean(&bean_name) {
            return Err(ContainerError::NoSuchBean { name: bean_name }.into());
        }
        let target_class = factory.get_type_name(&bean_name)?;
        Ok(Self {
            bean_factory,
            bean_name,
            target_class,
        })
    }

    fn factory(&self) -> AopResult<Arc<dyn BeanFactory>> {
        self.bean_factory
            .upgrade()
            .ok_or_else(|| ContainerError::FactoryDropped.into())
    }

    fn fetch(&self) -> AopResult<Arc<dyn MethodDispatch>> {
        Ok(self.factory()?.get_dispatch(&self.bean_name)?)
    }
}

/// 每次调用都从容器取得新的原型 Bean
pub struct PrototypeTargetSource {
    inner: BeanFactoryTarget,
}

impl PrototypeTargetSource {
    /// 目标 Bean 必须是原型作用域
    pub fn new(bean_factory: Weak<dyn BeanFactory>, bean_name: impl Into<String>) -> AopResult<Self> {
        let inner = BeanFactoryTarget::new(bean_factory, bean_name)?;
        if !inner.factory()?.is_prototype(&inner.bean_name)? {
            return Err(AopError::Config(format!(
                "Cannot use prototype target source against non-prototype bean with name '{}': instances would not be independent",
                inner.bean_name
            )));
        }
        Ok(Self { inner })
    }

    /// 覆盖目标类型（默认取容器记录的类型名）
    pub fn with_target_class(mut self, target_class: &'static str) -> Self {
        self.inner.target_class = Some(target_class);
        self
    }

    pub fn bean_name(&self) -> &str {
        &self.inner.bean_name
    }
}

impl TargetSource for PrototypeTargetSource {
    fn target_class(&self) -> Option<&'static str> {
        self.inner.target_class
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> AopResult<Option<Arc<dyn MethodDispatch>>> {
        tracing::trace!("Creating new instance of prototype target bean '{}'", self.inner.bean_name);
        self.inner.fetch().map(Some)
    }

    fn release_target(&self, _target: &Arc<dyn MethodDispatch>) {
        tracing::trace!("Releasing prototype target of bean '{}'", self.inner.bean_name);
    }
}

/// 首次调用时才从容器取得目标，之后一直使用它
pub struct LazyInitTargetSource {
    inner: BeanFactoryTarget,
    target: OnceCell<Arc<dyn MethodDispatch>>,
}

impl LazyInitTargetSource {
    pub fn new(bean_factory: Weak<dyn BeanFactory>, bean_name: impl Into<String>) -> AopResult<Self> {
        Ok(Self {
            inner: BeanFactoryTarget::new(bean_factory, bean_name)?,
            target: OnceCell::new(),
        })
    }

    pub fn with_target_class(mut self, target_class: &'static str) -> Self {
        self.inner.target_class = Some(target_class);
        self
    }

    /// 目标是否已经获取
    pub fn is_initialized(&self) -> bool {
        self.target.get().is_some()
    }
}

impl TargetSource for LazyInitTargetSource {
    fn target_class(&self) -> Option<&'static str> {
        self.inner.target_class
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> AopResult<Option<Arc<dyn MethodDispatch>>> {
        let target = self.target.get_or_try_init(|| {
            tracing::debug!("Initializing lazy target object for bean '{}'", self.inner.bean_name);
            self.inner.fetch()
        })?;
        Ok(Some(Arc::clone(target)))
    }
}

/// 可以在运行时替换目标的目标源
pub struct HotSwappableTargetSource {
    target: RwLock<Arc<dyn MethodDispatch>>,
}

impl HotSwappableTargetSource {
    pub fn new(initial: Arc<dyn MethodDispatch>) -> Self {
        Self {
            target: RwLock::new(initial),
        }
    }

    /// 替换目标，返回旧目标
    ///
    /// 新目标必须与旧目标同类型，已经在执行中的调用继续使用旧目标
    pub fn swap(&self, new_target: Arc<dyn MethodDispatch>) -> AopResult<Arc<dyn MethodDispatch>> {
        let mut target = self.target.write();
        if target.target_class() != new_target.target_class() {
            return Err(AopError::Config(format!(
                "Cannot swap target of class '{}' with target of class '{}'",
                target.target_class(),
                new_target.target_class()
            )));
        }
        tracing::debug!("Swapping target of class '{}'", new_target.target_class());
        Ok(std::mem::replace(&mut *target, new_target))
    }
}

impl TargetSource for HotSwappableTargetSource {
    fn target_class(&self) -> Option<&'static str> {
        Some(self.target.read().target_class())
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> AopResult<Option<Arc<dyn MethodDispatch>>> {
        Ok(Some(Arc::clone(&self.target.read())))
    }
}
