//! Bean Factory - 核心容器接口与生命周期引擎
//!
//! trait 层次与 Spring 一致：
//! `BeanFactory` → `ListableBeanFactory` / `ConfigurableBeanFactory` →
//! `ConfigurableListableBeanFactory`。泛型方法放在 `*Ext` trait 中，
//! 保证基础 trait 可以作为 trait object 使用。

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

use crate::alias::AliasRegistry;
use crate::bean::{Bean, BeanInstance, DisposableBean};
use crate::bean_definition::{BeanDefinition, BeanValue, Instantiator};
use crate::config::{ConfigValue, Environment};
use crate::dispatch::MethodDispatch;
use crate::error::{ContainerError, ContainerResult};
use crate::event::{ApplicationEventPublisher, BeanCreatedEvent};
use crate::lifecycle::BeanPostProcessor;
use crate::singleton_registry::{DefaultSingletonBeanRegistry, SingletonLookup};
use crate::value::{BeanRef, EarlyProfile, Value};

/// 获取 FactoryBean 本身时使用的名称前缀
pub const FACTORY_BEAN_PREFIX: &str = "&";

/// BeanFactory - 最基础的容器接口
///
/// 此 trait 不包含泛型方法，因此可以作为 trait object 使用
pub trait BeanFactory: Send + Sync {
    /// 通过名称（或别名）获取 Bean
    fn get_bean(&self, name: &str) -> ContainerResult<BeanInstance>;

    /// 获取 Bean 的方法分派能力（经过代理的 Bean 返回代理）
    fn get_dispatch(&self, name: &str) -> ContainerResult<Arc<dyn MethodDispatch>> {
        let instance = self.get_bean(name)?;
        instance
            .dispatch()
            .cloned()
            .ok_or_else(|| ContainerError::TypeMismatch {
                name: name.to_string(),
                expected: "MethodDispatch".to_string(),
                actual: instance.type_name().to_string(),
            })
    }

    fn contains_bean(&self, name: &str) -> bool;

    fn is_singleton(&self, name: &str) -> ContainerResult<bool>;

    fn is_prototype(&self, name: &str) -> ContainerResult<bool>;

    /// Bean 是否为给定类型（不会触发创建）
    fn is_type_match(&self, name: &str, type_id: TypeId) -> ContainerResult<bool>;

    /// Bean 的类型名称（未知时返回 None，不会触发创建）
    fn get_type_name(&self, name: &str) -> ContainerResult<Option<&'static str>>;

    fn get_aliases(&self, name: &str) -> Vec<String>;
}

/// BeanFactory 的泛型扩展
pub trait BeanFactoryExt: BeanFactory {
    /// 获取 Bean 并转换为具体类型，类型不符时返回 `TypeMismatch`
    fn get_bean_as<T: Any + Send + Sync>(&self, name: &str) -> ContainerResult<Arc<T>> {
        let instance = self.get_bean(name)?;
        instance.downcast::<T>().ok_or_else(|| ContainerError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>().to_string(),
            actual: instance.type_name().to_string(),
        })
    }
}

impl<F: BeanFactory + ?Sized> BeanFactoryExt for F {}

/// ListableBeanFactory - 可列举的 Bean 工厂
pub trait ListableBeanFactory: BeanFactory {
    /// 所有 Bean 定义名称（注册顺序）
    fn bean_definition_names(&self) -> Vec<String>;

    fn bean_definition_count(&self) -> usize;

    fn contains_bean_definition(&self, name: &str) -> bool;

    /// 指定类型的所有 Bean 名称（包括手动注册的单例）
    fn bean_names_for_type(&self, type_id: TypeId) -> Vec<String>;

    fn is_autowire_candidate(&self, name: &str) -> bool;

    fn is_primary(&self, name: &str) -> bool;

    /// 按类型解析出唯一的候选 Bean 名称
    ///
    /// 只考虑自动装配候选者；多个候选者时选 primary，仍不唯一则报 `NotUnique`
    fn resolve_unique_name(&self, type_id: TypeId, type_name: &str) -> ContainerResult<String> {
        let candidates: Vec<String> = self
            .bean_names_for_type(type_id)
            .into_iter()
            .filter(|name| self.is_autowire_candidate(name))
            .collect();

        if let [only] = candidates.as_slice() {
            return Ok(only.clone());
        }
        if candidates.is_empty() {
            return Err(ContainerError::NoSuchBeanOfType {
                type_name: type_name.to_string(),
            });
        }

        let primaries: Vec<&String> = candidates.iter().filter(|name| self.is_primary(name)).collect();
        if let [primary] = primaries.as_slice() {
            return Ok((*primary).clone());
        }
        Err(ContainerError::NotUnique {
            type_name: type_name.to_string(),
            candidates,
        })
    }
}

/// ListableBeanFactory 的泛型扩展
pub trait ListableBeanFactoryExt: ListableBeanFactory {
    /// 按类型获取唯一的 Bean
    fn get_bean_of_type<T: Any + Send + Sync>(&self) -> ContainerResult<Arc<T>> {
        let name = self.resolve_unique_name(TypeId::of::<T>(), std::any::type_name::<T>())?;
        self.get_bean_as::<T>(&name)
    }

    /// 按类型获取所有 Bean（定义注册顺序）
    fn get_beans_of_type<T: Any + Send + Sync>(&self) -> ContainerResult<Vec<(String, Arc<T>)>> {
        self.bean_names_for_type(TypeId::of::<T>())
            .into_iter()
            .map(|name| {
                let bean = self.get_bean_as::<T>(&name)?;
                Ok((name, bean))
            })
            .collect()
    }

    fn contains_bean_of_type<T: Any + Send + Sync>(&self) -> bool {
        !self.bean_names_for_type(TypeId::of::<T>()).is_empty()
    }
}

impl<F: ListableBeanFactory + ?Sized> ListableBeanFactoryExt for F {}

/// 延迟 / 可选的按类型依赖访问
pub struct ObjectProvider<T> {
    factory: Weak<dyn ListableBeanFactory>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ObjectProvider<T> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Any + Send + Sync> ObjectProvider<T> {
    pub fn new(factory: Weak<dyn ListableBeanFactory>) -> Self {
        Self {
            factory,
            _marker: PhantomData,
        }
    }

    fn factory(&self) -> ContainerResult<Arc<dyn ListableBeanFactory>> {
        self.factory.upgrade().ok_or(ContainerError::FactoryDropped)
    }

    /// 获取唯一的 Bean，不存在或不唯一时报错
    pub fn get_object(&self) -> ContainerResult<Arc<T>> {
        self.factory()?.get_bean_of_type::<T>()
    }

    /// 不存在时返回 None，不唯一时仍然报错
    pub fn get_if_available(&self) -> ContainerResult<Option<Arc<T>>> {
        match self.get_object() {
            Ok(bean) => Ok(Some(bean)),
            Err(ContainerError::NoSuchBeanOfType { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 不存在或不唯一时都返回 None
    pub fn get_if_unique(&self) -> ContainerResult<Option<Arc<T>>> {
        match self.get_object() {
            Ok(bean) => Ok(Some(bean)),
            Err(ContainerError::NoSuchBeanOfType { .. }) | Err(ContainerError::NotUnique { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// 单例注册接口
pub trait SingletonBeanRegistry: Send + Sync {
    fn register_singleton(&self, name: &str, instance: BeanInstance) -> ContainerResult<()>;

    fn get_singleton(&self, name: &str) -> Option<BeanInstance>;

    fn contains_singleton(&self, name: &str) -> bool;

    fn singleton_names(&self) -> Vec<String>;

    fn singleton_count(&self) -> usize;
}

/// BeanDefinition 修改回调
pub type DefinitionModifier<'a> = &'a mut dyn FnMut(&mut BeanDefinition) -> ContainerResult<()>;

/// ConfigurableBeanFactory - 可配置的 Bean 工厂
pub trait ConfigurableBeanFactory: BeanFactory + SingletonBeanRegistry {
    fn register_bean_definition(&self, name: &str, definition: BeanDefinition) -> ContainerResult<()>;

    fn remove_bean_definition(&self, name: &str) -> ContainerResult<()>;

    fn get_bean_definition(&self, name: &str) -> ContainerResult<BeanDefinition>;

    /// 合并父定义之后的定义
    fn get_merged_bean_definition(&self, name: &str) -> ContainerResult<BeanDefinition>;

    /// 修改 Bean 定义；配置冻结或单例已经创建后不允许修改
    fn modify_bean_definition(&self, name: &str, modifier: DefinitionModifier<'_>) -> ContainerResult<()>;

    fn register_alias(&self, name: &str, alias: &str) -> ContainerResult<()>;

    /// 添加 BeanPostProcessor（按 order 排序）
    fn add_bean_post_processor(&self, processor: Arc<dyn BeanPostProcessor>);

    fn bean_post_processors(&self) -> Vec<Arc<dyn BeanPostProcessor>>;

    fn set_allow_bean_definition_overriding(&self, allow: bool);

    fn set_allow_circular_references(&self, allow: bool);

    fn is_currently_in_creation(&self, name: &str) -> bool;

    fn register_dependent_bean(&self, bean: &str, dependent: &str);

    fn dependents_of(&self, bean: &str) -> Vec<String>;
}

/// ConfigurableListableBeanFactory - BeanFactoryPostProcessor 接收的参数类型
pub trait ConfigurableListableBeanFactory: ListableBeanFactory + ConfigurableBeanFactory {
    /// 预实例化所有非延迟的单例
    fn preinstantiate_singletons(&self) -> ContainerResult<()>;

    fn freeze_configuration(&self);

    fn is_configuration_frozen(&self) -> bool;

    /// 按依赖的逆序销毁所有单例
    fn destroy_singletons(&self);

    /// bean 名称 -> depends-on 名称（已解析别名）
    fn dependency_graph(&self) -> HashMap<String, Vec<String>>;
}

#[derive(Default)]
struct DefinitionStore {
    definitions: HashMap<String, BeanDefinition>,
    names: Vec<String>,
}

enum Resolved {
    Instance(BeanInstance),
    Early(BeanRef),
}

/// 单例创建期间持有；未完成就被丢弃（出错或 panic）时清理创建状态
struct SingletonCreation<'a> {
    registry: &'a DefaultSingletonBeanRegistry,
    name: &'a str,
    finished: bool,
}

impl SingletonCreation<'_> {
    fn complete(mut self, instance: BeanInstance) {
        self.registry.complete_singleton(self.name, instance);
        self.finished = true;
    }
}

impl Drop for SingletonCreation<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("Cleaning up after failed creation of singleton bean '{}'", self.name);
            self.registry.fail_singleton(self.name);
        }
    }
}

struct PrototypeCreation<'a> {
    in_creation: &'a Mutex<HashMap<ThreadId, Vec<String>>>,
    name: String,
}

impl Drop for PrototypeCreation<'_> {
    fn drop(&mut self) {
        let mut map = self.in_creation.lock();
        let me = thread::current().id();
        if let Some(names) = map.get_mut(&me) {
            if let Some(pos) = names.iter().rposition(|n| *n == self.name) {
                names.remove(pos);
            }
            if names.is_empty() {
                map.remove(&me);
            }
        }
    }
}

/// 容器销毁单例时调用的适配器
struct DisposableBeanAdapter {
    bean_name: String,
    bean: Arc<dyn Bean>,
    exposed: BeanInstance,
    destroy_method: Option<String>,
    processors: Vec<Arc<dyn BeanPostProcessor>>,
}

impl DisposableBean for DisposableBeanAdapter {
    fn destroy(&self) -> anyhow::Result<()> {
        for processor in &self.processors {
            processor.post_process_before_destruction(&self.exposed, &self.bean_name)?;
        }

        tracing::trace!("Invoking destroy() on bean with name '{}'", self.bean_name);
        if let Err(e) = Bean::destroy(&*self.bean) {
            tracing::warn!("Invocation of destroy method failed on bean with name '{}': {}", self.bean_name, e);
        }

        if let Some(method) = &self.destroy_method {
            tracing::trace!(
                "Invoking custom destroy method '{}' on bean with name '{}'",
                method,
                self.bean_name
            );
            self.bean.invoke_destroy_method(method)?;
        }
        Ok(())
    }
}

/// 用户回调返回的错误：容器错误原样保留，其他错误包装为 `Other`
fn callback_error(error: anyhow::Error) -> ContainerError {
    match error.downcast::<ContainerError>() {
        Ok(inner) => inner,
        Err(other) => ContainerError::Other(other),
    }
}

/// DefaultListableBeanFactory - ConfigurableListableBeanFactory 的默认实现
///
/// 通过 [`DefaultListableBeanFactory::new`] 创建，始终位于 `Arc` 中
/// （早期引用需要持有工厂的弱引用）。
pub struct DefaultListableBeanFactory {
    self_ref: Weak<DefaultListableBeanFactory>,
    store: RwLock<DefinitionStore>,
    merged: RwLock<HashMap<String, BeanDefinition>>,
    aliases: AliasRegistry,
    singletons: DefaultSingletonBeanRegistry,
    post_processors: RwLock<Vec<Arc<dyn BeanPostProcessor>>>,
    factory_products: RwLock<HashMap<String, BeanInstance>>,
    prototypes_in_creation: Mutex<HashMap<ThreadId, Vec<String>>>,
    environment: RwLock<Option<Arc<Environment>>>,
    event_publisher: RwLock<Option<Arc<dyn ApplicationEventPublisher>>>,
    allow_definition_overriding: AtomicBool,
    allow_circular_references: AtomicBool,
    frozen: AtomicBool,
    inner_bean_counter: AtomicUsize,
}

impl DefaultListableBeanFactory {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            store: RwLock::new(DefinitionStore::default()),
            merged: RwLock::new(HashMap::new()),
            aliases: AliasRegistry::new(),
            singletons: DefaultSingletonBeanRegistry::new(),
            post_processors: RwLock::new(Vec::new()),
            factory_products: RwLock::new(HashMap::new()),
            prototypes_in_creation: Mutex::new(HashMap::new()),
            environment: RwLock::new(None),
            event_publisher: RwLock::new(None),
            allow_definition_overriding: AtomicBool::new(false),
            allow_circular_references: AtomicBool::new(true),
            frozen: AtomicBool::new(false),
            inner_bean_counter: AtomicUsize::new(0),
        })
    }

    /// 用于解析 `${...}` 占位符的环境
    pub fn set_environment(&self, environment: Arc<Environment>) {
        *self.environment.write() = Some(environment);
    }

    pub fn environment(&self) -> Option<Arc<Environment>> {
        self.environment.read().clone()
    }

    /// 单例创建完成时发布 `BeanCreatedEvent`
    pub fn set_event_publisher(&self, publisher: Option<Arc<dyn ApplicationEventPublisher>>) {
        *self.event_publisher.write() = publisher;
    }

    pub fn object_provider<T: Any + Send + Sync>(&self) -> ObjectProvider<T> {
        let factory: Weak<dyn ListableBeanFactory> = self.self_ref.clone();
        ObjectProvider::new(factory)
    }

    pub fn is_allow_circular_references(&self) -> bool {
        self.allow_circular_references.load(Ordering::Acquire)
    }

    /// 单例是否已经完全初始化
    pub fn is_singleton_completed(&self, name: &str) -> bool {
        self.singletons.contains_singleton(name)
    }

    /// 去掉 `&` 前缀并解析别名
    pub fn transformed_bean_name(&self, name: &str) -> String {
        self.aliases
            .canonical_name(name.trim_start_matches(FACTORY_BEAN_PREFIX))
    }

    /// 获取 Bean 引用：循环引用时返回早期引用而不是报错
    pub fn get_bean_ref(&self, name: &str) -> ContainerResult<BeanRef> {
        match self.do_get_bean(name, false)? {
            Resolved::Instance(instance) => Ok(BeanRef::resolved(name, instance)),
            Resolved::Early(early) => Ok(early),
        }
    }

    fn do_get_bean(&self, name: &str, raw: bool) -> ContainerResult<Resolved> {
        let is_dereference = name.starts_with(FACTORY_BEAN_PREFIX);
        let bean_name = self.transformed_bean_name(name);

        if let Some(instance) = self.singletons.get_singleton(&bean_name) {
            tracing::trace!("Returning cached instance of singleton bean '{}'", bean_name);
            if raw {
                return Ok(Resolved::Instance(instance));
            }
            return self
                .object_for_instance(instance, &bean_name, is_dereference)
                .map(Resolved::Instance);
        }

        let definition = self.get_merged_bean_definition(&bean_name)?;
        if definition.is_abstract() {
            return Err(ContainerError::AbstractBean { name: bean_name });
        }
        definition.validate(&bean_name)?;
        self.check_depends_on(&bean_name, &definition)?;

        let instance = if definition.is_singleton() {
            match self.singletons.begin_singleton(&bean_name)? {
                SingletonLookup::Ready(instance) => instance,
                SingletonLookup::Early(early) => return Ok(Resolved::Early(early)),
                SingletonLookup::Create => {
                    let creation = SingletonCreation {
                        registry: &self.singletons,
                        name: &bean_name,
                        finished: false,
                    };
                    tracing::debug!("Creating shared instance of singleton bean '{}'", bean_name);
                    let instance = self.create_bean(&bean_name, definition, true)?;
                    creation.complete(instance.clone());
                    self.publish_bean_created(&bean_name, &instance);
                    instance
                }
            }
        } else {
            let _creation = self.before_prototype_creation(&bean_name)?;
            tracing::trace!("Creating new instance of prototype bean '{}'", bean_name);
            self.create_bean(&bean_name, definition, false)?
        };

        if raw {
            return Ok(Resolved::Instance(instance));
        }
        self.object_for_instance(instance, &bean_name, is_dereference)
            .map(Resolved::Instance)
    }

    fn before_prototype_creation(&self, name: &str) -> ContainerResult<PrototypeCreation<'_>> {
        let mut map = self.prototypes_in_creation.lock();
        let names = map.entry(thread::current().id()).or_default();
        if names.iter().any(|n| n == name) {
            return Err(ContainerError::CurrentlyInCreation {
                name: name.to_string(),
            });
        }
        names.push(name.to_string());
        Ok(PrototypeCreation {
            in_creation: &self.prototypes_in_creation,
            name: name.to_string(),
        })
    }

    /// depends-on 的 Bean 必须先创建；depends-on 关系成环时总是报错
    fn check_depends_on(&self, bean_name: &str, definition: &BeanDefinition) -> ContainerResult<()> {
        for dependency in definition.dependencies() {
            let dependency = self.transformed_bean_name(dependency);
            if self.declares_depends_on(&dependency, bean_name) {
                return Err(ContainerError::DependsOnCycle {
                    bean: bean_name.to_string(),
                    dependency,
                });
            }
            self.singletons.register_dependent_bean(&dependency, bean_name);
            self.get_bean(&dependency)
                .map_err(|e| ContainerError::creation(bean_name, e))?;
        }
        Ok(())
    }

    /// 只沿 depends-on 声明查找 `from` 是否（间接）依赖 `target`，属性引用不算
    fn declares_depends_on(&self, from: &str, target: &str) -> bool {
        let mut visited = HashSet::new();
        let mut pending = vec![from.to_string()];
        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Ok(definition) = self.get_merged_bean_definition(&current) else {
                continue;
            };
            for dependency in definition.dependencies() {
                let dependency = self.transformed_bean_name(dependency);
                if dependency == target {
                    return true;
                }
                pending.push(dependency);
            }
        }
        false
    }

    /// FactoryBean 返回产品，`&name` 返回工厂本身
    fn object_for_instance(
        &self,
        instance: BeanInstance,
        bean_name: &str,
        is_dereference: bool,
    ) -> ContainerResult<BeanInstance> {
        let Some(factory) = instance.factory_bean().cloned() else {
            if is_dereference {
                return Err(ContainerError::NotAFactoryBean {
                    name: bean_name.to_string(),
                });
            }
            return Ok(instance);
        };
        if is_dereference {
            return Ok(instance);
        }

        let shared = factory.is_singleton() && self.singletons.contains_singleton(bean_name);
        if shared {
            if let Some(product) = self.factory_products.read().get(bean_name) {
                return Ok(product.clone());
            }
        }

        tracing::trace!("Obtaining object from FactoryBean '{}'", bean_name);
        let product = factory
            .get_object()
            .map_err(|e| ContainerError::creation(bean_name, callback_error(e)))?;
        let product = self
            .apply_after_initialization(product, bean_name, &self.bean_post_processors())
            .map_err(|e| ContainerError::creation(bean_name, e))?;

        if shared {
            let mut products = self.factory_products.write();
            let cached = products
                .entry(bean_name.to_string())
                .or_insert_with(|| product.clone());
            return Ok(cached.clone());
        }
        Ok(product)
    }

    /// 创建 Bean：实例化、填充属性、初始化、后置处理
    fn create_bean(&self, name: &str, definition: BeanDefinition, disposable: bool) -> ContainerResult<BeanInstance> {
        let processors = self.bean_post_processors();

        for processor in &processors {
            let shortcut = processor
                .post_process_before_instantiation(&definition, name)
                .map_err(|e| ContainerError::creation(name, e))?;
            if let Some(instance) = shortcut {
                tracing::debug!(
                    "Bean '{}' instantiated by post-processor '{}' before instantiation",
                    name,
                    processor.name()
                );
                return self
                    .apply_after_initialization(instance, name, &processors)
                    .map_err(|e| ContainerError::creation(name, e));
            }
        }

        self.do_create_bean(name, definition, disposable, &processors)
            .map_err(|e| ContainerError::creation(name, e))
    }

    fn do_create_bean(
        &self,
        name: &str,
        mut definition: BeanDefinition,
        disposable: bool,
        processors: &[Arc<dyn BeanPostProcessor>],
    ) -> ContainerResult<BeanInstance> {
        for processor in processors {
            processor.post_process_merged_bean_definition(&mut definition, name)?;
        }

        let mut bean = self.instantiate(name, &definition)?;

        if definition.is_singleton()
            && self.is_allow_circular_references()
            && self.singletons.is_currently_in_creation(name)
        {
            tracing::trace!(
                "Eagerly caching bean '{}' to allow for resolving potential circular references",
                name
            );
            self.singletons
                .expose_early_reference(
                    name,
                    BeanRef::early(name, self.self_ref.clone(), EarlyProfile::of(&*bean)),
                );
        }

        let mut populate = true;
        for processor in processors {
            if !processor.post_process_after_instantiation(bean.as_mut(), name)? {
                tracing::trace!("Property population of bean '{}' vetoed by '{}'", name, processor.name());
                populate = false;
                break;
            }
        }
        if populate {
            self.populate_bean(name, &definition, bean.as_mut())?;
        }

        for processor in processors {
            processor.post_process_before_initialization(bean.as_mut(), name)?;
        }

        bean.after_properties_set().map_err(callback_error)?;
        if let Some(method) = definition.init_method() {
            tracing::trace!("Invoking init method '{}' on bean with name '{}'", method, name);
            bean.invoke_init_method(method).map_err(callback_error)?;
        }

        let bean: Arc<dyn Bean> = Arc::from(bean);
        let exposed = self.apply_after_initialization(BeanInstance::from_bean(Arc::clone(&bean)), name, processors)?;

        if disposable && definition.is_singleton() {
            self.singletons.register_disposable_bean(
                name,
                Arc::new(DisposableBeanAdapter {
                    bean_name: name.to_string(),
                    bean,
                    exposed: exposed.clone(),
                    destroy_method: definition.destroy_method().map(str::to_string),
                    processors: processors.to_vec(),
                }),
            );
        }
        Ok(exposed)
    }

    fn instantiate(&self, name: &str, definition: &BeanDefinition) -> ContainerResult<Box<dyn Bean>> {
        let instantiator = definition
            .instantiator()
            .ok_or_else(|| ContainerError::InvalidDefinition {
                name: name.to_string(),
                message: "no instantiation strategy".to_string(),
            })?;

        match instantiator {
            Instantiator::Supplier(supplier) => supplier().map_err(callback_error),
            Instantiator::Constructor(constructor) => {
                let args = self.resolve_constructor_args(name, definition)?;
                constructor(args).map_err(callback_error)
            }
            Instantiator::FactoryMethod {
                factory_bean_name,
                method_name,
                invoke,
            } => {
                let factory = match factory_bean_name {
                    Some(factory_name) => {
                        let factory_name = self.transformed_bean_name(factory_name);
                        let factory = self.get_bean(&factory_name)?;
                        self.singletons.register_dependent_bean(&factory_name, name);
                        Some(factory)
                    }
                    None => None,
                };
                let args = self.resolve_constructor_args(name, definition)?;
                tracing::trace!("Invoking factory method '{}' for bean '{}'", method_name, name);
                invoke(factory, args).map_err(callback_error)
            }
        }
    }

    fn resolve_constructor_args(&self, name: &str, definition: &BeanDefinition) -> ContainerResult<Vec<Value>> {
        let declared = definition
            .constructor_args()
            .ordered()
            .map_err(|message| ContainerError::InvalidDefinition {
                name: name.to_string(),
                message,
            })?;
        declared.iter().map(|value| self.resolve_value(name, value)).collect()
    }

    fn populate_bean(&self, name: &str, definition: &BeanDefinition, bean: &mut dyn Bean) -> ContainerResult<()> {
        for (property, declared) in definition.property_values() {
            let value = self.resolve_value(name, declared)?;
            bean.set_property(property, value).map_err(|e| match e.downcast::<ContainerError>() {
                Ok(inner) => inner,
                Err(other) => ContainerError::Other(other.context(format!("Error setting property '{}'", property))),
            })?;
        }
        Ok(())
    }

    /// 把声明的值解析为运行时值
    fn resolve_value(&self, owner: &str, declared: &BeanValue) -> ContainerResult<Value> {
        match declared {
            BeanValue::Null => Ok(Value::Null),
            BeanValue::Literal(ConfigValue::String(text)) if text.contains("${") => {
                match self.environment() {
                    Some(env) => Ok(Value::from(env.resolve_placeholders(text)?)),
                    None => Ok(Value::from(text.clone())),
                }
            }
            BeanValue::Literal(value) => Ok(Value::Literal(value.clone())),
            BeanValue::Placeholder(text) => {
                let env = self
                    .environment()
                    .ok_or_else(|| ContainerError::UnresolvablePlaceholder(text.clone()))?;
                Ok(Value::from(env.resolve_placeholders(text)?))
            }
            BeanValue::Ref(target) => {
                let reference = self.get_bean_ref(target)?;
                self.singletons
                    .register_dependent_bean(&self.transformed_bean_name(target), owner);
                Ok(Value::Ref(reference))
            }
            BeanValue::ByType { type_id, type_name } => {
                let target = self.resolve_unique_name(*type_id, type_name)?;
                tracing::trace!("Autowiring by type from bean name '{}' to bean named '{}'", owner, target);
                let reference = self.get_bean_ref(&target)?;
                self.singletons
                    .register_dependent_bean(&self.transformed_bean_name(&target), owner);
                Ok(Value::Ref(reference))
            }
            BeanValue::Inner(inner) => self.resolve_inner_bean(owner, inner).map(Value::Object),
            BeanValue::Object(instance) => Ok(Value::Object(instance.clone())),
            BeanValue::List(items) => items
                .iter()
                .map(|item| self.resolve_value(owner, item))
                .collect::<ContainerResult<Vec<_>>>()
                .map(Value::List),
            BeanValue::Map(entries) => entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), self.resolve_value(owner, item)?)))
                .collect::<ContainerResult<Vec<_>>>()
                .map(Value::Map),
        }
    }

    fn resolve_inner_bean(&self, owner: &str, inner: &BeanDefinition) -> ContainerResult<BeanInstance> {
        let definition = match inner.parent_name() {
            Some(parent) => inner.merge_with_parent(&self.get_merged_bean_definition(&self.transformed_bean_name(parent))?),
            None => inner.clone(),
        };
        definition.validate(owner)?;

        let id = self.inner_bean_counter.fetch_add(1, Ordering::Relaxed);
        let inner_name = format!("(inner bean)#{}", id);
        // 内部 Bean 随外部单例一起销毁
        let disposable = self.singletons.is_currently_in_creation(owner);
        let instance = self.create_bean(&inner_name, definition, disposable)?;
        if disposable {
            self.singletons.register_dependent_bean(&inner_name, owner);
        }
        self.object_for_instance(instance, &inner_name, false)
    }

    fn apply_after_initialization(
        &self,
        instance: BeanInstance,
        name: &str,
        processors: &[Arc<dyn BeanPostProcessor>],
    ) -> ContainerResult<BeanInstance> {
        let mut current = instance;
        for processor in processors {
            current = processor.post_process_after_initialization(current, name)?;
        }
        Ok(current)
    }

    fn publish_bean_created(&self, name: &str, instance: &BeanInstance) {
        let publisher = self.event_publisher.read().clone();
        if let Some(publisher) = publisher {
            publisher.publish_event(Arc::new(BeanCreatedEvent::new(name, instance.type_name())));
        }
    }

    fn merged_definition_inner(&self, name: &str, visiting: &mut Vec<String>) -> ContainerResult<BeanDefinition> {
        if let Some(merged) = self.merged.read().get(name) {
            return Ok(merged.clone());
        }

        let definition = self
            .store
            .read()
            .definitions
            .get(name)
            .cloned()
            .ok_or_else(|| ContainerError::NoSuchBean { name: name.to_string() })?;

        let merged = match definition.parent_name() {
            None => definition,
            Some(parent) => {
                let parent = self.transformed_bean_name(parent);
                if parent == name || visiting.contains(&parent) {
                    return Err(ContainerError::InvalidDefinition {
                        name: name.to_string(),
                        message: format!("circular parent definition '{}'", parent),
                    });
                }
                visiting.push(name.to_string());
                let parent_definition = self.merged_definition_inner(&parent, visiting).map_err(|e| match e {
                    ContainerError::NoSuchBean { name: missing } => ContainerError::InvalidDefinition {
                        name: name.to_string(),
                        message: format!("could not resolve parent bean definition '{}'", missing),
                    },
                    other => other,
                })?;
                visiting.pop();
                definition.merge_with_parent(&parent_definition)
            }
        };

        self.merged.write().insert(name.to_string(), merged.clone());
        Ok(merged)
    }

    fn check_modifiable(&self, name: &str, action: &str) -> ContainerResult<()> {
        if self.is_configuration_frozen() {
            return Err(ContainerError::ConfigurationFrozen(format!(
                "cannot {} bean definition '{}'",
                action, name
            )));
        }
        Ok(())
    }

    fn definition_type_matches(definition: &BeanDefinition, type_id: TypeId, is_dereference: bool) -> bool {
        let declared = match definition.object_type() {
            Some(product) if !is_dereference => Some(product),
            _ => definition.bean_type(),
        };
        declared.map(|t| t.id == type_id).unwrap_or(false)
    }
}

impl BeanFactory for DefaultListableBeanFactory {
    fn get_bean(&self, name: &str) -> ContainerResult<BeanInstance> {
        tracing::trace!("Requesting bean: '{}'", name);
        match self.do_get_bean(name, false)? {
            Resolved::Instance(instance) => Ok(instance),
            Resolved::Early(early) => Ok(BeanInstance::from_dispatch(Arc::new(early))),
        }
    }

    fn contains_bean(&self, name: &str) -> bool {
        let bean_name = self.transformed_bean_name(name);
        self.singletons.contains_singleton(&bean_name) || self.store.read().definitions.contains_key(&bean_name)
    }

    fn is_singleton(&self, name: &str) -> ContainerResult<bool> {
        let bean_name = self.transformed_bean_name(name);
        if let Some(instance) = self.singletons.get_singleton(&bean_name) {
            return Ok(match instance.factory_bean() {
                Some(factory) if !name.starts_with(FACTORY_BEAN_PREFIX) => factory.is_singleton(),
                _ => true,
            });
        }
        Ok(self.get_merged_bean_definition(&bean_name)?.is_singleton())
    }

    fn is_prototype(&self, name: &str) -> ContainerResult<bool> {
        let bean_name = self.transformed_bean_name(name);
        if self.singletons.contains_singleton(&bean_name) && !self.contains_bean_definition(&bean_name) {
            return Ok(false);
        }
        Ok(self.get_merged_bean_definition(&bean_name)?.is_prototype())
    }

    fn is_type_match(&self, name: &str, type_id: TypeId) -> ContainerResult<bool> {
        let is_dereference = name.starts_with(FACTORY_BEAN_PREFIX);
        let bean_name = self.transformed_bean_name(name);

        if let Some(instance) = self.singletons.get_singleton(&bean_name) {
            if instance.is_factory_bean() && !is_dereference {
                if let Some(product) = self.factory_products.read().get(&bean_name) {
                    return Ok(product.object_type_id() == type_id);
                }
                return Ok(self
                    .get_merged_bean_definition(&bean_name)
                    .map(|d| d.object_type().map(|t| t.id == type_id).unwrap_or(false))
                    .unwrap_or(false));
            }
            return Ok(instance.object_type_id() == type_id);
        }

        let definition = self.get_merged_bean_definition(&bean_name)?;
        Ok(Self::definition_type_matches(&definition, type_id, is_dereference))
    }

    fn get_type_name(&self, name: &str) -> ContainerResult<Option<&'static str>> {
        let is_dereference = name.starts_with(FACTORY_BEAN_PREFIX);
        let bean_name = self.transformed_bean_name(name);

        if let Some(instance) = self.singletons.get_singleton(&bean_name) {
            match instance.factory_bean() {
                Some(factory) if !is_dereference => return Ok(factory.object_type_name()),
                _ => return Ok(Some(instance.type_name())),
            }
        }

        let definition = self.get_merged_bean_definition(&bean_name)?;
        let declared = match definition.object_type() {
            Some(product) if !is_dereference => Some(product),
            _ => definition.bean_type(),
        };
        Ok(declared.map(|t| t.name))
    }

    fn get_aliases(&self, name: &str) -> Vec<String> {
        let prefix = if name.starts_with(FACTORY_BEAN_PREFIX) { FACTORY_BEAN_PREFIX } else { "" };
        let bean_name = self.transformed_bean_name(name);
        let mut result = Vec::new();
        if bean_name != name.trim_start_matches(FACTORY_BEAN_PREFIX) {
            result.push(format!("{}{}", prefix, bean_name));
        }
        result.extend(
            self.aliases
                .get_aliases(&bean_name)
                .into_iter()
                .filter(|alias| alias != name.trim_start_matches(FACTORY_BEAN_PREFIX))
                .map(|alias| format!("{}{}", prefix, alias)),
        );
        result
    }
}

impl ListableBeanFactory for DefaultListableBeanFactory {
    fn bean_definition_names(&self) -> Vec<String> {
        self.store.read().names.clone()
    }

    fn bean_definition_count(&self) -> usize {
        self.store.read().names.len()
    }

    fn contains_bean_definition(&self, name: &str) -> bool {
        self.store.read().definitions.contains_key(name)
    }

    fn bean_names_for_type(&self, type_id: TypeId) -> Vec<String> {
        let mut result = Vec::new();
        for name in self.bean_definition_names() {
            let Ok(definition) = self.get_merged_bean_definition(&name) else {
                continue;
            };
            if definition.is_abstract() {
                continue;
            }
            if Self::definition_type_matches(&definition, type_id, false) {
                result.push(name.clone());
            }
            if definition.object_type().is_some() && Self::definition_type_matches(&definition, type_id, true) {
                result.push(format!("{}{}", FACTORY_BEAN_PREFIX, name));
            }
        }

        for name in self.singletons.singleton_names() {
            if self.contains_bean_definition(&name) {
                continue;
            }
            if let Some(instance) = self.singletons.get_singleton(&name) {
                if instance.object_type_id() == type_id {
                    result.push(name);
                }
            }
        }
        result
    }

    fn is_autowire_candidate(&self, name: &str) -> bool {
        let bean_name = self.transformed_bean_name(name);
        self.get_merged_bean_definition(&bean_name)
            .map(|d| d.is_autowire_candidate())
            .unwrap_or(true)
    }

    fn is_primary(&self, name: &str) -> bool {
        let bean_name = self.transformed_bean_name(name);
        self.get_merged_bean_definition(&bean_name)
            .map(|d| d.is_primary())
            .unwrap_or(false)
    }
}

impl SingletonBeanRegistry for DefaultListableBeanFactory {
    fn register_singleton(&self, name: &str, instance: BeanInstance) -> ContainerResult<()> {
        self.singletons.register_singleton(name, instance)
    }

    fn get_singleton(&self, name: &str) -> Option<BeanInstance> {
        self.singletons.get_singleton(&self.transformed_bean_name(name))
    }

    fn contains_singleton(&self, name: &str) -> bool {
        self.singletons.contains_singleton(&self.transformed_bean_name(name))
    }

    fn singleton_names(&self) -> Vec<String> {
        self.singletons.singleton_names()
    }

    fn singleton_count(&self) -> usize {
        self.singletons.singleton_count()
    }
}

impl ConfigurableBeanFactory for DefaultListableBeanFactory {
    fn register_bean_definition(&self, name: &str, definition: BeanDefinition) -> ContainerResult<()> {
        self.check_modifiable(name, "register")?;
        if definition.parent_name().is_none() {
            definition.validate(name)?;
        }
        if self.aliases.is_alias(name) {
            return Err(ContainerError::Alias {
                alias: name.to_string(),
                name: self.aliases.canonical_name(name),
                message: "bean name is already in use as an alias".to_string(),
            });
        }

        let mut store = self.store.write();
        if store.definitions.contains_key(name) {
            if !self.allow_definition_overriding.load(Ordering::Acquire) {
                return Err(ContainerError::DefinitionOverride { name: name.to_string() });
            }
            if self.singletons.contains_singleton(name) || self.singletons.is_currently_in_creation(name) {
                return Err(ContainerError::IllegalState(format!(
                    "Cannot replace bean definition '{}': a singleton instance has already been created from it",
                    name
                )));
            }
            tracing::info!("Overriding bean definition for bean '{}'", name);
        } else {
            if self.singletons.contains_singleton(name) {
                return Err(ContainerError::SingletonExists { name: name.to_string() });
            }
            store.names.push(name.to_string());
        }

        tracing::debug!(
            "Registering bean definition '{}' of type [{}]",
            name,
            definition.bean_type().map(|t| t.name).unwrap_or("unknown")
        );
        store.definitions.insert(name.to_string(), definition);
        drop(store);
        self.merged.write().clear();
        Ok(())
    }

    fn remove_bean_definition(&self, name: &str) -> ContainerResult<()> {
        self.check_modifiable(name, "remove")?;
        {
            let mut store = self.store.write();
            store
                .definitions
                .remove(name)
                .ok_or_else(|| ContainerError::NoSuchBean { name: name.to_string() })?;
            store.names.retain(|n| n != name);
        }
        self.merged.write().clear();
        self.factory_products.write().remove(name);
        self.singletons.destroy_singleton(name);
        self.aliases.remove_aliases_of(name);
        tracing::debug!("Removed bean definition '{}'", name);
        Ok(())
    }

    fn get_bean_definition(&self, name: &str) -> ContainerResult<BeanDefinition> {
        let bean_name = self.transformed_bean_name(name);
        self.store
            .read()
            .definitions
            .get(&bean_name)
            .cloned()
            .ok_or_else(|| ContainerError::NoSuchBean { name: bean_name.clone() })
    }

    fn get_merged_bean_definition(&self, name: &str) -> ContainerResult<BeanDefinition> {
        let bean_name = self.transformed_bean_name(name);
        self.merged_definition_inner(&bean_name, &mut Vec::new())
    }

    fn modify_bean_definition(&self, name: &str, modifier: DefinitionModifier<'_>) -> ContainerResult<()> {
        let bean_name = self.transformed_bean_name(name);
        self.check_modifiable(&bean_name, "modify")?;
        if self.singletons.contains_singleton(&bean_name) || self.singletons.is_currently_in_creation(&bean_name) {
            return Err(ContainerError::IllegalState(format!(
                "Cannot modify bean definition '{}': a singleton instance has already been created from it",
                bean_name
            )));
        }

        {
            let mut store = self.store.write();
            let definition = store
                .definitions
                .get_mut(&bean_name)
                .ok_or_else(|| ContainerError::NoSuchBean { name: bean_name.clone() })?;
            let mut updated = definition.clone();
            modifier(&mut updated)?;
            if updated.parent_name().is_none() {
                updated.validate(&bean_name)?;
            }
            *definition = updated;
        }
        self.merged.write().clear();
        tracing::trace!("Bean definition '{}' modified", bean_name);
        Ok(())
    }

    fn register_alias(&self, name: &str, alias: &str) -> ContainerResult<()> {
        if self.store.read().definitions.contains_key(alias) {
            return Err(ContainerError::Alias {
                alias: alias.to_string(),
                name: name.to_string(),
                message: "a bean definition with that name already exists".to_string(),
            });
        }
        self.aliases.register_alias(name, alias)
    }

    fn add_bean_post_processor(&self, processor: Arc<dyn BeanPostProcessor>) {
        tracing::debug!("Adding bean post-processor '{}' (order {})", processor.name(), processor.order());
        let mut processors = self.post_processors.write();
        processors.retain(|p| !Arc::ptr_eq(p, &processor));
        processors.push(processor);
        processors.sort_by_key(|p| p.order());
    }

    fn bean_post_processors(&self) -> Vec<Arc<dyn BeanPostProcessor>> {
        self.post_processors.read().clone()
    }

    fn set_allow_bean_definition_overriding(&self, allow: bool) {
        self.allow_definition_overriding.store(allow, Ordering::Release);
    }

    fn set_allow_circular_references(&self, allow: bool) {
        self.allow_circular_references.store(allow, Ordering::Release);
    }

    fn is_currently_in_creation(&self, name: &str) -> bool {
        let bean_name = self.transformed_bean_name(name);
        if self.singletons.is_currently_in_creation(&bean_name) {
            return true;
        }
        self.prototypes_in_creation
            .lock()
            .get(&thread::current().id())
            .map(|names| names.contains(&bean_name))
            .unwrap_or(false)
    }

    fn register_dependent_bean(&self, bean: &str, dependent: &str) {
        self.singletons
            .register_dependent_bean(&self.transformed_bean_name(bean), &self.transformed_bean_name(dependent));
    }

    fn dependents_of(&self, bean: &str) -> Vec<String> {
        self.singletons.dependents_of(&self.transformed_bean_name(bean))
    }
}

impl ConfigurableListableBeanFactory for DefaultListableBeanFactory {
    fn preinstantiate_singletons(&self) -> ContainerResult<()> {
        let names = self.bean_definition_names();
        tracing::debug!("Pre-instantiating singletons in factory: {:?}", names);

        for name in names {
            let definition = self.get_merged_bean_definition(&name)?;
            if definition.is_abstract() || !definition.is_singleton() || definition.is_lazy_init() {
                continue;
            }
            // FactoryBean 只创建工厂本身，产品在第一次请求时创建
            self.do_get_bean(&name, true)?;
        }
        Ok(())
    }

    fn freeze_configuration(&self) {
        self.frozen.store(true, Ordering::Release);
        tracing::debug!("Bean factory configuration frozen");
    }

    fn is_configuration_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn destroy_singletons(&self) {
        tracing::info!("Destroying singletons in bean factory");
        self.singletons.destroy_singletons();
        self.factory_products.write().clear();
    }

    fn dependency_graph(&self) -> HashMap<String, Vec<String>> {
        let mut graph: HashMap<String, Vec<String>> = HashMap::new();
        for name in self.bean_definition_names() {
            let dependencies = self
                .get_merged_bean_definition(&name)
                .map(|d| {
                    d.dependencies()
                        .iter()
                        .map(|dep| self.transformed_bean_name(dep))
                        .collect()
                })
                .unwrap_or_default();
            graph.insert(name, dependencies);
        }
        for name in self.singletons.singleton_names() {
            graph.entry(name).or_default();
        }
        graph
    }
}
