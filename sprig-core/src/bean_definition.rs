//! Bean 定义
//!
//! [`BeanDefinition`] 是纯数据：如何实例化、作用域、依赖、属性值、
//! 生命周期回调名称和角色。子定义通过 `parent_name` 继承父定义。

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::bean::{Bean, BeanInstance};
use crate::config::ConfigValue;
use crate::error::{ContainerError, ContainerResult};
use crate::scope::{Role, Scope};
use crate::value::Value;

/// 无参实例化函数
pub type Supplier = Arc<dyn Fn() -> anyhow::Result<Box<dyn Bean>> + Send + Sync>;

/// 带构造参数的实例化函数
pub type Constructor = Arc<dyn Fn(Vec<Value>) -> anyhow::Result<Box<dyn Bean>> + Send + Sync>;

/// 工厂方法：第一个参数是工厂 Bean 实例（静态工厂方法为 `None`）
pub type FactoryMethod =
    Arc<dyn Fn(Option<BeanInstance>, Vec<Value>) -> anyhow::Result<Box<dyn Bean>> + Send + Sync>;

/// 实例化策略
#[derive(Clone)]
pub enum Instantiator {
    Supplier(Supplier),
    Constructor(Constructor),
    FactoryMethod {
        factory_bean_name: Option<String>,
        method_name: String,
        invoke: FactoryMethod,
    },
}

impl fmt::Debug for Instantiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instantiator::Supplier(_) => f.write_str("Supplier"),
            Instantiator::Constructor(_) => f.write_str("Constructor"),
            Instantiator::FactoryMethod {
                factory_bean_name,
                method_name,
                ..
            } => f
                .debug_struct("FactoryMethod")
                .field("factory_bean_name", factory_bean_name)
                .field("method_name", method_name)
                .finish(),
        }
    }
}

/// 声明的 Bean 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeanType {
    pub id: TypeId,
    pub name: &'static str,
}

impl BeanType {
    pub fn of<T: Any + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

/// 定义中声明的（尚未解析的）值
#[derive(Clone)]
pub enum BeanValue {
    Null,
    Literal(ConfigValue),
    /// 含 `${...}` 的文本，由 Environment 解析
    Placeholder(String),
    /// 按名称引用另一个 Bean
    Ref(String),
    /// 按类型自动装配
    ByType { type_id: TypeId, type_name: &'static str },
    /// 内部 Bean，不注册到容器
    Inner(Box<BeanDefinition>),
    /// 预先构建好的对象
    Object(BeanInstance),
    List(Vec<BeanValue>),
    Map(Vec<(String, BeanValue)>),
}

impl BeanValue {
    pub fn reference(name: impl Into<String>) -> Self {
        BeanValue::Ref(name.into())
    }

    pub fn placeholder(text: impl Into<String>) -> Self {
        BeanValue::Placeholder(text.into())
    }

    pub fn by_type<T: Any>() -> Self {
        BeanValue::ByType {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn inner(definition: BeanDefinition) -> Self {
        BeanValue::Inner(Box::new(definition))
    }

    /// 深度优先访问自身及嵌套的值，包括内部 Bean 定义
    fn visit_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut BeanValue) -> ContainerResult<()>,
    ) -> ContainerResult<()> {
        match self {
            BeanValue::List(items) => {
                for item in items.iter_mut() {
                    item.visit_mut(visitor)?;
                }
                Ok(())
            }
            BeanValue::Map(entries) => {
                for (_, item) in entries.iter_mut() {
                    item.visit_mut(visitor)?;
                }
                Ok(())
            }
            BeanValue::Inner(definition) => definition.visit_values_mut(visitor),
            other => visitor(other),
        }
    }
}

impl fmt::Debug for BeanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeanValue::Null => f.write_str("Null"),
            BeanValue::Literal(v) => write!(f, "Literal({:?})", v),
            BeanValue::Placeholder(text) => write!(f, "Placeholder({:?})", text),
            BeanValue::Ref(name) => write!(f, "Ref({:?})", name),
            BeanValue::ByType { type_name, .. } => write!(f, "ByType({})", type_name),
            BeanValue::Inner(definition) => write!(f, "Inner({:?})", definition),
            BeanValue::Object(instance) => write!(f, "Object({})", instance.type_name()),
            BeanValue::List(items) => f.debug_list().entries(items).finish(),
            BeanValue::Map(entries) => f.debug_map().entries(entries.iter().map(|(k, v)| (k, v))).finish(),
        }
    }
}

impl From<&str> for BeanValue {
    fn from(value: &str) -> Self {
        BeanValue::Literal(ConfigValue::from(value))
    }
}

impl From<String> for BeanValue {
    fn from(value: String) -> Self {
        BeanValue::Literal(ConfigValue::String(value))
    }
}

impl From<i64> for BeanValue {
    fn from(value: i64) -> Self {
        BeanValue::Literal(ConfigValue::Int(value))
    }
}

impl From<i32> for BeanValue {
    fn from(value: i32) -> Self {
        BeanValue::Literal(ConfigValue::Int(value as i64))
    }
}

impl From<f64> for BeanValue {
    fn from(value: f64) -> Self {
        BeanValue::Literal(ConfigValue::Float(value))
    }
}

impl From<bool> for BeanValue {
    fn from(value: bool) -> Self {
        BeanValue::Literal(ConfigValue::Bool(value))
    }
}

impl From<ConfigValue> for BeanValue {
    fn from(value: ConfigValue) -> Self {
        BeanValue::Literal(value)
    }
}

impl From<BeanInstance> for BeanValue {
    fn from(value: BeanInstance) -> Self {
        BeanValue::Object(value)
    }
}

/// 构造参数：按下标指定的参数和按顺序填充空位的参数
#[derive(Clone, Debug, Default)]
pub struct ConstructorArgumentValues {
    indexed: BTreeMap<usize, BeanValue>,
    generic: Vec<BeanValue>,
}

impl ConstructorArgumentValues {
    pub fn add_indexed(&mut self, index: usize, value: BeanValue) {
        self.indexed.insert(index, value);
    }

    pub fn add_generic(&mut self, value: BeanValue) {
        self.generic.push(value);
    }

    pub fn len(&self) -> usize {
        self.indexed.len() + self.generic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty() && self.generic.is_empty()
    }

    /// 按参数位置排列；下标参数之间的空位由通用参数依次填充
    pub fn ordered(&self) -> Result<Vec<BeanValue>, String> {
        let total = self.len();
        if let Some((&max, _)) = self.indexed.iter().next_back() {
            if max >= total {
                return Err(format!(
                    "constructor argument index {} leaves a gap ({} arguments declared)",
                    max, total
                ));
            }
        }

        let mut generic = self.generic.iter();
        let mut args = Vec::with_capacity(total);
        for i in 0..total {
            match self.indexed.get(&i).or_else(|| generic.next()) {
                Some(value) => args.push(value.clone()),
                None => return Err(format!("missing constructor argument at index {}", i)),
            }
        }
        Ok(args)
    }

    /// 合并父定义的参数，当前参数优先
    fn merge_parent(&mut self, parent: &ConstructorArgumentValues) {
        for (index, value) in &parent.indexed {
            self.indexed.entry(*index).or_insert_with(|| value.clone());
        }
        if self.generic.is_empty() {
            self.generic = parent.generic.clone();
        }
    }

    fn values_mut(&mut self) -> impl Iterator<Item = &mut BeanValue> {
        self.indexed.values_mut().chain(self.generic.iter_mut())
    }
}

/// Bean 定义
#[derive(Clone)]
pub struct BeanDefinition {
    bean_type: Option<BeanType>,
    object_type: Option<BeanType>,
    instantiator: Option<Instantiator>,
    scope: Option<Scope>,
    lazy_init: Option<bool>,
    depends_on: Vec<String>,
    autowire_candidate: bool,
    primary: bool,
    constructor_args: ConstructorArgumentValues,
    property_values: Vec<(String, BeanValue)>,
    init_method: Option<String>,
    destroy_method: Option<String>,
    role: Role,
    parent_name: Option<String>,
    is_abstract: bool,
    description: Option<String>,
}

impl Default for BeanDefinition {
    fn default() -> Self {
        Self {
            bean_type: None,
            object_type: None,
            instantiator: None,
            scope: None,
            lazy_init: None,
            depends_on: Vec::new(),
            autowire_candidate: true,
            primary: false,
            constructor_args: ConstructorArgumentValues::default(),
            property_values: Vec::new(),
            init_method: None,
            destroy_method: None,
            role: Role::Application,
            parent_name: None,
            is_abstract: false,
            description: None,
        }
    }
}

fn boxed<T: Bean>(bean: T) -> Box<dyn Bean> {
    Box::new(bean)
}

impl BeanDefinition {
    /// 通过无参函数创建 Bean
    pub fn of<T, F>(supplier: F) -> Self
    where
        T: Bean,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            bean_type: Some(BeanType::of::<T>()),
            instantiator: Some(Instantiator::Supplier(Arc::new(move || supplier().map(boxed)))),
            ..Self::default()
        }
    }

    /// 通过 `Default` 创建 Bean
    pub fn of_default<T: Bean + Default>() -> Self {
        Self::of(|| Ok(T::default()))
    }

    /// 通过构造函数创建 Bean，参数来自 `with_constructor_arg`
    pub fn constructed<T, F>(constructor: F) -> Self
    where
        T: Bean,
        F: Fn(Vec<Value>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            bean_type: Some(BeanType::of::<T>()),
            instantiator: Some(Instantiator::Constructor(Arc::new(move |args| {
                constructor(args).map(boxed)
            }))),
            ..Self::default()
        }
    }

    /// 通过另一个 Bean 上的工厂方法创建
    pub fn factory_method<T, F>(
        factory_bean_name: impl Into<String>,
        method_name: impl Into<String>,
        method: F,
    ) -> Self
    where
        T: Bean,
        F: Fn(BeanInstance, Vec<Value>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let factory_bean_name = factory_bean_name.into();
        let method_name = method_name.into();
        let label = format!("{}.{}", factory_bean_name, method_name);
        Self {
            bean_type: Some(BeanType::of::<T>()),
            instantiator: Some(Instantiator::FactoryMethod {
                factory_bean_name: Some(factory_bean_name),
                method_name,
                invoke: Arc::new(move |factory, args| match factory {
                    Some(factory) => method(factory, args).map(boxed),
                    None => anyhow::bail!("Factory method '{}' requires a factory bean instance", label),
                }),
            }),
            ..Self::default()
        }
    }

    /// 静态工厂方法
    pub fn static_factory_method<T, F>(method_name: impl Into<String>, method: F) -> Self
    where
        T: Bean,
        F: Fn(Vec<Value>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            bean_type: Some(BeanType::of::<T>()),
            instantiator: Some(Instantiator::FactoryMethod {
                factory_bean_name: None,
                method_name: method_name.into(),
                invoke: Arc::new(move |_, args| method(args).map(boxed)),
            }),
            ..Self::default()
        }
    }

    /// 只继承父定义的子定义
    pub fn child(parent_name: impl Into<String>) -> Self {
        Self {
            parent_name: Some(parent_name.into()),
            ..Self::default()
        }
    }

    /// 抽象模板定义，只用于被继承
    pub fn template() -> Self {
        Self {
            is_abstract: true,
            ..Self::default()
        }
    }

    // ---- builder ----

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_lazy_init(mut self, lazy: bool) -> Self {
        self.lazy_init = Some(lazy);
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<BeanValue>) -> Self {
        self.set_property_value(name, value.into());
        self
    }

    pub fn with_property_ref(self, name: impl Into<String>, bean_name: impl Into<String>) -> Self {
        self.with_property(name, BeanValue::Ref(bean_name.into()))
    }

    pub fn with_constructor_arg(mut self, value: impl Into<BeanValue>) -> Self {
        self.constructor_args.add_generic(value.into());
        self
    }

    pub fn with_indexed_constructor_arg(mut self, index: usize, value: impl Into<BeanValue>) -> Self {
        self.constructor_args.add_indexed(index, value.into());
        self
    }

    pub fn with_init_method(mut self, name: impl Into<String>) -> Self {
        self.init_method = Some(name.into());
        self
    }

    pub fn with_destroy_method(mut self, name: impl Into<String>) -> Self {
        self.destroy_method = Some(name.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    pub fn with_autowire_candidate(mut self, candidate: bool) -> Self {
        self.autowire_candidate = candidate;
        self
    }

    pub fn with_parent(mut self, parent_name: impl Into<String>) -> Self {
        self.parent_name = Some(parent_name.into());
        self
    }

    pub fn with_abstract(mut self, is_abstract: bool) -> Self {
        self.is_abstract = is_abstract;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 声明 FactoryBean 的产品类型，用于按类型查找
    pub fn with_object_type<P: Any>(mut self) -> Self {
        self.object_type = Some(BeanType::of::<P>());
        self
    }

    // ---- accessors ----

    pub fn bean_type(&self) -> Option<BeanType> {
        self.bean_type
    }

    pub fn object_type(&self) -> Option<BeanType> {
        self.object_type
    }

    pub fn instantiator(&self) -> Option<&Instantiator> {
        self.instantiator.as_ref()
    }

    pub fn scope(&self) -> Scope {
        self.scope.unwrap_or_default()
    }

    pub fn is_singleton(&self) -> bool {
        self.scope() == Scope::Singleton
    }

    pub fn is_prototype(&self) -> bool {
        self.scope() == Scope::Prototype
    }

    pub fn is_lazy_init(&self) -> bool {
        self.lazy_init.unwrap_or(false)
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn is_autowire_candidate(&self) -> bool {
        self.autowire_candidate
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn constructor_args(&self) -> &ConstructorArgumentValues {
        &self.constructor_args
    }

    pub fn property_values(&self) -> &[(String, BeanValue)] {
        &self.property_values
    }

    /// 设置属性值，同名属性被替换
    pub fn set_property_value(&mut self, name: impl Into<String>, value: BeanValue) {
        let name = name.into();
        match self.property_values.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.property_values.push((name, value)),
        }
    }

    pub fn remove_property_value(&mut self, name: &str) -> Option<BeanValue> {
        let index = self.property_values.iter().position(|(n, _)| n == name)?;
        Some(self.property_values.remove(index).1)
    }

    pub fn init_method(&self) -> Option<&str> {
        self.init_method.as_deref()
    }

    pub fn destroy_method(&self) -> Option<&str> {
        self.destroy_method.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent_name.as_deref()
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_scope(&mut self, scope: Scope) {
        self.scope = Some(scope);
    }

    pub fn set_lazy_init(&mut self, lazy: bool) {
        self.lazy_init = Some(lazy);
    }

    pub fn set_primary(&mut self, primary: bool) {
        self.primary = primary;
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn set_init_method(&mut self, name: Option<String>) {
        self.init_method = name;
    }

    pub fn set_destroy_method(&mut self, name: Option<String>) {
        self.destroy_method = name;
    }

    /// 访问所有属性值和构造参数值（包括嵌套的列表、映射和内部 Bean）
    pub fn visit_values_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut BeanValue) -> ContainerResult<()>,
    ) -> ContainerResult<()> {
        for (_, value) in self.property_values.iter_mut() {
            value.visit_mut(visitor)?;
        }
        for value in self.constructor_args.values_mut() {
            value.visit_mut(visitor)?;
        }
        Ok(())
    }

    /// 校验定义
    pub fn validate(&self, name: &str) -> ContainerResult<()> {
        let invalid = |message: String| ContainerError::InvalidDefinition {
            name: name.to_string(),
            message,
        };

        if self.is_abstract {
            return Ok(());
        }
        let Some(instantiator) = &self.instantiator else {
            return Err(invalid(
                "no instantiation strategy: specify a supplier, constructor or factory method".into(),
            ));
        };
        if let Err(message) = self.constructor_args.ordered() {
            return Err(invalid(message));
        }
        match instantiator {
            Instantiator::Supplier(_) if !self.constructor_args.is_empty() => Err(invalid(
                "constructor arguments declared but the bean is created by a supplier".into(),
            )),
            Instantiator::FactoryMethod {
                factory_bean_name: Some(factory),
                method_name,
                ..
            } if factory == name => Err(invalid(format!(
                "factory method '{}' cannot be declared on the bean itself",
                method_name
            ))),
            _ => Ok(()),
        }
    }

    /// 以父定义为默认值合并出完整定义
    ///
    /// 子定义中设置过的属性覆盖父定义；属性值和构造参数逐项合并；
    /// depends-on、abstract 和 lazy-init 只取子定义。
    pub fn merge_with_parent(&self, parent: &BeanDefinition) -> BeanDefinition {
        let mut merged = self.clone();

        if merged.instantiator.is_none() {
            merged.instantiator = parent.instantiator.clone();
        }
        merged.bean_type = merged.bean_type.or(parent.bean_type);
        merged.object_type = merged.object_type.or(parent.object_type);
        merged.scope = merged.scope.or(parent.scope);
        merged.init_method = merged.init_method.or_else(|| parent.init_method.clone());
        merged.destroy_method = merged.destroy_method.or_else(|| parent.destroy_method.clone());
        merged.description = merged.description.or_else(|| parent.description.clone());
        merged.constructor_args.merge_parent(&parent.constructor_args);

        let mut properties = parent.property_values.clone();
        for (name, value) in &self.property_values {
            match properties.iter_mut().find(|(n, _)| n == name) {
                Some(entry) => entry.1 = value.clone(),
                None => properties.push((name.clone(), value.clone())),
            }
        }
        merged.property_values = properties;
        merged.parent_name = None;
        merged
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("bean_type", &self.bean_type.map(|t| t.name))
            .field("instantiator", &self.instantiator)
            .field("scope", &self.scope())
            .field("lazy_init", &self.is_lazy_init())
            .field("depends_on", &self.depends_on)
            .field("primary", &self.primary)
            .field("role", &self.role)
            .field("parent_name", &self.parent_name)
            .field("abstract", &self.is_abstract)
            .finish_non_exhaustive()
    }
}
