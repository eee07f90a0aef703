//! 已解析的属性值与 Bean 引用
//!
//! 属性填充时，定义中的 [`BeanValue`](crate::bean_definition::BeanValue)
//! 被解析成 [`Value`] 交给 [`Bean::set_property`](crate::bean::Bean::set_property)。
//! 对其它 Bean 的引用统一是 [`BeanRef`]：普通情况下它已经指向最终实例；
//! 遇到循环引用时，它是一个"早期引用"，第一次使用时才通过容器解析到最终实例。

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;

use crate::bean::{AsAny, Bean, BeanInstance};
use crate::bean_factory::DefaultListableBeanFactory;
use crate::config::ConfigValue;
use crate::dispatch::{Arguments, CallContext, InvocationResult, Method, MethodDispatch};
use crate::error::{ContainerError, ContainerResult};

/// 指向一个命名 Bean 的引用
#[derive(Clone)]
pub struct BeanRef {
    name: String,
    target: RefTarget,
}

#[derive(Clone)]
enum RefTarget {
    Resolved(BeanInstance),
    Early(Arc<EarlyReference>),
}

/// 早期引用：持有容器的弱引用，Bean 创建完成后解析并缓存最终实例
struct EarlyReference {
    factory: Weak<DefaultListableBeanFactory>,
    profile: EarlyProfile,
    resolved: OnceCell<BeanInstance>,
}

/// 早期引用在目标完成前对外声明的目标类、接口与方法
#[derive(Debug, Clone, Default)]
pub(crate) struct EarlyProfile {
    target_class: &'static str,
    interfaces: Vec<&'static str>,
    methods: Vec<Method>,
}

impl EarlyProfile {
    /// 取自刚实例化、尚未填充属性的 Bean
    pub(crate) fn of(bean: &dyn Bean) -> Self {
        match bean.as_dispatch() {
            Some(dispatch) => Self {
                target_class: dispatch.target_class(),
                interfaces: dispatch.interfaces(),
                methods: dispatch.methods(),
            },
            None => Self {
                target_class: AsAny::type_name(bean),
                ..Self::default()
            },
        }
    }
}

impl BeanRef {
    pub fn resolved(name: impl Into<String>, instance: BeanInstance) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Resolved(instance),
        }
    }

    pub(crate) fn early(
        name: impl Into<String>,
        factory: Weak<DefaultListableBeanFactory>,
        profile: EarlyProfile,
    ) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Early(Arc::new(EarlyReference {
                factory,
                profile,
                resolved: OnceCell::new(),
            })),
        }
    }

    /// 引用的 Bean 名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 是否为循环引用产生的早期引用
    pub fn is_early(&self) -> bool {
        matches!(self.target, RefTarget::Early(_))
    }

    /// 是否已经指向最终实例
    pub fn is_resolved(&self) -> bool {
        match &self.target {
            RefTarget::Resolved(_) => true,
            RefTarget::Early(early) => early.resolved.get().is_some(),
        }
    }

    /// 获取最终实例
    ///
    /// 早期引用在目标 Bean 创建完成前返回 `CurrentlyInCreation`
    pub fn get(&self) -> ContainerResult<BeanInstance> {
        match &self.target {
            RefTarget::Resolved(instance) => Ok(instance.clone()),
            RefTarget::Early(early) => early
                .resolved
                .get_or_try_init(|| {
                    let factory = early.factory.upgrade().ok_or(ContainerError::FactoryDropped)?;
                    if !factory.is_singleton_completed(&self.name) {
                        return Err(ContainerError::CurrentlyInCreation {
                            name: self.name.clone(),
                        });
                    }
                    tracing::trace!("Resolving early reference to bean '{}'", self.name);
                    crate::bean_factory::BeanFactory::get_bean(factory.as_ref(), &self.name)
                })
                .cloned(),
        }
    }

    /// 获取最终实例并转换成具体类型
    pub fn get_as<T: Any + Send + Sync>(&self) -> ContainerResult<Arc<T>> {
        let instance = self.get()?;
        instance
            .downcast::<T>()
            .ok_or_else(|| ContainerError::TypeMismatch {
                name: self.name.clone(),
                expected: std::any::type_name::<T>().to_string(),
                actual: instance.type_name().to_string(),
            })
    }

    /// 获取最终实例的分派能力
    pub fn dispatch(&self) -> ContainerResult<Arc<dyn MethodDispatch>> {
        let instance = self.get()?;
        instance
            .dispatch()
            .cloned()
            .ok_or_else(|| ContainerError::TypeMismatch {
                name: self.name.clone(),
                expected: "MethodDispatch".to_string(),
                actual: instance.type_name().to_string(),
            })
    }

    fn resolved_dispatch(&self) -> Option<Arc<dyn MethodDispatch>> {
        let instance = match &self.target {
            RefTarget::Resolved(instance) => Some(instance),
            RefTarget::Early(early) => early.resolved.get(),
        }?;
        instance.dispatch().cloned()
    }

    fn early_profile(&self) -> Option<&EarlyProfile> {
        match &self.target {
            RefTarget::Resolved(_) => None,
            RefTarget::Early(early) => Some(&early.profile),
        }
    }
}

/// 引用本身可以当作目标对象调用，调用转发到最终实例
impl MethodDispatch for BeanRef {
    fn target_class(&self) -> &'static str {
        match (self.resolved_dispatch(), self.early_profile()) {
            (Some(dispatch), _) => dispatch.target_class(),
            (None, Some(profile)) => profile.target_class,
            (None, None) => "BeanRef",
        }
    }

    // 目标未完成时报告早期声明的接口与方法
    fn interfaces(&self) -> Vec<&'static str> {
        match (self.dispatch(), self.early_profile()) {
            (Ok(dispatch), _) => dispatch.interfaces(),
            (Err(_), Some(profile)) => profile.interfaces.clone(),
            (Err(_), None) => Vec::new(),
        }
    }

    fn methods(&self) -> Vec<Method> {
        match (self.dispatch(), self.early_profile()) {
            (Ok(dispatch), _) => dispatch.methods(),
            (Err(_), Some(profile)) => profile.methods.clone(),
            (Err(_), None) => Vec::new(),
        }
    }

    fn invoke(
        &self,
        ctx: &mut CallContext,
        method: &Method,
        args: &mut Arguments,
    ) -> InvocationResult {
        self.dispatch()?.invoke(ctx, method, args)
    }
}

impl fmt::Debug for BeanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanRef")
            .field("name", &self.name)
            .field("early", &self.is_early())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// 已解析的属性值 / 构造参数值
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Literal(ConfigValue),
    Ref(BeanRef),
    Object(BeanInstance),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Literal(_) => "literal",
            Value::Ref(_) => "bean reference",
            Value::Object(_) => "object",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Literal(v) => v.as_str(),
            _ => None,
        }
    }

    /// 字面量转字符串（数字和布尔值也可以）
    pub fn as_string(&self) -> anyhow::Result<String> {
        match self {
            Value::Literal(ConfigValue::String(s)) => Ok(s.clone()),
            Value::Literal(ConfigValue::Int(i)) => Ok(i.to_string()),
            Value::Literal(ConfigValue::Float(f)) => Ok(f.to_string()),
            Value::Literal(ConfigValue::Bool(b)) => Ok(b.to_string()),
            other => anyhow::bail!("Cannot convert {} value to string", other.kind()),
        }
    }

    pub fn as_i64(&self) -> anyhow::Result<i64> {
        match self {
            Value::Literal(v) => v
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("Cannot convert '{:?}' to integer", v)),
            other => anyhow::bail!("Cannot convert {} value to integer", other.kind()),
        }
    }

    pub fn as_f64(&self) -> anyhow::Result<f64> {
        match self {
            Value::Literal(v) => v
                .as_f64()
                .ok_or_else(|| anyhow::anyhow!("Cannot convert '{:?}' to float", v)),
            other => anyhow::bail!("Cannot convert {} value to float", other.kind()),
        }
    }

    pub fn as_bool(&self) -> anyhow::Result<bool> {
        match self {
            Value::Literal(v) => v
                .as_bool()
                .ok_or_else(|| anyhow::anyhow!("Cannot convert '{:?}' to boolean", v)),
            other => anyhow::bail!("Cannot convert {} value to boolean", other.kind()),
        }
    }

    /// 取出 Bean 引用（内部 Bean 和预构建对象也包装成引用）
    pub fn into_ref(self) -> anyhow::Result<BeanRef> {
        match self {
            Value::Ref(r) => Ok(r),
            Value::Object(instance) => Ok(BeanRef::resolved(instance.type_name(), instance)),
            other => anyhow::bail!("Expected a bean reference but got {} value", other.kind()),
        }
    }

    /// 取出对象实例；早期引用此时尚未完成会报错
    pub fn into_object(self) -> anyhow::Result<BeanInstance> {
        match self {
            Value::Object(instance) => Ok(instance),
            Value::Ref(r) => Ok(r.get()?),
            other => anyhow::bail!("Expected an object but got {} value", other.kind()),
        }
    }

    pub fn downcast<T: Any + Send + Sync>(self) -> anyhow::Result<Arc<T>> {
        let instance = self.into_object()?;
        instance.downcast::<T>().ok_or_else(|| {
            anyhow::anyhow!(
                "Expected value of type '{}' but got '{}'",
                std::any::type_name::<T>(),
                instance.type_name()
            )
        })
    }

    pub fn into_list(self) -> anyhow::Result<Vec<Value>> {
        match self {
            Value::List(items) => Ok(items),
            Value::Literal(ConfigValue::Array(items)) => {
                Ok(items.into_iter().map(Value::Literal).collect())
            }
            other => anyhow::bail!("Expected a list but got {} value", other.kind()),
        }
    }

    pub fn into_map(self) -> anyhow::Result<Vec<(String, Value)>> {
        match self {
            Value::Map(entries) => Ok(entries),
            Value::Literal(ConfigValue::Object(map)) => {
                let mut entries: Vec<(String, Value)> = map
                    .into_iter()
                    .map(|(k, v)| (k, Value::Literal(v)))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(entries)
            }
            other => anyhow::bail!("Expected a map but got {} value", other.kind()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Literal(ConfigValue::String(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Literal(ConfigValue::String(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Literal(ConfigValue::Int(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Literal(ConfigValue::Int(value as i64))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Literal(ConfigValue::Float(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Literal(ConfigValue::Bool(value))
    }
}

impl From<ConfigValue> for Value {
    fn from(value: ConfigValue) -> Self {
        Value::Literal(value)
    }
}

impl From<BeanInstance> for Value {
    fn from(value: BeanInstance) -> Self {
        Value::Object(value)
    }
}

impl From<BeanRef> for Value {
    fn from(value: BeanRef) -> Self {
        Value::Ref(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_conversions() {
        assert_eq!(Value::from("42").as_i64().unwrap(), 42);
        assert_eq!(Value::from(7).as_string().unwrap(), "7");
        assert!(Value::from("yes").as_bool().unwrap());
        assert_eq!(Value::from(1.5).as_f64().unwrap(), 1.5);
        assert!(Value::Null.as_string().is_err());
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
    }

    #[test]
    fn test_resolved_ref() {
        let instance = BeanInstance::new(5_u32);
        let r = BeanRef::resolved("five", instance.clone());
        assert!(!r.is_early());
        assert!(r.is_resolved());
        assert_eq!(*r.get_as::<u32>().unwrap(), 5);
        assert!(matches!(
            r.get_as::<String>(),
            Err(ContainerError::TypeMismatch { .. })
        ));
        assert!(r.dispatch().is_err());
        assert!(Value::Ref(r).into_object().unwrap().ptr_eq(&instance));
    }

    #[test]
    fn test_early_ref_without_factory() {
        let r = BeanRef::early("a", Weak::new(), EarlyProfile::default());
        assert!(r.is_early());
        assert!(!r.is_resolved());
        assert!(matches!(r.get(), Err(ContainerError::FactoryDropped)));
    }

    #[test]
    fn test_unresolved_early_ref_reports_profile() {
        #[derive(Default)]
        struct Ledger;

        impl Ledger {
            const TOTAL: Method = Method::new("Ledger", "total");
        }

        impl MethodDispatch for Ledger {
            fn target_class(&self) -> &'static str {
                "Ledger"
            }

            fn interfaces(&self) -> Vec<&'static str> {
                vec!["Ledger", "Auditable"]
            }

            fn methods(&self) -> Vec<Method> {
                vec![Self::TOTAL]
            }

            fn invoke(&self, _: &mut CallContext, _: &Method, _: &mut Arguments) -> InvocationResult {
                Ok(Box::new(0_i64))
            }
        }

        impl Bean for Ledger {
            fn as_dispatch(&self) -> Option<&dyn MethodDispatch> {
                Some(self)
            }
        }

        let r = BeanRef::early("ledger", Weak::new(), EarlyProfile::of(&Ledger));
        assert_eq!(r.target_class(), "Ledger");
        assert!(r.implements("Auditable"));
        assert_eq!(r.methods(), vec![Ledger::TOTAL]);

        struct Plain;
        impl Bean for Plain {}
        let plain = BeanRef::early("plain", Weak::new(), EarlyProfile::of(&Plain));
        assert!(plain.target_class().ends_with("Plain"));
        assert!(plain.interfaces().is_empty());
    }

    #[test]
    fn test_lists_and_maps() {
        let list = Value::Literal(ConfigValue::Array(vec![ConfigValue::Int(1), ConfigValue::Int(2)]));
        let items = list.into_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_i64().unwrap(), 2);

        let map = Value::Map(vec![("k".into(), Value::from("v"))]);
        assert_eq!(map.into_map().unwrap()[0].1.as_str(), Some("v"));
        assert!(Value::from(1).into_map().is_err());
    }
}
