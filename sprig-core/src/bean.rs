use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::dispatch::MethodDispatch;
use crate::value::Value;

/// 类型擦除辅助 trait，为所有 `Any + Send + Sync` 类型自动实现
///
/// 注意：对 `Box<dyn Bean>` / `Arc<dyn Bean>` 调用 `as_any()` 会命中容器本身，
/// 先解引用成 `&dyn Bean` 再调用。
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Bean trait - 所有由容器创建的对象都需要实现此 trait
///
/// 容器按以下顺序回调：
/// 1. `set_property`（属性填充）
/// 2. `after_properties_set`
/// 3. `invoke_init_method`（定义中声明了 init 方法时）
/// 4. 销毁时 `destroy`，然后 `invoke_destroy_method`
///
/// 销毁回调只拿到 `&self`，需要修改状态时请使用内部可变性。
pub trait Bean: AsAny {
    /// 设置属性值
    fn set_property(&mut self, name: &str, value: Value) -> anyhow::Result<()> {
        let _ = value;
        anyhow::bail!(
            "Invalid property '{}' of bean class [{}]: Bean property '{}' is not writable",
            name,
            AsAny::type_name(&*self),
            name
        )
    }

    /// 所有属性设置完成后调用（InitializingBean）
    fn after_properties_set(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 调用定义中声明的 init 方法
    fn invoke_init_method(&mut self, method: &str) -> anyhow::Result<()> {
        anyhow::bail!(
            "Could not find an init method named '{}' on bean of type [{}]",
            method,
            AsAny::type_name(&*self)
        )
    }

    /// 销毁回调（DisposableBean）
    fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 调用定义中声明的 destroy 方法
    fn invoke_destroy_method(&self, method: &str) -> anyhow::Result<()> {
        anyhow::bail!(
            "Could not find a destroy method named '{}' on bean of type [{}]",
            method,
            AsAny::type_name(self)
        )
    }

    /// 创建期间借出的分派视图，早期引用用它声明目标类与接口
    fn as_dispatch(&self) -> Option<&dyn MethodDispatch> {
        None
    }

    /// 暴露方法分派能力，返回 `Some` 的 Bean 才能被代理
    fn into_dispatch(self: Arc<Self>) -> Option<Arc<dyn MethodDispatch>> {
        None
    }

    /// 作为 FactoryBean 暴露
    fn into_factory_bean(self: Arc<Self>) -> Option<Arc<dyn FactoryBean>> {
        None
    }
}

/// FactoryBean - 由容器管理、负责生产另一个对象的 Bean
///
/// 通过 `getBean("name")` 得到的是产品，`getBean("&name")` 得到工厂本身
pub trait FactoryBean: Send + Sync {
    /// 生产对象
    fn get_object(&self) -> anyhow::Result<BeanInstance>;

    /// 产品类型名称（未知时返回 None）
    fn object_type_name(&self) -> Option<&'static str> {
        None
    }

    /// 产品是否为单例（单例产品会被缓存）
    fn is_singleton(&self) -> bool {
        true
    }
}

/// 需要在容器关闭时执行的销毁逻辑
pub trait DisposableBean: Send + Sync {
    fn destroy(&self) -> anyhow::Result<()>;
}

/// 容器中的 Bean 实例句柄
///
/// 克隆代价很低（只是几个 `Arc`）
#[derive(Clone)]
pub struct BeanInstance {
    object: Arc<dyn Any + Send + Sync>,
    dispatch: Option<Arc<dyn MethodDispatch>>,
    factory: Option<Arc<dyn FactoryBean>>,
    type_name: &'static str,
    type_id: TypeId,
}

impl BeanInstance {
    /// 包装任意值
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            object: value,
            dispatch: None,
            factory: None,
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }

    /// 包装一个可分派的对象
    pub fn dispatchable<T: MethodDispatch>(value: Arc<T>) -> Self {
        let dispatch: Arc<dyn MethodDispatch> = value.clone();
        Self::from_arc(value).with_dispatch(dispatch)
    }

    /// 只有分派能力、没有具体类型的对象（例如早期引用）
    pub fn from_dispatch(dispatch: Arc<dyn MethodDispatch>) -> Self {
        let type_name = dispatch.target_class();
        let object: Arc<dyn Any + Send + Sync> = Arc::new(Arc::clone(&dispatch));
        Self {
            object,
            dispatch: Some(dispatch),
            factory: None,
            type_name,
            type_id: TypeId::of::<Arc<dyn MethodDispatch>>(),
        }
    }

    /// 从容器创建的 Bean 构建
    pub fn from_bean(bean: Arc<dyn Bean>) -> Self {
        let type_name = AsAny::type_name(&*bean);
        let type_id = Any::type_id(AsAny::as_any(&*bean));
        let dispatch = Arc::clone(&bean).into_dispatch();
        let factory = Arc::clone(&bean).into_factory_bean();
        Self {
            object: bean.into_any_arc(),
            dispatch,
            factory,
            type_name,
            type_id,
        }
    }

    pub fn with_dispatch(mut self, dispatch: Arc<dyn MethodDispatch>) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.object).downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.object.is::<T>()
    }

    pub fn object(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.object
    }

    pub fn dispatch(&self) -> Option<&Arc<dyn MethodDispatch>> {
        self.dispatch.as_ref()
    }

    pub fn is_dispatchable(&self) -> bool {
        self.dispatch.is_some()
    }

    pub fn factory_bean(&self) -> Option<&Arc<dyn FactoryBean>> {
        self.factory.as_ref()
    }

    pub fn is_factory_bean(&self) -> bool {
        self.factory.is_some()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// 具体对象的 TypeId
    pub fn object_type_id(&self) -> TypeId {
        self.type_id
    }

    /// 是否指向同一个对象
    pub fn ptr_eq(&self, other: &BeanInstance) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl fmt::Debug for BeanInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanInstance")
            .field("type_name", &self.type_name)
            .field("dispatchable", &self.dispatch.is_some())
            .field("factory_bean", &self.factory.is_some())
            .finish()
    }
}
