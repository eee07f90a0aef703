//! 方法分派模型
//!
//! 代理需要在运行时拦截方法调用，这里用显式的能力接口 [`MethodDispatch`] 描述"一个对象实现了哪些方法"，
//! 调用通过 [`Method`] 描述符 + 类型擦除的 [`Arguments`] 分派。
//!
//! [`CallContext`] 是一次逻辑调用的上下文，替代线程局部变量：
//! 事务资源绑定、同步回调等都挂在它上面，沿着拦截器链显式传递。

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::error::{ContainerError, ContainerResult};

/// 方法描述符
///
/// `declaring_type` 是声明该方法的接口名（或具体类型名），
/// 接口代理根据它判断方法是否对外暴露。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Method {
    pub declaring_type: &'static str,
    pub name: &'static str,
}

impl Method {
    pub const fn new(declaring_type: &'static str, name: &'static str) -> Self {
        Self {
            declaring_type,
            name,
        }
    }

    /// 完整签名，例如 `AccountService.transfer`
    pub fn signature(&self) -> String {
        format!("{}.{}", self.declaring_type, self.name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.name)
    }
}

/// 方法参数列表
///
/// 拦截器可以在 proceed 之前改写参数
#[derive(Default)]
pub struct Arguments {
    values: Vec<Box<dyn Any + Send>>,
}

impl Arguments {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// 追加一个参数（builder 风格）
    pub fn with<T: Any + Send>(mut self, value: T) -> Self {
        self.values.push(Box::new(value));
        self
    }

    pub fn push<T: Any + Send>(&mut self, value: T) {
        self.values.push(Box::new(value));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 按位置读取参数，类型不符返回 None
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.values.get(index)?.downcast_ref::<T>()
    }

    pub fn get_mut<T: Any>(&mut self, index: usize) -> Option<&mut T> {
        self.values.get_mut(index)?.downcast_mut::<T>()
    }

    /// 按位置读取参数，缺失或类型不符时返回非受检错误
    pub fn arg<T: Any>(&self, index: usize) -> Result<&T, InvocationError> {
        self.get::<T>(index).ok_or_else(|| {
            InvocationError::unchecked(IllegalArgument {
                index,
                expected: std::any::type_name::<T>(),
            })
        })
    }

    /// 替换指定位置的参数
    pub fn set<T: Any + Send>(&mut self, index: usize, value: T) -> Result<(), InvocationError> {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = Box::new(value);
                Ok(())
            }
            None => Err(InvocationError::unchecked(IllegalArgument {
                index,
                expected: std::any::type_name::<T>(),
            })),
        }
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arguments")
            .field("len", &self.values.len())
            .finish()
    }
}

/// 构建参数列表
///
/// ```ignore
/// let args = args![42_u64, "alice".to_string()];
/// ```
#[macro_export]
macro_rules! args {
    () => { $crate::dispatch::Arguments::new() };
    ($($value:expr),+ $(,)?) => {
        $crate::dispatch::Arguments::new()$(.with($value))+
    };
}

/// 方法返回值（类型擦除）
pub type ReturnValue = Box<dyn Any + Send>;

/// 一次方法调用的结果
pub type InvocationResult = Result<ReturnValue, InvocationError>;

/// 把具体返回值装箱
pub fn ret<T: Any + Send>(value: T) -> InvocationResult {
    Ok(Box::new(value))
}

/// 错误种类
///
/// 回滚规则的默认策略：非受检错误回滚，受检错误提交
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 业务声明的失败（类似 checked exception）
    Checked,
    /// 运行时故障（类似 RuntimeException / Error）
    Unchecked,
}

/// 方法调用错误
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("{0}")]
    Checked(anyhow::Error),

    #[error("{0}")]
    Unchecked(anyhow::Error),
}

impl InvocationError {
    pub fn checked(error: impl Into<anyhow::Error>) -> Self {
        InvocationError::Checked(error.into())
    }

    pub fn unchecked(error: impl Into<anyhow::Error>) -> Self {
        InvocationError::Unchecked(error.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            InvocationError::Checked(_) => ErrorKind::Checked,
            InvocationError::Unchecked(_) => ErrorKind::Unchecked,
        }
    }

    pub fn is_checked(&self) -> bool {
        self.kind() == ErrorKind::Checked
    }

    pub fn inner(&self) -> &anyhow::Error {
        match self {
            InvocationError::Checked(e) | InvocationError::Unchecked(e) => e,
        }
    }

    pub fn into_inner(self) -> anyhow::Error {
        match self {
            InvocationError::Checked(e) | InvocationError::Unchecked(e) => e,
        }
    }

    /// 底层错误是否为类型 `E`
    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner().is::<E>()
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner().downcast_ref::<E>()
    }
}

impl From<ContainerError> for InvocationError {
    fn from(error: ContainerError) -> Self {
        InvocationError::Unchecked(anyhow::Error::new(error))
    }
}

/// 目标对象不支持被调用的方法
#[derive(Debug, Error)]
#[error("No method '{method}' on target '{target}'")]
pub struct NoSuchMethod {
    pub method: String,
    pub target: String,
}

impl NoSuchMethod {
    pub fn new(method: &Method, target: &str) -> Self {
        Self {
            method: method.signature(),
            target: target.to_string(),
        }
    }
}

/// 参数缺失或类型不符
#[derive(Debug, Error)]
#[error("Argument {index} is missing or not of type '{expected}'")]
pub struct IllegalArgument {
    pub index: usize,
    pub expected: &'static str,
}

/// 返回值类型不符
#[derive(Debug, Error)]
#[error("Method '{method}' did not return a value of type '{expected}'")]
pub struct ReturnTypeMismatch {
    pub method: String,
    pub expected: &'static str,
}

/// 方法分派能力
///
/// 业务对象实现它后即可被代理、被拦截器链包装。
///
/// ```ignore
/// const DEPOSIT: Method = Method::new("Account", "deposit");
///
/// impl MethodDispatch for AccountImpl {
///     fn interfaces(&self) -> Vec<&'static str> { vec!["Account"] }
///     fn methods(&self) -> Vec<Method> { vec![DEPOSIT] }
///     fn invoke(&self, ctx: &mut CallContext, method: &Method, args: &mut Arguments) -> InvocationResult {
///         match method.name {
///             "deposit" => ret(self.deposit(*args.arg::<u64>(0)?)),
///             _ => Err(InvocationError::unchecked(NoSuchMethod::new(method, self.target_class()))),
///         }
///     }
/// }
/// ```
pub trait MethodDispatch: Any + Send + Sync {
    /// 目标类型名称（用于切点匹配）
    fn target_class(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// 实现的接口名称
    fn interfaces(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// 可被调用的全部方法
    fn methods(&self) -> Vec<Method>;

    /// 执行方法
    fn invoke(
        &self,
        ctx: &mut CallContext,
        method: &Method,
        args: &mut Arguments,
    ) -> InvocationResult;

    fn implements(&self, interface: &str) -> bool {
        self.interfaces().iter().any(|i| *i == interface)
    }

    fn supports(&self, method: &Method) -> bool {
        self.methods().contains(method)
    }
}

impl dyn MethodDispatch {
    /// 调用并把返回值还原成具体类型
    pub fn call<R: Any>(
        &self,
        ctx: &mut CallContext,
        method: &Method,
        mut args: Arguments,
    ) -> Result<R, InvocationError> {
        let value = self.invoke(ctx, method, &mut args)?;
        value.downcast::<R>().map(|v| *v).map_err(|_| {
            InvocationError::unchecked(ReturnTypeMismatch {
                method: method.signature(),
                expected: std::any::type_name::<R>(),
            })
        })
    }
}

/// 调用上下文
///
/// 每个逻辑调用线程持有一个，不在并发调用之间共享。
/// 资源按 key 绑定（例如数据源名称 -> 连接持有者），扩展按类型存放。
#[derive(Default)]
pub struct CallContext {
    resources: HashMap<String, Box<dyn Any + Send>>,
    extensions: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定资源，key 已被占用时报错
    pub fn bind_resource(
        &mut self,
        key: impl Into<String>,
        value: Box<dyn Any + Send>,
    ) -> ContainerResult<()> {
        let key = key.into();
        if self.resources.contains_key(&key) {
            return Err(ContainerError::IllegalState(format!(
                "Already value for key [{}] bound to call context",
                key
            )));
        }
        tracing::trace!("Bound resource for key [{}] to call context", key);
        self.resources.insert(key, value);
        Ok(())
    }

    pub fn bind<T: Any + Send>(&mut self, key: impl Into<String>, value: T) -> ContainerResult<()> {
        self.bind_resource(key, Box::new(value))
    }

    /// 解绑资源，未绑定时报错
    pub fn unbind_resource(&mut self, key: &str) -> ContainerResult<Box<dyn Any + Send>> {
        self.unbind_resource_if_possible(key).ok_or_else(|| {
            ContainerError::IllegalState(format!(
                "No value for key [{}] bound to call context",
                key
            ))
        })
    }

    pub fn unbind_resource_if_possible(&mut self, key: &str) -> Option<Box<dyn Any + Send>> {
        let value = self.resources.remove(key);
        if value.is_some() {
            tracing::trace!("Removed resource for key [{}] from call context", key);
        }
        value
    }

    pub fn resource<T: Any>(&self, key: &str) -> Option<&T> {
        self.resources.get(key)?.downcast_ref::<T>()
    }

    pub fn resource_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.resources.get_mut(key)?.downcast_mut::<T>()
    }

    pub fn has_resource(&self, key: &str) -> bool {
        self.resources.contains_key(key)
    }

    pub fn resource_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.resources.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn extension<T: Any + Send>(&self) -> Option<&T> {
        self.extensions.get(&TypeId::of::<T>())?.downcast_ref::<T>()
    }

    pub fn extension_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.extensions.get_mut(&TypeId::of::<T>())?.downcast_mut::<T>()
    }

    /// 获取扩展，不存在则插入默认值
    pub fn extension_or_default<T: Any + Send + Default>(&mut self) -> &mut T {
        let slot = self
            .extensions
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()));
        match slot.downcast_mut::<T>() {
            Some(value) => value,
            None => unreachable!("extension slot holds a value of its own TypeId"),
        }
    }

    pub fn insert_extension<T: Any + Send>(&mut self, value: T) -> Option<T> {
        self.extensions
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn remove_extension<T: Any + Send>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("resources", &self.resource_keys())
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const GREET: Method = Method::new("Greeter", "greet");
    const SHOUT: Method = Method::new("Greeter", "shout");

    struct Greeter;

    impl MethodDispatch for Greeter {
        fn interfaces(&self) -> Vec<&'static str> {
            vec!["Greeter"]
        }

        fn methods(&self) -> Vec<Method> {
            vec![GREET]
        }

        fn invoke(
            &self,
            _ctx: &mut CallContext,
            method: &Method,
            args: &mut Arguments,
        ) -> InvocationResult {
            match method.name {
                "greet" => ret(format!("hello {}", args.arg::<String>(0)?)),
                _ => Err(InvocationError::unchecked(NoSuchMethod::new(
                    method,
                    self.target_class(),
                ))),
            }
        }
    }

    #[test]
    fn test_call_downcasts_return_value() {
        let greeter: Arc<dyn MethodDispatch> = Arc::new(Greeter);
        let mut ctx = CallContext::new();
        let result: String = greeter
            .call(&mut ctx, &GREET, args!["bob".to_string()])
            .unwrap();
        assert_eq!(result, "hello bob");

        let err = greeter.call::<u32>(&mut ctx, &GREET, args!["bob".to_string()]);
        assert!(err.unwrap_err().is::<ReturnTypeMismatch>());
    }

    #[test]
    fn test_unknown_method_and_bad_argument() {
        let greeter: Arc<dyn MethodDispatch> = Arc::new(Greeter);
        let mut ctx = CallContext::new();

        let err = greeter.call::<String>(&mut ctx, &SHOUT, args![]).unwrap_err();
        assert!(err.is::<NoSuchMethod>());
        assert_eq!(err.kind(), ErrorKind::Unchecked);

        let err = greeter.call::<String>(&mut ctx, &GREET, args![7_u32]).unwrap_err();
        assert!(err.is::<IllegalArgument>());
    }

    #[test]
    fn test_method_signature_and_support() {
        assert_eq!(GREET.signature(), "Greeter.greet");
        assert!(Greeter.supports(&GREET));
        assert!(!Greeter.supports(&SHOUT));
        assert!(Greeter.implements("Greeter"));
        assert!(Greeter.target_class().ends_with("Greeter"));
    }

    #[test]
    fn test_arguments_can_be_rewritten() {
        let mut args = args![1_i32, "x".to_string()];
        assert_eq!(args.len(), 2);
        args.set(0, 5_i32).unwrap();
        assert_eq!(args.get::<i32>(0), Some(&5));
        *args.get_mut::<String>(1).unwrap() = "y".into();
        assert_eq!(args.arg::<String>(1).unwrap(), "y");
        assert!(args.set(9, 1_i32).is_err());
    }

    #[test]
    fn test_error_kind_and_downcast() {
        let err = InvocationError::checked(NoSuchMethod::new(&GREET, "x"));
        assert!(err.is_checked());
        assert!(err.downcast_ref::<NoSuchMethod>().is_some());

        let err: InvocationError = ContainerError::NoSuchBean { name: "a".into() }.into();
        assert_eq!(err.kind(), ErrorKind::Unchecked);
        assert!(err.is::<ContainerError>());
    }

    #[test]
    fn test_resource_binding() {
        let mut ctx = CallContext::new();
        ctx.bind("ds", 42_u32).unwrap();
        assert!(ctx.has_resource("ds"));
        assert_eq!(ctx.resource::<u32>("ds"), Some(&42));
        assert!(ctx.bind("ds", 1_u32).is_err());

        let value = ctx.unbind_resource("ds").unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&42));
        assert!(ctx.unbind_resource("ds").is_err());
        assert!(ctx.unbind_resource_if_possible("ds").is_none());
    }

    #[test]
    fn test_extensions() {
        #[derive(Default, Debug, PartialEq)]
        struct Counter(u32);

        let mut ctx = CallContext::new();
        assert!(ctx.extension::<Counter>().is_none());
        ctx.extension_or_default::<Counter>().0 += 2;
        assert_eq!(ctx.extension::<Counter>(), Some(&Counter(2)));
        assert_eq!(ctx.insert_extension(Counter(5)), Some(Counter(2)));
        assert_eq!(ctx.remove_extension::<Counter>(), Some(Counter(5)));
        assert!(ctx.remove_extension::<Counter>().is_none());
    }
}
