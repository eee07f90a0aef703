//! 通知（Advice）类型
//!
//! 所有通知最终都被适配成 [`MethodInterceptor`]，代理只依赖这一个接口：
//! - `Interceptor`：环绕通知，自行决定何时 proceed
//! - `Before`：方法执行前
//! - `AfterReturning`：方法正常返回后
//! - `After`：无论成功失败都执行（finally）
//! - `Throws`：方法抛出错误时，按错误类型分派
//! - `Introduction`：为目标引入额外的接口

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use sprig_core::utils::naming::short_type_name;
use sprig_core::{InvocationError, InvocationResult, Method, MethodDispatch};

use crate::adapter;
use crate::error::{AopError, AopResult};
use crate::joinpoint::{JoinPoint, MethodInvocation};

/// 方法拦截器
pub trait MethodInterceptor: Send + Sync {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> InvocationResult;

    /// 拦截器名称（用于日志）
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }
}

/// 前置通知
///
/// 返回错误时方法不会执行，错误直接抛给调用方
pub trait MethodBeforeAdvice: Send + Sync {
    fn before(&self, join_point: &JoinPoint<'_>) -> Result<(), InvocationError>;
}

/// 返回后通知
pub trait AfterReturningAdvice: Send + Sync {
    fn after_returning(&self, return_value: &(dyn Any + Send), join_point: &JoinPoint<'_>) -> Result<(), InvocationError>;
}

/// 最终通知（finally）
pub trait AfterAdvice: Send + Sync {
    fn after(&self, join_point: &JoinPoint<'_>) -> Result<(), InvocationError>;
}

/// 以闭包实现的环绕拦截器
pub struct FnInterceptor<F> {
    name: String,
    f: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(&mut MethodInvocation<'_>) -> InvocationResult + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> MethodInterceptor for FnInterceptor<F>
where
    F: Fn(&mut MethodInvocation<'_>) -> InvocationResult + Send + Sync,
{
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> InvocationResult {
        (self.f)(invocation)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct FnBeforeAdvice<F>(F);

impl<F> MethodBeforeAdvice for FnBeforeAdvice<F>
where
    F: Fn(&JoinPoint<'_>) -> Result<(), InvocationError> + Send + Sync,
{
    fn before(&self, join_point: &JoinPoint<'_>) -> Result<(), InvocationError> {
        (self.0)(join_point)
    }
}

struct FnAfterReturningAdvice<F>(F);

impl<F> AfterReturningAdvice for FnAfterReturningAdvice<F>
where
    F: Fn(&(dyn Any + Send), &JoinPoint<'_>) -> Result<(), InvocationError> + Send + Sync,
{
    fn after_returning(&self, return_value: &(dyn Any + Send), join_point: &JoinPoint<'_>) -> Result<(), InvocationError> {
        (self.0)(return_value, join_point)
    }
}

struct FnAfterAdvice<F>(F);

impl<F> AfterAdvice for FnAfterAdvice<F>
where
    F: Fn(&JoinPoint<'_>) -> Result<(), InvocationError> + Send + Sync,
{
    fn after(&self, join_point: &JoinPoint<'_>) -> Result<(), InvocationError> {
        (self.0)(join_point)
    }
}

type ThrowsHandlerFn = Box<dyn Fn(&JoinPoint<'_>, &InvocationError) -> Result<(), InvocationError> + Send + Sync>;

struct ThrowsHandler {
    error_type: &'static str,
    matches: Box<dyn Fn(&InvocationError) -> bool + Send + Sync>,
    handle: ThrowsHandlerFn,
}

/// 异常通知
///
/// 按错误类型注册处理函数，第一个类型匹配的处理函数被调用。
/// 处理函数只观察错误：原错误会被原样重新抛出，
/// 除非处理函数自己失败，此时以处理函数的错误代替原错误。
pub struct ThrowsAdvice {
    handlers: Vec<ThrowsHandler>,
}

impl ThrowsAdvice {
    pub fn builder() -> ThrowsAdviceBuilder {
        ThrowsAdviceBuilder { handlers: Vec::new() }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// 已注册的错误类型，按注册顺序
    pub fn handled_types(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.error_type).collect()
    }

    /// 调用匹配的处理函数；没有匹配时返回 `Ok(false)`
    pub(crate) fn handle(&self, join_point: &JoinPoint<'_>, error: &InvocationError) -> Result<bool, InvocationError> {
        match self.handlers.iter().find(|h| (h.matches)(error)) {
            Some(handler) => {
                tracing::trace!(
                    "Found exception handler for '{}' in throws advice on '{}'",
                    handler.error_type,
                    join_point.signature()
                );
                (handler.handle)(join_point, error)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl fmt::Debug for ThrowsAdvice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrowsAdvice")
            .field("handlers", &self.handled_types())
            .finish()
    }
}

pub struct ThrowsAdviceBuilder {
    handlers: Vec<ThrowsHandler>,
}

impl ThrowsAdviceBuilder {
    /// 处理底层错误类型为 `E` 的失败
    pub fn on<E, F>(mut self, handler: F) -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        F: Fn(&JoinPoint<'_>, &E) -> Result<(), InvocationError> + Send + Sync + 'static,
    {
        self.handlers.push(ThrowsHandler {
            error_type: std::any::type_name::<E>(),
            matches: Box::new(|error: &InvocationError| error.is::<E>()),
            handle: Box::new(move |join_point: &JoinPoint<'_>, error: &InvocationError| match error.downcast_ref::<E>() {
                Some(typed) => handler(join_point, typed),
                None => Ok(()),
            }),
        });
        self
    }

    /// 处理任意失败
    pub fn on_any<F>(mut self, handler: F) -> Self
    where
        F: Fn(&JoinPoint<'_>, &InvocationError) -> Result<(), InvocationError> + Send + Sync + 'static,
    {
        self.handlers.push(ThrowsHandler {
            error_type: "*",
            matches: Box::new(|_: &InvocationError| true),
            handle: Box::new(handler),
        });
        self
    }

    /// 至少需要一个处理函数
    pub fn build(self) -> AopResult<ThrowsAdvice> {
        if self.handlers.is_empty() {
            return Err(AopError::Config(
                "At least one handler method must be found in throws advice".to_string(),
            ));
        }
        Ok(ThrowsAdvice { handlers: self.handlers })
    }
}

/// 委托式引介拦截器
///
/// 对引入接口上的方法直接交给委托对象执行，不再继续拦截器链；
/// 其它方法照常 proceed。
pub struct DelegatingIntroductionInterceptor {
    delegate: Arc<dyn MethodDispatch>,
    interfaces: Vec<&'static str>,
}

impl DelegatingIntroductionInterceptor {
    /// 引入委托对象实现的全部接口
    pub fn new(delegate: Arc<dyn MethodDispatch>) -> AopResult<Self> {
        let interfaces = delegate.interfaces();
        if interfaces.is_empty() {
            return Err(AopError::Config(format!(
                "Introduction delegate '{}' implements no interfaces",
                delegate.target_class()
            )));
        }
        Ok(Self { delegate, interfaces })
    }

    /// 不再引入指定接口
    pub fn suppress_interface(mut self, interface: &str) -> AopResult<Self> {
        self.interfaces.retain(|i| *i != interface);
        if self.interfaces.is_empty() {
            return Err(AopError::Config(format!(
                "Introduction delegate '{}' has no interfaces left to introduce",
                self.delegate.target_class()
            )));
        }
        Ok(self)
    }

    pub fn interfaces(&self) -> &[&'static str] {
        &self.interfaces
    }

    pub fn implements_interface(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| *i == interface)
    }

    /// 引入的方法
    pub fn introduced_methods(&self) -> Vec<Method> {
        self.delegate
            .methods()
            .into_iter()
            .filter(|m| self.implements_interface(m.declaring_type))
            .collect()
    }
}

impl MethodInterceptor for DelegatingIntroductionInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> InvocationResult {
        let method = *invocation.method();
        if self.implements_interface(method.declaring_type) {
            tracing::trace!("Delegating introduced method '{}' to '{}'", method, self.delegate.target_class());
            let (ctx, args) = invocation.context_and_arguments();
            return self.delegate.invoke(ctx, &method, args);
        }
        invocation.proceed()
    }

    fn name(&self) -> &str {
        "DelegatingIntroductionInterceptor"
    }
}

impl fmt::Debug for DelegatingIntroductionInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatingIntroductionInterceptor")
            .field("delegate", &self.delegate.target_class())
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

/// 通知
#[derive(Clone)]
pub enum Advice {
    Interceptor(Arc<dyn MethodInterceptor>),
    Before(Arc<dyn MethodBeforeAdvice>),
    AfterReturning(Arc<dyn AfterReturningAdvice>),
    After(Arc<dyn AfterAdvice>),
    Throws(Arc<ThrowsAdvice>),
    Introduction(Arc<DelegatingIntroductionInterceptor>),
}

impl Advice {
    pub fn around<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut MethodInvocation<'_>) -> InvocationResult + Send + Sync + 'static,
    {
        Advice::Interceptor(Arc::new(FnInterceptor::new(name, f)))
    }

    pub fn before<F>(f: F) -> Self
    where
        F: Fn(&JoinPoint<'_>) -> Result<(), InvocationError> + Send + Sync + 'static,
    {
        Advice::Before(Arc::new(FnBeforeAdvice(f)))
    }

    pub fn after_returning<F>(f: F) -> Self
    where
        F: Fn(&(dyn Any + Send), &JoinPoint<'_>) -> Result<(), InvocationError> + Send + Sync + 'static,
    {
        Advice::AfterReturning(Arc::new(FnAfterReturningAdvice(f)))
    }

    pub fn after<F>(f: F) -> Self
    where
        F: Fn(&JoinPoint<'_>) -> Result<(), InvocationError> + Send + Sync + 'static,
    {
        Advice::After(Arc::new(FnAfterAdvice(f)))
    }

    pub fn throws(advice: ThrowsAdvice) -> Self {
        Advice::Throws(Arc::new(advice))
    }

    pub fn introduction(interceptor: DelegatingIntroductionInterceptor) -> Self {
        Advice::Introduction(Arc::new(interceptor))
    }

    /// 适配成方法拦截器
    pub fn to_interceptor(&self) -> Arc<dyn MethodInterceptor> {
        adapter::interceptor_for(self)
    }

    pub fn is_introduction(&self) -> bool {
        matches!(self, Advice::Introduction(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Advice::Interceptor(_) => "around",
            Advice::Before(_) => "before",
            Advice::AfterReturning(_) => "after-returning",
            Advice::After(_) => "after",
            Advice::Throws(_) => "throws",
            Advice::Introduction(_) => "introduction",
        }
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advice::Interceptor(i) => write!(f, "Advice::Interceptor({})", i.name()),
            Advice::Throws(t) => write!(f, "Advice::Throws({:?})", t.handled_types()),
            Advice::Introduction(i) => write!(f, "Advice::Introduction({:?})", i.interfaces()),
            other => write!(f, "Advice({})", other.kind()),
        }
    }
}
