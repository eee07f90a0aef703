//! 连接点（JoinPoint）与方法调用（MethodInvocation）
//!
//! [`MethodInvocation`] 是拦截器链上的游标：每次 `proceed()` 前进一位，
//! 走到链尾时调用真实的目标方法。游标只会前进，需要多次执行后续链的
//! 拦截器（例如重试）应当通过 [`MethodInvocation::invocable_clone`] 获得新的游标。

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sprig_core::utils::naming::short_type_name;
use sprig_core::{Arguments, CallContext, InvocationResult, Method, MethodDispatch};

use crate::chain::ChainElement;
use crate::error::AopError;

/// 一次代理方法调用
pub struct MethodInvocation<'a> {
    target: Option<Arc<dyn MethodDispatch>>,
    target_class: &'static str,
    method: Method,
    args: &'a mut Arguments,
    ctx: &'a mut CallContext,
    chain: Arc<[ChainElement]>,
    index: usize,
    started: Instant,
}

impl<'a> MethodInvocation<'a> {
    pub fn new(
        target: Option<Arc<dyn MethodDispatch>>,
        target_class: &'static str,
        method: Method,
        args: &'a mut Arguments,
        ctx: &'a mut CallContext,
        chain: Arc<[ChainElement]>,
    ) -> Self {
        Self {
            target,
            target_class,
            method,
            args,
            ctx,
            chain,
            index: 0,
            started: Instant::now(),
        }
    }

    /// 执行链上的下一个拦截器，链已走完时调用目标方法
    pub fn proceed(&mut self) -> InvocationResult {
        let Some(element) = self.chain.get(self.index).cloned() else {
            return self.invoke_joinpoint();
        };
        self.index += 1;

        match element {
            ChainElement::Static(interceptor) => interceptor.invoke(self),
            ChainElement::Dynamic { interceptor, pointcut } => {
                if pointcut
                    .method_matcher()
                    .matches_args(&self.method, self.target_class, &*self.args)
                {
                    interceptor.invoke(self)
                } else {
                    tracing::trace!(
                        "Dynamic match failed for '{}', skipping interceptor '{}'",
                        self.method,
                        interceptor.name()
                    );
                    self.proceed()
                }
            }
        }
    }

    fn invoke_joinpoint(&mut self) -> InvocationResult {
        match &self.target {
            Some(target) => target.invoke(&mut *self.ctx, &self.method, &mut *self.args),
            None => Err(AopError::NoTarget {
                method: self.method.signature(),
            }
            .into()),
        }
    }

    /// 在当前位置复制出一个新的游标，共享参数和调用上下文
    pub fn invocable_clone(&mut self) -> MethodInvocation<'_> {
        MethodInvocation {
            target: self.target.clone(),
            target_class: self.target_class,
            method: self.method,
            args: &mut *self.args,
            ctx: &mut *self.ctx,
            chain: Arc::clone(&self.chain),
            index: self.index,
            started: self.started,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn arguments(&self) -> &Arguments {
        &*self.args
    }

    /// 拦截器可以在 proceed 之前改写参数
    pub fn arguments_mut(&mut self) -> &mut Arguments {
        &mut *self.args
    }

    pub fn target_class(&self) -> &'static str {
        self.target_class
    }

    /// 目标对象；只有拦截器的代理没有目标
    pub fn target(&self) -> Option<&Arc<dyn MethodDispatch>> {
        self.target.as_ref()
    }

    pub fn context(&self) -> &CallContext {
        &*self.ctx
    }

    pub fn context_mut(&mut self) -> &mut CallContext {
        &mut *self.ctx
    }

    /// 同时借出调用上下文和参数，用于直接调用其它分派对象
    pub fn context_and_arguments(&mut self) -> (&mut CallContext, &mut Arguments) {
        (&mut *self.ctx, &mut *self.args)
    }

    /// 下一次 proceed 将执行的链位置
    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// 调用开始至今的耗时
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// 只读视图，供前置/后置通知使用
    pub fn join_point(&self) -> JoinPoint<'_> {
        JoinPoint {
            method: &self.method,
            args: &*self.args,
            target_class: self.target_class,
            timestamp: self.started,
        }
    }
}

impl fmt::Debug for MethodInvocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInvocation")
            .field("method", &self.method.signature())
            .field("target_class", &self.target_class)
            .field("index", &self.index)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

/// 连接点信息
///
/// 通知看到的调用现场，不能继续执行链
#[derive(Clone, Copy)]
pub struct JoinPoint<'a> {
    method: &'a Method,
    args: &'a Arguments,
    target_class: &'static str,
    timestamp: Instant,
}

impl<'a> JoinPoint<'a> {
    pub fn method(&self) -> &'a Method {
        self.method
    }

    pub fn method_name(&self) -> &'static str {
        self.method.name
    }

    pub fn args(&self) -> &'a Arguments {
        self.args
    }

    /// 按位置读取参数
    pub fn arg<T: Any>(&self, index: usize) -> Option<&'a T> {
        self.args.get::<T>(index)
    }

    pub fn target_class(&self) -> &'static str {
        self.target_class
    }

    /// 调用时间戳
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// 方法签名，例如 `AccountService.transfer`
    pub fn signature(&self) -> String {
        self.method.signature()
    }

    /// 带目标类的描述，例如 `AccountServiceImpl -> AccountService.transfer`
    pub fn short_description(&self) -> String {
        format!("{} -> {}", short_type_name(self.target_class), self.method)
    }
}

impl fmt::Debug for JoinPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPoint")
            .field("target_class", &self.target_class)
            .field("signature", &self.signature())
            .field("args", &self.args.len())
            .finish()
    }
}
