//! 通知适配器
//!
//! 把前置、返回后、最终和异常通知包装成 [`MethodInterceptor`]

use std::sync::Arc;

use sprig_core::InvocationResult;

use crate::advice::{
    Advice, AfterAdvice, AfterReturningAdvice, MethodBeforeAdvice, MethodInterceptor, ThrowsAdvice,
};
use crate::joinpoint::MethodInvocation;

/// 把任意通知适配成拦截器
pub fn interceptor_for(advice: &Advice) -> Arc<dyn MethodInterceptor> {
    match advice {
        Advice::Interceptor(interceptor) => Arc::clone(interceptor),
        Advice::Before(before) => Arc::new(MethodBeforeAdviceInterceptor::new(Arc::clone(before))),
        Advice::AfterReturning(after) => Arc::new(AfterReturningAdviceInterceptor::new(Arc::clone(after))),
        Advice::After(after) => Arc::new(AfterAdviceInterceptor::new(Arc::clone(after))),
        Advice::Throws(throws) => Arc::new(ThrowsAdviceInterceptor::new(Arc::clone(throws))),
        Advice::Introduction(introduction) => Arc::clone(introduction) as Arc<dyn MethodInterceptor>,
    }
}

pub struct MethodBeforeAdviceInterceptor {
    advice: Arc<dyn MethodBeforeAdvice>,
}

impl MethodBeforeAdviceInterceptor {
    pub fn new(advice: Arc<dyn MethodBeforeAdvice>) -> Self {
        Self { advice }
    }
}

impl MethodInterceptor for MethodBeforeAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> InvocationResult {
        self.advice.before(&invocation.join_point())?;
        invocation.proceed()
    }
}

pub struct AfterReturningAdviceInterceptor {
    advice: Arc<dyn AfterReturningAdvice>,
}

impl AfterReturningAdviceInterceptor {
    pub fn new(advice: Arc<dyn AfterReturningAdvice>) -> Self {
        Self { advice }
    }
}

impl MethodInterceptor for AfterReturningAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> InvocationResult {
        let value = invocation.proceed()?;
        self.advice.after_returning(&*value, &invocation.join_point())?;
        Ok(value)
    }
}

pub struct AfterAdviceInterceptor {
    advice: Arc<dyn AfterAdvice>,
}

impl AfterAdviceInterceptor {
    pub fn new(advice: Arc<dyn AfterAdvice>) -> Self {
        Self { advice }
    }
}

impl MethodInterceptor for AfterAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> InvocationResult {
        let result = invocation.proceed();
        // 最终通知自身失败时以它的错误为准
        self.advice.after(&invocation.join_point())?;
        result
    }
}

pub struct ThrowsAdviceInterceptor {
    advice: Arc<ThrowsAdvice>,
}

impl ThrowsAdviceInterceptor {
    pub fn new(advice: Arc<ThrowsAdvice>) -> Self {
        Self { advice }
    }
}

impl MethodInterceptor for ThrowsAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> InvocationResult {
        match invocation.proceed() {
            Ok(value) => Ok(value),
            Err(error) => {
                self.advice.handle(&invocation.join_point(), &error)?;
                Err(error)
            }
        }
    }
}
