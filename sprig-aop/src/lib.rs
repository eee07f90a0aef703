// sprig-aop: 基于方法分派的 AOP 代理引擎
//
// 提供：
// - 切点（类过滤器、方法匹配器、表达式、运行时参数匹配）
// - 环绕、前置、返回后、最终、异常和引介通知
// - 按注册顺序构建并缓存的拦截器链
// - 接口代理和类代理、多种目标源
// - 通过 BeanPostProcessor 自动为容器中的 Bean 创建代理

pub mod adapter;
pub mod advice;
pub mod advisor;
pub mod aspect;
pub mod auto_proxy;
pub mod chain;
pub mod error;
pub mod error_info;
pub mod joinpoint;
pub mod pointcut;
pub mod proxy;
pub mod target_source;

// 重新导出常用类型
pub use advice::{
    Advice, AfterAdvice, AfterReturningAdvice, DelegatingIntroductionInterceptor, FnInterceptor, MethodBeforeAdvice,
    MethodInterceptor, ThrowsAdvice, ThrowsAdviceBuilder,
};
pub use advisor::{sort_advisors, Advisor, AdvisorKind};
pub use aspect::{ExceptionLoggingInterceptor, PerformanceMonitorInterceptor, TracingInterceptor};
pub use auto_proxy::AutoProxyCreator;
pub use chain::{AdvisorChainFactory, ChainElement, DefaultAdvisorChainFactory};
pub use error::{AopError, AopResult};
pub use error_info::ErrorInfo;
pub use joinpoint::{JoinPoint, MethodInvocation};
pub use pointcut::{
    ArgumentsMatchPointcut, ClassFilter, ComposablePointcut, IntroductionAwareMethodMatcher, MethodMatcher,
    NameMatchMethodPointcut, Pointcut, PointcutExpression, RuntimeMethodMatcher, TrueClassFilter, TrueMethodMatcher,
    TypePatternClassFilter,
};
pub use proxy::{AdvisedSupport, AopProxy, ProxyFactory};
pub use target_source::{
    EmptyTargetSource, HotSwappableTargetSource, LazyInitTargetSource, PrototypeTargetSource, SingletonTargetSource,
    TargetSource,
};

/// 预导入模块
pub mod prelude {
    pub use crate::advice::{Advice, MethodInterceptor, ThrowsAdvice};
    pub use crate::advisor::Advisor;
    pub use crate::auto_proxy::AutoProxyCreator;
    pub use crate::error::{AopError, AopResult};
    pub use crate::joinpoint::{JoinPoint, MethodInvocation};
    pub use crate::pointcut::{NameMatchMethodPointcut, Pointcut, PointcutExpression};
    pub use crate::proxy::{AopProxy, ProxyFactory};
    pub use crate::target_source::TargetSource;
}
