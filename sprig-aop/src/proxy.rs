//! 代理引擎
//!
//! [`AdvisedSupport`] 保存代理配置（目标源、接口、通知器），
//! [`ProxyFactory`] 校验配置并创建 [`AopProxy`]。
//!
//! 代理本身实现 [`MethodDispatch`]：每次调用先从目标源取得目标，
//! 再取得（或从缓存读取）该方法的拦截器链并执行。
//! 配置错误在创建代理时立即报告，而不是等到第一次调用。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use sprig_core::{Arguments, CallContext, InvocationResult, Method, MethodDispatch};

use crate::advice::{Advice, MethodInterceptor};
use crate::advisor::{sort_advisors, Advisor, AdvisorKind};
use crate::chain::{AdvisorChainFactory, ChainElement, DefaultAdvisorChainFactory};
use crate::error::{AopError, AopResult};
use crate::joinpoint::MethodInvocation;
use crate::target_source::{EmptyTargetSource, SingletonTargetSource, TargetSource};

type ChainKey = (Method, &'static str);

/// 代理配置
///
/// 通知器可以在代理创建之后继续增删（除非配置已冻结），
/// 每次变更都会清空拦截器链缓存。
pub struct AdvisedSupport {
    target_source: Option<Arc<dyn TargetSource>>,
    interfaces: Vec<&'static str>,
    proxy_target_class: bool,
    pre_filtered: bool,
    frozen: bool,
    chain_factory: Arc<dyn AdvisorChainFactory>,
    advisors: RwLock<Vec<Advisor>>,
    chain_cache: RwLock<HashMap<ChainKey, Arc<[ChainElement]>>>,
}

impl Default for AdvisedSupport {
    fn default() -> Self {
        Self {
            target_source: None,
            interfaces: Vec::new(),
            proxy_target_class: false,
            pre_filtered: false,
            frozen: false,
            chain_factory: Arc::new(DefaultAdvisorChainFactory),
            advisors: RwLock::new(Vec::new()),
            chain_cache: RwLock::new(HashMap::new()),
        }
    }
}

impl AdvisedSupport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_target(&mut self, target: Arc<dyn MethodDispatch>) {
        self.set_target_source(Arc::new(SingletonTargetSource::new(target)));
    }

    pub fn set_target_source(&mut self, target_source: Arc<dyn TargetSource>) {
        self.target_source = Some(target_source);
        self.chain_cache.get_mut().clear();
    }

    pub fn target_source(&self) -> Option<&Arc<dyn TargetSource>> {
        self.target_source.as_ref()
    }

    pub fn add_interface(&mut self, interface: &'static str) {
        if !self.interfaces.contains(&interface) {
            self.interfaces.push(interface);
        }
    }

    pub fn remove_interface(&mut self, interface: &str) -> bool {
        let before = self.interfaces.len();
        self.interfaces.retain(|i| *i != interface);
        before != self.interfaces.len()
    }

    pub fn interfaces(&self) -> &[&'static str] {
        &self.interfaces
    }

    pub fn set_proxy_target_class(&mut self, proxy_target_class: bool) {
        self.proxy_target_class = proxy_target_class;
    }

    pub fn is_proxy_target_class(&self) -> bool {
        self.proxy_target_class
    }

    /// 通知器已经按目标类过滤过时设为 true
    pub fn set_pre_filtered(&mut self, pre_filtered: bool) {
        self.pre_filtered = pre_filtered;
    }

    pub fn is_pre_filtered(&self) -> bool {
        self.pre_filtered
    }

    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn set_chain_factory(&mut self, chain_factory: Arc<dyn AdvisorChainFactory>) {
        self.chain_factory = chain_factory;
        self.chain_cache.get_mut().clear();
    }

    pub fn add_advisor(&self, advisor: Advisor) -> AopResult<()> {
        if self.frozen {
            return Err(AopError::Frozen);
        }
        let mut advisors = self.advisors.write();
        advisors.push(advisor);
        sort_advisors(&mut advisors);
        self.chain_cache.write().clear();
        Ok(())
    }

    /// 以总是生效的通知器加入通知
    pub fn add_advice(&self, advice: Advice) -> AopResult<()> {
        self.add_advisor(Advisor::always(advice))
    }

    pub fn remove_advisor(&self, index: usize) -> AopResult<Advisor> {
        if self.frozen {
            return Err(AopError::Frozen);
        }
        let mut advisors = self.advisors.write();
        if index >= advisors.len() {
            return Err(AopError::Config(format!(
                "Advisor index {} is out of bounds: only have {} advisors",
                index,
                advisors.len()
            )));
        }
        let removed = advisors.remove(index);
        self.chain_cache.write().clear();
        Ok(removed)
    }

    pub fn advisors(&self) -> Vec<Advisor> {
        self.advisors.read().clone()
    }

    pub fn advisor_count(&self) -> usize {
        self.advisors.read().len()
    }

    /// 对目标类生效的引介接口
    pub fn introduced_interfaces(&self, target_class: &str) -> Vec<&'static str> {
        let mut result = Vec::new();
        for advisor in self.advisors.read().iter() {
            if let AdvisorKind::Introduction { class_filter, interfaces } = advisor.kind() {
                if self.pre_filtered || class_filter.matches(target_class) {
                    result.extend(interfaces.iter().copied());
                }
            }
        }
        result
    }

    fn introduced_methods(&self, target_class: &str) -> Vec<Method> {
        self.advisors
            .read()
            .iter()
            .filter(|advisor| advisor.can_apply(target_class, &[], false) && advisor.is_introduction())
            .flat_map(Advisor::introduced_methods)
            .collect()
    }

    /// 取得 (方法, 目标类) 的拦截器链，结果会被缓存
    pub fn interceptors_for(&self, method: &Method, target_class: &'static str) -> Arc<[ChainElement]> {
        let key = (*method, target_class);
        if let Some(chain) = self.chain_cache.read().get(&key) {
            return Arc::clone(chain);
        }

        let advisors = self.advisors.read();
        let chain: Arc<[ChainElement]> = self
            .chain_factory
            .interceptors_for(&advisors, method, target_class, self.pre_filtered)
            .into();
        self.chain_cache.write().insert(key, Arc::clone(&chain));
        chain
    }

    pub fn cached_chain_count(&self) -> usize {
        self.chain_cache.read().len()
    }
}

impl fmt::Debug for AdvisedSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisedSupport")
            .field("target_class", &self.target_source.as_ref().and_then(|s| s.target_class()))
            .field("interfaces", &self.interfaces)
            .field("advisors", &self.advisor_count())
            .field("proxy_target_class", &self.proxy_target_class)
            .field("frozen", &self.frozen)
            .finish()
    }
}

/// 代理工厂
///
/// ```ignore
/// let proxy = ProxyFactory::for_target(Arc::new(AccountServiceImpl::default()))
///     .with_advisor(Advisor::new(pointcut, Advice::Interceptor(tx_interceptor)))
///     .get_proxy()?;
/// ```
#[derive(Debug, Default)]
pub struct ProxyFactory {
    config: AdvisedSupport,
}

impl ProxyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 代理目标对象，并暴露它实现的全部接口
    pub fn for_target(target: Arc<dyn MethodDispatch>) -> Self {
        let mut factory = Self::new();
        for interface in target.interfaces() {
            factory.config.add_interface(interface);
        }
        factory.config.set_target(target);
        factory
    }

    pub fn for_target_source(target_source: Arc<dyn TargetSource>) -> Self {
        let mut factory = Self::new();
        factory.config.set_target_source(target_source);
        factory
    }

    /// 只有一个拦截器、没有目标的接口代理
    pub fn get_proxy_for(interface: &'static str, interceptor: Arc<dyn MethodInterceptor>) -> AopResult<Arc<AopProxy>> {
        ProxyFactory::for_target_source(Arc::new(EmptyTargetSource::new()))
            .with_interface(interface)
            .with_advice(Advice::Interceptor(interceptor))
            .get_proxy()
    }

    pub fn with_target(mut self, target: Arc<dyn MethodDispatch>) -> Self {
        self.config.set_target(target);
        self
    }

    pub fn with_interface(mut self, interface: &'static str) -> Self {
        self.config.add_interface(interface);
        self
    }

    pub fn with_advisor(self, advisor: Advisor) -> Self {
        {
            let mut advisors = self.config.advisors.write();
            advisors.push(advisor);
            sort_advisors(&mut advisors);
        }
        self
    }

    pub fn with_advice(self, advice: Advice) -> Self {
        self.with_advisor(Advisor::always(advice))
    }

    pub fn with_chain_factory(mut self, chain_factory: Arc<dyn AdvisorChainFactory>) -> Self {
        self.config.set_chain_factory(chain_factory);
        self
    }

    /// 代理目标类本身而不是接口，所有目标方法都可以通过代理调用
    pub fn proxy_target_class(mut self, proxy_target_class: bool) -> Self {
        self.config.set_proxy_target_class(proxy_target_class);
        self
    }

    pub fn pre_filtered(mut self, pre_filtered: bool) -> Self {
        self.config.set_pre_filtered(pre_filtered);
        self
    }

    pub fn frozen(mut self, frozen: bool) -> Self {
        self.config.set_frozen(frozen);
        self
    }

    pub fn config(&self) -> &AdvisedSupport {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AdvisedSupport {
        &mut self.config
    }

    /// 校验配置并创建代理
    pub fn get_proxy(self) -> AopResult<Arc<AopProxy>> {
        AopProxy::create(self.config).map(Arc::new)
    }
}

/// AOP 代理
pub struct AopProxy {
    advised: Arc<AdvisedSupport>,
    target_source: Arc<dyn TargetSource>,
    exposed_interfaces: Vec<&'static str>,
    class_proxy: bool,
    target_class: &'static str,
}

const UNKNOWN_TARGET_CLASS: &str = "sprig_aop::proxy::AopProxy";

impl AopProxy {
    fn create(config: AdvisedSupport) -> AopResult<Self> {
        let target_source = config
            .target_source
            .clone()
            .ok_or_else(|| AopError::Config("No target source or target set".to_string()))?;

        // 只检查静态目标，动态目标每次调用可能不同
        let static_target = if target_source.is_static() {
            target_source.get_target()?
        } else {
            None
        };
        let target_class = target_source.target_class();
        let class_name = target_class.unwrap_or(UNKNOWN_TARGET_CLASS);

        let mut class_proxy = config.proxy_target_class;
        if !class_proxy && config.interfaces.is_empty() {
            if target_class.is_none() {
                return Err(AopError::Config(
                    "Cannot create proxy: no interfaces specified and target class unknown".to_string(),
                ));
            }
            tracing::debug!("No proxy interfaces for '{}', proxying target class", class_name);
            class_proxy = true;
        }
        if class_proxy && target_class.is_none() {
            return Err(AopError::Config(
                "Cannot create class proxy: target class cannot be determined from the target source".to_string(),
            ));
        }

        let introduced = config.introduced_interfaces(class_name);
        if let Some(target) = &static_target {
            for interface in &config.interfaces {
                if !target.implements(interface) && !introduced.contains(interface) {
                    return Err(AopError::InterfaceNotImplemented {
                        interface: interface.to_string(),
                        target: target.target_class().to_string(),
                    });
                }
            }
        }

        let mut exposed_interfaces = config.interfaces.clone();
        for interface in introduced {
            if !exposed_interfaces.contains(&interface) {
                exposed_interfaces.push(interface);
            }
        }

        if class_proxy {
            tracing::debug!("Creating class proxy for target class '{}'", class_name);
        } else {
            tracing::debug!(
                "Creating interface proxy for '{}' exposing {:?}",
                class_name,
                exposed_interfaces
            );
        }

        Ok(Self {
            advised: Arc::new(config),
            target_source,
            exposed_interfaces,
            class_proxy,
            target_class: class_name,
        })
    }

    /// 代理配置，可以在运行时增删通知器
    pub fn advised(&self) -> &AdvisedSupport {
        &self.advised
    }

    pub fn is_class_proxy(&self) -> bool {
        self.class_proxy
    }

    pub fn target_source(&self) -> &Arc<dyn TargetSource> {
        &self.target_source
    }

    fn exposes(&self, method: &Method) -> bool {
        self.class_proxy || self.exposed_interfaces.contains(&method.declaring_type)
    }
}

impl MethodDispatch for AopProxy {
    fn target_class(&self) -> &'static str {
        self.target_class
    }

    fn interfaces(&self) -> Vec<&'static str> {
        self.exposed_interfaces.clone()
    }

    fn methods(&self) -> Vec<Method> {
        let mut methods = match self.target_source.get_target() {
            Ok(Some(target)) => {
                let methods = target.methods();
                if !self.target_source.is_static() {
                    self.target_source.release_target(&target);
                }
                methods
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!("Could not obtain target to list methods of proxy for '{}': {}", self.target_class, e);
                Vec::new()
            }
        };
        methods.extend(self.advised.introduced_methods(self.target_class));
        let mut seen = HashSet::new();
        methods.retain(|m| self.exposes(m) && seen.insert(*m));
        methods
    }

    fn invoke(&self, ctx: &mut CallContext, method: &Method, args: &mut Arguments) -> InvocationResult {
        if !self.exposes(method) {
            return Err(AopError::MethodNotExposed {
                method: method.signature(),
                interfaces: self.exposed_interfaces.iter().map(|i| i.to_string()).collect(),
            }
            .into());
        }

        let target = self.target_source.get_target()?;
        let target_class = target
            .as_ref()
            .map(|t| t.target_class())
            .unwrap_or(self.target_class);
        let chain = self.advised.interceptors_for(method, target_class);

        let result = if chain.is_empty() {
            match &target {
                Some(target) => target.invoke(ctx, method, args),
                None => Err(AopError::NoTarget {
                    method: method.signature(),
                }
                .into()),
            }
        } else {
            MethodInvocation::new(target.clone(), target_class, *method, args, ctx, chain).proceed()
        };

        if let Some(target) = &target {
            if !self.target_source.is_static() {
                self.target_source.release_target(target);
            }
        }
        result
    }

    fn implements(&self, interface: &str) -> bool {
        self.exposed_interfaces.iter().any(|i| *i == interface)
    }
}

impl fmt::Debug for AopProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AopProxy")
            .field("target_class", &self.target_class)
            .field("interfaces", &self.exposed_interfaces)
            .field("class_proxy", &self.class_proxy)
            .field("advisors", &self.advised.advisor_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{DelegatingIntroductionInterceptor, FnInterceptor};
    use crate::pointcut::{ArgumentsMatchPointcut, NameMatchMethodPointcut};
    use crate::target_source::HotSwappableTargetSource;
    use parking_lot::Mutex;
    use sprig_core::{args, ret, InvocationError, NoSuchMethod};

    const DEPOSIT: Method = Method::new("Account", "deposit");
    const BALANCE: Method = Method::new("Account", "balance");
    const RESET: Method = Method::new("AccountImpl", "reset");
    const AUDIT: Method = Method::new("Auditable", "audit");

    #[derive(Default)]
    struct AccountImpl {
        balance: Mutex<u64>,
    }

    impl MethodDispatch for AccountImpl {
        fn target_class(&self) -> &'static str {
            "bank::AccountImpl"
        }

        fn interfaces(&self) -> Vec<&'static str> {
            vec!["Account"]
        }

        fn methods(&self) -> Vec<Method> {
            vec![DEPOSIT, BALANCE, RESET]
        }

        fn invoke(&self, _ctx: &mut CallContext, method: &Method, args: &mut Arguments) -> InvocationResult {
            let mut balance = self.balance.lock();
            match method.name {
                "deposit" => {
                    *balance += *args.arg::<u64>(0)?;
                    ret(*balance)
                }
                "balance" => ret(*balance),
                "reset" => {
                    *balance = 0;
                    ret(())
                }
                _ => Err(InvocationError::unchecked(NoSuchMethod::new(method, self.target_class()))),
            }
        }
    }

    struct Auditor;

    impl MethodDispatch for Auditor {
        fn interfaces(&self) -> Vec<&'static str> {
            vec!["Auditable"]
        }

        fn methods(&self) -> Vec<Method> {
            vec![AUDIT]
        }

        fn invoke(&self, _ctx: &mut CallContext, _method: &Method, _args: &mut Arguments) -> InvocationResult {
            ret("audited")
        }
    }

    fn counting(counter: Arc<Mutex<u32>>) -> Advice {
        Advice::around("counting", move |inv: &mut MethodInvocation<'_>| {
            *counter.lock() += 1;
            inv.proceed()
        })
    }

    fn call<R: std::any::Any>(proxy: &Arc<AopProxy>, method: &Method, args: Arguments) -> Result<R, InvocationError> {
        let dispatch: Arc<dyn MethodDispatch> = proxy.clone();
        let mut ctx = CallContext::new();
        dispatch.call::<R>(&mut ctx, method, args)
    }

    #[test]
    fn test_interface_proxy_applies_advice() {
        let counter = Arc::new(Mutex::new(0));
        let proxy = ProxyFactory::for_target(Arc::new(AccountImpl::default()))
            .with_advisor(Advisor::new(
                Arc::new(NameMatchMethodPointcut::new(["deposit"])),
                counting(Arc::clone(&counter)),
            ))
            .get_proxy()
            .unwrap();

        assert!(!proxy.is_class_proxy());
        assert_eq!(proxy.interfaces(), vec!["Account"]);
        assert_eq!(proxy.target_class(), "bank::AccountImpl");
        assert_eq!(call::<u64>(&proxy, &DEPOSIT, args![5_u64]).unwrap(), 5);
        assert_eq!(call::<u64>(&proxy, &BALANCE, args![]).unwrap(), 5);
        assert_eq!(*counter.lock(), 1);
    }

    #[test]
    fn test_interface_proxy_rejects_unexposed_methods() {
        let proxy = ProxyFactory::for_target(Arc::new(AccountImpl::default())).get_proxy().unwrap();
        let err = call::<()>(&proxy, &RESET, args![]).unwrap_err();
        assert!(err.is::<AopError>());
        assert!(!proxy.methods().contains(&RESET));
        assert!(proxy.methods().contains(&DEPOSIT));
    }

    #[test]
    fn test_class_proxy_exposes_all_target_methods() {
        let proxy = ProxyFactory::for_target(Arc::new(AccountImpl::default()))
            .proxy_target_class(true)
            .get_proxy()
            .unwrap();
        assert!(proxy.is_class_proxy());
        call::<u64>(&proxy, &DEPOSIT, args![9_u64]).unwrap();
        call::<()>(&proxy, &RESET, args![]).unwrap();
        assert_eq!(call::<u64>(&proxy, &BALANCE, args![]).unwrap(), 0);
        assert!(proxy.methods().contains(&RESET));
    }

    #[test]
    fn test_invalid_configuration_fails_at_creation() {
        let no_target = ProxyFactory::new().with_interface("Account").get_proxy();
        assert!(matches!(no_target, Err(AopError::Config(_))));

        let wrong_interface = ProxyFactory::for_target(Arc::new(AccountImpl::default()))
            .with_interface("Ledger")
            .get_proxy();
        assert!(matches!(wrong_interface, Err(AopError::InterfaceNotImplemented { .. })));

        let class_without_target = ProxyFactory::for_target_source(Arc::new(EmptyTargetSource::new()))
            .proxy_target_class(true)
            .get_proxy();
        assert!(matches!(class_without_target, Err(AopError::Config(_))));
    }

    #[test]
    fn test_interceptor_only_proxy() {
        let proxy = ProxyFactory::get_proxy_for(
            "Greeter",
            Arc::new(FnInterceptor::new("greeter", |inv: &mut MethodInvocation<'_>| {
                let name = inv.arguments().arg::<String>(0)?.clone();
                ret(format!("hello {} from {}", name, inv.method().name))
            })),
        )
        .unwrap();

        let greet = Method::new("Greeter", "greet");
        assert_eq!(call::<String>(&proxy, &greet, args!["ann".to_string()]).unwrap(), "hello ann from greet");
        assert!(call::<String>(&proxy, &DEPOSIT, args![]).is_err());
    }

    #[test]
    fn test_no_advice_and_no_target_reports_missing_target() {
        let proxy = ProxyFactory::for_target_source(Arc::new(EmptyTargetSource::new()))
            .with_interface("Greeter")
            .get_proxy()
            .unwrap();
        let err = call::<String>(&proxy, &Method::new("Greeter", "greet"), args![]).unwrap_err();
        assert!(matches!(err.downcast_ref::<AopError>(), Some(AopError::NoTarget { .. })));
    }

    #[test]
    fn test_chain_cache_invalidated_on_advisor_change() {
        let counter = Arc::new(Mutex::new(0));
        let proxy = ProxyFactory::for_target(Arc::new(AccountImpl::default())).get_proxy().unwrap();

        call::<u64>(&proxy, &BALANCE, args![]).unwrap();
        assert_eq!(proxy.advised().cached_chain_count(), 1);

        proxy.advised().add_advice(counting(Arc::clone(&counter))).unwrap();
        assert_eq!(proxy.advised().cached_chain_count(), 0);
        call::<u64>(&proxy, &BALANCE, args![]).unwrap();
        assert_eq!(*counter.lock(), 1);

        proxy.advised().remove_advisor(0).unwrap();
        call::<u64>(&proxy, &BALANCE, args![]).unwrap();
        assert_eq!(*counter.lock(), 1);
        assert!(proxy.advised().remove_advisor(3).is_err());
    }

    #[test]
    fn test_frozen_configuration() {
        let proxy = ProxyFactory::for_target(Arc::new(AccountImpl::default()))
            .frozen(true)
            .get_proxy()
            .unwrap();
        let counter = Arc::new(Mutex::new(0));
        assert!(matches!(proxy.advised().add_advice(counting(counter)), Err(AopError::Frozen)));
    }

    #[test]
    fn test_introduction_adds_interface() {
        let introduction = DelegatingIntroductionInterceptor::new(Arc::new(Auditor)).unwrap();
        let proxy = ProxyFactory::for_target(Arc::new(AccountImpl::default()))
            .with_interface("Auditable")
            .with_advisor(Advisor::introduction(introduction))
            .get_proxy()
            .unwrap();

        assert!(proxy.implements("Auditable"));
        assert!(proxy.methods().contains(&AUDIT));
        assert_eq!(call::<&str>(&proxy, &AUDIT, args![]).unwrap(), "audited");
        assert_eq!(call::<u64>(&proxy, &DEPOSIT, args![3_u64]).unwrap(), 3);
    }

    #[test]
    fn test_methods_listed_once_when_introduced_twice() {
        struct BalanceAuditor;

        impl MethodDispatch for BalanceAuditor {
            fn interfaces(&self) -> Vec<&'static str> {
                vec!["Account", "Auditable"]
            }

            fn methods(&self) -> Vec<Method> {
                vec![BALANCE, AUDIT]
            }

            fn invoke(&self, _ctx: &mut CallContext, _method: &Method, _args: &mut Arguments) -> InvocationResult {
                ret(0_u64)
            }
        }

        let introduction = DelegatingIntroductionInterceptor::new(Arc::new(BalanceAuditor)).unwrap();
        let proxy = ProxyFactory::for_target(Arc::new(AccountImpl::default()))
            .proxy_target_class(true)
            .with_advisor(Advisor::introduction(introduction))
            .get_proxy()
            .unwrap();

        assert_eq!(proxy.methods(), vec![DEPOSIT, BALANCE, RESET, AUDIT]);
    }

    #[test]
    fn test_runtime_pointcut_through_proxy() {
        let counter = Arc::new(Mutex::new(0));
        let proxy = ProxyFactory::for_target(Arc::new(AccountImpl::default()))
            .with_advisor(Advisor::new(
                Arc::new(ArgumentsMatchPointcut::new(["deposit"], |args| {
                    args.get::<u64>(0).is_some_and(|amount| *amount >= 1000)
                })),
                counting(Arc::clone(&counter)),
            ))
            .get_proxy()
            .unwrap();

        call::<u64>(&proxy, &DEPOSIT, args![10_u64]).unwrap();
        call::<u64>(&proxy, &DEPOSIT, args![5000_u64]).unwrap();
        assert_eq!(*counter.lock(), 1);
    }

    #[test]
    fn test_hot_swappable_target() {
        let first = Arc::new(AccountImpl::default());
        let source = Arc::new(HotSwappableTargetSource::new(first.clone()));
        let proxy = ProxyFactory::for_target_source(source.clone())
            .with_interface("Account")
            .get_proxy()
            .unwrap();

        call::<u64>(&proxy, &DEPOSIT, args![4_u64]).unwrap();
        source.swap(Arc::new(AccountImpl::default())).unwrap();
        assert_eq!(call::<u64>(&proxy, &BALANCE, args![]).unwrap(), 0);
        assert_eq!(*first.balance.lock(), 4);
    }
}
