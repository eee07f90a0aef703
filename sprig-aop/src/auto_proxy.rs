//! 自动代理
//!
//! [`AutoProxyCreator`] 作为 BeanPostProcessor 在 Bean 初始化之后检查它是否有
//! 可以应用的通知器，有则为它创建代理。代理只替换 [`BeanInstance`] 的方法分派，
//! 原始对象仍然可以通过 `downcast` 取得。

use std::sync::{Arc, Weak};

use sprig_core::prelude::*;
use sprig_core::bean_factory::FACTORY_BEAN_PREFIX;
use sprig_core::utils::pattern::simple_match_any;

use crate::advice::Advice;
use crate::advisor::Advisor;
use crate::proxy::ProxyFactory;

// 通知器和通知可以直接注册为 Bean，由 interceptor_names 引用
impl Bean for Advisor {}
impl Bean for Advice {}

/// 自动代理创建器
///
/// ## 匹配规则
///
/// - `bean_names` 为空时检查所有 Bean，否则 Bean 名称或任一别名需要匹配其中一个模式
/// - FactoryBean 本身只匹配以 `&` 开头的模式，它的产品匹配普通模式
/// - 基础设施角色的 Bean、通知器 Bean 本身以及不支持方法分派的 Bean 不会被代理
///
/// ```ignore
/// let creator = AutoProxyCreator::for_factory(&factory)
///     .with_bean_names(["*Service"])
///     .with_interceptor_names(["transactionAdvisor"]);
/// factory.add_bean_post_processor(Arc::new(creator));
/// ```
pub struct AutoProxyCreator {
    bean_factory: Weak<dyn ConfigurableListableBeanFactory>,
    bean_names: Vec<String>,
    interceptor_names: Vec<String>,
    advisors: Vec<Advisor>,
    proxy_target_class: bool,
    order: i32,
}

impl AutoProxyCreator {
    pub fn new(bean_factory: Weak<dyn ConfigurableListableBeanFactory>) -> Self {
        Self {
            bean_factory,
            bean_names: Vec::new(),
            interceptor_names: Vec::new(),
            advisors: Vec::new(),
            proxy_target_class: false,
            order: 2000,
        }
    }

    pub fn for_factory(factory: &Arc<DefaultListableBeanFactory>) -> Self {
        let weak: Weak<dyn ConfigurableListableBeanFactory> = Arc::downgrade(factory) as Weak<DefaultListableBeanFactory>;
        Self::new(weak)
    }

    /// Bean 名称模式，支持 `*` 通配
    pub fn with_bean_names<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.bean_names.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// 通知器或通知 Bean 的名称，每次创建代理时从容器获取
    pub fn with_interceptor_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.interceptor_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_advisor(mut self, advisor: Advisor) -> Self {
        self.advisors.push(advisor);
        self
    }

    pub fn proxy_target_class(mut self, proxy_target_class: bool) -> Self {
        self.proxy_target_class = proxy_target_class;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    fn factory(&self) -> ContainerResult<Arc<dyn ConfigurableListableBeanFactory>> {
        self.bean_factory.upgrade().ok_or(ContainerError::FactoryDropped)
    }

    fn is_match(&self, factory: &dyn ConfigurableListableBeanFactory, bean_name: &str, is_factory_bean: bool) -> bool {
        if self.bean_names.is_empty() {
            return !is_factory_bean;
        }
        let patterns: Vec<&str> = self
            .bean_names
            .iter()
            .filter_map(|pattern| match pattern.strip_prefix(FACTORY_BEAN_PREFIX) {
                Some(stripped) if is_factory_bean => Some(stripped),
                None if !is_factory_bean => Some(pattern.as_str()),
                _ => None,
            })
            .collect();
        if patterns.is_empty() {
            return false;
        }
        simple_match_any(&patterns, bean_name)
            || factory
                .get_aliases(bean_name)
                .iter()
                .any(|alias| simple_match_any(&patterns, alias))
    }

    fn is_infrastructure(&self, factory: &dyn ConfigurableListableBeanFactory, bean_name: &str) -> bool {
        if self.interceptor_names.iter().any(|name| name == bean_name) {
            return true;
        }
        // 手动注册的单例没有定义
        factory
            .get_merged_bean_definition(bean_name)
            .map(|definition| definition.role() == Role::Infrastructure)
            .unwrap_or(false)
    }

    /// 显式通知器加上从容器解析出来的通知器
    fn candidate_advisors(&self, factory: &dyn ConfigurableListableBeanFactory) -> ContainerResult<Vec<Advisor>> {
        let mut advisors = self.advisors.clone();
        for name in &self.interceptor_names {
            if factory.is_currently_in_creation(name) {
                tracing::debug!("Skipping currently created advisor '{}'", name);
                continue;
            }
            let instance = factory.get_bean(name)?;
            if let Some(advisor) = instance.downcast_ref::<Advisor>() {
                advisors.push(advisor.clone());
            } else if let Some(advice) = instance.downcast_ref::<Advice>() {
                advisors.push(Advisor::always(advice.clone()));
            } else {
                return Err(ContainerError::TypeMismatch {
                    name: name.clone(),
                    expected: "Advisor or Advice".to_string(),
                    actual: instance.type_name().to_string(),
                });
            }
        }
        Ok(advisors)
    }
}

impl BeanPostProcessor for AutoProxyCreator {
    fn name(&self) -> &str {
        "AutoProxyCreator"
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn post_process_after_initialization(&self, bean: BeanInstance, bean_name: &str) -> ContainerResult<BeanInstance> {
        if bean.is::<Advisor>() || bean.is::<Advice>() {
            return Ok(bean);
        }
        let Some(dispatch) = bean.dispatch().cloned() else {
            tracing::trace!("Bean '{}' does not support method dispatch, not proxying", bean_name);
            return Ok(bean);
        };

        let factory = self.factory()?;
        if !self.is_match(&*factory, bean_name, bean.is_factory_bean()) {
            return Ok(bean);
        }
        if self.is_infrastructure(&*factory, bean_name) {
            tracing::trace!("Did not attempt to auto-proxy infrastructure bean '{}'", bean_name);
            return Ok(bean);
        }

        let target_class = dispatch.target_class();
        let methods = dispatch.methods();
        let candidates = self.candidate_advisors(&*factory)?;
        let has_introductions = candidates
            .iter()
            .any(|advisor| advisor.is_introduction() && advisor.can_apply(target_class, &methods, false));
        let eligible: Vec<Advisor> = candidates
            .into_iter()
            .filter(|advisor| advisor.can_apply(target_class, &methods, has_introductions))
            .collect();
        if eligible.is_empty() {
            tracing::trace!("No advisors apply to bean '{}'", bean_name);
            return Ok(bean);
        }

        tracing::debug!(
            "Creating implicit proxy for bean '{}' with {} specific interceptors",
            bean_name,
            eligible.len()
        );
        let mut proxy_factory = ProxyFactory::for_target(dispatch)
            .proxy_target_class(self.proxy_target_class)
            .pre_filtered(true);
        for advisor in eligible {
            for interface in advisor.introduced_interfaces() {
                proxy_factory = proxy_factory.with_interface(interface);
            }
            proxy_factory = proxy_factory.with_advisor(advisor);
        }
        let proxy = proxy_factory.get_proxy()?;
        Ok(bean.with_dispatch(proxy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joinpoint::MethodInvocation;
    use crate::pointcut::NameMatchMethodPointcut;
    use parking_lot::Mutex;
    use sprig_core::{args, NoSuchMethod};

    const TRANSFER: Method = Method::new("TransferService", "transfer");

    #[derive(Default)]
    struct TransferServiceImpl {
        transfers: Mutex<u32>,
    }

    impl Bean for TransferServiceImpl {
        fn into_dispatch(self: Arc<Self>) -> Option<Arc<dyn MethodDispatch>> {
            Some(self)
        }
    }

    impl MethodDispatch for TransferServiceImpl {
        fn interfaces(&self) -> Vec<&'static str> {
            vec!["TransferService"]
        }

        fn methods(&self) -> Vec<Method> {
            vec![TRANSFER]
        }

        fn invoke(&self, _ctx: &mut CallContext, method: &Method, _args: &mut Arguments) -> InvocationResult {
            match method.name {
                "transfer" => {
                    let mut transfers = self.transfers.lock();
                    *transfers += 1;
                    ret(*transfers)
                }
                _ => Err(InvocationError::unchecked(NoSuchMethod::new(method, "TransferServiceImpl"))),
            }
        }
    }

    fn counting(counter: &Arc<Mutex<u32>>) -> Advice {
        let counter = Arc::clone(counter);
        Advice::around("counting", move |inv: &mut MethodInvocation<'_>| {
            *counter.lock() += 1;
            inv.proceed()
        })
    }

    fn transfer(instance: &BeanInstance) -> u32 {
        let dispatch = instance.dispatch().unwrap();
        let mut ctx = CallContext::new();
        dispatch.call::<u32>(&mut ctx, &TRANSFER, args![]).unwrap()
    }

    fn register_services(factory: &Arc<DefaultListableBeanFactory>) {
        for name in ["transferService", "transferJob"] {
            factory
                .register_bean_definition(name, BeanDefinition::of(|| Ok(TransferServiceImpl::default())))
                .unwrap();
        }
        factory
            .register_bean_definition(
                "internalTransferService",
                BeanDefinition::of(|| Ok(TransferServiceImpl::default())).with_role(Role::Infrastructure),
            )
            .unwrap();
    }

    #[test]
    fn test_proxies_matching_beans() {
        let factory = DefaultListableBeanFactory::new();
        let counter = Arc::new(Mutex::new(0));
        factory
            .register_singleton("countingAdvice", BeanInstance::new(counting(&counter)))
            .unwrap();
        factory.add_bean_post_processor(Arc::new(
            AutoProxyCreator::for_factory(&factory)
                .with_bean_names(["*Service"])
                .with_interceptor_names(["countingAdvice"]),
        ));
        register_services(&factory);

        let service = factory.get_bean("transferService").unwrap();
        assert_eq!(transfer(&service), 1);
        assert_eq!(*counter.lock(), 1);
        // 原始对象仍然可以取得
        assert_eq!(*service.downcast::<TransferServiceImpl>().unwrap().transfers.lock(), 1);

        let job = factory.get_bean("transferJob").unwrap();
        transfer(&job);
        assert_eq!(*counter.lock(), 1);

        let internal = factory.get_bean("internalTransferService").unwrap();
        transfer(&internal);
        assert_eq!(*counter.lock(), 1);
    }

    #[test]
    fn test_alias_matches_and_advisor_bean_pointcut() {
        let factory = DefaultListableBeanFactory::new();
        let counter = Arc::new(Mutex::new(0));
        let advisor = Advisor::new(Arc::new(NameMatchMethodPointcut::new(["transfer"])), counting(&counter));
        factory
            .register_bean_definition("countingAdvisor", BeanDefinition::of(move || Ok(advisor.clone())))
            .unwrap();
        factory.add_bean_post_processor(Arc::new(
            AutoProxyCreator::for_factory(&factory)
                .with_bean_names(["payments*"])
                .with_interceptor_names(["countingAdvisor"]),
        ));
        register_services(&factory);
        factory.register_alias("transferJob", "paymentsJob").unwrap();

        transfer(&factory.get_bean("transferJob").unwrap());
        assert_eq!(*counter.lock(), 1);
    }

    #[test]
    fn test_no_applicable_advisor_leaves_bean_alone() {
        let factory = DefaultListableBeanFactory::new();
        let counter = Arc::new(Mutex::new(0));
        factory.add_bean_post_processor(Arc::new(AutoProxyCreator::for_factory(&factory).with_advisor(
            Advisor::new(Arc::new(NameMatchMethodPointcut::new(["refund"])), counting(&counter)),
        )));
        register_services(&factory);

        let service = factory.get_bean("transferService").unwrap();
        assert_eq!(transfer(&service), 1);
        assert_eq!(*counter.lock(), 0);
    }

    #[test]
    fn test_interceptor_name_of_wrong_type_fails_creation() {
        let factory = DefaultListableBeanFactory::new();
        factory
            .register_singleton("notAnAdvice", BeanInstance::new(String::from("plain")))
            .unwrap();
        factory.add_bean_post_processor(Arc::new(
            AutoProxyCreator::for_factory(&factory).with_interceptor_names(["notAnAdvice"]),
        ));
        register_services(&factory);

        assert!(factory.get_bean("transferService").is_err());
    }

    #[test]
    fn test_processor_metadata() {
        let factory = DefaultListableBeanFactory::new();
        let creator = AutoProxyCreator::for_factory(&factory);
        assert_eq!(creator.name(), "AutoProxyCreator");
        assert_eq!(creator.order(), 2000);
        assert_eq!(creator.with_order(5).order(), 5);
    }
}
