//! 声明式事务拦截器
//!
//! [`TransactionInterceptor`] 在方法调用前后划定事务边界：
//! 调用前按事务属性开启或加入事务，正常返回后提交，出错时按回滚规则回滚或提交，
//! 然后原样抛出应用错误。提交或回滚本身失败时，该失败优先于应用错误。

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use sprig_aop::{Advice, Advisor, ClassFilter, MethodInterceptor, MethodInvocation, MethodMatcher, Pointcut};
use sprig_core::utils::naming::short_type_name;
use sprig_core::{
    Bean, BeanFactory, BeanInstance, CallContext, ContainerError, DefaultListableBeanFactory, InvocationError,
    InvocationResult, ListableBeanFactory, Method,
};

use crate::attribute::{TransactionAttribute, TransactionAttributeSource};
use crate::datasource::DataSourceTransactionManager;
use crate::error::{TransactionError, TransactionResult};
use crate::manager::PlatformTransactionManager;
use crate::status::TransactionStatus;

const DEFAULT_MANAGER_KEY: &str = "";

/// 一次被拦截调用的事务信息
struct TransactionInfo {
    status: TransactionStatus,
    attribute: TransactionAttribute,
    joinpoint: String,
}

/// 当前调用链上由拦截器管理的事务，最内层在栈顶
#[derive(Default)]
struct TransactionInfoStack {
    entries: Vec<TransactionInfo>,
}

/// 当前最内层由拦截器管理的事务状态
///
/// 事务方法内部可以通过它把事务标记为只回滚
pub fn current_transaction_status(ctx: &mut CallContext) -> TransactionResult<&mut TransactionStatus> {
    ctx.extension_mut::<TransactionInfoStack>()
        .and_then(|stack| stack.entries.last_mut())
        .map(|info| &mut info.status)
        .ok_or_else(|| TransactionError::illegal_state("No transaction aspect-managed TransactionStatus in scope"))
}

/// 事务拦截器
pub struct TransactionInterceptor {
    attribute_source: Arc<dyn TransactionAttributeSource>,
    transaction_manager: Option<Arc<dyn PlatformTransactionManager>>,
    transaction_manager_bean_name: Option<String>,
    bean_factory: Option<Weak<dyn ListableBeanFactory>>,
    manager_cache: Mutex<HashMap<String, Arc<dyn PlatformTransactionManager>>>,
}

impl TransactionInterceptor {
    pub fn new(attribute_source: Arc<dyn TransactionAttributeSource>) -> Self {
        Self {
            attribute_source,
            transaction_manager: None,
            transaction_manager_bean_name: None,
            bean_factory: None,
            manager_cache: Mutex::new(HashMap::new()),
        }
    }

    /// 默认事务管理器，属性没有限定符时使用
    pub fn with_transaction_manager(mut self, manager: Arc<dyn PlatformTransactionManager>) -> Self {
        self.transaction_manager = Some(manager);
        self
    }

    /// 默认事务管理器的 Bean 名称
    pub fn with_transaction_manager_bean_name(mut self, name: impl Into<String>) -> Self {
        self.transaction_manager_bean_name = Some(name.into());
        self
    }

    /// 用于按限定符或按类型查找事务管理器
    pub fn with_bean_factory(mut self, bean_factory: Weak<dyn ListableBeanFactory>) -> Self {
        self.bean_factory = Some(bean_factory);
        self
    }

    pub fn for_factory(attribute_source: Arc<dyn TransactionAttributeSource>, factory: &Arc<DefaultListableBeanFactory>) -> Self {
        let weak: Weak<dyn ListableBeanFactory> = Arc::downgrade(factory) as Weak<DefaultListableBeanFactory>;
        Self::new(attribute_source).with_bean_factory(weak)
    }

    pub fn attribute_source(&self) -> &Arc<dyn TransactionAttributeSource> {
        &self.attribute_source
    }

    fn factory(&self) -> TransactionResult<Arc<dyn ListableBeanFactory>> {
        let factory = self.bean_factory.as_ref().ok_or_else(|| {
            TransactionError::illegal_state("No transaction manager set and no bean factory available to look one up")
        })?;
        Ok(factory.upgrade().ok_or(ContainerError::FactoryDropped)?)
    }

    /// 选择事务管理器：属性的限定符、配置的 Bean 名称、直接设置的管理器、容器中唯一的管理器
    fn determine_transaction_manager(
        &self,
        attribute: &TransactionAttribute,
    ) -> TransactionResult<Arc<dyn PlatformTransactionManager>> {
        if let Some(qualifier) = attribute.qualifier().filter(|q| !q.is_empty()) {
            return self.cached_manager(qualifier, |_| Ok(qualifier.to_string()));
        }
        if let Some(name) = &self.transaction_manager_bean_name {
            return self.cached_manager(name, |_| Ok(name.clone()));
        }
        if let Some(manager) = &self.transaction_manager {
            return Ok(Arc::clone(manager));
        }
        self.cached_manager(DEFAULT_MANAGER_KEY, resolve_default_manager_name)
    }

    fn cached_manager(
        &self,
        key: &str,
        resolve_name: impl FnOnce(&dyn ListableBeanFactory) -> TransactionResult<String>,
    ) -> TransactionResult<Arc<dyn PlatformTransactionManager>> {
        if let Some(manager) = self.manager_cache.lock().get(key) {
            return Ok(Arc::clone(manager));
        }

        let factory = self.factory()?;
        let name = resolve_name(factory.as_ref())?;
        tracing::debug!("Using transaction manager bean '{}'", name);
        let manager = manager_from_instance(&name, factory.get_bean(&name)?)?;
        self.manager_cache.lock().insert(key.to_string(), Arc::clone(&manager));
        Ok(manager)
    }

    fn complete(
        &self,
        manager: &dyn PlatformTransactionManager,
        ctx: &mut CallContext,
        info: TransactionInfo,
        result: InvocationResult,
    ) -> InvocationResult {
        let TransactionInfo {
            mut status,
            attribute,
            joinpoint,
        } = info;

        let error = match result {
            Ok(value) => {
                tracing::trace!("Completing transaction for [{}]", joinpoint);
                manager.commit(ctx, &mut status)?;
                return Ok(value);
            }
            Err(error) => error,
        };

        tracing::trace!("Completing transaction for [{}] after exception: {}", joinpoint, error);
        if attribute.rollback_on(&error) {
            if let Err(rollback_error) = manager.rollback(ctx, &mut status) {
                tracing::error!("Application exception overridden by rollback exception: {}", error);
                return Err(rollback_error.with_application_error(error).into());
            }
        } else if let Err(commit_error) = manager.commit(ctx, &mut status) {
            tracing::error!("Application exception overridden by commit exception: {}", error);
            return Err(commit_error.with_application_error(error).into());
        }
        Err(error)
    }
}

fn resolve_default_manager_name(factory: &dyn ListableBeanFactory) -> TransactionResult<String> {
    let by_trait = factory.resolve_unique_name(
        TypeId::of::<Arc<dyn PlatformTransactionManager>>(),
        "PlatformTransactionManager",
    );
    match by_trait {
        Err(ContainerError::NoSuchBeanOfType { .. }) => Ok(factory.resolve_unique_name(
            TypeId::of::<DataSourceTransactionManager>(),
            "PlatformTransactionManager",
        )?),
        other => Ok(other?),
    }
}

/// 事务管理器 Bean 可以登记为 `Arc<dyn PlatformTransactionManager>`，也可以是具体的数据源事务管理器
fn manager_from_instance(
    name: &str,
    instance: BeanInstance,
) -> TransactionResult<Arc<dyn PlatformTransactionManager>> {
    if let Some(manager) = instance.downcast::<Arc<dyn PlatformTransactionManager>>() {
        return Ok(Arc::clone(manager.as_ref()));
    }
    if let Some(manager) = instance.downcast::<DataSourceTransactionManager>() {
        return Ok(manager);
    }
    Err(ContainerError::TypeMismatch {
        name: name.to_string(),
        expected: "PlatformTransactionManager".to_string(),
        actual: instance.type_name().to_string(),
    }
    .into())
}

impl MethodInterceptor for TransactionInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> InvocationResult {
        let method = *invocation.method();
        let target_class = invocation.target_class();
        let Some(mut attribute) = self.attribute_source.transaction_attribute(&method, target_class) else {
            return invocation.proceed();
        };

        let manager = self.determine_transaction_manager(&attribute)?;
        let joinpoint = format!("{}.{}", short_type_name(target_class), method.name);
        if attribute.definition().name().is_none() {
            attribute.definition_mut().set_name(joinpoint.clone());
        }

        let status = manager.get_transaction(invocation.context_mut(), attribute.definition())?;
        tracing::trace!("Getting transaction for [{}]", joinpoint);
        invocation
            .context_mut()
            .extension_or_default::<TransactionInfoStack>()
            .entries
            .push(TransactionInfo {
                status,
                attribute,
                joinpoint,
            });

        let result = invocation.proceed();

        let ctx = invocation.context_mut();
        let info = ctx
            .extension_mut::<TransactionInfoStack>()
            .and_then(|stack| stack.entries.pop())
            .ok_or_else(|| {
                InvocationError::from(TransactionError::illegal_state(format!(
                    "Transaction info for [{}] was removed before completion",
                    method
                )))
            })?;
        if ctx
            .extension::<TransactionInfoStack>()
            .map_or(false, |stack| stack.entries.is_empty())
        {
            ctx.remove_extension::<TransactionInfoStack>();
        }
        self.complete(manager.as_ref(), ctx, info, result)
    }

    fn name(&self) -> &str {
        "TransactionInterceptor"
    }
}

impl Bean for TransactionInterceptor {}

impl fmt::Debug for TransactionInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionInterceptor")
            .field("has_transaction_manager", &self.transaction_manager.is_some())
            .field("transaction_manager_bean_name", &self.transaction_manager_bean_name)
            .finish()
    }
}

/// 匹配有事务属性的方法
pub struct TransactionAttributeSourcePointcut {
    source: Arc<dyn TransactionAttributeSource>,
}

impl TransactionAttributeSourcePointcut {
    pub fn new(source: Arc<dyn TransactionAttributeSource>) -> Self {
        Self { source }
    }
}

impl ClassFilter for TransactionAttributeSourcePointcut {
    fn matches(&self, target_class: &str) -> bool {
        self.source.is_candidate_class(target_class)
    }
}

impl MethodMatcher for TransactionAttributeSourcePointcut {
    fn matches(&self, method: &Method, target_class: &str) -> bool {
        self.source.transaction_attribute(method, target_class).is_some()
    }
}

impl Pointcut for TransactionAttributeSourcePointcut {
    fn class_filter(&self) -> &dyn ClassFilter {
        self
    }

    fn method_matcher(&self) -> &dyn MethodMatcher {
        self
    }
}

/// 以拦截器自己的属性源为切点的事务通知器
pub fn transaction_advisor(interceptor: Arc<TransactionInterceptor>) -> Advisor {
    let pointcut = TransactionAttributeSourcePointcut::new(Arc::clone(interceptor.attribute_source()));
    Advisor::new(Arc::new(pointcut), Advice::Interceptor(interceptor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{NameMatchTransactionAttributeSource, RollbackRule};
    use crate::datasource::DataSourceUtils;
    use crate::definition::{Propagation, TransactionDefinition};
    use crate::synchronization::TransactionSynchronizationManager as Tsm;
    use crate::test_support::RecordingDataSource;
    use sprig_aop::{AopProxy, AutoProxyCreator, ProxyFactory};
    use sprig_core::{
        args, ret, Arguments, BeanDefinition, ConfigurableBeanFactory, MethodDispatch, NoSuchMethod,
        SingletonBeanRegistry,
    };

    const TRANSFER: Method = Method::new("BankService", "transfer");
    const AUDIT: Method = Method::new("BankService", "audit");
    const CLOSE: Method = Method::new("BankService", "close_account");

    #[derive(Debug, thiserror::Error)]
    #[error("insufficient funds: {0}")]
    struct InsufficientFunds(u64);

    #[derive(Debug, thiserror::Error)]
    #[error("ledger unavailable")]
    struct LedgerUnavailable;

    struct BankServiceImpl {
        data_source: RecordingDataSource,
    }

    impl MethodDispatch for BankServiceImpl {
        fn target_class(&self) -> &'static str {
            "bank::BankServiceImpl"
        }

        fn interfaces(&self) -> Vec<&'static str> {
            vec!["BankService"]
        }

        fn methods(&self) -> Vec<Method> {
            vec![TRANSFER, AUDIT, CLOSE]
        }

        fn invoke(&self, ctx: &mut CallContext, method: &Method, args: &mut Arguments) -> InvocationResult {
            match method.name {
                "transfer" => {
                    let amount = *args.arg::<u64>(0)?;
                    DataSourceUtils::do_with_connection(ctx, &self.data_source, |connection| {
                        connection.execute("UPDATE account SET balance = balance - ?")
                    })?;
                    match amount {
                        0..=100 => ret(amount),
                        101..=1000 => Err(InvocationError::checked(InsufficientFunds(amount))),
                        _ => Err(InvocationError::unchecked(LedgerUnavailable)),
                    }
                }
                "audit" => ret(Tsm::is_actual_transaction_active(ctx)),
                "close_account" => {
                    current_transaction_status(ctx)?.set_rollback_only();
                    ret(())
                }
                _ => Err(InvocationError::unchecked(NoSuchMethod::new(method, self.target_class()))),
            }
        }
    }

    impl Bean for BankServiceImpl {
        fn into_dispatch(self: Arc<Self>) -> Option<Arc<dyn MethodDispatch>> {
            Some(self)
        }
    }

    fn attribute_source() -> Arc<NameMatchTransactionAttributeSource> {
        Arc::new(
            NameMatchTransactionAttributeSource::new()
                .with_method(
                    "transfer",
                    TransactionAttribute::new(TransactionDefinition::new().with_propagation(Propagation::Required)),
                )
                .with_method("close_*", TransactionAttribute::default()),
        )
    }

    fn proxy(data_source: &RecordingDataSource, interceptor: TransactionInterceptor) -> Arc<AopProxy> {
        let target = Arc::new(BankServiceImpl {
            data_source: data_source.clone(),
        });
        ProxyFactory::for_target(target)
            .with_advisor(transaction_advisor(Arc::new(interceptor)))
            .get_proxy()
            .unwrap()
    }

    fn interceptor_for(data_source: &RecordingDataSource, source: Arc<dyn TransactionAttributeSource>) -> TransactionInterceptor {
        TransactionInterceptor::new(source).with_transaction_manager(Arc::new(
            DataSourceTransactionManager::with_data_source(Arc::new(data_source.clone())),
        ))
    }

    fn call<R: std::any::Any>(
        proxy: &Arc<AopProxy>,
        ctx: &mut CallContext,
        method: &Method,
        args: Arguments,
    ) -> Result<R, InvocationError> {
        let dispatch: Arc<dyn MethodDispatch> = proxy.clone();
        dispatch.call::<R>(ctx, method, args)
    }

    #[test]
    fn test_commits_on_success() {
        let data_source = RecordingDataSource::new("bank");
        let proxy = proxy(&data_source, interceptor_for(&data_source, attribute_source()));
        let mut ctx = CallContext::new();

        assert_eq!(call::<u64>(&proxy, &mut ctx, &TRANSFER, args![50u64]).unwrap(), 50);
        assert_eq!(data_source.opened(), 1);
        assert_eq!(data_source.count("commit"), 1);
        assert!(ctx.extension::<TransactionInfoStack>().is_none());
        assert!(ctx.resource_keys().is_empty());
    }

    #[test]
    fn test_unchecked_error_rolls_back_and_is_rethrown() {
        let data_source = RecordingDataSource::new("bank");
        let proxy = proxy(&data_source, interceptor_for(&data_source, attribute_source()));
        let mut ctx = CallContext::new();

        let error = call::<u64>(&proxy, &mut ctx, &TRANSFER, args![5000u64]).unwrap_err();
        assert!(error.is::<LedgerUnavailable>());
        assert_eq!(data_source.count("rollback"), 1);
        assert_eq!(data_source.count("commit"), 0);
    }

    #[test]
    fn test_checked_error_commits_by_default() {
        let data_source = RecordingDataSource::new("bank");
        let proxy = proxy(&data_source, interceptor_for(&data_source, attribute_source()));
        let mut ctx = CallContext::new();

        let error = call::<u64>(&proxy, &mut ctx, &TRANSFER, args![500u64]).unwrap_err();
        assert!(error.is_checked());
        assert!(error.is::<InsufficientFunds>());
        assert_eq!(data_source.count("commit"), 1);
        assert_eq!(data_source.count("rollback"), 0);
    }

    #[test]
    fn test_rollback_rule_for_checked_error() {
        let data_source = RecordingDataSource::new("bank");
        let source = Arc::new(NameMatchTransactionAttributeSource::new().with_method(
            "transfer",
            TransactionAttribute::default().with_rollback_rule(RollbackRule::rollback_for::<InsufficientFunds>()),
        ));
        let proxy = proxy(&data_source, interceptor_for(&data_source, source));
        let mut ctx = CallContext::new();

        assert!(call::<u64>(&proxy, &mut ctx, &TRANSFER, args![500u64]).is_err());
        assert_eq!(data_source.count("rollback"), 1);
    }

    #[test]
    fn test_method_without_attribute_runs_without_transaction() {
        let data_source = RecordingDataSource::new("bank");
        let proxy = proxy(&data_source, interceptor_for(&data_source, attribute_source()));
        let mut ctx = CallContext::new();

        assert!(!call::<bool>(&proxy, &mut ctx, &AUDIT, args![]).unwrap());
        assert_eq!(data_source.opened(), 0);
    }

    #[test]
    fn test_rollback_failure_overrides_application_error() {
        let data_source = RecordingDataSource::new("bank").failing_on("rollback");
        let proxy = proxy(&data_source, interceptor_for(&data_source, attribute_source()));
        let mut ctx = CallContext::new();

        let error = call::<u64>(&proxy, &mut ctx, &TRANSFER, args![5000u64]).unwrap_err();
        let transaction_error = error.downcast_ref::<TransactionError>().unwrap();
        assert!(matches!(transaction_error, TransactionError::System { .. }));
        let application_error = transaction_error.application_error().unwrap();
        assert!(application_error.is::<LedgerUnavailable>());
        assert!(!ctx.has_resource(&data_source.resource_key()));
    }

    #[test]
    fn test_set_rollback_only_through_current_status() {
        let data_source = RecordingDataSource::new("bank");
        let proxy = proxy(&data_source, interceptor_for(&data_source, attribute_source()));
        let mut ctx = CallContext::new();

        call::<()>(&proxy, &mut ctx, &CLOSE, args![]).unwrap();
        assert_eq!(data_source.count("rollback"), 1);
        assert_eq!(data_source.count("commit"), 0);
        assert!(current_transaction_status(&mut ctx).is_err());
    }

    #[test]
    fn test_manager_resolved_by_qualifier_from_bean_factory() {
        let main = RecordingDataSource::new("main");
        let audit = RecordingDataSource::new("audit");
        let factory = DefaultListableBeanFactory::new();
        let main_manager: Arc<dyn PlatformTransactionManager> =
            Arc::new(DataSourceTransactionManager::with_data_source(Arc::new(main.clone())));
        factory
            .register_singleton("transactionManager", BeanInstance::new(main_manager))
            .unwrap();
        factory
            .register_singleton(
                "auditTransactionManager",
                BeanInstance::new(DataSourceTransactionManager::with_data_source(Arc::new(audit.clone()))),
            )
            .unwrap();

        let source = Arc::new(
            NameMatchTransactionAttributeSource::new()
                .with_method("transfer", TransactionAttribute::default().with_qualifier("auditTransactionManager")),
        );
        let proxy = proxy(&main, TransactionInterceptor::for_factory(source, &factory));
        let mut ctx = CallContext::new();

        call::<u64>(&proxy, &mut ctx, &TRANSFER, args![10u64]).unwrap();
        assert_eq!(audit.count("commit"), 1);
        assert_eq!(main.count("commit"), 0);
        // 业务代码使用 main 数据源，在 audit 事务之外单独获取连接
        assert_eq!(main.operations(), vec!["c1:open", "c1:execute(UPDATE account SET balance = balance - ?)", "c1:close"]);
    }

    #[test]
    fn test_default_manager_resolved_by_type() {
        let data_source = RecordingDataSource::new("bank");
        let factory = DefaultListableBeanFactory::new();
        let manager: Arc<dyn PlatformTransactionManager> =
            Arc::new(DataSourceTransactionManager::with_data_source(Arc::new(data_source.clone())));
        factory.register_singleton("txManager", BeanInstance::new(manager)).unwrap();

        let proxy = proxy(&data_source, TransactionInterceptor::for_factory(attribute_source(), &factory));
        let mut ctx = CallContext::new();
        call::<u64>(&proxy, &mut ctx, &TRANSFER, args![1u64]).unwrap();
        call::<u64>(&proxy, &mut ctx, &TRANSFER, args![2u64]).unwrap();
        assert_eq!(data_source.count("commit"), 2);
    }

    #[test]
    fn test_missing_manager_fails_call() {
        let data_source = RecordingDataSource::new("bank");
        let proxy = proxy(&data_source, TransactionInterceptor::new(attribute_source()));
        let mut ctx = CallContext::new();

        let error = call::<u64>(&proxy, &mut ctx, &TRANSFER, args![1u64]).unwrap_err();
        assert!(error.downcast_ref::<TransactionError>().is_some());
        assert_eq!(data_source.opened(), 0);
    }

    #[test]
    fn test_pointcut_matches_attributed_methods() {
        let pointcut = TransactionAttributeSourcePointcut::new(attribute_source());
        assert!(MethodMatcher::matches(&pointcut, &TRANSFER, "bank::BankServiceImpl"));
        assert!(MethodMatcher::matches(&pointcut, &CLOSE, "bank::BankServiceImpl"));
        assert!(!MethodMatcher::matches(&pointcut, &AUDIT, "bank::BankServiceImpl"));
        assert!(ClassFilter::matches(&pointcut, "bank::BankServiceImpl"));
    }

    #[test]
    fn test_auto_proxied_bean_runs_in_transaction() {
        let data_source = RecordingDataSource::new("bank");
        let factory = DefaultListableBeanFactory::new();
        factory
            .register_singleton(
                "transactionManager",
                BeanInstance::new(DataSourceTransactionManager::with_data_source(Arc::new(data_source.clone()))),
            )
            .unwrap();
        let interceptor = Arc::new(TransactionInterceptor::for_factory(attribute_source(), &factory));
        factory
            .register_singleton("transactionAdvisor", BeanInstance::new(transaction_advisor(interceptor)))
            .unwrap();
        factory.add_bean_post_processor(Arc::new(
            AutoProxyCreator::for_factory(&factory)
                .with_bean_names(["*Service"])
                .with_interceptor_names(["transactionAdvisor"]),
        ));
        let service_data_source = data_source.clone();
        factory
            .register_bean_definition(
                "bankService",
                BeanDefinition::of(move || {
                    Ok(BankServiceImpl {
                        data_source: service_data_source.clone(),
                    })
                }),
            )
            .unwrap();

        let service = factory.get_bean("bankService").unwrap();
        let dispatch = service.dispatch().unwrap();
        let mut ctx = CallContext::new();
        assert_eq!(dispatch.call::<u64>(&mut ctx, &TRANSFER, args![20u64]).unwrap(), 20);
        assert!(dispatch.call::<u64>(&mut ctx, &TRANSFER, args![2000u64]).is_err());

        assert_eq!(data_source.opened(), 2);
        assert_eq!(data_source.count("commit"), 1);
        assert_eq!(data_source.count("rollback"), 1);
    }
}
