//! 拦截器链工厂
//!
//! 按通知器的注册顺序为 (方法, 目标类) 计算拦截器链。
//! 需要运行时匹配的切点不在这里做最终判断，而是把拦截器和切点一起放进链里，
//! 由 [`MethodInvocation`](crate::MethodInvocation) 在每次调用时检查参数。

use std::fmt;
use std::sync::Arc;

use sprig_core::Method;

use crate::advice::MethodInterceptor;
use crate::advisor::{Advisor, AdvisorKind};
use crate::pointcut::Pointcut;

/// 拦截器链元素
#[derive(Clone)]
pub enum ChainElement {
    /// 静态匹配，直接执行
    Static(Arc<dyn MethodInterceptor>),
    /// 每次调用前再用切点的运行时匹配器判断
    Dynamic {
        interceptor: Arc<dyn MethodInterceptor>,
        pointcut: Arc<dyn Pointcut>,
    },
}

impl ChainElement {
    pub fn interceptor(&self) -> &Arc<dyn MethodInterceptor> {
        match self {
            ChainElement::Static(interceptor) => interceptor,
            ChainElement::Dynamic { interceptor, .. } => interceptor,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, ChainElement::Dynamic { .. })
    }
}

impl fmt::Debug for ChainElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainElement::Static(i) => write!(f, "Static({})", i.name()),
            ChainElement::Dynamic { interceptor, .. } => write!(f, "Dynamic({})", interceptor.name()),
        }
    }
}

/// 拦截器链工厂
pub trait AdvisorChainFactory: Send + Sync {
    /// `pre_filtered` 为 true 时认为类过滤已经在上游完成
    fn interceptors_for(
        &self,
        advisors: &[Advisor],
        method: &Method,
        target_class: &str,
        pre_filtered: bool,
    ) -> Vec<ChainElement>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAdvisorChainFactory;

impl AdvisorChainFactory for DefaultAdvisorChainFactory {
    fn interceptors_for(
        &self,
        advisors: &[Advisor],
        method: &Method,
        target_class: &str,
        pre_filtered: bool,
    ) -> Vec<ChainElement> {
        let mut chain = Vec::with_capacity(advisors.len());
        // 只在遇到感知引介的匹配器时才计算
        let mut has_introductions: Option<bool> = None;

        for advisor in advisors {
            match advisor.kind() {
                AdvisorKind::Pointcut(pointcut) => {
                    if !pre_filtered && !pointcut.class_filter().matches(target_class) {
                        continue;
                    }
                    let matcher = pointcut.method_matcher();
                    let matched = match matcher.as_introduction_aware() {
                        Some(aware) => {
                            let has = *has_introductions
                                .get_or_insert_with(|| has_matching_introductions(advisors, target_class));
                            aware.matches_with_introductions(method, target_class, has)
                        }
                        None => matcher.matches(method, target_class),
                    };
                    if !matched {
                        continue;
                    }
                    if matcher.is_runtime() {
                        chain.push(ChainElement::Dynamic {
                            interceptor: Arc::clone(advisor.interceptor()),
                            pointcut: Arc::clone(pointcut),
                        });
                    } else {
                        chain.push(ChainElement::Static(Arc::clone(advisor.interceptor())));
                    }
                }
                AdvisorKind::Introduction { class_filter, .. } => {
                    if pre_filtered || class_filter.matches(target_class) {
                        chain.push(ChainElement::Static(Arc::clone(advisor.interceptor())));
                    }
                }
                AdvisorKind::Default => {
                    chain.push(ChainElement::Static(Arc::clone(advisor.interceptor())));
                }
            }
        }

        tracing::trace!(
            "Built interceptor chain of {} element(s) for '{}' on '{}'",
            chain.len(),
            method,
            target_class
        );
        chain
    }
}

fn has_matching_introductions(advisors: &[Advisor], target_class: &str) -> bool {
    advisors.iter().any(|advisor| match advisor.kind() {
        AdvisorKind::Introduction { class_filter, .. } => class_filter.matches(target_class),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{Advice, DelegatingIntroductionInterceptor, FnInterceptor};
    use crate::joinpoint::MethodInvocation;
    use crate::pointcut::{
        ArgumentsMatchPointcut, ClassFilter, MethodMatcher, NameMatchMethodPointcut, PointcutExpression,
        TypePatternClassFilter,
    };
    use parking_lot::Mutex;
    use sprig_core::{ret, Arguments, CallContext, InvocationResult, MethodDispatch};

    const FIND: Method = Method::new("Repo", "find");
    const SAVE: Method = Method::new("Repo", "save");

    fn named(name: &'static str) -> Advice {
        Advice::Interceptor(Arc::new(FnInterceptor::new(name, |inv: &mut MethodInvocation<'_>| inv.proceed())))
    }

    fn names(chain: &[ChainElement]) -> Vec<String> {
        chain.iter().map(|e| e.interceptor().name().to_string()).collect()
    }

    struct Tagger;

    impl MethodDispatch for Tagger {
        fn interfaces(&self) -> Vec<&'static str> {
            vec!["Tagged"]
        }

        fn methods(&self) -> Vec<Method> {
            vec![Method::new("Tagged", "tag")]
        }

        fn invoke(&self, _ctx: &mut CallContext, _method: &Method, _args: &mut Arguments) -> InvocationResult {
            ret(())
        }
    }

    /// 记录收到的 has_introductions 参数
    struct RecordingMatcher {
        seen: Mutex<Vec<bool>>,
    }

    impl MethodMatcher for RecordingMatcher {
        fn matches(&self, _method: &Method, _target_class: &str) -> bool {
            false
        }

        fn as_introduction_aware(&self) -> Option<&dyn crate::pointcut::IntroductionAwareMethodMatcher> {
            Some(self)
        }
    }

    impl crate::pointcut::IntroductionAwareMethodMatcher for RecordingMatcher {
        fn matches_with_introductions(&self, _method: &Method, _target_class: &str, has_introductions: bool) -> bool {
            self.seen.lock().push(has_introductions);
            true
        }
    }

    impl Pointcut for RecordingMatcher {
        fn class_filter(&self) -> &dyn ClassFilter {
            &crate::pointcut::TrueClassFilter
        }

        fn method_matcher(&self) -> &dyn MethodMatcher {
            self
        }
    }

    #[test]
    fn test_chain_follows_registration_order() {
        let advisors = vec![
            Advisor::new(Arc::new(NameMatchMethodPointcut::new(["find"])), named("find-only")),
            Advisor::always(named("always")),
            Advisor::new(Arc::new(NameMatchMethodPointcut::new(["*"])), named("all")),
            // 两个通知器都匹配时都进入链，不去重
            Advisor::new(Arc::new(NameMatchMethodPointcut::new(["*"])), named("all")),
        ];
        let factory = DefaultAdvisorChainFactory;

        let chain = factory.interceptors_for(&advisors, &FIND, "app::RepoImpl", false);
        assert_eq!(names(&chain), vec!["find-only", "always", "all", "all"]);

        let chain = factory.interceptors_for(&advisors, &SAVE, "app::RepoImpl", false);
        assert_eq!(names(&chain), vec!["always", "all", "all"]);
    }

    #[test]
    fn test_class_filter_and_pre_filtered() {
        let advisors = vec![Advisor::new(
            Arc::new(PointcutExpression::TypePattern("*Cache".into())),
            named("cache"),
        )];
        let factory = DefaultAdvisorChainFactory;

        assert!(factory.interceptors_for(&advisors, &FIND, "app::RepoImpl", false).is_empty());
        // 上游已经过滤，类过滤器不再检查
        assert_eq!(factory.interceptors_for(&advisors, &FIND, "app::RepoImpl", true).len(), 1);
    }

    #[test]
    fn test_runtime_matcher_produces_dynamic_element() {
        let advisors = vec![
            Advisor::new(Arc::new(ArgumentsMatchPointcut::new(["save"], |_| true)), named("dynamic")),
            Advisor::always(named("static")),
        ];
        let chain = DefaultAdvisorChainFactory.interceptors_for(&advisors, &SAVE, "Repo", false);
        assert!(chain[0].is_dynamic());
        assert!(!chain[1].is_dynamic());

        let chain = DefaultAdvisorChainFactory.interceptors_for(&advisors, &FIND, "Repo", false);
        assert_eq!(names(&chain), vec!["static"]);
    }

    #[test]
    fn test_introduction_aware_matcher_sees_introductions() {
        let recording = Arc::new(RecordingMatcher { seen: Mutex::new(Vec::new()) });
        let introduction = Advisor::introduction_for(
            Arc::new(TypePatternClassFilter::new(["*Taggable"])),
            Arc::new(DelegatingIntroductionInterceptor::new(Arc::new(Tagger)).unwrap()),
        );
        let advisors = vec![
            Advisor::new(Arc::clone(&recording) as Arc<dyn Pointcut>, named("aware")),
            introduction,
        ];
        let factory = DefaultAdvisorChainFactory;

        let chain = factory.interceptors_for(&advisors, &FIND, "app::Taggable", false);
        assert_eq!(names(&chain), vec!["aware", "DelegatingIntroductionInterceptor"]);

        let chain = factory.interceptors_for(&advisors, &FIND, "app::Plain", false);
        assert_eq!(names(&chain), vec!["aware"]);

        assert_eq!(*recording.seen.lock(), vec![true, false]);
    }
}
