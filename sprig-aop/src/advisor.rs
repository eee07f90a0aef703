//! 通知器（Advisor）：通知加上它的适用范围

use std::fmt;
use std::sync::Arc;

use sprig_core::Method;

use crate::advice::{Advice, DelegatingIntroductionInterceptor, MethodInterceptor};
use crate::pointcut::{ClassFilter, Pointcut, TrueClassFilter};

/// 通知器的适用范围
#[derive(Clone)]
pub enum AdvisorKind {
    /// 由切点决定
    Pointcut(Arc<dyn Pointcut>),
    /// 引介：类过滤器匹配时对所有方法生效
    Introduction {
        class_filter: Arc<dyn ClassFilter>,
        interfaces: Vec<&'static str>,
    },
    /// 总是生效
    Default,
}

/// 通知器
///
/// 拦截器在构造时由通知适配生成并缓存，同一个通知器在不同的拦截器链中
/// 共享同一个拦截器实例。
#[derive(Clone)]
pub struct Advisor {
    kind: AdvisorKind,
    advice: Advice,
    interceptor: Arc<dyn MethodInterceptor>,
    order: Option<i32>,
}

impl Advisor {
    /// 切点通知器
    pub fn new(pointcut: Arc<dyn Pointcut>, advice: Advice) -> Self {
        Self::with_kind(AdvisorKind::Pointcut(pointcut), advice)
    }

    /// 对所有方法生效的通知器；引介通知会变成对所有类生效的引介通知器
    pub fn always(advice: Advice) -> Self {
        match advice {
            Advice::Introduction(introduction) => Self::introduction_for(Arc::new(TrueClassFilter), introduction),
            other => Self::with_kind(AdvisorKind::Default, other),
        }
    }

    pub fn introduction(introduction: DelegatingIntroductionInterceptor) -> Self {
        Self::introduction_for(Arc::new(TrueClassFilter), Arc::new(introduction))
    }

    /// 只对类过滤器匹配的目标引入接口
    pub fn introduction_for(
        class_filter: Arc<dyn ClassFilter>,
        introduction: Arc<DelegatingIntroductionInterceptor>,
    ) -> Self {
        let interfaces = introduction.interfaces().to_vec();
        Self::with_kind(
            AdvisorKind::Introduction {
                class_filter,
                interfaces,
            },
            Advice::Introduction(introduction),
        )
    }

    fn with_kind(kind: AdvisorKind, advice: Advice) -> Self {
        let interceptor = advice.to_interceptor();
        Self {
            kind,
            advice,
            interceptor,
            order: None,
        }
    }

    /// 显式顺序（越小越靠前）
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn kind(&self) -> &AdvisorKind {
        &self.kind
    }

    pub fn advice(&self) -> &Advice {
        &self.advice
    }

    pub fn interceptor(&self) -> &Arc<dyn MethodInterceptor> {
        &self.interceptor
    }

    pub fn order(&self) -> Option<i32> {
        self.order
    }

    pub fn is_introduction(&self) -> bool {
        matches!(self.kind, AdvisorKind::Introduction { .. })
    }

    /// 引入的接口
    pub fn introduced_interfaces(&self) -> &[&'static str] {
        match &self.kind {
            AdvisorKind::Introduction { interfaces, .. } => interfaces.as_slice(),
            _ => &[],
        }
    }

    /// 引入接口的方法
    pub fn introduced_methods(&self) -> Vec<Method> {
        match &self.advice {
            Advice::Introduction(introduction) if self.is_introduction() => introduction.introduced_methods(),
            _ => Vec::new(),
        }
    }

    /// 能否作用于目标类的任一方法
    pub fn can_apply(&self, target_class: &str, methods: &[Method], has_introductions: bool) -> bool {
        match &self.kind {
            AdvisorKind::Introduction { class_filter, .. } => class_filter.matches(target_class),
            AdvisorKind::Pointcut(pointcut) => {
                if !pointcut.class_filter().matches(target_class) {
                    return false;
                }
                let matcher = pointcut.method_matcher();
                let aware = matcher.as_introduction_aware();
                methods.iter().any(|method| match aware {
                    Some(aware) => aware.matches_with_introductions(method, target_class, has_introductions),
                    None => matcher.matches(method, target_class),
                })
            }
            AdvisorKind::Default => true,
        }
    }
}

impl fmt::Debug for Advisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            AdvisorKind::Pointcut(_) => "pointcut".to_string(),
            AdvisorKind::Introduction { interfaces, .. } => format!("introduction{:?}", interfaces),
            AdvisorKind::Default => "default".to_string(),
        };
        f.debug_struct("Advisor")
            .field("kind", &kind)
            .field("advice", &self.advice)
            .field("order", &self.order)
            .finish()
    }
}

/// 按显式顺序稳定排序：有顺序的在前，没有顺序的保持注册顺序排在后面
pub fn sort_advisors(advisors: &mut [Advisor]) {
    advisors.sort_by_key(|advisor| match advisor.order {
        Some(order) => (0, order),
        None => (1, 0),
    });
}
