//! 切点（Pointcut）
//!
//! 切点由两部分组成：
//! - [`ClassFilter`]：目标类是否可能被匹配
//! - [`MethodMatcher`]：具体方法是否匹配，可以声明为运行时匹配（依赖参数值）
//!
//! [`PointcutExpression`] 是最常用的实现，支持通配符、正则和组合运算。

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use sprig_core::utils::naming::short_type_name;
use sprig_core::utils::pattern::{simple_match, simple_match_any};
use sprig_core::{Arguments, Method};

use crate::error::{AopError, AopResult};

/// 类过滤器
pub trait ClassFilter: Send + Sync {
    fn matches(&self, target_class: &str) -> bool;
}

/// 方法匹配器
pub trait MethodMatcher: Send + Sync {
    /// 静态匹配，构建拦截器链时调用
    fn matches(&self, method: &Method, target_class: &str) -> bool;

    /// 为 true 时，每次调用还要经过 [`MethodMatcher::matches_args`]
    fn is_runtime(&self) -> bool {
        false
    }

    /// 运行时匹配，只在静态匹配通过且 `is_runtime()` 为 true 时调用
    fn matches_args(&self, _method: &Method, _target_class: &str, _args: &Arguments) -> bool {
        true
    }

    /// 匹配结果是否依赖引介接口
    fn as_introduction_aware(&self) -> Option<&dyn IntroductionAwareMethodMatcher> {
        None
    }
}

/// 感知引介的方法匹配器
///
/// 目标类是否获得引介接口会影响匹配结果时实现它
pub trait IntroductionAwareMethodMatcher: MethodMatcher {
    fn matches_with_introductions(&self, method: &Method, target_class: &str, has_introductions: bool) -> bool;
}

/// 切点
pub trait Pointcut: Send + Sync {
    fn class_filter(&self) -> &dyn ClassFilter;

    fn method_matcher(&self) -> &dyn MethodMatcher;
}

/// 匹配所有类
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueClassFilter;

impl ClassFilter for TrueClassFilter {
    fn matches(&self, _target_class: &str) -> bool {
        true
    }
}

/// 匹配所有方法
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueMethodMatcher;

impl MethodMatcher for TrueMethodMatcher {
    fn matches(&self, _method: &Method, _target_class: &str) -> bool {
        true
    }
}

/// 按类型名通配符过滤（完整路径或短名称均可）
#[derive(Debug, Clone)]
pub struct TypePatternClassFilter {
    patterns: Vec<String>,
}

impl TypePatternClassFilter {
    pub fn new<S: Into<String>>(patterns: impl IntoIterator<Item = S>) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

impl ClassFilter for TypePatternClassFilter {
    fn matches(&self, target_class: &str) -> bool {
        self.patterns.iter().any(|p| type_matches(p, target_class))
    }
}

fn type_matches(pattern: &str, type_name: &str) -> bool {
    simple_match(pattern, type_name) || simple_match(pattern, short_type_name(type_name))
}

type MethodPredicate = Arc<dyn Fn(&Method, &str) -> bool + Send + Sync>;

/// 切点表达式
#[derive(Clone)]
pub enum PointcutExpression {
    /// 匹配所有方法
    All,

    /// 匹配特定类型的所有方法
    /// 例如：TypePattern("*Service")
    TypePattern(String),

    /// 匹配特定方法名
    /// 例如：MethodPattern("get_*")
    MethodPattern(String),

    /// 匹配特定类型的特定方法
    /// 例如：execution(* AccountService.transfer(..))
    Execution {
        type_pattern: String,
        method_pattern: String,
    },

    TypeRegex(Regex),

    MethodRegex(Regex),

    /// 目标类获得了引介接口
    WithIntroductions,

    /// 自定义匹配函数，参数为方法和目标类名
    Custom(MethodPredicate),

    And(Box<PointcutExpression>, Box<PointcutExpression>),

    Or(Box<PointcutExpression>, Box<PointcutExpression>),

    Not(Box<PointcutExpression>),
}

impl PointcutExpression {
    /// 完整求值
    pub fn evaluate(&self, method: &Method, target_class: &str, has_introductions: bool) -> bool {
        match self {
            PointcutExpression::All => true,
            PointcutExpression::TypePattern(pattern) => type_matches(pattern, target_class),
            PointcutExpression::MethodPattern(pattern) => simple_match(pattern, method.name),
            PointcutExpression::Execution {
                type_pattern,
                method_pattern,
            } => {
                (type_matches(type_pattern, target_class) || simple_match(type_pattern, method.declaring_type))
                    && simple_match(method_pattern, method.name)
            }
            PointcutExpression::TypeRegex(regex) => regex.is_match(target_class),
            PointcutExpression::MethodRegex(regex) => regex.is_match(method.name),
            PointcutExpression::WithIntroductions => has_introductions,
            PointcutExpression::Custom(predicate) => predicate(method, target_class),
            PointcutExpression::And(left, right) => {
                left.evaluate(method, target_class, has_introductions)
                    && right.evaluate(method, target_class, has_introductions)
            }
            PointcutExpression::Or(left, right) => {
                left.evaluate(method, target_class, has_introductions)
                    || right.evaluate(method, target_class, has_introductions)
            }
            PointcutExpression::Not(expr) => !expr.evaluate(method, target_class, has_introductions),
        }
    }

    /// 类型层面能否匹配
    ///
    /// 只看类型相关的节点，方法相关的节点视为可能匹配
    fn could_match_type(&self, target_class: &str) -> bool {
        match self {
            PointcutExpression::TypePattern(pattern) => type_matches(pattern, target_class),
            PointcutExpression::TypeRegex(regex) => regex.is_match(target_class),
            PointcutExpression::And(left, right) => {
                left.could_match_type(target_class) && right.could_match_type(target_class)
            }
            PointcutExpression::Or(left, right) => {
                left.could_match_type(target_class) || right.could_match_type(target_class)
            }
            // execution 的类型部分也可能匹配声明接口，这里无法判断
            _ => true,
        }
    }

    fn depends_on_introductions(&self) -> bool {
        match self {
            PointcutExpression::WithIntroductions => true,
            PointcutExpression::And(left, right) | PointcutExpression::Or(left, right) => {
                left.depends_on_introductions() || right.depends_on_introductions()
            }
            PointcutExpression::Not(expr) => expr.depends_on_introductions(),
            _ => false,
        }
    }

    /// 解析 execution 表达式
    ///
    /// 格式：`返回类型 类型名.方法名(参数)`，例如 `* AccountService.transfer(..)`。
    /// 只使用类型名和方法名，返回类型和参数部分被忽略。
    pub fn execution(expression: &str) -> AopResult<Self> {
        let invalid = |message: &str| AopError::InvalidExpression {
            expression: expression.to_string(),
            message: message.to_string(),
        };

        let parts: Vec<&str> = expression.split_whitespace().collect();
        let &[_, signature] = parts.as_slice() else {
            return Err(invalid("expected '<return> <Type>.<method>(..)'"));
        };
        let signature = match signature.find('(') {
            Some(idx) if signature.ends_with(')') => &signature[..idx],
            Some(_) => return Err(invalid("unbalanced parameter list")),
            None => signature,
        };

        match signature.rsplit_once('.') {
            Some((type_pattern, method_pattern)) if !type_pattern.is_empty() && !method_pattern.is_empty() => {
                Ok(PointcutExpression::Execution {
                    type_pattern: type_pattern.to_string(),
                    method_pattern: method_pattern.to_string(),
                })
            }
            Some(_) => Err(invalid("empty type or method pattern")),
            None if signature.is_empty() => Err(invalid("missing method pattern")),
            None => Ok(PointcutExpression::MethodPattern(signature.to_string())),
        }
    }

    pub fn type_regex(pattern: &str) -> AopResult<Self> {
        Regex::new(pattern)
            .map(PointcutExpression::TypeRegex)
            .map_err(|e| AopError::InvalidExpression {
                expression: pattern.to_string(),
                message: e.to_string(),
            })
    }

    pub fn method_regex(pattern: &str) -> AopResult<Self> {
        Regex::new(pattern)
            .map(PointcutExpression::MethodRegex)
            .map_err(|e| AopError::InvalidExpression {
                expression: pattern.to_string(),
                message: e.to_string(),
            })
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Method, &str) -> bool + Send + Sync + 'static,
    {
        PointcutExpression::Custom(Arc::new(predicate))
    }

    pub fn and(self, other: PointcutExpression) -> Self {
        PointcutExpression::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: PointcutExpression) -> Self {
        PointcutExpression::Or(Box::new(self), Box::new(other))
    }

    pub fn not(self) -> Self {
        PointcutExpression::Not(Box::new(self))
    }
}

impl ClassFilter for PointcutExpression {
    fn matches(&self, target_class: &str) -> bool {
        self.could_match_type(target_class)
    }
}

impl MethodMatcher for PointcutExpression {
    fn matches(&self, method: &Method, target_class: &str) -> bool {
        self.evaluate(method, target_class, false)
    }

    fn as_introduction_aware(&self) -> Option<&dyn IntroductionAwareMethodMatcher> {
        if self.depends_on_introductions() {
            Some(self)
        } else {
            None
        }
    }
}

impl IntroductionAwareMethodMatcher for PointcutExpression {
    fn matches_with_introductions(&self, method: &Method, target_class: &str, has_introductions: bool) -> bool {
        self.evaluate(method, target_class, has_introductions)
    }
}

impl Pointcut for PointcutExpression {
    fn class_filter(&self) -> &dyn ClassFilter {
        self
    }

    fn method_matcher(&self) -> &dyn MethodMatcher {
        self
    }
}

impl fmt::Debug for PointcutExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointcutExpression::All => write!(f, "All"),
            PointcutExpression::TypePattern(p) => write!(f, "TypePattern({})", p),
            PointcutExpression::MethodPattern(p) => write!(f, "MethodPattern({})", p),
            PointcutExpression::Execution {
                type_pattern,
                method_pattern,
            } => write!(f, "Execution({}.{})", type_pattern, method_pattern),
            PointcutExpression::TypeRegex(r) => write!(f, "TypeRegex({})", r.as_str()),
            PointcutExpression::MethodRegex(r) => write!(f, "MethodRegex({})", r.as_str()),
            PointcutExpression::WithIntroductions => write!(f, "WithIntroductions"),
            PointcutExpression::Custom(_) => write!(f, "Custom(...)"),
            PointcutExpression::And(l, r) => write!(f, "And({:?}, {:?})", l, r),
            PointcutExpression::Or(l, r) => write!(f, "Or({:?}, {:?})", l, r),
            PointcutExpression::Not(e) => write!(f, "Not({:?})", e),
        }
    }
}

/// 按方法名匹配的切点
#[derive(Debug, Clone, Default)]
pub struct NameMatchMethodPointcut {
    mapped_names: Vec<String>,
}

impl NameMatchMethodPointcut {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            mapped_names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add_method_name(mut self, name: impl Into<String>) -> Self {
        self.mapped_names.push(name.into());
        self
    }
}

impl MethodMatcher for NameMatchMethodPointcut {
    fn matches(&self, method: &Method, _target_class: &str) -> bool {
        simple_match_any(&self.mapped_names, method.name)
    }
}

impl Pointcut for NameMatchMethodPointcut {
    fn class_filter(&self) -> &dyn ClassFilter {
        &TrueClassFilter
    }

    fn method_matcher(&self) -> &dyn MethodMatcher {
        self
    }
}

type ArgumentsPredicate = Arc<dyn Fn(&Arguments) -> bool + Send + Sync>;

/// 依赖参数值的运行时切点
///
/// 方法名先做静态匹配，每次调用再用参数判断
#[derive(Clone)]
pub struct ArgumentsMatchPointcut {
    method_patterns: Vec<String>,
    predicate: ArgumentsPredicate,
}

impl ArgumentsMatchPointcut {
    pub fn new<S, F>(method_patterns: impl IntoIterator<Item = S>, predicate: F) -> Self
    where
        S: Into<String>,
        F: Fn(&Arguments) -> bool + Send + Sync + 'static,
    {
        Self {
            method_patterns: method_patterns.into_iter().map(Into::into).collect(),
            predicate: Arc::new(predicate),
        }
    }
}

impl MethodMatcher for ArgumentsMatchPointcut {
    fn matches(&self, method: &Method, _target_class: &str) -> bool {
        simple_match_any(&self.method_patterns, method.name)
    }

    fn is_runtime(&self) -> bool {
        true
    }

    fn matches_args(&self, _method: &Method, _target_class: &str, args: &Arguments) -> bool {
        (self.predicate)(args)
    }
}

impl Pointcut for ArgumentsMatchPointcut {
    fn class_filter(&self) -> &dyn ClassFilter {
        &TrueClassFilter
    }

    fn method_matcher(&self) -> &dyn MethodMatcher {
        self
    }
}

type RuntimePredicate = Arc<dyn Fn(&Method, &str, &Arguments) -> bool + Send + Sync>;

/// 由闭包组成的运行时方法匹配器
#[derive(Clone)]
pub struct RuntimeMethodMatcher {
    static_check: MethodPredicate,
    runtime_check: RuntimePredicate,
}

impl RuntimeMethodMatcher {
    pub fn new<S, R>(static_check: S, runtime_check: R) -> Self
    where
        S: Fn(&Method, &str) -> bool + Send + Sync + 'static,
        R: Fn(&Method, &str, &Arguments) -> bool + Send + Sync + 'static,
    {
        Self {
            static_check: Arc::new(static_check),
            runtime_check: Arc::new(runtime_check),
        }
    }
}

impl MethodMatcher for RuntimeMethodMatcher {
    fn matches(&self, method: &Method, target_class: &str) -> bool {
        (self.static_check)(method, target_class)
    }

    fn is_runtime(&self) -> bool {
        true
    }

    fn matches_args(&self, method: &Method, target_class: &str, args: &Arguments) -> bool {
        (self.runtime_check)(method, target_class, args)
    }
}

/// 由任意类过滤器和方法匹配器组合的切点
pub struct ComposablePointcut {
    class_filter: Box<dyn ClassFilter>,
    method_matcher: Box<dyn MethodMatcher>,
}

impl ComposablePointcut {
    pub fn new(class_filter: impl ClassFilter + 'static, method_matcher: impl MethodMatcher + 'static) -> Self {
        Self {
            class_filter: Box::new(class_filter),
            method_matcher: Box::new(method_matcher),
        }
    }

    pub fn for_methods(method_matcher: impl MethodMatcher + 'static) -> Self {
        Self::new(TrueClassFilter, method_matcher)
    }
}

impl Pointcut for ComposablePointcut {
    fn class_filter(&self) -> &dyn ClassFilter {
        self.class_filter.as_ref()
    }

    fn method_matcher(&self) -> &dyn MethodMatcher {
        self.method_matcher.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprig_core::args;

    const GET_USER: Method = Method::new("UserService", "get_user");
    const SAVE_USER: Method = Method::new("UserService", "save_user");
    const TRANSFER: Method = Method::new("AccountService", "transfer");

    const USER_IMPL: &str = "my_app::service::UserServiceImpl";

    #[test]
    fn test_type_and_method_patterns() {
        let by_type = PointcutExpression::TypePattern("*ServiceImpl".into());
        assert!(by_type.evaluate(&GET_USER, USER_IMPL, false));
        assert!(!by_type.evaluate(&GET_USER, "my_app::Repo", false));

        let full_path = PointcutExpression::TypePattern("my_app::service::*".into());
        assert!(full_path.evaluate(&GET_USER, USER_IMPL, false));

        let by_method = PointcutExpression::MethodPattern("get_*".into());
        assert!(MethodMatcher::matches(&by_method, &GET_USER, USER_IMPL));
        assert!(!MethodMatcher::matches(&by_method, &SAVE_USER, USER_IMPL));
    }

    #[test]
    fn test_execution_expression() {
        let expr = PointcutExpression::execution("* UserService.get_*(..)").unwrap();
        // 类型部分可以匹配声明接口
        assert!(expr.evaluate(&GET_USER, USER_IMPL, false));
        assert!(!expr.evaluate(&SAVE_USER, USER_IMPL, false));
        assert!(!expr.evaluate(&TRANSFER, "my_app::AccountServiceImpl", false));

        let method_only = PointcutExpression::execution("* transfer(..)").unwrap();
        assert!(matches!(method_only, PointcutExpression::MethodPattern(ref p) if p == "transfer"));

        assert!(matches!(
            PointcutExpression::execution("UserService.get_user"),
            Err(AopError::InvalidExpression { .. })
        ));
        assert!(PointcutExpression::execution("* UserService.(..)").is_err());
        assert!(PointcutExpression::execution("* UserService.get(..").is_err());
    }

    #[test]
    fn test_combinators() {
        let expr = PointcutExpression::TypePattern("*UserService*".into())
            .and(PointcutExpression::MethodPattern("save_*".into()).not())
            .or(PointcutExpression::MethodPattern("transfer".into()));

        assert!(expr.evaluate(&GET_USER, USER_IMPL, false));
        assert!(!expr.evaluate(&SAVE_USER, USER_IMPL, false));
        assert!(expr.evaluate(&TRANSFER, "Other", false));
        assert!(format!("{:?}", expr).starts_with("Or(And("));
    }

    #[test]
    fn test_regex_and_custom() {
        let expr = PointcutExpression::method_regex("^(get|find)_.*$").unwrap();
        assert!(expr.evaluate(&GET_USER, USER_IMPL, false));
        assert!(!expr.evaluate(&SAVE_USER, USER_IMPL, false));
        assert!(PointcutExpression::type_regex("(").is_err());

        let custom = PointcutExpression::custom(|method, class| method.declaring_type == "UserService" && class.ends_with("Impl"));
        assert!(custom.evaluate(&SAVE_USER, USER_IMPL, false));
        assert!(!custom.evaluate(&TRANSFER, USER_IMPL, false));
    }

    #[test]
    fn test_class_filter_is_conservative() {
        let expr = PointcutExpression::TypePattern("*Repository".into()).and(PointcutExpression::MethodPattern("find*".into()));
        assert!(!ClassFilter::matches(&expr, USER_IMPL));
        assert!(ClassFilter::matches(&expr, "my_app::UserRepository"));

        // 方法节点不影响类过滤
        let negated = PointcutExpression::MethodPattern("get*".into()).not();
        assert!(ClassFilter::matches(&negated, USER_IMPL));
    }

    #[test]
    fn test_introduction_awareness() {
        let plain = PointcutExpression::MethodPattern("*".into());
        assert!(plain.as_introduction_aware().is_none());

        let expr = PointcutExpression::WithIntroductions.and(PointcutExpression::MethodPattern("get_*".into()));
        let aware = expr.as_introduction_aware().unwrap();
        assert!(aware.matches_with_introductions(&GET_USER, USER_IMPL, true));
        assert!(!aware.matches_with_introductions(&GET_USER, USER_IMPL, false));
        assert!(!MethodMatcher::matches(&expr, &GET_USER, USER_IMPL));
    }

    #[test]
    fn test_name_match_pointcut() {
        let pointcut = NameMatchMethodPointcut::new(["get_*"]).add_method_name("transfer");
        assert!(pointcut.class_filter().matches("anything"));
        assert!(pointcut.method_matcher().matches(&GET_USER, USER_IMPL));
        assert!(pointcut.method_matcher().matches(&TRANSFER, USER_IMPL));
        assert!(!pointcut.method_matcher().matches(&SAVE_USER, USER_IMPL));
        assert!(!pointcut.method_matcher().is_runtime());
    }

    #[test]
    fn test_runtime_matchers() {
        let pointcut = ArgumentsMatchPointcut::new(["transfer"], |args| args.get::<u64>(0).is_some_and(|amount| *amount > 100));
        let matcher = pointcut.method_matcher();
        assert!(matcher.is_runtime());
        assert!(matcher.matches(&TRANSFER, "Bank"));
        assert!(!matcher.matches(&GET_USER, "Bank"));
        assert!(matcher.matches_args(&TRANSFER, "Bank", &args![500_u64]));
        assert!(!matcher.matches_args(&TRANSFER, "Bank", &args![5_u64]));

        let composed = ComposablePointcut::new(
            TypePatternClassFilter::new(["*Bank"]),
            RuntimeMethodMatcher::new(|m, _| m.name == "transfer", |_, _, args| args.len() == 2),
        );
        assert!(composed.class_filter().matches("my_app::Bank"));
        assert!(!composed.class_filter().matches("my_app::Shop"));
        assert!(composed.method_matcher().matches_args(&TRANSFER, "Bank", &args![1_u64, 2_u64]));
        assert!(!composed.method_matcher().matches_args(&TRANSFER, "Bank", &args![1_u64]));
    }
}
