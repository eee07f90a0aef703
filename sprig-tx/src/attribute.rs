//! 事务属性与事务属性源
//!
//! 事务属性 = 事务定义 + 回滚规则 + 限定符（选择事务管理器）+ 标签。
//! 属性源负责回答"这个方法在这个目标类上是否需要事务，用什么属性"。

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use sprig_core::utils::naming::short_type_name;
use sprig_core::utils::pattern::simple_match;
use sprig_core::{InvocationError, Method};

use crate::definition::TransactionDefinition;
use crate::error::{TransactionError, TransactionResult};

type ErrorMatcher = dyn Fn(&InvocationError) -> bool + Send + Sync;

/// 回滚规则
///
/// 匹配时沿错误源链查找，`rollback` 决定匹配后回滚还是提交
#[derive(Clone)]
pub struct RollbackRule {
    error_type: String,
    matches: Arc<ErrorMatcher>,
    rollback: bool,
}

impl RollbackRule {
    /// 错误源链中出现 `E` 时回滚
    pub fn rollback_for<E>() -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::typed::<E>(true)
    }

    /// 错误源链中出现 `E` 时提交
    pub fn no_rollback_for<E>() -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::typed::<E>(false)
    }

    fn typed<E>(rollback: bool) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            error_type: short_type_name(std::any::type_name::<E>()).to_string(),
            matches: Arc::new(|error: &InvocationError| error.inner().chain().any(|cause| cause.is::<E>())),
            rollback,
        }
    }

    /// 按类型名匹配，用于文本形式的属性（`+IoError` / `-InsufficientFunds`）
    ///
    /// 名称与源链中某个错误 `Debug` 输出开头的类型名比较，`derive(Debug)` 的错误类型都满足这一点
    pub fn by_name(error_type: impl Into<String>, rollback: bool) -> Self {
        let error_type = error_type.into();
        let expected = error_type.clone();
        Self {
            error_type,
            matches: Arc::new(move |error: &InvocationError| {
                error.inner().chain().any(|cause| debug_type_name(cause) == expected)
            }),
            rollback,
        }
    }

    pub fn error_type(&self) -> &str {
        &self.error_type
    }

    pub fn is_rollback(&self) -> bool {
        self.rollback
    }

    pub fn matches(&self, error: &InvocationError) -> bool {
        (self.matches)(error)
    }
}

fn debug_type_name(error: &(dyn StdError + 'static)) -> String {
    let debug = format!("{:?}", error);
    let end = debug
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(debug.len());
    debug[..end].to_string()
}

impl fmt::Debug for RollbackRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RollbackRule({})", self)
    }
}

impl fmt::Display for RollbackRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.rollback { '-' } else { '+' };
        write!(f, "{}{}", sign, self.error_type)
    }
}

/// 事务属性
#[derive(Debug, Clone, Default)]
pub struct TransactionAttribute {
    definition: TransactionDefinition,
    rollback_rules: Vec<RollbackRule>,
    qualifier: Option<String>,
    labels: Vec<String>,
}

impl TransactionAttribute {
    pub fn new(definition: TransactionDefinition) -> Self {
        Self {
            definition,
            ..Self::default()
        }
    }

    pub fn with_rollback_rule(mut self, rule: RollbackRule) -> Self {
        self.rollback_rules.push(rule);
        self
    }

    /// 事务管理器 Bean 名称
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn definition(&self) -> &TransactionDefinition {
        &self.definition
    }

    pub fn definition_mut(&mut self) -> &mut TransactionDefinition {
        &mut self.definition
    }

    pub fn rollback_rules(&self) -> &[RollbackRule] {
        &self.rollback_rules
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// 给定错误是否应当回滚
    ///
    /// 按声明顺序取第一条匹配的规则；没有规则匹配时非受检错误回滚、受检错误提交
    pub fn rollback_on(&self, error: &InvocationError) -> bool {
        match self.rollback_rules.iter().find(|rule| rule.matches(error)) {
            Some(rule) => {
                tracing::trace!("Applying rule [{}] to {}", rule, error);
                rule.is_rollback()
            }
            None => !error.is_checked(),
        }
    }
}

impl fmt::Display for TransactionAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.definition)?;
        for rule in &self.rollback_rules {
            write!(f, ",{}", rule)?;
        }
        Ok(())
    }
}

impl FromStr for TransactionAttribute {
    type Err = TransactionError;

    /// `-Name` 表示遇到该错误回滚，`+Name` 表示遇到该错误提交
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut definition_tokens = Vec::new();
        let mut rules = Vec::new();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(name) = token.strip_prefix('-') {
                rules.push(RollbackRule::by_name(name, true));
            } else if let Some(name) = token.strip_prefix('+') {
                rules.push(RollbackRule::by_name(name, false));
            } else {
                definition_tokens.push(token);
            }
        }

        let definition = definition_tokens.join(",").parse::<TransactionDefinition>()?;
        Ok(Self {
            definition,
            rollback_rules: rules,
            ..Self::default()
        })
    }
}

/// 事务属性源
pub trait TransactionAttributeSource: Send + Sync {
    /// 方法的事务属性；`None` 表示该方法不在事务中执行
    fn transaction_attribute(&self, method: &Method, target_class: &str) -> Option<TransactionAttribute>;

    /// 目标类是否可能有事务方法，切点用它做类过滤
    fn is_candidate_class(&self, _target_class: &str) -> bool {
        true
    }
}

/// 按方法登记的属性源
///
/// 先找精确登记的方法，再按 `Type.method*` 形式的名称模式查找，模式越长越优先。
/// `Type` 可以是声明接口，也可以是目标类的短名称。
#[derive(Debug, Default)]
pub struct MethodMapTransactionAttributeSource {
    methods: HashMap<Method, TransactionAttribute>,
    patterns: Vec<(String, TransactionAttribute)>,
}

impl MethodMapTransactionAttributeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_method(&mut self, method: Method, attribute: TransactionAttribute) {
        tracing::debug!("Adding transactional method [{}] with attribute [{}]", method, attribute);
        self.methods.insert(method, attribute);
    }

    /// 登记 `Type.methodPattern`
    pub fn add_method_name(
        &mut self,
        name: impl Into<String>,
        attribute: TransactionAttribute,
    ) -> TransactionResult<()> {
        let name = name.into();
        let Some((type_name, method_pattern)) = name.rsplit_once('.') else {
            return Err(TransactionError::illegal_state(format!(
                "'{}' is not a valid method name: format is Type.method",
                name
            )));
        };
        if type_name.is_empty() || method_pattern.is_empty() {
            return Err(TransactionError::illegal_state(format!(
                "'{}' is not a valid method name: format is Type.method",
                name
            )));
        }
        tracing::debug!("Adding transactional method [{}] with attribute [{}]", name, attribute);
        self.patterns.push((name, attribute));
        Ok(())
    }

    pub fn with_method(mut self, method: Method, attribute: TransactionAttribute) -> Self {
        self.add_method(method, attribute);
        self
    }

    fn best_pattern(&self, method: &Method, target_class: &str) -> Option<&TransactionAttribute> {
        let short_class = short_type_name(target_class);
        let mut best: Option<(&str, &TransactionAttribute)> = None;
        for (pattern, attribute) in &self.patterns {
            let Some((type_name, method_pattern)) = pattern.rsplit_once('.') else {
                continue;
            };
            let type_matches = type_name == method.declaring_type || type_name == short_class;
            if type_matches && simple_match(method_pattern, method.name) {
                if best.map_or(true, |(current, _)| current.len() <= pattern.len()) {
                    best = Some((pattern.as_str(), attribute));
                }
            }
        }
        best.map(|(_, attribute)| attribute)
    }
}

impl TransactionAttributeSource for MethodMapTransactionAttributeSource {
    fn transaction_attribute(&self, method: &Method, target_class: &str) -> Option<TransactionAttribute> {
        self.methods
            .get(method)
            .or_else(|| self.best_pattern(method, target_class))
            .cloned()
    }
}

/// 按方法名匹配的属性源
///
/// 精确名称优先，其次是最长的 `*` 模式；长度相同时后登记的生效
#[derive(Debug, Default)]
pub struct NameMatchTransactionAttributeSource {
    name_map: Vec<(String, TransactionAttribute)>,
}

impl NameMatchTransactionAttributeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transactional_method(&mut self, method_name: impl Into<String>, attribute: TransactionAttribute) {
        let method_name = method_name.into();
        tracing::debug!(
            "Adding transactional method [{}] with attribute [{}]",
            method_name,
            attribute
        );
        self.name_map.retain(|(name, _)| *name != method_name);
        self.name_map.push((method_name, attribute));
    }

    pub fn with_method(mut self, method_name: impl Into<String>, attribute: TransactionAttribute) -> Self {
        self.add_transactional_method(method_name, attribute);
        self
    }

    /// 从 `方法名模式 -> 属性文本` 的映射构建
    pub fn from_properties<'a, I>(properties: I) -> TransactionResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut source = Self::new();
        for (method_name, attribute) in properties {
            source.add_transactional_method(method_name, attribute.parse()?);
        }
        Ok(source)
    }

    pub fn is_empty(&self) -> bool {
        self.name_map.is_empty()
    }
}

impl TransactionAttributeSource for NameMatchTransactionAttributeSource {
    fn transaction_attribute(&self, method: &Method, _target_class: &str) -> Option<TransactionAttribute> {
        if let Some((_, attribute)) = self.name_map.iter().find(|(name, _)| name == method.name) {
            return Some(attribute.clone());
        }

        let mut best: Option<(&str, &TransactionAttribute)> = None;
        for (name, attribute) in &self.name_map {
            if simple_match(name, method.name) && best.map_or(true, |(current, _)| current.len() <= name.len()) {
                best = Some((name.as_str(), attribute));
            }
        }
        best.map(|(_, attribute)| attribute.clone())
    }
}

/// 对所有方法返回同一个属性
#[derive(Debug, Default, Clone)]
pub struct MatchAlwaysTransactionAttributeSource {
    attribute: TransactionAttribute,
}

impl MatchAlwaysTransactionAttributeSource {
    pub fn new(attribute: TransactionAttribute) -> Self {
        Self { attribute }
    }
}

impl TransactionAttributeSource for MatchAlwaysTransactionAttributeSource {
    fn transaction_attribute(&self, _method: &Method, _target_class: &str) -> Option<TransactionAttribute> {
        Some(self.attribute.clone())
    }
}

/// 依次询问多个属性源，返回第一个结果
#[derive(Default)]
pub struct CompositeTransactionAttributeSource {
    sources: Vec<Arc<dyn TransactionAttributeSource>>,
}

impl CompositeTransactionAttributeSource {
    pub fn new(sources: Vec<Arc<dyn TransactionAttributeSource>>) -> Self {
        Self { sources }
    }

    pub fn add_source(&mut self, source: Arc<dyn TransactionAttributeSource>) {
        self.sources.push(source);
    }
}

impl TransactionAttributeSource for CompositeTransactionAttributeSource {
    fn transaction_attribute(&self, method: &Method, target_class: &str) -> Option<TransactionAttribute> {
        self.sources
            .iter()
            .find_map(|source| source.transaction_attribute(method, target_class))
    }

    fn is_candidate_class(&self, target_class: &str) -> bool {
        self.sources.iter().any(|source| source.is_candidate_class(target_class))
    }
}
