//! 配置管理
//!
//! [`Environment`] 按优先级聚合多个 [`PropertySource`]，并负责解析
//! `${key:default}` 形式的占位符。[`PlaceholderConfigurer`] 在容器刷新时
//! 用它改写所有 Bean 定义中的占位符。

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use parking_lot::RwLock;

use crate::bean_definition::BeanValue;
use crate::bean_factory::ConfigurableListableBeanFactory;
use crate::error::{ContainerError, ContainerResult};
use crate::lifecycle::BeanFactoryPostProcessor;

const PLACEHOLDER_PREFIX: &str = "${";
const PLACEHOLDER_SUFFIX: char = '}';
const VALUE_SEPARATOR: char = ':';

/// 配置值类型
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<ConfigValue>),
    Object(HashMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Int(i) => Some(*i as f64),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

/// 占位符替换时使用的文本形式
impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::String(s) => f.write_str(s),
            ConfigValue::Int(i) => write!(f, "{}", i),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            ConfigValue::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                f.write_str("{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", key, map[key])?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

/// 配置源 trait
pub trait PropertySource: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Option<ConfigValue>;

    fn keys(&self) -> Vec<String>;

    /// 配置源优先级（数字越大优先级越高）
    fn priority(&self) -> i32 {
        0
    }
}

/// Environment - 配置管理器
///
/// 提供统一的配置访问接口，同名键以优先级最高的配置源为准
pub struct Environment {
    sources: RwLock<Vec<Box<dyn PropertySource>>>,
    active_profiles: RwLock<Vec<String>>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources = self.sources.read();
        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        f.debug_struct("Environment")
            .field("active_profiles", &*self.active_profiles.read())
            .field("sources", &names)
            .finish()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            active_profiles: RwLock::new(Vec::new()),
        }
    }

    /// 添加配置源，同优先级时先添加的优先
    pub fn add_property_source(&self, source: Box<dyn PropertySource>) {
        tracing::debug!(
            "Adding property source '{}' with priority {}",
            source.name(),
            source.priority()
        );
        let mut sources = self.sources.write();
        sources.push(source);
        sources.sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    pub fn property_source_names(&self) -> Vec<String> {
        self.sources.read().iter().map(|s| s.name().to_string()).collect()
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        let sources = self.sources.read();
        for source in sources.iter() {
            if let Some(value) = source.get(key) {
                tracing::trace!("Found key '{}' in property source '{}'", key, source.name());
                return Some(value);
            }
        }
        tracing::trace!("Could not find key '{}' in any property source", key);
        None
    }

    pub fn contains_property(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// 获取字符串配置（数字和布尔值按文本返回）
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get_i64(key).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// 获取字符串数组配置
    ///
    /// 支持 TOML 数组 `key = ["a", "b"]` 和逗号分隔字符串 `key = "a, b"`
    pub fn get_string_array(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            ConfigValue::Array(items) => Some(items.iter().map(|v| v.to_string()).collect()),
            ConfigValue::String(s) => Some(
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn set_active_profiles(&self, profiles: Vec<String>) {
        *self.active_profiles.write() = profiles;
    }

    pub fn active_profiles(&self) -> Vec<String> {
        self.active_profiles.read().clone()
    }

    pub fn accepts_profile(&self, profile: &str) -> bool {
        self.active_profiles.read().iter().any(|p| p == profile)
    }

    /// 解析文本中的 `${key}` / `${key:default}` 占位符
    ///
    /// 占位符可以嵌套（`${a:${b}}`），配置值本身包含的占位符也会被解析。
    /// 找不到且没有默认值时返回 `UnresolvablePlaceholder`。
    pub fn resolve_placeholders(&self, text: &str) -> ContainerResult<String> {
        let mut visiting = Vec::new();
        self.resolve_inner(text, &mut visiting)
    }

    fn resolve_inner(&self, text: &str, visiting: &mut Vec<String>) -> ContainerResult<String> {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find(PLACEHOLDER_PREFIX) {
            result.push_str(&rest[..start]);
            let body = &rest[start + PLACEHOLDER_PREFIX.len()..];
            let end = find_placeholder_end(body).ok_or_else(|| {
                ContainerError::UnresolvablePlaceholder(format!("unterminated placeholder in \"{}\"", text))
            })?;
            let expression = &body[..end];
            let (key_expr, default) = split_default(expression);

            let key = self.resolve_inner(key_expr, visiting)?;
            if visiting.contains(&key) {
                return Err(ContainerError::UnresolvablePlaceholder(format!(
                    "circular placeholder reference '{}' in property definitions",
                    key
                )));
            }

            let resolved = match self.get(&key) {
                Some(value) => {
                    visiting.push(key.clone());
                    let resolved = self.resolve_inner(&value.to_string(), visiting);
                    visiting.pop();
                    resolved?
                }
                None => match default {
                    Some(default) => self.resolve_inner(default, visiting)?,
                    None => {
                        return Err(ContainerError::UnresolvablePlaceholder(format!(
                            "{} in value \"{}\"",
                            key, text
                        )))
                    }
                },
            };
            result.push_str(&resolved);
            rest = &body[end + 1..];
        }

        result.push_str(rest);
        Ok(result)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// 找到与开头 `${` 配对的 `}` 的位置
fn find_placeholder_end(body: &str) -> Option<usize> {
    let mut depth = 1usize;
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if body[i..].starts_with(PLACEHOLDER_PREFIX) {
            depth += 1;
            i += PLACEHOLDER_PREFIX.len();
            continue;
        }
        if bytes[i] == PLACEHOLDER_SUFFIX as u8 {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// 在最外层的 `:` 处拆分键和默认值
fn split_default(expression: &str) -> (&str, Option<&str>) {
    let mut depth = 0usize;
    let bytes = expression.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if expression[i..].starts_with(PLACEHOLDER_PREFIX) {
            depth += 1;
            i += PLACEHOLDER_PREFIX.len();
            continue;
        }
        let b = bytes[i];
        if b == PLACEHOLDER_SUFFIX as u8 {
            depth = depth.saturating_sub(1);
        } else if b == VALUE_SEPARATOR as u8 && depth == 0 {
            return (&expression[..i], Some(&expression[i + 1..]));
        }
        i += 1;
    }
    (expression, None)
}

// ========== Property Sources ==========

/// 环境变量配置源
///
/// 键 `database.url` 对应环境变量 `APP_DATABASE_URL`（前缀为 `APP_` 时）
pub struct EnvironmentPropertySource {
    prefix: String,
    priority: i32,
}

impl EnvironmentPropertySource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            priority: 100,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn env_to_key(&self, env_key: &str) -> String {
        env_key
            .strip_prefix(&self.prefix)
            .unwrap_or(env_key)
            .to_lowercase()
            .replace('_', ".")
    }

    fn key_to_env(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.replace(['.', '-'], "_").to_uppercase())
    }
}

impl PropertySource for EnvironmentPropertySource {
    fn name(&self) -> &str {
        "systemEnvironment"
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        std::env::var(self.key_to_env(key)).ok().map(ConfigValue::String)
    }

    fn keys(&self) -> Vec<String> {
        std::env::vars()
            .filter(|(k, _)| k.starts_with(&self.prefix))
            .map(|(k, _)| self.env_to_key(&k))
            .collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// TOML 配置源，嵌套表展开成点分隔的键
pub struct TomlPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl TomlPropertySource {
    pub fn from_file(path: impl AsRef<Path>) -> ContainerResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ContainerError::Resource {
            location: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, path.display().to_string())
    }

    pub fn parse(content: &str, name: impl Into<String>) -> ContainerResult<Self> {
        let name = name.into();
        let value: toml::Value = toml::from_str(content).map_err(|e| {
            ContainerError::Other(anyhow::anyhow!("Failed to parse TOML property source '{}': {}", name, e))
        })?;

        let mut properties = HashMap::new();
        flatten_toml(&value, String::new(), &mut properties);
        Ok(Self {
            name,
            properties,
            priority: 0,
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

fn flatten_toml(value: &toml::Value, prefix: String, result: &mut HashMap<String, ConfigValue>) {
    match value {
        toml::Value::Table(table) => {
            for (key, val) in table {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_toml(val, key, result);
            }
        }
        other => {
            result.insert(prefix, toml_to_config(other));
        }
    }
}

fn toml_to_config(value: &toml::Value) -> ConfigValue {
    match value {
        toml::Value::String(s) => ConfigValue::String(s.clone()),
        toml::Value::Integer(i) => ConfigValue::Int(*i),
        toml::Value::Float(f) => ConfigValue::Float(*f),
        toml::Value::Boolean(b) => ConfigValue::Bool(*b),
        toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
        toml::Value::Array(items) => ConfigValue::Array(items.iter().map(toml_to_config).collect()),
        toml::Value::Table(table) => ConfigValue::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_config(v)))
                .collect(),
        ),
    }
}

impl PropertySource for TomlPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// 内存配置源（用于测试或运行时配置）
pub struct MapPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl MapPropertySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
            priority: 50,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// 占位符配置器
///
/// 在刷新阶段改写每个 Bean 定义中字面量属性值和构造参数里的 `${...}`
pub struct PlaceholderConfigurer {
    environment: std::sync::Arc<Environment>,
    ignore_unresolvable: bool,
}

impl PlaceholderConfigurer {
    pub fn new(environment: std::sync::Arc<Environment>) -> Self {
        Self {
            environment,
            ignore_unresolvable: false,
        }
    }

    /// 解析失败时保留原文而不是报错
    pub fn with_ignore_unresolvable(mut self, ignore: bool) -> Self {
        self.ignore_unresolvable = ignore;
        self
    }

    fn resolve_value(&self, value: &mut BeanValue) -> ContainerResult<()> {
        let text = match value {
            BeanValue::Placeholder(text) => text.clone(),
            BeanValue::Literal(ConfigValue::String(s)) if s.contains(PLACEHOLDER_PREFIX) => s.clone(),
            _ => return Ok(()),
        };
        match self.environment.resolve_placeholders(&text) {
            Ok(resolved) => {
                *value = BeanValue::Literal(ConfigValue::String(resolved));
                Ok(())
            }
            Err(e) if self.ignore_unresolvable => {
                tracing::debug!("Leaving unresolvable placeholder as is: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl BeanFactoryPostProcessor for PlaceholderConfigurer {
    fn post_process_bean_factory(&self, factory: &dyn ConfigurableListableBeanFactory) -> ContainerResult<()> {
        for name in factory.bean_definition_names() {
            factory.modify_bean_definition(&name, &mut |definition| {
                definition.visit_values_mut(&mut |value| self.resolve_value(value))
            })?;
        }
        Ok(())
    }

    fn order(&self) -> i32 {
        i32::MIN
    }
}
