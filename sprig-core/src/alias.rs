use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{ContainerError, ContainerResult};

/// 别名注册表：alias -> 规范名称（可以是另一个别名）
#[derive(Debug, Default)]
pub struct AliasRegistry {
    aliases: RwLock<HashMap<String, String>>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册别名
    ///
    /// 别名与名称相同时移除该别名；已指向其它名称时拒绝覆盖；形成循环时拒绝注册
    pub fn register_alias(&self, name: &str, alias: &str) -> ContainerResult<()> {
        let error = |message: &str| ContainerError::Alias {
            alias: alias.to_string(),
            name: name.to_string(),
            message: message.to_string(),
        };

        if name.is_empty() || alias.is_empty() {
            return Err(error("name and alias must not be empty"));
        }

        let mut aliases = self.aliases.write();
        if alias == name {
            aliases.remove(alias);
            return Ok(());
        }
        if let Some(existing) = aliases.get(alias) {
            if existing == name {
                return Ok(());
            }
            return Err(error(&format!("it is already registered for name '{}'", existing)));
        }
        if resolves_to(&aliases, name, alias) {
            return Err(error("circular reference: the name is already an alias of the alias"));
        }

        tracing::trace!("Registering alias '{}' for bean with name '{}'", alias, name);
        aliases.insert(alias.to_string(), name.to_string());
        Ok(())
    }

    pub fn remove_alias(&self, alias: &str) -> ContainerResult<()> {
        self.aliases
            .write()
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| ContainerError::Alias {
                alias: alias.to_string(),
                name: String::new(),
                message: "no alias registered".to_string(),
            })
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.read().contains_key(name)
    }

    /// 解析出规范名称（沿别名链追踪）
    pub fn canonical_name(&self, name: &str) -> String {
        let aliases = self.aliases.read();
        let mut current = name;
        while let Some(next) = aliases.get(current) {
            current = next;
        }
        current.to_string()
    }

    /// 指向给定名称的所有别名（包括间接别名），按名称排序
    pub fn get_aliases(&self, name: &str) -> Vec<String> {
        let aliases = self.aliases.read();
        let mut result: Vec<String> = aliases
            .keys()
            .filter(|alias| alias.as_str() != name && resolves_to(&aliases, alias, name))
            .cloned()
            .collect();
        result.sort();
        result
    }

    /// 移除指向给定名称的所有别名
    pub(crate) fn remove_aliases_of(&self, name: &str) {
        let mut aliases = self.aliases.write();
        aliases.retain(|_, target| target != name);
    }
}

/// 从 `from` 出发沿别名链能否到达 `to`
fn resolves_to(aliases: &HashMap<String, String>, from: &str, to: &str) -> bool {
    let mut current = from;
    let mut steps = 0;
    while let Some(next) = aliases.get(current) {
        if next == to {
            return true;
        }
        current = next;
        steps += 1;
        if steps > aliases.len() {
            break;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let registry = AliasRegistry::new();
        registry.register_alias("dataSource", "ds").unwrap();
        registry.register_alias("ds", "db").unwrap();

        assert_eq!(registry.canonical_name("db"), "dataSource");
        assert_eq!(registry.canonical_name("dataSource"), "dataSource");
        assert_eq!(registry.get_aliases("dataSource"), vec!["db", "ds"]);
        assert!(registry.is_alias("ds"));
    }

    #[test]
    fn test_rejects_override_and_cycles() {
        let registry = AliasRegistry::new();
        registry.register_alias("a", "x").unwrap();
        registry.register_alias("a", "x").unwrap();
        assert!(matches!(
            registry.register_alias("b", "x"),
            Err(ContainerError::Alias { .. })
        ));

        registry.register_alias("x", "y").unwrap();
        assert!(registry.register_alias("y", "a").is_err());
    }

    #[test]
    fn test_alias_equal_to_name_removes_it() {
        let registry = AliasRegistry::new();
        registry.register_alias("a", "b").unwrap();
        registry.register_alias("b", "b").unwrap();
        assert!(!registry.is_alias("b"));
        assert!(registry.remove_alias("b").is_err());
    }
}
