//! Utility functions for the container
//!
//! Naming helpers for bean names, simple wildcard matching used by
//! bean-name and method-name patterns, and dependency graph analysis.

/// Naming convention utilities for bean names
pub mod naming {
    /// Strips the module path and generic arguments from a type name.
    ///
    /// ```
    /// use sprig_core::utils::naming::short_type_name;
    ///
    /// assert_eq!(short_type_name("my_app::service::UserService"), "UserService");
    /// assert_eq!(short_type_name("alloc::vec::Vec<u8>"), "Vec");
    /// assert_eq!(short_type_name("Plain"), "Plain");
    /// ```
    pub fn short_type_name(type_name: &str) -> &str {
        let without_generics = match type_name.find('<') {
            Some(idx) => &type_name[..idx],
            None => type_name,
        };
        match without_generics.rfind("::") {
            Some(idx) => &without_generics[idx + 2..],
            None => without_generics,
        }
    }

    /// Converts a PascalCase type name to camelCase for bean naming.
    ///
    /// `UserService` becomes `userService`. A leading run of capitals such as
    /// `URLResolver` is kept as is, matching the usual bean naming rule.
    ///
    /// ```
    /// use sprig_core::utils::naming::to_camel_case;
    ///
    /// assert_eq!(to_camel_case("UserService"), "userService");
    /// assert_eq!(to_camel_case("URLResolver"), "URLResolver");
    /// assert_eq!(to_camel_case(""), "");
    /// ```
    pub fn to_camel_case(s: &str) -> String {
        let mut chars = s.chars();
        match chars.next() {
            None => String::new(),
            Some(first) => {
                if first.is_uppercase() && chars.clone().next().is_some_and(char::is_uppercase) {
                    return s.to_string();
                }
                let mut result = String::with_capacity(s.len());
                result.extend(first.to_lowercase());
                result.push_str(chars.as_str());
                result
            }
        }
    }

    /// Default bean name for a type: camelCase of the short type name.
    pub fn default_bean_name<T: ?Sized>() -> String {
        to_camel_case(short_type_name(std::any::type_name::<T>()))
    }
}

/// Wildcard matching
pub mod pattern {
    /// Matches a string against a pattern where `*` matches any sequence.
    ///
    /// Supports the forms `xxx*`, `*xxx`, `*xxx*`, `xxx*yyy` and plain
    /// equality, plus any combination of several wildcards.
    ///
    /// ```
    /// use sprig_core::utils::pattern::simple_match;
    ///
    /// assert!(simple_match("get*", "getUser"));
    /// assert!(simple_match("*Service", "userService"));
    /// assert!(simple_match("*", "anything"));
    /// assert!(!simple_match("set*", "getUser"));
    /// ```
    pub fn simple_match(pattern: &str, candidate: &str) -> bool {
        let Some(first) = pattern.find('*') else {
            return pattern == candidate;
        };
        if !candidate.starts_with(&pattern[..first]) {
            return false;
        }

        let mut rest = &candidate[first..];
        let mut segments = pattern[first + 1..].split('*').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                // last segment must be a suffix
                return segment.is_empty() || rest.ends_with(segment);
            }
            if segment.is_empty() {
                continue;
            }
            match rest.find(segment) {
                Some(idx) => rest = &rest[idx + segment.len()..],
                None => return false,
            }
        }
        true
    }

    /// Whether any pattern matches
    pub fn simple_match_any<S: AsRef<str>>(patterns: &[S], candidate: &str) -> bool {
        patterns.iter().any(|p| simple_match(p.as_ref(), candidate))
    }
}

/// Dependency resolution utilities
pub mod dependency {
    use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

    /// Problems found in a depends-on graph
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DependencyValidationError {
        /// Circular dependency detected
        CircularDependency {
            /// The dependency chain forming the cycle
            cycle: Vec<String>,
        },
        /// Missing dependency detected
        MissingDependency {
            /// The bean that requires the dependency
            bean: String,
            /// The missing dependency
            missing: String,
        },
    }

    impl std::fmt::Display for DependencyValidationError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::CircularDependency { cycle } => {
                    write!(f, "Circular depends-on relationship: {}", cycle.join(" -> "))
                }
                Self::MissingDependency { bean, missing } => {
                    write!(f, "Bean '{}' depends on missing bean '{}'", bean, missing)
                }
            }
        }
    }

    impl std::error::Error for DependencyValidationError {}

    /// Validates a graph of bean name to depends-on names.
    ///
    /// Beans are visited in name order so the reported problem is stable.
    pub fn validate_dependency_graph(
        dependencies: &HashMap<String, Vec<String>>,
    ) -> Result<(), DependencyValidationError> {
        let ordered: BTreeMap<&String, &Vec<String>> = dependencies.iter().collect();

        for (bean, deps) in &ordered {
            for dep in deps.iter() {
                if !dependencies.contains_key(dep) {
                    return Err(DependencyValidationError::MissingDependency {
                        bean: (*bean).clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        let mut finished = BTreeSet::new();
        let mut path = Vec::new();
        for bean in ordered.keys() {
            if let Some(cycle) = find_cycle(bean, dependencies, &mut finished, &mut path) {
                return Err(DependencyValidationError::CircularDependency { cycle });
            }
        }
        Ok(())
    }

    fn find_cycle(
        node: &str,
        graph: &HashMap<String, Vec<String>>,
        finished: &mut BTreeSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if finished.contains(node) {
            return None;
        }
        if let Some(start) = path.iter().position(|n| n == node) {
            let mut cycle = path[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }

        path.push(node.to_string());
        for dep in graph.get(node).into_iter().flatten() {
            if let Some(cycle) = find_cycle(dep, graph, finished, path) {
                return Some(cycle);
            }
        }
        path.pop();
        finished.insert(node.to_string());
        None
    }

    /// Orders beans so that dependencies come before their dependents.
    ///
    /// Ties are broken by name, which keeps the order deterministic.
    pub fn topological_sort(
        dependencies: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<String>, DependencyValidationError> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for (bean, deps) in dependencies {
            *in_degree.entry(bean.as_str()).or_insert(0) += deps.len();
            for dep in deps {
                in_degree.entry(dep.as_str()).or_insert(0);
                dependents.entry(dep.as_str()).or_default().push(bean.as_str());
            }
        }

        let mut ready: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut sorted = Vec::with_capacity(in_degree.len());

        while let Some(name) = ready.pop_front() {
            sorted.push(name.to_string());
            let mut unlocked = Vec::new();
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        unlocked.push(*dependent);
                    }
                }
            }
            unlocked.sort_unstable();
            ready.extend(unlocked);
        }

        if sorted.len() != in_degree.len() {
            let remaining: Vec<String> = in_degree
                .iter()
                .filter(|(name, _)| !sorted.iter().any(|s| s == *name))
                .map(|(name, _)| name.to_string())
                .collect();
            return Err(DependencyValidationError::CircularDependency { cycle: remaining });
        }
        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    mod naming_tests {
        use super::super::naming::*;

        #[test]
        fn test_short_type_name() {
            assert_eq!(short_type_name("a::b::C"), "C");
            assert_eq!(short_type_name("a::Wrapper<b::C>"), "Wrapper");
        }

        #[test]
        fn test_default_bean_name() {
            struct OrderRepository;
            assert_eq!(default_bean_name::<OrderRepository>(), "orderRepository");
        }
    }

    mod pattern_tests {
        use super::super::pattern::*;

        #[test]
        fn test_simple_match() {
            assert!(simple_match("*", ""));
            assert!(simple_match("find*", "findAll"));
            assert!(simple_match("*Repository", "orderRepository"));
            assert!(simple_match("*der*", "orderRepository"));
            assert!(simple_match("get*Name", "getUserName"));
            assert!(!simple_match("get*Name", "getUserId"));
            assert!(simple_match("exact", "exact"));
            assert!(!simple_match("exact", "exactly"));
            assert!(simple_match("a*b*c", "aXbYc"));
            assert!(!simple_match("a*b*c", "aXcYb"));
        }

        #[test]
        fn test_simple_match_any() {
            assert!(simple_match_any(&["save*", "update*"], "updateUser"));
            assert!(!simple_match_any::<&str>(&[], "x"));
        }
    }

    mod dependency_tests {
        use super::super::dependency::*;
        use std::collections::HashMap;

        fn graph(edges: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
            edges
                .iter()
                .map(|(bean, deps)| (bean.to_string(), deps.iter().map(|d| d.to_string()).collect()))
                .collect()
        }

        #[test]
        fn test_valid_graph() {
            let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
            assert!(validate_dependency_graph(&g).is_ok());
            assert_eq!(topological_sort(&g).unwrap(), vec!["c", "b", "a"]);
        }

        #[test]
        fn test_missing_dependency() {
            let g = graph(&[("a", &["ghost"])]);
            assert_eq!(
                validate_dependency_graph(&g),
                Err(DependencyValidationError::MissingDependency {
                    bean: "a".into(),
                    missing: "ghost".into()
                })
            );
        }

        #[test]
        fn test_cycle_is_reported_with_path() {
            let g = graph(&[("a", &["b"]), ("b", &["a"])]);
            match validate_dependency_graph(&g) {
                Err(DependencyValidationError::CircularDependency { cycle }) => {
                    assert_eq!(cycle, vec!["a", "b", "a"]);
                }
                other => panic!("unexpected result: {:?}", other),
            }
            assert!(topological_sort(&g).is_err());
        }
    }
}
