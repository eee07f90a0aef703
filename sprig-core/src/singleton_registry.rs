//! 单例注册表
//!
//! 完成的单例存放在读写锁保护的表里，快速路径只需要读锁。
//! 创建过程的簿记（正在创建、早期引用、等待中的线程）由一把互斥锁和
//! 一个条件变量保护，锁只在簿记时持有，实例化和初始化期间不持锁。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::bean::{BeanInstance, DisposableBean};
use crate::error::{ContainerError, ContainerResult};
use crate::value::BeanRef;

/// 请求单例时的结果
pub(crate) enum SingletonLookup {
    /// 已完成的实例
    Ready(BeanInstance),
    /// 同一解析路径上的循环引用，返回早期引用
    Early(BeanRef),
    /// 调用方获得创建权，必须以 `complete_singleton` 或 `fail_singleton` 结束
    Create,
}

#[derive(Default)]
struct SingletonTable {
    instances: HashMap<String, BeanInstance>,
    order: Vec<String>,
}

#[derive(Default)]
struct CreationState {
    in_creation: HashMap<String, ThreadId>,
    early_references: HashMap<String, BeanRef>,
    waiting: HashMap<ThreadId, String>,
    disposables: Vec<(String, Arc<dyn DisposableBean>)>,
    /// bean -> 依赖它的 Bean
    dependents: HashMap<String, BTreeSet<String>>,
    /// bean -> 它依赖的 Bean
    dependencies: HashMap<String, BTreeSet<String>>,
    in_destruction: bool,
}

impl CreationState {
    /// 当前线程等待 `owner` 是否会形成等待环
    fn would_deadlock(&self, me: ThreadId, owner: ThreadId) -> bool {
        let mut current = owner;
        let mut visited = HashSet::new();
        loop {
            if current == me {
                return true;
            }
            if !visited.insert(current) {
                return false;
            }
            let Some(bean) = self.waiting.get(&current) else {
                return false;
            };
            let Some(next) = self.in_creation.get(bean) else {
                return false;
            };
            current = *next;
        }
    }
}

/// 默认单例注册表
pub struct DefaultSingletonBeanRegistry {
    table: RwLock<SingletonTable>,
    state: Mutex<CreationState>,
    creation_finished: Condvar,
}

impl Default for DefaultSingletonBeanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultSingletonBeanRegistry {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(SingletonTable::default()),
            state: Mutex::new(CreationState::default()),
            creation_finished: Condvar::new(),
        }
    }

    /// 注册一个外部创建的单例
    pub fn register_singleton(&self, name: &str, instance: BeanInstance) -> ContainerResult<()> {
        let state = self.state.lock();
        let mut table = self.table.write();
        if table.instances.contains_key(name) || state.in_creation.contains_key(name) {
            return Err(ContainerError::SingletonExists {
                name: name.to_string(),
            });
        }
        tracing::debug!("Registering singleton bean '{}'", name);
        table.instances.insert(name.to_string(), instance);
        table.order.push(name.to_string());
        Ok(())
    }

    /// 获取已完成的单例
    pub fn get_singleton(&self, name: &str) -> Option<BeanInstance> {
        self.table.read().instances.get(name).cloned()
    }

    pub fn contains_singleton(&self, name: &str) -> bool {
        self.table.read().instances.contains_key(name)
    }

    /// 单例名称（注册顺序）
    pub fn singleton_names(&self) -> Vec<String> {
        self.table.read().order.clone()
    }

    pub fn singleton_count(&self) -> usize {
        self.table.read().order.len()
    }

    pub fn is_currently_in_creation(&self, name: &str) -> bool {
        self.state.lock().in_creation.contains_key(name)
    }

    /// 获取单例或取得创建权
    ///
    /// 另一个线程正在创建时等待它完成；如果等待会形成环（两个线程互相等待），
    /// 则按同一解析路径处理：有早期引用就返回，否则报循环引用错误。
    pub(crate) fn begin_singleton(&self, name: &str) -> ContainerResult<SingletonLookup> {
        if let Some(instance) = self.get_singleton(name) {
            return Ok(SingletonLookup::Ready(instance));
        }

        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            if let Some(instance) = self.get_singleton(name) {
                return Ok(SingletonLookup::Ready(instance));
            }
            if state.in_destruction {
                return Err(ContainerError::IllegalState(format!(
                    "Singleton bean creation not allowed while singletons of this factory are in destruction (requested bean '{}')",
                    name
                )));
            }

            let owner = match state.in_creation.get(name) {
                None => {
                    state.in_creation.insert(name.to_string(), me);
                    return Ok(SingletonLookup::Create);
                }
                Some(owner) => *owner,
            };

            if owner == me || state.would_deadlock(me, owner) {
                return match state.early_references.get(name) {
                    Some(early) => {
                        tracing::trace!(
                            "Returning eagerly cached instance of singleton bean '{}' that is not fully initialized yet - a consequence of a circular reference",
                            name
                        );
                        Ok(SingletonLookup::Early(early.clone()))
                    }
                    None => Err(ContainerError::CurrentlyInCreation {
                        name: name.to_string(),
                    }),
                };
            }

            tracing::trace!("Waiting for singleton bean '{}' created by another thread", name);
            state.waiting.insert(me, name.to_string());
            self.creation_finished.wait(&mut state);
            state.waiting.remove(&me);
        }
    }

    /// 暴露早期引用（只有当前创建者可以调用）
    pub(crate) fn expose_early_reference(&self, name: &str, reference: BeanRef) {
        let mut state = self.state.lock();
        if state.in_creation.contains_key(name) {
            state.early_references.insert(name.to_string(), reference);
        }
    }

    pub(crate) fn has_early_reference(&self, name: &str) -> bool {
        self.state.lock().early_references.contains_key(name)
    }

    /// 创建成功：放入单例表并唤醒等待的线程
    pub(crate) fn complete_singleton(&self, name: &str, instance: BeanInstance) {
        let mut state = self.state.lock();
        {
            let mut table = self.table.write();
            table.instances.insert(name.to_string(), instance);
            table.order.push(name.to_string());
        }
        state.in_creation.remove(name);
        state.early_references.remove(name);
        drop(state);
        self.creation_finished.notify_all();
    }

    /// 创建失败：清除所有创建痕迹，并销毁已经拿到早期引用的依赖方
    pub(crate) fn fail_singleton(&self, name: &str) {
        {
            let mut state = self.state.lock();
            state.in_creation.remove(name);
            state.early_references.remove(name);
        }
        self.creation_finished.notify_all();
        self.destroy_singleton(name);
    }

    pub fn register_disposable_bean(&self, name: &str, bean: Arc<dyn DisposableBean>) {
        let mut state = self.state.lock();
        state.disposables.retain(|(n, _)| n != name);
        state.disposables.push((name.to_string(), bean));
    }

    /// 记录 `dependent` 依赖于 `bean`
    pub fn register_dependent_bean(&self, bean: &str, dependent: &str) {
        let mut state = self.state.lock();
        state
            .dependents
            .entry(bean.to_string())
            .or_default()
            .insert(dependent.to_string());
        state
            .dependencies
            .entry(dependent.to_string())
            .or_default()
            .insert(bean.to_string());
    }

    /// `dependent` 是否（直接或间接）依赖于 `bean`
    pub fn is_dependent(&self, bean: &str, dependent: &str) -> bool {
        let state = self.state.lock();
        let mut visited = HashSet::new();
        let mut stack = vec![bean.to_string()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(direct) = state.dependents.get(&current) {
                if direct.contains(dependent) {
                    return true;
                }
                stack.extend(direct.iter().cloned());
            }
        }
        false
    }

    pub fn dependents_of(&self, bean: &str) -> Vec<String> {
        self.state
            .lock()
            .dependents
            .get(bean)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn dependencies_of(&self, bean: &str) -> Vec<String> {
        self.state
            .lock()
            .dependencies
            .get(bean)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 销毁单个单例，先销毁依赖它的 Bean
    pub fn destroy_singleton(&self, name: &str) {
        let (disposable, dependents) = {
            let mut state = self.state.lock();
            {
                let mut table = self.table.write();
                table.instances.remove(name);
                table.order.retain(|n| n != name);
            }
            let disposable = state
                .disposables
                .iter()
                .position(|(n, _)| n == name)
                .map(|index| state.disposables.remove(index).1);
            let dependents = state.dependents.remove(name).unwrap_or_default();
            (disposable, dependents)
        };

        for dependent in dependents {
            tracing::debug!(
                "Destroying bean '{}' that depends on bean '{}'",
                dependent,
                name
            );
            self.destroy_singleton(&dependent);
        }

        if let Some(bean) = disposable {
            tracing::debug!("Invoking destroy callbacks on bean '{}'", name);
            if let Err(e) = bean.destroy() {
                tracing::warn!("Destruction of bean with name '{}' threw an exception: {}", name, e);
            }
        }

        let mut state = self.state.lock();
        if let Some(dependencies) = state.dependencies.remove(name) {
            for dependency in dependencies {
                if let Some(set) = state.dependents.get_mut(&dependency) {
                    set.remove(name);
                }
            }
        }
    }

    /// 按注册的逆序销毁所有单例
    pub fn destroy_singletons(&self) {
        let names: Vec<String> = {
            let mut state = self.state.lock();
            state.in_destruction = true;
            state.disposables.iter().rev().map(|(n, _)| n.clone()).collect()
        };
        tracing::debug!("Destroying singletons: {:?}", names);

        for name in names {
            self.destroy_singleton(&name);
        }

        {
            let mut state = self.state.lock();
            let mut table = self.table.write();
            table.instances.clear();
            table.order.clear();
            state.dependents.clear();
            state.dependencies.clear();
            state.early_references.clear();
            state.in_destruction = false;
        }
    }
}
