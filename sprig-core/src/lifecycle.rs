//! 容器扩展点
//!
//! [`BeanPostProcessor`] 在单个 Bean 的生命周期各阶段介入，
//! [`BeanFactoryPostProcessor`] 在任何 Bean 创建之前修改 Bean 定义。

use crate::bean::{Bean, BeanInstance};
use crate::bean_definition::BeanDefinition;
use crate::bean_factory::ConfigurableListableBeanFactory;
use crate::error::ContainerResult;

/// BeanPostProcessor trait
///
/// 钩子按以下顺序调用：
/// 1. `post_process_before_instantiation`：返回 `Some` 时跳过默认的创建流程
/// 2. `post_process_merged_bean_definition`：实例化前调整合并后的定义
/// 3. `post_process_after_instantiation`：返回 `false` 时跳过属性填充
/// 4. `post_process_before_initialization`：init 回调之前
/// 5. `post_process_after_initialization`：init 回调之后，可以替换实例（例如创建 AOP 代理）
/// 6. `post_process_before_destruction`：销毁之前
///
/// 多个处理器按 `order()` 升序执行
pub trait BeanPostProcessor: Send + Sync {
    fn post_process_before_instantiation(
        &self,
        _definition: &BeanDefinition,
        _bean_name: &str,
    ) -> ContainerResult<Option<BeanInstance>> {
        Ok(None)
    }

    fn post_process_merged_bean_definition(
        &self,
        _definition: &mut BeanDefinition,
        _bean_name: &str,
    ) -> ContainerResult<()> {
        Ok(())
    }

    fn post_process_after_instantiation(&self, _bean: &mut dyn Bean, _bean_name: &str) -> ContainerResult<bool> {
        Ok(true)
    }

    fn post_process_before_initialization(&self, _bean: &mut dyn Bean, _bean_name: &str) -> ContainerResult<()> {
        Ok(())
    }

    /// 返回处理后的实例（可以是原实例，也可以是包装后的代理）
    fn post_process_after_initialization(
        &self,
        bean: BeanInstance,
        _bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        Ok(bean)
    }

    fn post_process_before_destruction(&self, _bean: &BeanInstance, _bean_name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// 处理器名称（用于日志）
    fn name(&self) -> &str {
        "BeanPostProcessor"
    }

    /// 优先级（数字越小越先执行）
    fn order(&self) -> i32 {
        1000
    }
}

/// BeanFactoryPostProcessor trait
///
/// 在刷新阶段、单例预实例化之前调用，可以修改 Bean 定义或注册新的定义
pub trait BeanFactoryPostProcessor: Send + Sync {
    fn post_process_bean_factory(&self, factory: &dyn ConfigurableListableBeanFactory) -> ContainerResult<()>;

    fn order(&self) -> i32 {
        0
    }
}
