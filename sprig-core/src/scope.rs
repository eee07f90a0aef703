use std::fmt;
use std::str::FromStr;

/// Bean 的作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// 单例模式 - 容器中只有一个实例
    #[default]
    Singleton,

    /// 原型模式 - 每次请求都创建新实例
    Prototype,
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "singleton" => Ok(Scope::Singleton),
            "prototype" => Ok(Scope::Prototype),
            _ => Err(format!("Invalid scope: {}", s)),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Singleton => write!(f, "singleton"),
            Scope::Prototype => write!(f, "prototype"),
        }
    }
}

/// Bean 的角色
///
/// 基础设施 Bean（切面、事务管理器等）不会被自动代理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// 应用 Bean
    #[default]
    Application,

    /// 配置支撑 Bean
    Support,

    /// 框架内部的基础设施 Bean
    Infrastructure,
}
