//! 错误信息结构
//!
//! 异常通知拿到的是 [`InvocationError`]，这里把它展开成便于记录的结构

use std::error::Error;

use sprig_core::{ErrorKind, InvocationError};

/// 结构化的错误信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,

    /// 错误类型名称；来自调用错误时为 `checked` / `unchecked`
    pub error_type: String,

    /// 错误源链（cause chain），不含错误本身
    pub source_chain: Vec<String>,
}

impl ErrorInfo {
    pub fn from_error<E: Error>(error: &E) -> Self {
        let mut source_chain = Vec::new();
        let mut current = error.source();
        while let Some(source) = current {
            source_chain.push(source.to_string());
            current = source.source();
        }

        Self {
            message: error.to_string(),
            error_type: std::any::type_name::<E>().to_string(),
            source_chain,
        }
    }

    pub fn from_invocation_error(error: &InvocationError) -> Self {
        let error_type = match error.kind() {
            ErrorKind::Checked => "checked",
            ErrorKind::Unchecked => "unchecked",
        };
        Self {
            message: error.inner().to_string(),
            error_type: error_type.to_string(),
            source_chain: error.inner().chain().skip(1).map(|cause| cause.to_string()).collect(),
        }
    }

    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: "Unknown".to_string(),
            source_chain: Vec::new(),
        }
    }

    /// 完整描述（包含源链）
    pub fn full_description(&self) -> String {
        if self.source_chain.is_empty() {
            self.message.clone()
        } else {
            format!("{}\nCaused by:\n  {}", self.message, self.source_chain.join("\n  "))
        }
    }
}
