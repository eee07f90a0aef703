//! 资源抽象
//!
//! 配置文件等外部输入通过 [`ResourceLoader`] 按位置字符串加载：
//! - `file:/path/app.toml` 或普通路径 -> [`FileSystemResource`]
//! - `memory:name` -> 预先注册的 [`ByteArrayResource`]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ContainerError, ContainerResult};

pub const FILE_URL_PREFIX: &str = "file:";
pub const MEMORY_URL_PREFIX: &str = "memory:";

/// 底层资源
pub trait Resource: Send + Sync {
    /// 用于日志和错误信息的描述
    fn description(&self) -> String;

    fn exists(&self) -> bool;

    fn read_to_string(&self) -> ContainerResult<String>;
}

/// 文件系统中的资源
#[derive(Debug, Clone)]
pub struct FileSystemResource {
    path: PathBuf,
}

impl FileSystemResource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Resource for FileSystemResource {
    fn description(&self) -> String {
        format!("file [{}]", self.path.display())
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn read_to_string(&self) -> ContainerResult<String> {
        std::fs::read_to_string(&self.path).map_err(|source| ContainerError::Resource {
            location: self.path.display().to_string(),
            source,
        })
    }
}

/// 内存中的资源
#[derive(Debug, Clone)]
pub struct ByteArrayResource {
    bytes: Arc<[u8]>,
    description: String,
}

impl ByteArrayResource {
    pub fn new(bytes: impl Into<Vec<u8>>, description: impl Into<String>) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
            description: description.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Resource for ByteArrayResource {
    fn description(&self) -> String {
        format!("byte array resource [{}]", self.description)
    }

    fn exists(&self) -> bool {
        true
    }

    fn read_to_string(&self) -> ContainerResult<String> {
        String::from_utf8(self.bytes.to_vec()).map_err(|e| ContainerError::Resource {
            location: self.description.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }
}

/// 按位置加载资源
pub trait ResourceLoader: Send + Sync {
    fn get_resource(&self, location: &str) -> Arc<dyn Resource>;
}

/// 默认资源加载器
#[derive(Default)]
pub struct DefaultResourceLoader {
    in_memory: RwLock<HashMap<String, ByteArrayResource>>,
}

impl DefaultResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 `memory:<name>` 可以访问的资源
    pub fn register(&self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        let name = name.into();
        let resource = ByteArrayResource::new(content, name.clone());
        self.in_memory.write().insert(name, resource);
    }
}

impl ResourceLoader for DefaultResourceLoader {
    fn get_resource(&self, location: &str) -> Arc<dyn Resource> {
        if let Some(name) = location.strip_prefix(MEMORY_URL_PREFIX) {
            return match self.in_memory.read().get(name) {
                Some(resource) => Arc::new(resource.clone()),
                None => Arc::new(MissingResource(location.to_string())),
            };
        }
        let path = location.strip_prefix(FILE_URL_PREFIX).unwrap_or(location);
        Arc::new(FileSystemResource::new(path))
    }
}

struct MissingResource(String);

impl Resource for MissingResource {
    fn description(&self) -> String {
        format!("missing resource [{}]", self.0)
    }

    fn exists(&self) -> bool {
        false
    }

    fn read_to_string(&self) -> ContainerResult<String> {
        Err(ContainerError::Resource {
            location: self.0.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no in-memory resource registered"),
        })
    }
}
