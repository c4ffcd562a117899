pub mod local;
pub mod remote;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use local::LocalStorage;
pub use remote::RemoteStorage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 文件信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// 相对根目录的路径，统一使用 `/` 分隔，不带首尾斜杠
    pub path: String,
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
}

impl FileInfo {
    /// 路径最后一段（文件名或目录名）
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// 路径深度，根目录下的条目为 1
    pub fn depth(&self) -> usize {
        self.path.split('/').filter(|s| !s.is_empty()).count()
    }
}

/// 文件元数据（用于快速检查）
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
}

/// 存储抽象接口
///
/// 同步核心只依赖这个接口，本地磁盘和云端存储各实现一次。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 递归列出所有文件和目录
    async fn list_files(&self) -> Result<Vec<FileInfo>>;

    /// 获取文件元数据
    async fn stat(&self, path: &str) -> Result<Option<FileMeta>>;

    /// 读取整个文件
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// 写入整个文件（自动创建父目录）
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 删除文件或目录（目录连同内容一起删除）
    async fn delete(&self, path: &str) -> Result<()>;

    /// 检查文件是否存在
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    /// 创建目录
    async fn create_dir(&self, path: &str) -> Result<()>;

    /// 计算文件内容的 MD5（十六进制小写）
    async fn hash(&self, path: &str) -> Result<String> {
        let data = self.read(path).await?;
        Ok(format!("{:x}", md5::compute(&data)))
    }

    /// 设置文件修改时间，后端不支持时返回 `Ok(false)`
    async fn set_modified_time(&self, _path: &str, _modified_time: i64) -> Result<bool> {
        Ok(false)
    }

    /// 本地磁盘上的实际路径，远程存储返回 `None`
    fn sys_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 规范化相对路径：统一 `/` 分隔，去掉首尾斜杠
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}
