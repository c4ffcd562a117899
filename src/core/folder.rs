//! 文件夹句柄
//!
//! [`Folder`] 记录一棵目录树的位置，第一次访问时才真正打开（必要时创建目录），
//! 之后一直复用同一个存储实例。

use crate::config::{RemoteKind, RemoteSettings};
use crate::error::SyncError;
use crate::storage::{LocalStorage, RemoteStorage, Storage};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// 打开目录树的能力：本地目录或云端路径各实现一次
#[async_trait]
pub trait TreeOpener: Send + Sync {
    /// 确保根目录存在并返回限定在该目录下的存储
    async fn open(&self) -> Result<Arc<dyn Storage>>;

    /// 用于日志的位置描述
    fn locator(&self) -> String;

    /// 本地磁盘上的根目录，不打开目录树
    fn local_path(&self) -> Option<PathBuf> {
        None
    }
}

/// 本地目录
pub struct LocalTree {
    path: PathBuf,
}

impl LocalTree {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TreeOpener for LocalTree {
    async fn open(&self) -> Result<Arc<dyn Storage>> {
        let path = self.path.clone();
        let storage = tokio::task::spawn_blocking(move || LocalStorage::new(path)).await??;
        Ok(Arc::new(storage))
    }

    fn locator(&self) -> String {
        self.path.display().to_string()
    }

    fn local_path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

/// 云端路径
pub struct RemoteTree {
    kind: RemoteKind,
    settings: RemoteSettings,
    path: String,
}

impl RemoteTree {
    pub fn new(kind: RemoteKind, settings: RemoteSettings, path: impl Into<String>) -> Self {
        Self {
            kind,
            settings,
            path: path.into(),
        }
    }
}

#[async_trait]
impl TreeOpener for RemoteTree {
    async fn open(&self) -> Result<Arc<dyn Storage>> {
        let storage = RemoteStorage::open(self.kind, &self.settings, &self.path).await?;
        Ok(Arc::new(storage))
    }

    fn locator(&self) -> String {
        format!("{}:{}", self.kind, self.path)
    }
}

/// 延迟打开、只打开一次的目录树
pub struct Folder {
    opener: Box<dyn TreeOpener>,
    tree: OnceCell<Arc<dyn Storage>>,
}

impl Folder {
    pub fn new(opener: impl TreeOpener + 'static) -> Self {
        Self {
            opener: Box::new(opener),
            tree: OnceCell::new(),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::new(LocalTree::new(path))
    }

    pub fn remote(kind: RemoteKind, settings: RemoteSettings, path: impl Into<String>) -> Self {
        Self::new(RemoteTree::new(kind, settings, path))
    }

    /// 获取目录树，第一次调用时打开；打开失败不缓存，下次调用会重试
    pub async fn tree(&self) -> Result<Arc<dyn Storage>> {
        let tree = self
            .tree
            .get_or_try_init(|| async {
                debug!("打开目录树: {}", self.opener.locator());
                self.opener.open().await
            })
            .await?;
        Ok(tree.clone())
    }

    /// 目录树在本地磁盘上的根目录，云端目录树返回 [`SyncError::NotLocal`]
    pub async fn local_root(&self) -> Result<PathBuf> {
        let tree = self.tree().await?;
        tree.sys_path("")
            .ok_or_else(|| SyncError::NotLocal(tree.name().to_string()).into())
    }

    /// 本地目录树的根目录，不打开（也不创建）目录
    pub fn local_path(&self) -> Result<PathBuf, SyncError> {
        self.opener
            .local_path()
            .ok_or_else(|| SyncError::NotLocal(self.opener.locator()))
    }

    pub fn is_open(&self) -> bool {
        self.tree.initialized()
    }

    pub fn locator(&self) -> String {
        self.opener.locator()
    }
}

impl std::fmt::Debug for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Folder")
            .field("locator", &self.opener.locator())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingOpener {
        root: PathBuf,
        opened: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TreeOpener for CountingOpener {
        async fn open(&self) -> Result<Arc<dyn Storage>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(LocalStorage::new(&self.root)?))
        }

        fn locator(&self) -> String {
            "counting".to_string()
        }
    }

    #[tokio::test]
    async fn test_tree_is_opened_once() {
        let dir = tempfile::tempdir().unwrap();
        let opened = Arc::new(AtomicUsize::new(0));
        let folder = Folder::new(CountingOpener {
            root: dir.path().join("t"),
            opened: opened.clone(),
        });

        assert!(!folder.is_open());
        let first = folder.tree().await.unwrap();
        let second = folder.tree().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_folder_creates_directory_without_touching_content() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a/b");
        let folder = Folder::local(&root);
        assert_eq!(folder.local_path().unwrap(), root);
        assert!(!root.exists());

        let tree = folder.tree().await.unwrap();
        assert!(root.is_dir());
        tree.write("keep.txt", b"1".to_vec()).await.unwrap();

        // 再次访问不会清空已有内容
        let again = folder.tree().await.unwrap();
        assert!(again.exists("keep.txt").await.unwrap());
        assert_eq!(folder.local_root().await.unwrap(), root);
    }

    #[tokio::test]
    async fn test_remote_folder_is_not_local() {
        let dir = tempfile::tempdir().unwrap();
        let settings = RemoteSettings {
            root: Some(dir.path().to_string_lossy().to_string()),
            ..Default::default()
        };
        let folder = Folder::remote(RemoteKind::LocalDir, settings, "Sync/notes");
        assert!(matches!(folder.local_path(), Err(SyncError::NotLocal(_))));
        let err = folder.local_root().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::NotLocal(_))));
        assert!(dir.path().join("Sync/notes").is_dir());
    }
}
