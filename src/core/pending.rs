//! 待删除文件列表
//!
//! 镜像时因权限错误（文件被占用等）无法覆盖或删除的本地路径记录在这里，
//! 下次启动时在任何同步操作之前重试删除。列表保存在状态目录下的
//! `files_to_remove.txt`，每行一个路径，每次变更立即整体写回。

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub const PENDING_FILE_NAME: &str = "files_to_remove.txt";

pub struct PendingRemovals {
    file_path: PathBuf,
    paths: Mutex<BTreeSet<PathBuf>>,
}

impl PendingRemovals {
    /// 从状态目录加载列表，文件不存在时为空
    pub fn load(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("无法创建状态目录 {}", state_dir.display()))?;

        let file_path = state_dir.join(PENDING_FILE_NAME);
        let paths = match fs::read_to_string(&file_path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("无法读取 {}", file_path.display())))
            }
        };

        debug!("加载待删除列表: {} 个路径", paths.len());
        Ok(Self {
            file_path,
            paths: Mutex::new(paths),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().iter().cloned().collect()
    }

    /// 记录一个路径并立即保存，已存在时返回 `false`
    pub fn add(&self, path: impl Into<PathBuf>) -> Result<bool> {
        let path = path.into();
        let mut paths = self.lock();
        if !paths.insert(path.clone()) {
            return Ok(false);
        }
        warn!("无法删除，稍后重试: {}", path.display());
        self.persist(&paths)?;
        Ok(true)
    }

    /// 重试删除全部路径，返回成功删除的数量
    ///
    /// 已经不存在的路径视为删除成功；删除失败的路径保留到下次。
    pub fn retry_all(&self) -> Result<usize> {
        let mut paths = self.lock();
        if paths.is_empty() {
            return Ok(0);
        }

        let before = paths.len();
        paths.retain(|path| match remove_path(path) {
            Ok(()) => false,
            Err(e) => {
                warn!("仍无法删除 {}: {}", path.display(), e);
                true
            }
        });
        let removed = before - paths.len();

        self.persist(&paths)?;
        info!("已删除 {} 个待删除文件，剩余 {} 个", removed, paths.len());
        Ok(removed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<PathBuf>> {
        // 持锁期间只做内存操作和小文件写入，中毒时沿用内部数据
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, paths: &BTreeSet<PathBuf>) -> Result<()> {
        let mut content = String::new();
        for path in paths {
            content.push_str(&path.to_string_lossy());
            content.push('\n');
        }
        fs::write(&self.file_path, content)
            .with_context(|| format!("无法保存 {}", self.file_path.display()))
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
