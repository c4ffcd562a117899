//! 共享文件夹同步
//!
//! 在本地工作目录、本地暂存镜像和云端目录之间同步命名的文件夹，
//! 支持逐文件同步（as-is）和整个文件夹打包加密后同步（archive）两种方式。

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{
    load_shared_folders_configuration, AppConfig, FilterOptions, FolderSettings, FolderType,
    RemoteKind, RemoteSettings, SharedFolderConfig,
};
pub use core::{run_all, Command, FolderManager, MirrorOptions, MirrorReport, PendingRemovals};
pub use error::SyncError;

/// 平台相关的默认目录
pub mod dirs {
    use std::path::PathBuf;

    const APP_DIR_NAME: &str = "sharedfolders";

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }

    /// 日志和待删除列表的默认位置
    pub fn data_dir() -> PathBuf {
        config_dir()
            .map(|p| p.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(format!(".{}", APP_DIR_NAME)))
    }
}
