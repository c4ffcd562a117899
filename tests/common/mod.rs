//! 集成测试共用的沙箱：一个临时目录里模拟多台机器和一个云端目录

#![allow(dead_code)]

use sharedfolders_lib::{
    FolderType, PendingRemovals, RemoteKind, RemoteSettings, SharedFolderConfig,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

pub const SALT: &str = "salt";

pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// 云端（local-dir 后端）中某个文件夹的目录
    pub fn cloud_folder(&self, name: &str) -> PathBuf {
        self.path("cloud/Sync").join(name)
    }

    pub fn local_folder(&self, machine: &str, name: &str) -> PathBuf {
        self.path(machine).join("local").join(name)
    }

    pub fn staging_folder(&self, machine: &str, name: &str) -> PathBuf {
        self.path(machine).join("staging").join(name)
    }

    pub fn temp_folder(&self, machine: &str, name: &str) -> PathBuf {
        self.path(machine).join("temp").join(name)
    }

    pub fn config(&self, machine: &str, name: &str, folder_type: FolderType) -> SharedFolderConfig {
        self.config_with_salt(machine, name, folder_type, SALT)
    }

    pub fn config_with_salt(
        &self,
        machine: &str,
        name: &str,
        folder_type: FolderType,
        salt: &str,
    ) -> SharedFolderConfig {
        let remote = RemoteSettings {
            root: Some(self.path("cloud").to_string_lossy().to_string()),
            ..Default::default()
        };
        SharedFolderConfig::builder(name)
            .local_path(self.local_folder(machine, name).to_string_lossy())
            .folder_type(folder_type)
            .salt(salt)
            .remote(RemoteKind::LocalDir, remote)
            .remote_root_path("Sync")
            .staging_root_path(self.path(machine).join("staging").to_string_lossy())
            .temp_root_path(self.path(machine).join("temp").to_string_lossy())
            .build()
            .unwrap()
    }

    pub fn pending(&self, machine: &str) -> Arc<PendingRemovals> {
        Arc::new(PendingRemovals::load(&self.path(machine).join("state")).unwrap())
    }
}

pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// 目录下所有文件的相对路径和内容（不含目录）
pub fn read_tree(root: &Path) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    if !root.exists() {
        return files;
    }
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            files.insert(relative, fs::read_to_string(entry.path()).unwrap());
        }
    }
    files
}

/// 目录下匹配 `<md5>.dat` 的文件名
pub fn hashed_files(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|name| {
                    name.len() == 36
                        && name.ends_with(".dat")
                        && name[..32].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
                })
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
