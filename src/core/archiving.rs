//! 归档模式（archive）
//!
//! 云端只保存一个加密归档 `<md5>.dat`，文件名中的 MD5 是内层未加密归档
//! `folder.zip` 的摘要。内容不变时文件名不变，不会重新加密也不会重新上传。
//! `rewrite` 和 `stage` 与 as-is 模式相同。

use crate::config::SharedFolderConfig;
use crate::core::archive::{compress_files, compress_tree, uncompress};
use crate::core::folder::Folder;
use crate::core::manager::{Command, SharedFolderManager};
use crate::core::pending::PendingRemovals;
use crate::core::timing::timed;
use crate::error::SyncError;
use crate::storage::Storage;
use anyhow::{Context, Result};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};

/// 内层未加密归档的文件名
pub const ARCHIVE_FILE_NAME: &str = "folder.zip";
/// 加密归档的文件名模式
pub const HASHED_FILE_PATTERN: &str = r"^[0-9a-f]{32}\.dat$";
/// 加密归档使用的压缩级别（内层已经压缩过）
pub const ENCRYPTED_COMPRESSION_LEVEL: i64 = 1;

pub struct ArchivingSharedFolderManager {
    base: SharedFolderManager,
    temp: Folder,
}

impl ArchivingSharedFolderManager {
    pub fn new(config: SharedFolderConfig, pending: Arc<PendingRemovals>) -> Result<Self, SyncError> {
        let temp_path = config.temp_path().map(|p| p.to_path_buf()).ok_or_else(|| {
            SyncError::config(format!("folder `{}`: archive type requires a temp path", config.name()))
        })?;
        Ok(Self::with_folders(
            SharedFolderManager::new(config, pending),
            Folder::local(temp_path),
        ))
    }

    pub fn with_folders(base: SharedFolderManager, temp: Folder) -> Self {
        Self { base, temp }
    }

    pub fn base(&self) -> &SharedFolderManager {
        &self.base
    }

    pub fn temp(&self) -> &Folder {
        &self.temp
    }

    fn password(&self) -> Result<String, SyncError> {
        self.base.config().password_for_archive().ok_or_else(|| {
            SyncError::config(format!("folder `{}`: archive type requires a salt", self.base.name()))
        })
    }

    /// 把暂存区压缩成 `folder.zip`，再加密成 `<md5>.dat`，返回加密归档的文件名
    ///
    /// 临时区中已有同名加密归档时直接返回，不重新加密。
    pub async fn compress_with_hash(&self) -> Result<String> {
        let password = self.password()?;
        let staging_root = self.base.staging().local_root().await?;
        let temp_root = self.temp.local_root().await?;
        let temp = self.temp.tree().await?;

        let zip_path = temp_root.join(ARCHIVE_FILE_NAME);
        {
            let zip_path = zip_path.clone();
            let entries = tokio::task::spawn_blocking(move || {
                compress_tree(&staging_root, &zip_path, None)
            })
            .await??;
            debug!("已压缩 {} 个条目到 {}", entries, ARCHIVE_FILE_NAME);
        }

        let digest = temp.hash(ARCHIVE_FILE_NAME).await?;
        let hashed_name = format!("{}.dat", digest);

        if temp.exists(&hashed_name).await? {
            info!("{} 已是最新，无需重新加密", hashed_name);
            return Ok(hashed_name);
        }

        let removed = remove_hashed_files(temp.as_ref()).await?;
        if removed > 0 {
            debug!("已删除 {} 个旧的加密归档", removed);
        }

        let target = temp_root.join(&hashed_name);
        tokio::task::spawn_blocking(move || {
            compress_files(
                &[zip_path],
                &target,
                &temp_root,
                Some(password.as_str()),
                Some(ENCRYPTED_COMPRESSION_LEVEL),
            )
        })
        .await??;

        info!("已生成加密归档 {}", hashed_name);
        Ok(hashed_name)
    }

    /// 解密临时区中的加密归档，并用其中的 `folder.zip` 替换暂存区的全部内容
    ///
    /// 密码错误或归档损坏时暂存区保持不变，暂存目录不存在时也不会创建。
    pub async fn uncompress_hashed_file(&self, name: Option<&str>) -> Result<()> {
        let password = self.password()?;
        let temp = self.temp.tree().await?;
        let temp_root = self.temp.local_root().await?;
        let staging_root = self.base.staging().local_path()?;

        let name = match name {
            Some(name) => name.to_string(),
            None => find_hashed_file(temp.as_ref()).await?,
        };

        tokio::task::spawn_blocking(move || -> Result<()> {
            let archive = temp_root.join(&name);
            let extracted = uncompress(&archive, &temp_root, Some(password.as_str()), false)?;
            if !extracted.iter().any(|f| f.as_str() == ARCHIVE_FILE_NAME) {
                return Err(SyncError::MissingPayload {
                    archive: name,
                    expected: ARCHIVE_FILE_NAME.to_string(),
                }
                .into());
            }
            uncompress(&temp_root.join(ARCHIVE_FILE_NAME), &staging_root, None, true)?;
            Ok(())
        })
        .await??;

        Ok(())
    }

    /// 云端 → 临时区（加密归档）→ 暂存区
    pub async fn fetch(&self) -> Result<()> {
        timed(self.base.label(Command::Fetch), async {
            let remote = self.base.remote().tree().await?;
            let temp = self.temp.tree().await?;
            let name = mirror_hashed_file(remote.as_ref(), temp.as_ref(), None).await?;
            self.uncompress_hashed_file(Some(&name)).await
        })
        .await
    }

    /// 暂存区 → 临时区（加密归档）→ 云端
    pub async fn push(&self) -> Result<()> {
        timed(self.base.label(Command::Push), async {
            let name = self.compress_with_hash().await?;
            let temp = self.temp.tree().await?;
            let remote = self.base.remote().tree().await?;
            mirror_hashed_file(temp.as_ref(), remote.as_ref(), Some(&name)).await?;
            Ok(())
        })
        .await
    }

    pub async fn pull(&self) -> Result<()> {
        timed(self.base.label(Command::Pull), async {
            self.fetch().await?;
            self.base.rewrite().await?;
            Ok(())
        })
        .await
    }

    pub async fn dump(&self) -> Result<()> {
        timed(self.base.label(Command::Dump), async {
            self.base.stage().await?;
            self.push().await
        })
        .await
    }
}

fn hashed_file_pattern() -> Result<Regex> {
    Ok(Regex::new(HASHED_FILE_PATTERN)?)
}

/// 列出区域中所有加密归档（任意深度，按路径排序）
async fn list_hashed_files(storage: &dyn Storage) -> Result<Vec<String>> {
    let pattern = hashed_file_pattern()?;
    let mut files: Vec<String> = storage
        .list_files()
        .await?
        .into_iter()
        .filter(|f| !f.is_dir && pattern.is_match(f.file_name()))
        .map(|f| f.path)
        .collect();
    files.sort();
    Ok(files)
}

async fn remove_hashed_files(storage: &dyn Storage) -> Result<usize> {
    let files = list_hashed_files(storage).await?;
    for file in &files {
        storage
            .delete(file)
            .await
            .with_context(|| format!("无法删除旧的加密归档 {}", file))?;
    }
    Ok(files.len())
}

/// 查找区域中唯一的加密归档，数量不是恰好一个时报错并列出找到的文件
pub async fn find_hashed_file(storage: &dyn Storage) -> Result<String> {
    let mut files = list_hashed_files(storage).await?;
    if files.len() != 1 {
        return Err(SyncError::HashedArtifact {
            area: storage.name().to_string(),
            files,
        }
        .into());
    }
    Ok(files.remove(0))
}

/// 把加密归档从 `src` 复制到 `dst`，返回归档文件名
///
/// 目标中已有同名归档时不传输；否则先删除目标中的旧归档再复制，
/// 并尽量保留修改时间。
pub async fn mirror_hashed_file(
    src: &dyn Storage,
    dst: &dyn Storage,
    name: Option<&str>,
) -> Result<String> {
    let name = match name {
        Some(name) => name.to_string(),
        None => find_hashed_file(src).await?,
    };

    if dst.exists(&name).await? {
        info!("{} 在 {} 中已是最新", name, dst.name());
        return Ok(name);
    }

    let removed = remove_hashed_files(dst).await?;
    if removed > 0 {
        debug!("已从 {} 删除 {} 个旧的加密归档", dst.name(), removed);
    }

    let data = src
        .read(&name)
        .await
        .with_context(|| format!("读取 {} 失败 ({})", name, src.name()))?;
    let size = data.len();
    dst.write(&name, data)
        .await
        .with_context(|| format!("写入 {} 失败 ({})", name, dst.name()))?;

    if let Some(meta) = src.stat(&name).await? {
        dst.set_modified_time(&name, meta.modified_time).await?;
    }

    info!("已传输 {} ({} 字节): {} -> {}", name, size, src.name(), dst.name());
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;

    const HASH_A: &str = "0123456789abcdef0123456789abcdef.dat";
    const HASH_B: &str = "fedcba9876543210fedcba9876543210.dat";

    #[test]
    fn test_hashed_file_pattern() {
        let pattern = hashed_file_pattern().unwrap();
        assert!(pattern.is_match(HASH_A));
        assert!(!pattern.is_match("0123456789ABCDEF0123456789ABCDEF.dat"));
        assert!(!pattern.is_match("folder.zip"));
        assert!(!pattern.is_match("abc.dat"));
        assert!(!pattern.is_match(&format!("{}.partial", HASH_A)));
    }

    #[tokio::test]
    async fn test_find_hashed_file_requires_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        storage.write("folder.zip", b"z".to_vec()).await.unwrap();

        let err = find_hashed_file(&storage).await.unwrap_err();
        match err.downcast_ref::<SyncError>() {
            Some(SyncError::HashedArtifact { files, .. }) => assert!(files.is_empty()),
            other => panic!("unexpected error: {:?}", other),
        }

        storage.write(HASH_A, b"a".to_vec()).await.unwrap();
        assert_eq!(find_hashed_file(&storage).await.unwrap(), HASH_A);

        storage.write(&format!("nested/{}", HASH_B), b"b".to_vec()).await.unwrap();
        let err = find_hashed_file(&storage).await.unwrap_err();
        match err.downcast_ref::<SyncError>() {
            Some(SyncError::HashedArtifact { files, .. }) => {
                assert_eq!(files, &vec![HASH_A.to_string(), format!("nested/{}", HASH_B)]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mirror_hashed_file_replaces_stale_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let src = LocalStorage::new(dir.path().join("src")).unwrap();
        let dst = LocalStorage::new(dir.path().join("dst")).unwrap();

        src.write(HASH_B, b"new".to_vec()).await.unwrap();
        dst.write(HASH_A, b"old".to_vec()).await.unwrap();
        dst.write("unrelated.txt", b"keep".to_vec()).await.unwrap();

        let name = mirror_hashed_file(&src, &dst, None).await.unwrap();
        assert_eq!(name, HASH_B);
        assert!(!dst.exists(HASH_A).await.unwrap());
        assert_eq!(dst.read(HASH_B).await.unwrap(), b"new");
        assert!(dst.exists("unrelated.txt").await.unwrap());

        let src_meta = src.stat(HASH_B).await.unwrap().unwrap();
        let dst_meta = dst.stat(HASH_B).await.unwrap().unwrap();
        assert_eq!(src_meta.modified_time, dst_meta.modified_time);
    }

    #[tokio::test]
    async fn test_mirror_hashed_file_skips_existing_name() {
        let dir = tempfile::tempdir().unwrap();
        let src = LocalStorage::new(dir.path().join("src")).unwrap();
        let dst = LocalStorage::new(dir.path().join("dst")).unwrap();

        src.write(HASH_A, b"content".to_vec()).await.unwrap();
        dst.write(HASH_A, b"already there".to_vec()).await.unwrap();

        mirror_hashed_file(&src, &dst, Some(HASH_A)).await.unwrap();
        // 同名即视为相同内容，不会重新传输
        assert_eq!(dst.read(HASH_A).await.unwrap(), b"already there");
    }

    fn archive_manager(root: &std::path::Path) -> ArchivingSharedFolderManager {
        let remote = crate::config::RemoteSettings {
            root: Some(root.join("cloud").to_string_lossy().to_string()),
            ..Default::default()
        };
        let config = SharedFolderConfig::builder("notes")
            .local_path(root.join("local").to_string_lossy())
            .folder_type(crate::config::FolderType::Archive)
            .salt("salt")
            .remote(crate::config::RemoteKind::LocalDir, remote)
            .remote_root_path("Sync")
            .staging_root_path(root.join("staging").to_string_lossy())
            .temp_root_path(root.join("temp").to_string_lossy())
            .build()
            .unwrap();
        let pending = Arc::new(PendingRemovals::load(&root.join("state")).unwrap());
        ArchivingSharedFolderManager::new(config, pending).unwrap()
    }

    #[tokio::test]
    async fn test_compress_with_hash_is_stable_without_reencrypting() {
        let dir = tempfile::tempdir().unwrap();
        let staging = LocalStorage::new(dir.path().join("staging/notes")).unwrap();
        staging.write("todo.md", b"- buy milk".to_vec()).await.unwrap();
        staging.write("journal/day1.md", b"hello".to_vec()).await.unwrap();

        let manager = archive_manager(dir.path());
        let first = manager.compress_with_hash().await.unwrap();
        let artifact = dir.path().join("temp/notes").join(&first);
        let encrypted = std::fs::read(&artifact).unwrap();

        let second = manager.compress_with_hash().await.unwrap();
        assert_eq!(second, first);
        // AES 每次加密使用随机 salt，字节相同说明没有重新加密
        assert_eq!(std::fs::read(&artifact).unwrap(), encrypted);

        staging.write("todo.md", b"- buy milk\n- call home".to_vec()).await.unwrap();
        let third = manager.compress_with_hash().await.unwrap();
        assert_ne!(third, first);
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn test_failed_extraction_does_not_create_staging() {
        let dir = tempfile::tempdir().unwrap();
        let temp = LocalStorage::new(dir.path().join("temp/notes")).unwrap();
        temp.write(HASH_A, b"not a zip".to_vec()).await.unwrap();

        let manager = archive_manager(dir.path());
        let err = manager.uncompress_hashed_file(None).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::Archive { .. })));
        assert!(!dir.path().join("staging/notes").exists());
    }
}
