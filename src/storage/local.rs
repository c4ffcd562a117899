use super::{normalize_path, FileInfo, FileMeta, Storage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use filetime::FileTime;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// 本地磁盘存储，根目录不存在时自动创建
pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)
                .with_context(|| format!("无法创建目录 {}", base_path.display()))?;
        }
        let name = format!("local:{}", base_path.display());
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = normalize_path(path);
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// 写入用的临时文件，与目标文件同目录以便原子重命名
    fn partial_path(full_path: &Path) -> PathBuf {
        let file_name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        full_path.with_file_name(format!(".{}.partial", file_name))
    }

    fn unix_secs(metadata: &std::fs::Metadata) -> i64 {
        metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_files(&self) -> Result<Vec<FileInfo>> {
        let base_path = self.base_path.clone();

        if !base_path.exists() {
            return Ok(Vec::new());
        }

        // 使用 spawn_blocking 避免阻塞 async runtime
        let entries = tokio::task::spawn_blocking(move || -> Result<Vec<FileInfo>> {
            let mut files = Vec::new();
            for entry in WalkDir::new(&base_path).min_depth(1).follow_links(false) {
                let entry = entry?;
                let metadata = entry.metadata()?;
                let relative_path = entry
                    .path()
                    .strip_prefix(&base_path)?
                    .to_string_lossy()
                    .to_string();

                files.push(FileInfo {
                    path: normalize_path(&relative_path),
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                    modified_time: Self::unix_secs(&metadata),
                    is_dir: metadata.is_dir(),
                });
            }
            Ok(files)
        })
        .await??;

        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        let full_path = self.resolve_path(path);

        match fs::metadata(&full_path).await {
            Ok(metadata) => Ok(Some(FileMeta {
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified_time: Self::unix_secs(&metadata),
                is_dir: metadata.is_dir(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve_path(path);
        let data = fs::read(&full_path)
            .await
            .with_context(|| format!("读取失败: {}", full_path.display()))?;
        Ok(data)
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let full_path = self.resolve_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名
        let temp_path = Self::partial_path(&full_path);
        let written = match fs::write(&temp_path, data).await {
            Ok(()) => fs::rename(&temp_path, &full_path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(anyhow::Error::new(e).context(format!("写入失败: {}", full_path.display())));
        }

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);

        let metadata = match fs::symlink_metadata(&full_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let removed = if metadata.is_dir() {
            fs::remove_dir_all(&full_path).await
        } else {
            fs::remove_file(&full_path).await
        };
        removed.map_err(|e| anyhow::Error::new(e).context(format!("删除失败: {}", full_path.display())))
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);
        fs::create_dir_all(&full_path).await?;
        Ok(())
    }

    async fn hash(&self, path: &str) -> Result<String> {
        let full_path = self.resolve_path(path);

        // 流式计算，避免把大归档整个读入内存
        let digest = tokio::task::spawn_blocking(move || -> Result<String> {
            let mut file = std::fs::File::open(&full_path)
                .with_context(|| format!("无法打开 {}", full_path.display()))?;
            let mut context = md5::Context::new();
            let mut buffer = vec![0u8; 64 * 1024];
            loop {
                let n = file.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                context.consume(&buffer[..n]);
            }
            Ok(format!("{:x}", context.compute()))
        })
        .await??;

        Ok(digest)
    }

    async fn set_modified_time(&self, path: &str, modified_time: i64) -> Result<bool> {
        let full_path = self.resolve_path(path);
        tokio::task::spawn_blocking(move || {
            filetime::set_file_mtime(&full_path, FileTime::from_unix_time(modified_time, 0))
        })
        .await??;
        Ok(true)
    }

    fn sys_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.resolve_path(path))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a").join("b");
        let storage = LocalStorage::new(&root).unwrap();
        assert!(root.is_dir());
        assert!(storage.list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_read_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        storage.write("sub/note.txt", b"hello".to_vec()).await.unwrap();
        assert_eq!(storage.read("/sub/note.txt").await.unwrap(), b"hello");

        let mut paths: Vec<_> = storage
            .list_files()
            .await
            .unwrap()
            .into_iter()
            .map(|f| (f.path, f.is_dir))
            .collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![("sub".to_string(), true), ("sub/note.txt".to_string(), false)]
        );

        storage.delete("sub").await.unwrap();
        assert!(!storage.exists("sub/note.txt").await.unwrap());
        // 删除不存在的路径不报错
        storage.delete("sub").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        storage.write("a.txt", b"1".to_vec()).await.unwrap();
        storage.write("a.txt", b"22".to_vec()).await.unwrap();

        let files = storage.list_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 2);
    }

    #[tokio::test]
    async fn test_hash_is_md5_hex() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        storage.write("x", b"abc".to_vec()).await.unwrap();
        assert_eq!(
            storage.hash("x").await.unwrap(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[tokio::test]
    async fn test_set_modified_time() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        storage.write("x", b"abc".to_vec()).await.unwrap();

        assert!(storage.set_modified_time("x", 1_600_000_000).await.unwrap());
        let meta = storage.stat("x").await.unwrap().unwrap();
        assert_eq!(meta.modified_time, 1_600_000_000);
    }
}
