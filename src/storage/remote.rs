use super::{normalize_path, FileInfo, FileMeta, Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::config::{RemoteKind, RemoteSettings};
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// 基于 opendal 的云端存储，根目录限定在某个远程子目录
pub struct RemoteStorage {
    operator: Operator,
    name: String,
    /// 写入前是否需要逐级创建父目录（WebDAV 服务器不会自动创建）
    create_parents: bool,
    /// local-dir 后端在磁盘上的根目录，用于设置修改时间
    disk_root: Option<PathBuf>,
}

impl RemoteStorage {
    /// 打开远程目录：先确保目录存在（逐级创建），再返回限定在该子树的存储
    pub async fn open(kind: RemoteKind, settings: &RemoteSettings, path: &str) -> Result<Self> {
        let base_root = settings.root.clone().unwrap_or_else(|| "/".to_string());
        let sub_path = normalize_path(path);

        if !sub_path.is_empty() {
            let base = build_operator(kind, settings, &base_root)?;
            base.create_dir(&format!("{}/", sub_path)).await?;
        }

        let scoped_root = if sub_path.is_empty() {
            base_root.clone()
        } else {
            format!("{}/{}", base_root.trim_end_matches('/'), sub_path)
        };

        let operator = build_operator(kind, settings, &scoped_root)?;
        let name = format!("{}:{}", kind, scoped_root);
        info!("打开远程存储: {}", name);

        let disk_root = (kind == RemoteKind::LocalDir).then(|| PathBuf::from(&scoped_root));

        Ok(Self {
            operator,
            name,
            create_parents: kind == RemoteKind::WebDav,
            disk_root,
        })
    }

    async fn ensure_parents(&self, path: &str) {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 2 {
            return;
        }
        let mut current_path = String::new();
        for part in &parts[..parts.len() - 1] {
            current_path.push_str(part);
            current_path.push('/');
            // 忽略创建目录的错误（可能已存在）
            if let Err(e) = self.operator.create_dir(&current_path).await {
                debug!("创建目录 {} 失败（忽略）: {}", current_path, e);
            }
        }
    }
}

/// 根据后端类型构建 opendal Operator
fn build_operator(kind: RemoteKind, settings: &RemoteSettings, root: &str) -> Result<Operator> {
    let operator = match kind {
        RemoteKind::GoogleDrive => {
            use opendal::services::Gdrive;

            let mut builder = Gdrive::default().root(root);
            // opendal 不接受同时设置两种 token，有 refresh_token 时只用它
            if let (Some(token), None) = (&settings.access_token, &settings.refresh_token) {
                builder = builder.access_token(token);
            }
            if let Some(ref token) = settings.refresh_token {
                if settings.access_token.is_some() {
                    debug!("同时配置了 access_token 和 refresh_token，忽略 access_token");
                }
                let client_id = settings
                    .client_id
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Google Drive refresh_token requires client_id"))?;
                let client_secret = settings.client_secret.as_ref().ok_or_else(|| {
                    anyhow::anyhow!("Google Drive refresh_token requires client_secret")
                })?;
                builder = builder
                    .refresh_token(token)
                    .client_id(client_id)
                    .client_secret(client_secret);
            }
            if settings.access_token.is_none() && settings.refresh_token.is_none() {
                return Err(anyhow::anyhow!(
                    "Google Drive storage requires access_token or refresh_token"
                ));
            }
            Operator::new(builder)?.finish()
        }
        RemoteKind::S3 => {
            use opendal::services::S3;

            let bucket = settings
                .bucket
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires bucket"))?;
            let region = settings
                .region
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires region"))?;
            let access_key = settings
                .access_key
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires access_key"))?;
            let secret_key = settings
                .secret_key
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires secret_key"))?;

            let mut builder = S3::default()
                .bucket(bucket)
                .region(region)
                .access_key_id(access_key)
                .secret_access_key(secret_key)
                .root(root);
            if let Some(ref ep) = settings.endpoint {
                builder = builder.endpoint(ep);
            }
            Operator::new(builder)?.finish()
        }
        RemoteKind::WebDav => {
            use opendal::services::Webdav;

            let endpoint = settings
                .endpoint
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("WebDAV storage requires endpoint"))?;

            let mut builder = Webdav::default().endpoint(endpoint).root(root);
            if let Some(ref username) = settings.username {
                builder = builder.username(username);
            }
            if let Some(ref password) = settings.password {
                builder = builder.password(password);
            }
            Operator::new(builder)?.finish()
        }
        RemoteKind::LocalDir => {
            use opendal::services::Fs;

            if settings.root.is_none() {
                return Err(anyhow::anyhow!("local-dir storage requires root"));
            }
            Operator::new(Fs::default().root(root))?.finish()
        }
    };

    // 添加超时层
    Ok(operator.layer(
        TimeoutLayer::default()
            .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
    ))
}

#[async_trait]
impl Storage for RemoteStorage {
    async fn list_files(&self) -> Result<Vec<FileInfo>> {
        let mut files = Vec::new();

        // 使用 lister_with 进行递归列表
        let mut lister = self
            .operator
            .lister_with("")
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let path = normalize_path(entry.path());

            // 跳过根目录
            if path.is_empty() {
                continue;
            }

            let meta = entry.metadata();

            files.push(FileInfo {
                path,
                size: if meta.is_dir() { 0 } else { meta.content_length() },
                modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
                is_dir: meta.is_dir(),
            });
        }

        Ok(files)
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        match self.operator.stat(&normalize_path(path)).await {
            Ok(meta) => Ok(Some(FileMeta {
                size: meta.content_length(),
                modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
                is_dir: meta.is_dir(),
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let data = self.operator.read(&normalize_path(path)).await?;
        Ok(data.to_vec())
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = normalize_path(path);
        if self.create_parents {
            self.ensure_parents(&path).await;
        }
        self.operator.write(&path, data).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(anyhow::anyhow!("refusing to delete the root of {}", self.name));
        }

        match self.stat(&path).await? {
            Some(meta) if !meta.is_dir => {
                self.operator.delete(&path).await?;
            }
            _ => match self.operator.remove_all(&format!("{}/", path)).await {
                Ok(()) => {}
                Err(e) if e.kind() == opendal::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let dir_path = format!("{}/", normalize_path(path));
        self.operator.create_dir(&dir_path).await?;
        Ok(())
    }

    async fn set_modified_time(&self, path: &str, modified_time: i64) -> Result<bool> {
        let Some(root) = &self.disk_root else {
            return Ok(false);
        };
        let full_path = root.join(normalize_path(path));
        tokio::task::spawn_blocking(move || {
            filetime::set_file_mtime(&full_path, filetime::FileTime::from_unix_time(modified_time, 0))
        })
        .await??;
        Ok(true)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
