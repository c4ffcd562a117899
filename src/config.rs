//! 共享文件夹配置
//!
//! 配置文件是一个 YAML 文档：`defaults` 给出公共默认值，`shared_folders`
//! 按名称列出每个文件夹自己的覆盖值（同名键以文件夹为准）。每个文件夹
//! 经过 [`SharedFolderConfigBuilder`] 合并、校验并计算派生路径，得到一个
//! 不可变的 [`SharedFolderConfig`]。

use crate::error::SyncError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 默认配置文件位置（相对当前目录）
pub const DEFAULT_CONFIG_FILE: &str = "./config/shared_folders.yml";

/// 同步方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderType {
    /// 逐个文件同步
    AsIs,
    /// 打包成一个加密归档后同步
    Archive,
}

impl FromStr for FolderType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "as-is" => Ok(FolderType::AsIs),
            "archive" => Ok(FolderType::Archive),
            other => Err(SyncError::config(format!(
                "unknown shared folder type `{}` (expected `as-is` or `archive`)",
                other
            ))),
        }
    }
}

impl fmt::Display for FolderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FolderType::AsIs => write!(f, "as-is"),
            FolderType::Archive => write!(f, "archive"),
        }
    }
}

/// 云端存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    GoogleDrive,
    S3,
    WebDav,
    /// 用本地（或挂载的）目录充当云端
    LocalDir,
}

impl FromStr for RemoteKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google-drive" => Ok(RemoteKind::GoogleDrive),
            "s3" => Ok(RemoteKind::S3),
            "webdav" => Ok(RemoteKind::WebDav),
            "local-dir" => Ok(RemoteKind::LocalDir),
            other => Err(SyncError::config(format!("unknown remote_kind `{}`", other))),
        }
    }
}

impl fmt::Display for RemoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteKind::GoogleDrive => write!(f, "google-drive"),
            RemoteKind::S3 => write!(f, "s3"),
            RemoteKind::WebDav => write!(f, "webdav"),
            RemoteKind::LocalDir => write!(f, "local-dir"),
        }
    }
}

/// 云端存储连接参数，按 `remote_kind` 取用其中的字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// 云端根目录（local-dir 必填，其余可选）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// 一组可选设置，`defaults` 和每个文件夹条目共用这个结构
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub folder_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_root_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_sub_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_root_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_sub_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_root_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_dirs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_dirs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSettings>,
}

impl FolderSettings {
    /// 逐键合并：自身有值的键优先，否则取 `defaults`
    pub fn merged_over(self, defaults: &FolderSettings) -> FolderSettings {
        let d = defaults.clone();
        FolderSettings {
            local_path: self.local_path.or(d.local_path),
            folder_type: self.folder_type.or(d.folder_type),
            remote_kind: self.remote_kind.or(d.remote_kind),
            remote_root_path: self.remote_root_path.or(d.remote_root_path),
            remote_sub_path: self.remote_sub_path.or(d.remote_sub_path),
            remote_path: self.remote_path.or(d.remote_path),
            staging_root_path: self.staging_root_path.or(d.staging_root_path),
            staging_sub_path: self.staging_sub_path.or(d.staging_sub_path),
            staging_path: self.staging_path.or(d.staging_path),
            temp_root_path: self.temp_root_path.or(d.temp_root_path),
            temp_path: self.temp_path.or(d.temp_path),
            salt: self.salt.or(d.salt),
            filter: self.filter.or(d.filter),
            exclude: self.exclude.or(d.exclude),
            filter_dirs: self.filter_dirs.or(d.filter_dirs),
            exclude_dirs: self.exclude_dirs.or(d.exclude_dirs),
            max_depth: self.max_depth.or(d.max_depth),
            remote: self.remote.or(d.remote),
        }
    }
}

/// 路径过滤条件，原样传给镜像操作
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// 只包含匹配这些模式的文件名
    pub filter: Vec<String>,
    /// 排除匹配这些模式的文件名
    pub exclude: Vec<String>,
    /// 只进入匹配这些模式的目录
    pub filter_dirs: Vec<String>,
    /// 不进入匹配这些模式的目录
    pub exclude_dirs: Vec<String>,
    /// 最大递归深度，1 表示只处理根目录下的文件
    pub max_depth: Option<usize>,
}

impl FilterOptions {
    /// 只从非空的键构建；全部为空时返回 `None`，即不过滤
    fn from_settings(settings: &FolderSettings) -> Result<Option<Self>, SyncError> {
        fn non_empty(list: &Option<Vec<String>>) -> Vec<String> {
            list.iter()
                .flatten()
                .filter(|p| !p.trim().is_empty())
                .cloned()
                .collect()
        }

        let options = FilterOptions {
            filter: non_empty(&settings.filter),
            exclude: non_empty(&settings.exclude),
            filter_dirs: non_empty(&settings.filter_dirs),
            exclude_dirs: non_empty(&settings.exclude_dirs),
            max_depth: settings.max_depth.filter(|d| *d > 0),
        };

        if options.is_empty() {
            return Ok(None);
        }

        for pattern in options
            .filter
            .iter()
            .chain(&options.exclude)
            .chain(&options.filter_dirs)
            .chain(&options.exclude_dirs)
        {
            globset::Glob::new(pattern).map_err(|e| {
                SyncError::config(format!("invalid filter pattern `{}`: {}", pattern, e))
            })?;
        }

        Ok(Some(options))
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
            && self.exclude.is_empty()
            && self.filter_dirs.is_empty()
            && self.exclude_dirs.is_empty()
            && self.max_depth.is_none()
    }
}

/// 一个共享文件夹的完整配置，构建后不可变
#[derive(Debug, Clone)]
pub struct SharedFolderConfig {
    name: String,
    local_path: PathBuf,
    folder_type: FolderType,
    remote_kind: RemoteKind,
    remote: RemoteSettings,
    remote_path: String,
    staging_path: PathBuf,
    temp_path: Option<PathBuf>,
    salt: Option<String>,
    filters: Option<FilterOptions>,
}

impl SharedFolderConfig {
    pub fn builder(name: impl Into<String>) -> SharedFolderConfigBuilder {
        SharedFolderConfigBuilder {
            name: name.into(),
            defaults: FolderSettings::default(),
            overrides: FolderSettings::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn folder_type(&self) -> FolderType {
        self.folder_type
    }

    pub fn remote_kind(&self) -> RemoteKind {
        self.remote_kind
    }

    pub fn remote_settings(&self) -> &RemoteSettings {
        &self.remote
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// 归档模式的临时区，as-is 模式为 `None`
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp_path.as_deref()
    }

    pub fn filters(&self) -> Option<&FilterOptions> {
        self.filters.as_ref()
    }

    /// 归档密码：`<salt>~<文件夹名首字母小写>`
    ///
    /// 必须保持稳定，否则已经上传的归档将无法解密。
    pub fn password_for_archive(&self) -> Option<String> {
        let initial: String = self
            .name
            .chars()
            .next()
            .map(|c| c.to_lowercase().collect())
            .unwrap_or_default();
        self.salt
            .as_ref()
            .map(|salt| format!("{}~{}", salt, initial))
    }
}

/// 构建器：默认值 → 覆盖值 → 校验 → 派生字段
#[derive(Debug, Clone)]
pub struct SharedFolderConfigBuilder {
    name: String,
    defaults: FolderSettings,
    overrides: FolderSettings,
}

impl SharedFolderConfigBuilder {
    pub fn defaults(mut self, defaults: &FolderSettings) -> Self {
        self.defaults = defaults.clone();
        self
    }

    pub fn overrides(mut self, overrides: FolderSettings) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn local_path(mut self, path: impl Into<String>) -> Self {
        self.overrides.local_path = Some(path.into());
        self
    }

    pub fn folder_type(mut self, folder_type: FolderType) -> Self {
        self.overrides.folder_type = Some(folder_type.to_string());
        self
    }

    pub fn salt(mut self, salt: impl Into<String>) -> Self {
        self.overrides.salt = Some(salt.into());
        self
    }

    pub fn remote(mut self, kind: RemoteKind, settings: RemoteSettings) -> Self {
        self.overrides.remote_kind = Some(kind.to_string());
        self.overrides.remote = Some(settings);
        self
    }

    pub fn remote_root_path(mut self, path: impl Into<String>) -> Self {
        self.overrides.remote_root_path = Some(path.into());
        self
    }

    pub fn staging_root_path(mut self, path: impl Into<String>) -> Self {
        self.overrides.staging_root_path = Some(path.into());
        self
    }

    pub fn temp_root_path(mut self, path: impl Into<String>) -> Self {
        self.overrides.temp_root_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<SharedFolderConfig, SyncError> {
        let name = self.name.trim().to_string();
        validate_name(&name)?;

        let settings = self.overrides.merged_over(&self.defaults);

        let local_path = settings
            .local_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| SyncError::config(format!("folder `{}`: local_path is required", name)))?;

        let folder_type: FolderType = settings.folder_type.as_deref().unwrap_or("as-is").parse()?;
        let remote_kind: RemoteKind = settings
            .remote_kind
            .as_deref()
            .unwrap_or("google-drive")
            .parse()?;

        let remote_path = match settings.remote_path.as_deref() {
            Some(path) => path.to_string(),
            None => {
                let root = settings.remote_root_path.as_deref().ok_or_else(|| {
                    SyncError::config(format!(
                        "folder `{}`: remote_path or remote_root_path is required",
                        name
                    ))
                })?;
                join_remote(&[root, settings.remote_sub_path.as_deref().unwrap_or(""), &name])
            }
        };

        let staging_path = match settings.staging_path.as_deref() {
            Some(path) => PathBuf::from(path),
            None => {
                let root = settings.staging_root_path.as_deref().ok_or_else(|| {
                    SyncError::config(format!(
                        "folder `{}`: staging_path or staging_root_path is required",
                        name
                    ))
                })?;
                join_local(root, settings.staging_sub_path.as_deref(), &name)
            }
        };

        let salt = settings.salt.clone().filter(|s| !s.is_empty());
        let temp_path = match folder_type {
            FolderType::AsIs => None,
            FolderType::Archive => {
                if salt.is_none() {
                    return Err(SyncError::config(format!(
                        "folder `{}`: archive type requires a salt",
                        name
                    )));
                }
                let path = match settings.temp_path.as_deref() {
                    Some(path) => PathBuf::from(path),
                    None => {
                        let root = settings.temp_root_path.as_deref().ok_or_else(|| {
                            SyncError::config(format!(
                                "folder `{}`: archive type requires temp_path or temp_root_path",
                                name
                            ))
                        })?;
                        join_local(root, None, &name)
                    }
                };
                Some(path)
            }
        };

        let filters = FilterOptions::from_settings(&settings)?;

        Ok(SharedFolderConfig {
            name,
            local_path,
            folder_type,
            remote_kind,
            remote: settings.remote.unwrap_or_default(),
            remote_path,
            staging_path,
            temp_path,
            salt,
            filters,
        })
    }
}

fn validate_name(name: &str) -> Result<(), SyncError> {
    if name.is_empty() {
        return Err(SyncError::config("shared folder name is required"));
    }
    if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(SyncError::config(format!(
            "shared folder name `{}` must be a single path segment",
            name
        )));
    }
    Ok(())
}

/// 拼接远程路径，忽略空段
fn join_remote(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn join_local(root: &str, sub: Option<&str>, name: &str) -> PathBuf {
    let mut path = PathBuf::from(root);
    if let Some(sub) = sub.filter(|s| !s.is_empty()) {
        path.push(sub);
    }
    path.push(name);
    path
}

/// 配置文件内容
#[derive(Debug, Deserialize)]
struct ConfigFile {
    defaults: Option<FolderSettings>,
    shared_folders: Option<serde_yaml::Mapping>,
    state_dir: Option<PathBuf>,
}

/// 加载后的应用配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub folders: Vec<SharedFolderConfig>,
    /// 保存跨次运行状态的目录，未配置时使用默认数据目录
    pub state_dir: Option<PathBuf>,
}

/// 从 YAML 文件加载全部共享文件夹配置
pub fn load_shared_folders_configuration(config_file: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(config_file)
        .with_context(|| format!("无法读取配置文件 {}", config_file.display()))?;
    Ok(parse_shared_folders_configuration(&content)?)
}

/// 解析 YAML 文本，按文件中的顺序返回文件夹配置
pub fn parse_shared_folders_configuration(content: &str) -> Result<AppConfig, SyncError> {
    let file: ConfigFile = serde_yaml::from_str(content)
        .map_err(|e| SyncError::config(format!("invalid YAML: {}", e)))?;

    let defaults = file
        .defaults
        .ok_or_else(|| SyncError::config("missing top-level `defaults` section"))?;
    let shared_folders = file
        .shared_folders
        .ok_or_else(|| SyncError::config("missing top-level `shared_folders` section"))?;

    let mut folders = Vec::with_capacity(shared_folders.len());
    let mut seen = std::collections::HashSet::new();

    for (key, value) in shared_folders {
        let name = key
            .as_str()
            .ok_or_else(|| SyncError::config(format!("folder name must be a string: {:?}", key)))?
            .to_string();
        if !seen.insert(name.clone()) {
            return Err(SyncError::config(format!("duplicate shared folder `{}`", name)));
        }

        // 空条目（`notes:`）等同于没有任何覆盖
        let overrides: FolderSettings = if value.is_null() {
            FolderSettings::default()
        } else {
            serde_yaml::from_value(value)
                .map_err(|e| SyncError::config(format!("folder `{}`: {}", name, e)))?
        };

        let config = SharedFolderConfig::builder(name)
            .defaults(&defaults)
            .overrides(overrides)
            .build()?;
        folders.push(config);
    }

    Ok(AppConfig {
        folders,
        state_dir: file.state_dir,
    })
}
