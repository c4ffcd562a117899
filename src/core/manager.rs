//! 同步管理器
//!
//! 每个共享文件夹有三个区域：本地工作目录、本地暂存镜像和云端目录。
//! 六个命令在这些区域之间做单向镜像：
//!
//! | 命令      | 方向              |
//! |-----------|-------------------|
//! | `fetch`   | 云端 → 暂存       |
//! | `rewrite` | 暂存 → 本地       |
//! | `pull`    | `fetch` + `rewrite` |
//! | `stage`   | 本地 → 暂存       |
//! | `push`    | 暂存 → 云端       |
//! | `dump`    | `stage` + `push`  |

use crate::config::{FolderType, SharedFolderConfig};
use crate::core::archiving::ArchivingSharedFolderManager;
use crate::core::folder::Folder;
use crate::core::mirror::{mirror, MirrorOptions, MirrorReport};
use crate::core::pending::PendingRemovals;
use crate::core::timing::{format_seconds, timed, DurationReport};
use crate::error::SyncError;
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// 同步命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Fetch,
    Rewrite,
    Pull,
    Stage,
    Push,
    Dump,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Fetch => "fetch",
            Command::Rewrite => "rewrite",
            Command::Pull => "pull",
            Command::Stage => "stage",
            Command::Push => "push",
            Command::Dump => "dump",
        }
    }

    /// 会覆盖本地工作目录的命令，执行前需要用户确认
    pub fn is_destructive(&self) -> bool {
        matches!(self, Command::Rewrite | Command::Pull)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 逐个文件同步的管理器（as-is 模式）
pub struct SharedFolderManager {
    config: SharedFolderConfig,
    local: Folder,
    staging: Folder,
    remote: Folder,
    pending: Arc<PendingRemovals>,
}

impl SharedFolderManager {
    pub fn new(config: SharedFolderConfig, pending: Arc<PendingRemovals>) -> Self {
        let local = Folder::local(config.local_path());
        let staging = Folder::local(config.staging_path());
        let remote = Folder::remote(
            config.remote_kind(),
            config.remote_settings().clone(),
            config.remote_path(),
        );
        Self::with_folders(config, local, staging, remote, pending)
    }

    pub fn with_folders(
        config: SharedFolderConfig,
        local: Folder,
        staging: Folder,
        remote: Folder,
        pending: Arc<PendingRemovals>,
    ) -> Self {
        Self {
            config,
            local,
            staging,
            remote,
            pending,
        }
    }

    pub fn config(&self) -> &SharedFolderConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn local(&self) -> &Folder {
        &self.local
    }

    pub fn staging(&self) -> &Folder {
        &self.staging
    }

    pub fn remote(&self) -> &Folder {
        &self.remote
    }

    pub(crate) fn label(&self, command: Command) -> String {
        format!("{} {}", command, self.name())
    }

    async fn mirror_between(
        &self,
        source: &Folder,
        dest: &Folder,
        options: MirrorOptions,
    ) -> Result<MirrorReport> {
        let source = source.tree().await?;
        let dest = dest.tree().await?;
        mirror(source.as_ref(), dest.as_ref(), &options, &self.pending).await
    }

    /// 云端 → 暂存（完整镜像）
    pub async fn fetch(&self) -> Result<MirrorReport> {
        timed(
            self.label(Command::Fetch),
            self.mirror_between(&self.remote, &self.staging, MirrorOptions::full()),
        )
        .await
    }

    /// 暂存 → 本地（完整镜像，配置了过滤条件时只处理匹配的条目）
    pub async fn rewrite(&self) -> Result<MirrorReport> {
        let options = MirrorOptions::full().with_filters(self.config.filters().cloned());
        timed(
            self.label(Command::Rewrite),
            self.mirror_between(&self.staging, &self.local, options),
        )
        .await
    }

    pub async fn pull(&self) -> Result<()> {
        timed(self.label(Command::Pull), async {
            self.fetch().await?;
            self.rewrite().await?;
            Ok(())
        })
        .await
    }

    /// 本地 → 暂存
    ///
    /// 配置了过滤条件时只复制更新过的文件，不删除暂存区中本地没有的文件；
    /// 否则做完整镜像。
    pub async fn stage(&self) -> Result<MirrorReport> {
        let options = match self.config.filters() {
            Some(filters) => MirrorOptions::copy_newer().with_filters(Some(filters.clone())),
            None => MirrorOptions::full(),
        };
        timed(
            self.label(Command::Stage),
            self.mirror_between(&self.local, &self.staging, options),
        )
        .await
    }

    /// 暂存 → 云端（完整镜像）
    pub async fn push(&self) -> Result<MirrorReport> {
        timed(
            self.label(Command::Push),
            self.mirror_between(&self.staging, &self.remote, MirrorOptions::full()),
        )
        .await
    }

    pub async fn dump(&self) -> Result<()> {
        timed(self.label(Command::Dump), async {
            self.stage().await?;
            self.push().await?;
            Ok(())
        })
        .await
    }
}

/// 按配置类型选择的管理器
pub enum FolderManager {
    AsIs(SharedFolderManager),
    Archive(ArchivingSharedFolderManager),
}

impl FolderManager {
    pub fn from_config(
        config: SharedFolderConfig,
        pending: Arc<PendingRemovals>,
    ) -> Result<Self, SyncError> {
        match config.folder_type() {
            FolderType::AsIs => Ok(FolderManager::AsIs(SharedFolderManager::new(config, pending))),
            FolderType::Archive => Ok(FolderManager::Archive(ArchivingSharedFolderManager::new(
                config, pending,
            )?)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FolderManager::AsIs(m) => m.name(),
            FolderManager::Archive(m) => m.base().name(),
        }
    }

    pub fn folder_type(&self) -> FolderType {
        match self {
            FolderManager::AsIs(_) => FolderType::AsIs,
            FolderManager::Archive(_) => FolderType::Archive,
        }
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Fetch => self.fetch().await,
            Command::Rewrite => self.rewrite().await,
            Command::Pull => self.pull().await,
            Command::Stage => self.stage().await,
            Command::Push => self.push().await,
            Command::Dump => self.dump().await,
        }
    }

    pub async fn fetch(&self) -> Result<()> {
        match self {
            FolderManager::AsIs(m) => m.fetch().await.map(drop),
            FolderManager::Archive(m) => m.fetch().await,
        }
    }

    pub async fn rewrite(&self) -> Result<()> {
        match self {
            FolderManager::AsIs(m) => m.rewrite().await.map(drop),
            FolderManager::Archive(m) => m.base().rewrite().await.map(drop),
        }
    }

    pub async fn pull(&self) -> Result<()> {
        match self {
            FolderManager::AsIs(m) => m.pull().await,
            FolderManager::Archive(m) => m.pull().await,
        }
    }

    pub async fn stage(&self) -> Result<()> {
        match self {
            FolderManager::AsIs(m) => m.stage().await.map(drop),
            FolderManager::Archive(m) => m.base().stage().await.map(drop),
        }
    }

    pub async fn push(&self) -> Result<()> {
        match self {
            FolderManager::AsIs(m) => m.push().await.map(drop),
            FolderManager::Archive(m) => m.push().await,
        }
    }

    pub async fn dump(&self) -> Result<()> {
        match self {
            FolderManager::AsIs(m) => m.dump().await,
            FolderManager::Archive(m) => m.dump().await,
        }
    }
}

/// 一次运行的结果
#[derive(Debug, Default)]
pub struct RunSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, anyhow::Error)>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 依次对每个文件夹执行命令；某个文件夹失败不影响后面的文件夹
pub async fn run_all(managers: &[FolderManager], command: Command) -> RunSummary {
    let timer = DurationReport::start(format!("全部任务 ({})", command));
    let mut summary = RunSummary::default();

    for manager in managers {
        match manager.run(command).await {
            Ok(()) => summary.succeeded.push(manager.name().to_string()),
            Err(e) => {
                error!("{} {} 失败: {:#}", command, manager.name(), e);
                summary.failed.push((manager.name().to_string(), e));
            }
        }
    }

    summary.elapsed = timer.finish();
    info!(
        "{}: {} 个成功, {} 个失败, 共耗时 {}",
        command,
        summary.succeeded.len(),
        summary.failed.len(),
        format_seconds(summary.elapsed)
    );
    summary
}
