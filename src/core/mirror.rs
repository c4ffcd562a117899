//! 单向镜像：让目标目录树与源目录树一致

use crate::config::FilterOptions;
use crate::core::comparator::{ancestors, CompareConfig, FileComparator, MirrorPolicy, SyncAction};
use crate::core::pending::PendingRemovals;
use crate::core::scanner::{FileScanner, ScanConfig};
use crate::core::timing::DurationReport;
use crate::error::is_permission_denied;
use crate::storage::Storage;
use anyhow::{Context, Result};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// 镜像选项
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub policy: MirrorPolicy,
    /// 同时作用于源和目标的过滤条件，过滤掉的条目两边都不处理
    pub filters: Option<FilterOptions>,
    /// 复制后把目标文件的修改时间设为源文件的修改时间
    pub preserve_times: bool,
    pub compare: CompareConfig,
}

impl MirrorOptions {
    pub fn new(policy: MirrorPolicy) -> Self {
        Self {
            policy,
            filters: None,
            preserve_times: true,
            compare: CompareConfig::default(),
        }
    }

    pub fn full() -> Self {
        Self::new(MirrorPolicy::Mirror)
    }

    pub fn copy_newer() -> Self {
        Self::new(MirrorPolicy::CopyNewer)
    }

    pub fn with_filters(mut self, filters: Option<FilterOptions>) -> Self {
        self.filters = filters.filter(|f| !f.is_empty());
        self
    }
}

/// 镜像结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub copied: usize,
    pub copied_bytes: u64,
    pub deleted: usize,
    pub skipped: usize,
    pub dirs_created: usize,
    pub dirs_removed: usize,
    /// 因权限错误推迟删除的路径（目标中的相对路径）
    pub deferred: Vec<String>,
    /// 因权限错误没能覆盖的目标文件，原文件保持不变
    pub unwritable: Vec<String>,
}

impl MirrorReport {
    pub fn is_noop(&self) -> bool {
        self.copied == 0
            && self.deleted == 0
            && self.dirs_created == 0
            && self.dirs_removed == 0
            && self.deferred.is_empty()
            && self.unwritable.is_empty()
    }
}

/// 把 `source` 镜像到 `dest`
///
/// 写入目标时遇到权限错误的本地路径记入 `pending`，镜像继续；
/// 其他任何错误都会中止镜像。
pub async fn mirror(
    source: &dyn Storage,
    dest: &dyn Storage,
    options: &MirrorOptions,
    pending: &PendingRemovals,
) -> Result<MirrorReport> {
    let timer = DurationReport::start(format!("镜像 {} -> {}", source.name(), dest.name()));

    let scanner = FileScanner::with_config(ScanConfig {
        include_dirs: true,
        filters: options.filters.clone(),
    })?;

    let source_tree = scanner
        .scan_storage(source)
        .await
        .with_context(|| format!("扫描源失败: {}", source.name()))?;
    let (dest_tree, dest_excluded) = scanner
        .scan_with_excluded(dest)
        .await
        .with_context(|| format!("扫描目标失败: {}", dest.name()))?;

    // 含有过滤范围之外条目的目录不能整棵删除
    let keep_dirs: HashSet<String> = dest_excluded
        .iter()
        .flat_map(|entry| ancestors(&entry.path))
        .map(str::to_string)
        .collect();

    let comparator = FileComparator::with_config(options.compare.clone());
    let actions =
        comparator.compare_trees_keeping(&source_tree, &dest_tree, options.policy, &keep_dirs);

    let summary = FileComparator::summarize_actions(&actions);
    debug!(
        "计划: 复制 {} 个文件 ({} 字节), 删除 {} 个文件, 删除 {} 个目录, 创建 {} 个目录",
        summary.copy_count,
        summary.copy_bytes,
        summary.delete_count,
        summary.remove_dir_count,
        summary.create_dir_count
    );

    let mut report = MirrorReport::default();

    for action in actions {
        match action {
            SyncAction::Skip { .. } => report.skipped += 1,
            SyncAction::Delete { path } => {
                let result = dest.delete(&path).await;
                if settle_removal(result, &path, dest, pending, &mut report)? {
                    debug!("删除: {}", path);
                    report.deleted += 1;
                }
            }
            SyncAction::RemoveDir { path } => {
                let result = dest.delete(&path).await;
                if settle_removal(result, &path, dest, pending, &mut report)? {
                    debug!("删除目录: {}", path);
                    report.dirs_removed += 1;
                }
            }
            SyncAction::CreateDir { path } => {
                dest.create_dir(&path)
                    .await
                    .with_context(|| format!("创建目录失败: {}", path))?;
                report.dirs_created += 1;
            }
            SyncAction::Copy {
                path,
                size,
                modified_time,
            } => {
                let data = source
                    .read(&path)
                    .await
                    .with_context(|| format!("读取失败: {}", path))?;

                let result = dest.write(&path, data).await;
                if !settle_write(result, &path, dest, &mut report)? {
                    continue;
                }

                if options.preserve_times {
                    let result = dest.set_modified_time(&path, modified_time).await;
                    if let Err(e) = result {
                        warn!("无法设置修改时间 {}: {}", path, e);
                    }
                }

                debug!("复制: {} ({} 字节)", path, size);
                report.copied += 1;
                report.copied_bytes += size;
            }
        }
    }

    info!(
        "镜像完成: 复制 {}, 删除 {}, 跳过 {}, 新建目录 {}, 删除目录 {}, 推迟删除 {}, 无法写入 {}",
        report.copied,
        report.deleted,
        report.skipped,
        report.dirs_created,
        report.dirs_removed,
        report.deferred.len(),
        report.unwritable.len()
    );
    timer.finish();

    Ok(report)
}

/// 处理一次删除的结果：成功返回 `true`；本地权限错误记入待删除列表并返回 `false`
fn settle_removal(
    result: Result<()>,
    path: &str,
    dest: &dyn Storage,
    pending: &PendingRemovals,
    report: &mut MirrorReport,
) -> Result<bool> {
    let err = match result {
        Ok(()) => return Ok(true),
        Err(e) => e,
    };

    if is_permission_denied(&err) {
        if let Some(sys_path) = dest.sys_path(path) {
            warn!("权限不足，推迟删除 {}: {}", path, err);
            pending.add(sys_path)?;
            report.deferred.push(path.to_string());
            return Ok(false);
        }
    }

    Err(err.context(format!("删除目标失败: {} ({})", path, dest.name())))
}

/// 处理一次文件写入的结果：成功返回 `true`；本地权限错误只记录并返回 `false`
///
/// 目标中原有的文件仍然有效，不能记入待删除列表。
fn settle_write(
    result: Result<()>,
    path: &str,
    dest: &dyn Storage,
    report: &mut MirrorReport,
) -> Result<bool> {
    let err = match result {
        Ok(()) => return Ok(true),
        Err(e) => e,
    };

    if is_permission_denied(&err) && dest.sys_path(path).is_some() {
        warn!("权限不足，无法覆盖 {}: {}", path, err);
        report.unwritable.push(path.to_string());
        return Ok(false);
    }

    Err(err.context(format!("写入目标失败: {} ({})", path, dest.name())))
}
