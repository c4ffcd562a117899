use crate::storage::FileInfo;
use std::collections::{HashMap, HashSet};

/// 镜像策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorPolicy {
    /// 只复制目标缺失或源更新的文件，从不删除
    CopyNewer,
    /// 完整镜像，包括删除目标中多余的文件和目录
    Mirror,
}

/// 同步动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// 复制文件（覆盖目标）
    Copy {
        path: String,
        size: u64,
        modified_time: i64,
    },
    /// 删除目标中的文件，或与源类型不一致的目录
    Delete { path: String },
    /// 删除目标中多余的目录（连同内容）
    RemoveDir { path: String },
    /// 在目标中创建目录
    CreateDir { path: String },
    /// 跳过（文件相同）
    Skip { path: String },
}

impl SyncAction {
    pub fn path(&self) -> &str {
        match self {
            SyncAction::Copy { path, .. }
            | SyncAction::Delete { path }
            | SyncAction::RemoveDir { path }
            | SyncAction::CreateDir { path }
            | SyncAction::Skip { path } => path,
        }
    }

    /// 执行顺序：先删除，再建目录，最后复制
    fn order(&self) -> u8 {
        match self {
            SyncAction::Delete { .. } => 0,
            SyncAction::RemoveDir { .. } => 1,
            SyncAction::CreateDir { .. } => 2,
            SyncAction::Copy { .. } => 3,
            SyncAction::Skip { .. } => 4,
        }
    }
}

/// 文件比较结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRelation {
    /// 文件相同
    Equal,
    /// 源文件更新
    SourceNewer,
    /// 目标文件更新
    DestNewer,
    /// 不同（大小不同）
    Different,
}

/// 比较配置
#[derive(Debug, Clone, Default)]
pub struct CompareConfig {
    /// 时间容差（秒），源修改时间超过目标这么多才算更新
    pub time_tolerance_seconds: i64,
}

/// 文件比较器
#[derive(Default)]
pub struct FileComparator {
    config: CompareConfig,
}

impl FileComparator {
    pub fn with_config(config: CompareConfig) -> Self {
        Self { config }
    }

    /// 比较两个文件
    pub fn compare_files(&self, source: &FileInfo, dest: &FileInfo) -> FileRelation {
        let time_diff = source.modified_time - dest.modified_time;

        if source.size != dest.size {
            tracing::debug!(
                "文件大小不同: {} (src={}, dst={})",
                source.path,
                source.size,
                dest.size
            );
            return FileRelation::Different;
        }

        if time_diff > self.config.time_tolerance_seconds {
            FileRelation::SourceNewer
        } else if -time_diff > self.config.time_tolerance_seconds {
            FileRelation::DestNewer
        } else {
            FileRelation::Equal
        }
    }

    fn should_copy(&self, src: &FileInfo, dst: &FileInfo, policy: MirrorPolicy) -> bool {
        match policy {
            // 只看时间：源比目标新才覆盖
            MirrorPolicy::CopyNewer => {
                src.modified_time - dst.modified_time > self.config.time_tolerance_seconds
            }
            MirrorPolicy::Mirror => matches!(
                self.compare_files(src, dst),
                FileRelation::Different | FileRelation::SourceNewer
            ),
        }
    }

    /// 比较两个文件树，返回按执行顺序排好的同步动作
    pub fn compare_trees(
        &self,
        source: &HashMap<String, FileInfo>,
        dest: &HashMap<String, FileInfo>,
        policy: MirrorPolicy,
    ) -> Vec<SyncAction> {
        self.compare_trees_keeping(source, dest, policy, &HashSet::new())
    }

    /// 同 [`compare_trees`](Self::compare_trees)，但 `keep_dirs` 中的目标目录不会被删除
    ///
    /// `keep_dirs` 是目标中含有过滤范围之外条目的目录。这些目录只删除范围内的条目，
    /// 目录本身保留。
    pub fn compare_trees_keeping(
        &self,
        source: &HashMap<String, FileInfo>,
        dest: &HashMap<String, FileInfo>,
        policy: MirrorPolicy,
        keep_dirs: &HashSet<String>,
    ) -> Vec<SyncAction> {
        let mut actions = Vec::new();

        // 完整镜像时整棵删除的目录，其下的条目不再单独处理
        let removed_roots: HashSet<&str> = match policy {
            MirrorPolicy::CopyNewer => HashSet::new(),
            MirrorPolicy::Mirror => dest
                .values()
                .filter(|dst| dst.is_dir && !keep_dirs.contains(&dst.path))
                .filter(|dst| source.get(&dst.path).map_or(true, |src| !src.is_dir))
                .map(|dst| dst.path.as_str())
                .collect(),
        };
        let under_removed = |path: &str| {
            ancestors(path).any(|parent| removed_roots.contains(parent))
        };

        for (path, src) in source {
            match (src.is_dir, dest.get(path)) {
                (true, None) => actions.push(SyncAction::CreateDir { path: path.clone() }),
                (true, Some(dst)) if dst.is_dir => {}
                (true, Some(_)) => {
                    // 目标是同名文件
                    if policy == MirrorPolicy::Mirror {
                        actions.push(SyncAction::Delete { path: path.clone() });
                        actions.push(SyncAction::CreateDir { path: path.clone() });
                    } else {
                        tracing::warn!("目标中存在同名文件，跳过目录: {}", path);
                        actions.push(SyncAction::Skip { path: path.clone() });
                    }
                }
                (false, None) => actions.push(copy_action(src)),
                (false, Some(dst)) if dst.is_dir => {
                    if policy == MirrorPolicy::Mirror && !keep_dirs.contains(path) {
                        actions.push(SyncAction::Delete { path: path.clone() });
                        actions.push(copy_action(src));
                    } else {
                        tracing::warn!("目标中存在同名目录，跳过文件: {}", path);
                        actions.push(SyncAction::Skip { path: path.clone() });
                    }
                }
                (false, Some(dst)) => {
                    if self.should_copy(src, dst, policy) {
                        actions.push(copy_action(src));
                    } else {
                        actions.push(SyncAction::Skip { path: path.clone() });
                    }
                }
            }
        }

        if policy == MirrorPolicy::Mirror {
            for (path, dst) in dest {
                if source.contains_key(path) || under_removed(path) || keep_dirs.contains(path) {
                    continue;
                }
                if dst.is_dir {
                    actions.push(SyncAction::RemoveDir { path: path.clone() });
                } else {
                    actions.push(SyncAction::Delete { path: path.clone() });
                }
            }
        }

        // 按操作类型和路径排序，父目录总是排在子路径之前
        actions.sort_by(|a, b| {
            a.order()
                .cmp(&b.order())
                .then_with(|| a.path().cmp(b.path()))
        });

        actions
    }

    /// 统计同步动作
    pub fn summarize_actions(actions: &[SyncAction]) -> ActionSummary {
        let mut summary = ActionSummary::default();

        for action in actions {
            match action {
                SyncAction::Copy { size, .. } => {
                    summary.copy_count += 1;
                    summary.copy_bytes += size;
                }
                SyncAction::Delete { .. } => summary.delete_count += 1,
                SyncAction::RemoveDir { .. } => summary.remove_dir_count += 1,
                SyncAction::CreateDir { .. } => summary.create_dir_count += 1,
                SyncAction::Skip { .. } => summary.skip_count += 1,
            }
        }

        summary
    }
}

fn copy_action(src: &FileInfo) -> SyncAction {
    SyncAction::Copy {
        path: src.path.clone(),
        size: src.size,
        modified_time: src.modified_time,
    }
}

/// 依次返回路径的各级父目录（不含自身）
pub(crate) fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(i, _)| &path[..i])
}

/// 动作统计
#[derive(Debug, Clone, Default)]
pub struct ActionSummary {
    pub copy_count: usize,
    pub copy_bytes: u64,
    pub delete_count: usize,
    pub remove_dir_count: usize,
    pub create_dir_count: usize,
    pub skip_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: u64, modified_time: i64) -> FileInfo {
        FileInfo {
            path: path.to_string(),
            size,
            modified_time,
            is_dir: false,
        }
    }

    fn dir(path: &str) -> FileInfo {
        FileInfo {
            path: path.to_string(),
            size: 0,
            modified_time: 0,
            is_dir: true,
        }
    }

    fn tree(entries: Vec<FileInfo>) -> HashMap<String, FileInfo> {
        entries.into_iter().map(|f| (f.path.clone(), f)).collect()
    }

    #[test]
    fn test_compare_files() {
        let cmp = FileComparator::default();
        assert_eq!(cmp.compare_files(&file("a", 1, 10), &file("a", 1, 10)), FileRelation::Equal);
        assert_eq!(cmp.compare_files(&file("a", 1, 20), &file("a", 1, 10)), FileRelation::SourceNewer);
        assert_eq!(cmp.compare_files(&file("a", 1, 10), &file("a", 1, 20)), FileRelation::DestNewer);
        assert_eq!(cmp.compare_files(&file("a", 2, 10), &file("a", 1, 10)), FileRelation::Different);

        let tolerant = FileComparator::with_config(CompareConfig {
            time_tolerance_seconds: 2,
        });
        assert_eq!(tolerant.compare_files(&file("a", 1, 12), &file("a", 1, 10)), FileRelation::Equal);
    }

    #[test]
    fn test_mirror_copies_deletes_and_orders() {
        let cmp = FileComparator::default();
        let source = tree(vec![
            file("same.txt", 1, 10),
            file("changed.txt", 5, 10),
            file("new.txt", 3, 10),
            dir("empty"),
        ]);
        let dest = tree(vec![
            file("same.txt", 1, 10),
            file("changed.txt", 4, 10),
            file("stale.txt", 1, 10),
            dir("old"),
            file("old/inner.txt", 1, 10),
        ]);

        let actions = cmp.compare_trees(&source, &dest, MirrorPolicy::Mirror);
        assert_eq!(
            actions,
            vec![
                SyncAction::Delete { path: "stale.txt".to_string() },
                SyncAction::RemoveDir { path: "old".to_string() },
                SyncAction::CreateDir { path: "empty".to_string() },
                SyncAction::Copy { path: "changed.txt".to_string(), size: 5, modified_time: 10 },
                SyncAction::Copy { path: "new.txt".to_string(), size: 3, modified_time: 10 },
                SyncAction::Skip { path: "same.txt".to_string() },
            ]
        );
    }

    #[test]
    fn test_copy_newer_never_deletes() {
        let cmp = FileComparator::default();
        let source = tree(vec![file("a.txt", 1, 20), file("b.txt", 9, 5)]);
        let dest = tree(vec![file("a.txt", 1, 10), file("b.txt", 1, 10), file("only.txt", 1, 1)]);

        let actions = cmp.compare_trees(&source, &dest, MirrorPolicy::CopyNewer);
        let summary = FileComparator::summarize_actions(&actions);
        assert_eq!(summary.copy_count, 1);
        assert_eq!(summary.delete_count, 0);
        assert_eq!(summary.skip_count, 1);
        assert_eq!(actions[0].path(), "a.txt");
    }

    #[test]
    fn test_type_mismatch_replaced_under_mirror() {
        let cmp = FileComparator::default();
        let source = tree(vec![file("x", 1, 1), dir("y")]);
        let dest = tree(vec![dir("x"), file("x/z", 1, 1), file("y", 1, 1)]);

        let actions = cmp.compare_trees(&source, &dest, MirrorPolicy::Mirror);
        assert_eq!(
            actions,
            vec![
                SyncAction::Delete { path: "x".to_string() },
                SyncAction::Delete { path: "y".to_string() },
                SyncAction::CreateDir { path: "y".to_string() },
                SyncAction::Copy { path: "x".to_string(), size: 1, modified_time: 1 },
            ]
        );
    }

    #[test]
    fn test_kept_dirs_only_lose_in_scope_entries() {
        let cmp = FileComparator::default();
        let source = tree(vec![file("keep.md", 1, 1), file("x", 1, 1)]);
        let dest = tree(vec![
            file("keep.md", 1, 1),
            dir("cache"),
            file("cache/old.md", 1, 1),
            dir("x"),
            file("x/y.md", 1, 1),
        ]);
        let keep_dirs: HashSet<String> = ["cache".to_string(), "x".to_string()].into();

        let actions = cmp.compare_trees_keeping(&source, &dest, MirrorPolicy::Mirror, &keep_dirs);
        assert_eq!(
            actions,
            vec![
                SyncAction::Delete { path: "cache/old.md".to_string() },
                SyncAction::Delete { path: "x/y.md".to_string() },
                SyncAction::Skip { path: "keep.md".to_string() },
                SyncAction::Skip { path: "x".to_string() },
            ]
        );
    }
}
