use crate::config::FilterOptions;
use crate::error::SyncError;
use crate::storage::{FileInfo, Storage};
use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use tracing::{debug, info};

/// 文件扫描器配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 是否包含目录条目（镜像空目录需要）
    pub include_dirs: bool,
    /// 路径过滤条件，`None` 表示不过滤
    pub filters: Option<FilterOptions>,
}

/// 编译后的过滤条件
///
/// 文件名模式只匹配最后一段，目录模式匹配路径中的每一级目录名：
/// 某级目录被排除时，它下面的所有条目都被排除。
#[derive(Debug, Clone)]
struct PathFilter {
    files: Option<GlobSet>,
    exclude: Option<GlobSet>,
    dirs: Option<GlobSet>,
    exclude_dirs: Option<GlobSet>,
    max_depth: Option<usize>,
}

impl PathFilter {
    fn new(options: &FilterOptions) -> Result<Self, SyncError> {
        Ok(Self {
            files: build_set(&options.filter)?,
            exclude: build_set(&options.exclude)?,
            dirs: build_set(&options.filter_dirs)?,
            exclude_dirs: build_set(&options.exclude_dirs)?,
            max_depth: options.max_depth,
        })
    }

    fn dir_allowed(&self, name: &str) -> bool {
        if let Some(ref dirs) = self.dirs {
            if !dirs.is_match(name) {
                return false;
            }
        }
        !self.exclude_dirs.as_ref().is_some_and(|set| set.is_match(name))
    }

    fn file_allowed(&self, name: &str) -> bool {
        if let Some(ref files) = self.files {
            if !files.is_match(name) {
                return false;
            }
        }
        !self.exclude.as_ref().is_some_and(|set| set.is_match(name))
    }

    fn is_match(&self, path: &str, is_dir: bool) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = parts.split_last() else {
            return false;
        };

        if let Some(max_depth) = self.max_depth {
            if parts.len() > max_depth {
                return false;
            }
        }

        if !parents.iter().all(|dir| self.dir_allowed(dir)) {
            return false;
        }

        if is_dir {
            self.dir_allowed(last)
        } else {
            self.file_allowed(last)
        }
    }
}

fn build_set(patterns: &[String]) -> Result<Option<GlobSet>, SyncError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            SyncError::config(format!("invalid filter pattern `{}`: {}", pattern, e))
        })?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| SyncError::config(format!("invalid filter patterns: {}", e)))?;
    Ok(Some(set))
}

/// 文件扫描器
pub struct FileScanner {
    config: ScanConfig,
    filter: Option<PathFilter>,
}

impl FileScanner {
    pub fn with_config(config: ScanConfig) -> Result<Self, SyncError> {
        let filter = match config.filters {
            Some(ref options) if !options.is_empty() => Some(PathFilter::new(options)?),
            _ => None,
        };
        Ok(Self { config, filter })
    }

    /// 检查条目是否通过过滤条件
    pub fn is_included(&self, file: &FileInfo) -> bool {
        if file.is_dir && !self.config.include_dirs {
            return false;
        }
        match self.filter {
            Some(ref filter) => filter.is_match(&file.path, file.is_dir),
            None => true,
        }
    }

    /// 扫描存储并返回文件树（键为相对路径）
    pub async fn scan_storage(&self, storage: &dyn Storage) -> Result<HashMap<String, FileInfo>> {
        Ok(self.scan_with_excluded(storage).await?.0)
    }

    /// 扫描存储，同时返回被过滤掉的条目
    pub async fn scan_with_excluded(
        &self,
        storage: &dyn Storage,
    ) -> Result<(HashMap<String, FileInfo>, Vec<FileInfo>)> {
        debug!("开始扫描存储: {}", storage.name());

        let files = storage.list_files().await?;
        let total = files.len();

        let mut tree = HashMap::with_capacity(total);
        let mut excluded = Vec::new();
        let mut dir_count = 0;

        for file in files {
            if !self.is_included(&file) {
                excluded.push(file);
                continue;
            }
            if file.is_dir {
                dir_count += 1;
            }
            tree.insert(file.path.clone(), file);
        }

        info!(
            "扫描完成: {} - {} 个文件, {} 个目录, {} 个被排除",
            storage.name(),
            tree.len() - dir_count,
            dir_count,
            excluded.len()
        );

        Ok((tree, excluded))
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self {
            config: ScanConfig {
                include_dirs: true,
                filters: None,
            },
            filter: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, is_dir: bool) -> FileInfo {
        FileInfo {
            path: path.to_string(),
            size: 0,
            modified_time: 0,
            is_dir,
        }
    }

    fn scanner(options: FilterOptions) -> FileScanner {
        FileScanner::with_config(ScanConfig {
            include_dirs: true,
            filters: Some(options),
        })
        .unwrap()
    }

    #[test]
    fn test_unfiltered_includes_everything() {
        let scanner = FileScanner::default();
        assert!(scanner.is_included(&entry("a/b/c.txt", false)));
        assert!(scanner.is_included(&entry("a/b", true)));
    }

    #[test]
    fn test_file_patterns_match_names_only() {
        let scanner = scanner(FilterOptions {
            filter: vec!["*.md".to_string()],
            exclude: vec!["draft*".to_string()],
            ..Default::default()
        });
        assert!(scanner.is_included(&entry("notes/today.md", false)));
        assert!(!scanner.is_included(&entry("notes/today.txt", false)));
        assert!(!scanner.is_included(&entry("notes/draft-1.md", false)));
        // 文件模式不作用于目录
        assert!(scanner.is_included(&entry("notes", true)));
    }

    #[test]
    fn test_excluded_dir_hides_its_subtree() {
        let scanner = scanner(FilterOptions {
            exclude_dirs: vec![".git".to_string(), "node_modules".to_string()],
            ..Default::default()
        });
        assert!(!scanner.is_included(&entry(".git", true)));
        assert!(!scanner.is_included(&entry(".git/objects/ab", false)));
        assert!(!scanner.is_included(&entry("web/node_modules/x.js", false)));
        assert!(scanner.is_included(&entry("web/index.js", false)));
    }

    #[test]
    fn test_filter_dirs_and_max_depth() {
        let scanner = scanner(FilterOptions {
            filter_dirs: vec!["keep*".to_string()],
            max_depth: Some(2),
            ..Default::default()
        });
        assert!(scanner.is_included(&entry("root.txt", false)));
        assert!(scanner.is_included(&entry("keep1/a.txt", false)));
        assert!(!scanner.is_included(&entry("other/a.txt", false)));
        assert!(!scanner.is_included(&entry("keep1/keep2/a.txt", false)));
    }

    #[test]
    fn test_dirs_skipped_unless_requested() {
        let scanner = FileScanner::with_config(ScanConfig::default()).unwrap();
        assert!(!scanner.is_included(&entry("a", true)));
        assert!(scanner.is_included(&entry("a/b.txt", false)));
    }
}
