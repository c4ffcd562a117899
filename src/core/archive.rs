//! Zip 归档读写
//!
//! 这里的函数都是阻塞的，异步调用方需要放进 `spawn_blocking`。
//! 条目按相对路径排序写入，文件使用源文件的修改时间，目录使用固定时间，
//! 所以内容不变的目录树会得到逐字节相同的未加密归档。解压时恢复文件的
//! 修改时间，解压后再压缩得到的归档也保持不变。

use crate::error::SyncError;
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, Timelike};
use filetime::FileTime;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter};

/// 归档中的一个条目
#[derive(Debug, Clone)]
struct Entry {
    /// 归档内路径，`/` 分隔
    name: String,
    source: PathBuf,
    is_dir: bool,
    modified_time: i64,
}

/// 把 `files` 压缩到 `zip_path`，条目名为相对 `base` 的路径
///
/// 给出 `password` 时使用 AES-256 加密每个条目。`level` 为 deflate 压缩级别，
/// `None` 使用默认级别。归档先写到同目录下的临时文件，完成后再改名。
pub fn compress_files(
    files: &[PathBuf],
    zip_path: &Path,
    base: &Path,
    password: Option<&str>,
    level: Option<i64>,
) -> Result<()> {
    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        let relative = file
            .strip_prefix(base)
            .with_context(|| format!("{} 不在 {} 之下", file.display(), base.display()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if name.is_empty() {
            continue;
        }
        let metadata = fs::metadata(file)
            .with_context(|| format!("无法读取 {}", file.display()))?;
        let is_dir = metadata.is_dir();
        entries.push(Entry {
            name,
            source: file.clone(),
            is_dir,
            modified_time: if is_dir { 0 } else { unix_secs(&metadata) },
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    write_archive(&entries, zip_path, password, level)?;
    debug!("已写入归档 {} ({} 个条目)", zip_path.display(), entries.len());
    Ok(())
}

/// 把整个目录树（包括空目录）压缩成未加密的归档
pub fn compress_tree(root: &Path, zip_path: &Path, level: Option<i64>) -> Result<usize> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("遍历 {} 失败", root.display()))?;
        files.push(entry.into_path());
    }
    compress_files(&files, zip_path, root, None, level)?;
    Ok(files.len())
}

/// 解压归档到 `target`，返回解出的文件（相对路径）
///
/// 解压前先完整读一遍归档，校验密码和内容；只有校验通过后才会
/// （在 `clear_target_contents` 时）清空目标目录并写入文件，
/// 因此密码错误或归档损坏不会破坏目标目录。
pub fn uncompress(
    zip_path: &Path,
    target: &Path,
    password: Option<&str>,
    clear_target_contents: bool,
) -> Result<Vec<String>> {
    let archive_name = zip_path.display().to_string();
    let archive_error = |reason: String| SyncError::Archive {
        archive: archive_name.clone(),
        reason,
    };

    let file = File::open(zip_path).with_context(|| format!("无法打开归档 {}", archive_name))?;
    let mut archive = ZipArchive::new(file).map_err(|e| archive_error(e.to_string()))?;

    // 第一遍：校验
    for i in 0..archive.len() {
        let mut entry = match password {
            Some(password) => archive.by_index_decrypt(i, password.as_bytes()),
            None => archive.by_index(i),
        }
        .map_err(|e| archive_error(e.to_string()))?;
        if entry.enclosed_name().is_none() {
            return Err(archive_error(format!("unsafe entry name `{}`", entry.name())).into());
        }
        io::copy(&mut entry, &mut io::sink()).map_err(|e| archive_error(e.to_string()))?;
    }

    if clear_target_contents {
        clear_directory(target)?;
    }
    fs::create_dir_all(target).with_context(|| format!("无法创建目录 {}", target.display()))?;

    // 第二遍：写入
    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = match password {
            Some(password) => archive.by_index_decrypt(i, password.as_bytes()),
            None => archive.by_index(i),
        }
        .map_err(|e| archive_error(e.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = target.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)
            .with_context(|| format!("无法创建 {}", out_path.display()))?;
        io::copy(&mut entry, &mut out).map_err(|e| archive_error(e.to_string()))?;
        drop(out);

        if let Some(secs) = entry.last_modified().and_then(unix_time) {
            filetime::set_file_mtime(&out_path, FileTime::from_unix_time(secs, 0))?;
        }

        extracted.push(
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        );
    }

    info!("已解压 {} 个文件: {} -> {}", extracted.len(), archive_name, target.display());
    Ok(extracted)
}

fn write_archive(
    entries: &[Entry],
    zip_path: &Path,
    password: Option<&str>,
    level: Option<i64>,
) -> Result<()> {
    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = zip_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let partial = zip_path.with_file_name(format!(".{}.partial", file_name));

    let written = write_entries(entries, &partial, password, level)
        .and_then(|()| fs::rename(&partial, zip_path).map_err(Into::into));
    if written.is_err() {
        let _ = fs::remove_file(&partial);
    }
    written.with_context(|| format!("无法写入归档 {}", zip_path.display()))
}

fn write_entries(
    entries: &[Entry],
    path: &Path,
    password: Option<&str>,
    level: Option<i64>,
) -> Result<()> {
    let mut writer = ZipWriter::new(File::create(path)?);

    for entry in entries {
        let mut options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(level)
            .last_modified_time(zip_time(entry.modified_time));
        if let Some(password) = password {
            options = options.with_aes_encryption(AesMode::Aes256, password);
        }

        if entry.is_dir {
            writer.add_directory(entry.name.clone(), options)?;
        } else {
            writer.start_file(entry.name.clone(), options)?;
            let mut source = File::open(&entry.source)
                .with_context(|| format!("无法读取 {}", entry.source.display()))?;
            io::copy(&mut source, &mut writer)?;
        }
    }

    writer.finish()?;
    Ok(())
}

/// 删除目录下的全部内容，保留目录本身
fn clear_directory(dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        let removed = if fs::symlink_metadata(&path)?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.with_context(|| format!("无法删除 {}", path.display()))?;
    }
    Ok(())
}

fn unix_secs(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64)
}

/// Unix 时间转 zip 的 DOS 时间（UTC），超出范围时使用 1980-01-01
fn zip_time(secs: i64) -> zip::DateTime {
    chrono::DateTime::from_timestamp(secs, 0)
        .and_then(|t| {
            zip::DateTime::from_date_and_time(
                u16::try_from(t.year()).ok()?,
                t.month() as u8,
                t.day() as u8,
                t.hour() as u8,
                t.minute() as u8,
                t.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

/// zip 的 DOS 时间（按 UTC）转 Unix 时间
fn unix_time(t: zip::DateTime) -> Option<i64> {
    let time = NaiveDate::from_ymd_opt(t.year() as i32, t.month() as u32, t.day() as u32)?
        .and_hms_opt(t.hour() as u32, t.minute() as u32, t.second() as u32)?;
    Some(time.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("docs/empty")).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        fs::write(root.join("docs/b.txt"), b"beta beta beta").unwrap();
    }

    #[test]
    fn test_tree_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        sample_tree(&src);

        let zip_path = dir.path().join("out/folder.zip");
        compress_tree(&src, &zip_path, None).unwrap();

        let target = dir.path().join("target");
        let mut extracted = uncompress(&zip_path, &target, None, false).unwrap();
        extracted.sort();
        assert_eq!(extracted, vec!["a.txt".to_string(), "docs/b.txt".to_string()]);
        assert_eq!(fs::read(target.join("docs/b.txt")).unwrap(), b"beta beta beta");
        assert!(target.join("docs/empty").is_dir());
    }

    #[test]
    fn test_extracted_tree_recompresses_identically() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        sample_tree(&src);

        let first = dir.path().join("1.zip");
        compress_tree(&src, &first, None).unwrap();
        let copy = dir.path().join("copy");
        uncompress(&first, &copy, None, true).unwrap();

        let second = dir.path().join("2.zip");
        compress_tree(&copy, &second, None).unwrap();
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_plain_archive_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        sample_tree(&src);

        let first = dir.path().join("1.zip");
        let second = dir.path().join("2.zip");
        compress_tree(&src, &first, None).unwrap();
        compress_tree(&src, &second, None).unwrap();
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_encrypted_archive_needs_password() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("folder.zip");
        fs::write(&payload, b"payload").unwrap();

        let encrypted = dir.path().join("enc.dat");
        compress_files(&[payload.clone()], &encrypted, dir.path(), Some("salt~n"), Some(1)).unwrap();

        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("existing.txt"), b"keep").unwrap();

        let err = uncompress(&encrypted, &out, Some("wrong"), true).unwrap_err();
        assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::Archive { .. })));
        // 校验失败时目标目录保持原样
        assert!(out.join("existing.txt").exists());

        let err = uncompress(&encrypted, &out, None, true).unwrap_err();
        assert!(err.downcast_ref::<SyncError>().is_some());

        let extracted = uncompress(&encrypted, &out, Some("salt~n"), true).unwrap();
        assert_eq!(extracted, vec!["folder.zip".to_string()]);
        assert_eq!(fs::read(out.join("folder.zip")).unwrap(), b"payload");
        assert!(!out.join("existing.txt").exists());
    }

    #[test]
    fn test_zip_time_clamps_out_of_range() {
        assert_eq!(zip_time(0).year(), 1980);
        let t = zip_time(1_600_000_000);
        assert_eq!(t.year(), 2020);
        assert_eq!(t.month(), 9);
        // DOS 时间精度为 2 秒
        assert_eq!(unix_time(t), Some(1_600_000_000));
    }
}
