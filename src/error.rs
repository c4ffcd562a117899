//! 错误类型

use thiserror::Error;

/// 同步过程中需要区分处理的错误
///
/// 其余 I/O、网络、认证错误统一以 `anyhow::Error` 向上传播。
#[derive(Debug, Error)]
pub enum SyncError {
    /// 配置缺失或非法，在任何 I/O 之前失败
    #[error("configuration error: {0}")]
    Config(String),

    /// 区域中的哈希归档文件数量不是恰好一个
    #[error(
        "expected exactly one hashed archive in {area}, found {}: {files:?}",
        files.len()
    )]
    HashedArtifact { area: String, files: Vec<String> },

    /// 解压或解密失败（密码错误、归档损坏）
    #[error("failed to extract archive {archive}: {reason}")]
    Archive { archive: String, reason: String },

    /// 解密后的归档中没有期望的文件
    #[error("archive {archive} did not yield expected file {expected}")]
    MissingPayload { archive: String, expected: String },

    /// 归档模式要求暂存区和临时区位于本地磁盘
    #[error("area {0} is not backed by a local directory")]
    NotLocal(String),
}

impl SyncError {
    pub fn config(msg: impl Into<String>) -> Self {
        SyncError::Config(msg.into())
    }
}

/// 检查错误链中是否包含权限错误（本地 I/O 或 opendal）
pub fn is_permission_denied(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return io.kind() == std::io::ErrorKind::PermissionDenied;
        }
        if let Some(dal) = cause.downcast_ref::<opendal::Error>() {
            return dal.kind() == opendal::ErrorKind::PermissionDenied;
        }
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_detected_through_context() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked");
        let err = anyhow::Error::new(io).context("writing a.txt");
        assert!(is_permission_denied(&err));

        let other = anyhow::Error::new(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(!is_permission_denied(&other));
    }

    #[test]
    fn test_hashed_artifact_message_lists_files() {
        let err = SyncError::HashedArtifact {
            area: "local:/tmp/x".to_string(),
            files: vec!["a.dat".to_string(), "b.dat".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("found 2"));
        assert!(msg.contains("a.dat"));
    }
}
