//! 目录扫描 - 基础设施层
//!
//! 列出目录中指定扩展名的文件，按创建时间升序排列

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::error::{AppError, AppResult};

/// 下载目录中待校验的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub path: PathBuf,
    pub created: SystemTime,
}

/// 列出 `dir` 中扩展名为 `ext` 的文件（不区分大小写，不递归）
///
/// 目录不存在时返回空列表
pub fn list_matching(dir: &Path, ext: &str) -> AppResult<Vec<ArtifactRecord>> {
    let wanted = ext.trim_start_matches('.').to_lowercase();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("目录尚不存在: {}", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(AppError::file(dir, e)),
    };

    let mut records = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AppError::file(dir, e))?;
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            // 浏览器可能正在重命名临时文件
            Err(_) => continue,
        };
        if !metadata.is_file() {
            continue;
        }

        let matches = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase() == wanted)
            .unwrap_or(false);
        if !matches {
            continue;
        }

        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        records.push(ArtifactRecord { path, created });
    }

    records.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
    Ok(records)
}

/// 列出 `dir` 中名称以 `prefix` 开头的子目录（不递归）
///
/// 目录不存在时返回空列表
pub fn list_subdirs(dir: &Path, prefix: &str) -> AppResult<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(AppError::file(dir, e)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AppError::file(dir, e))?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && entry.file_name().to_string_lossy().starts_with(prefix) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_by_extension_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        std::fs::write(dir.path().join("b.PNG"), b"x").unwrap();
        std::fs::write(dir.path().join("c.crdownload"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let records = list_matching(dir.path(), ".png").unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = list_matching(&dir.path().join("absent"), "png").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_list_subdirs_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("request-002-attempt-01")).unwrap();
        std::fs::create_dir(dir.path().join("request-001-attempt-01")).unwrap();
        std::fs::create_dir(dir.path().join("other")).unwrap();
        std::fs::write(dir.path().join("request-003.png"), b"x").unwrap();

        let dirs = list_subdirs(dir.path(), "request-").unwrap();
        assert_eq!(
            dirs,
            vec![
                dir.path().join("request-001-attempt-01"),
                dir.path().join("request-002-attempt-01"),
            ]
        );
        assert!(list_subdirs(&dir.path().join("absent"), "request-")
            .unwrap()
            .is_empty());
    }
}
