//! 下载校验 - 业务能力层
//!
//! 确认期望的图片已经落盘，并移动到输出目录：
//! - 恰好一个文件：重命名为 `{index}_image.{ext}`，返回 `Diagnosis::None`
//! - 没有文件：继续等待
//! - 多于一个文件：立即报错，需要人工检查
//! - 超时仍不足：返回 `ArtifactShortfall`
//!
//! 每次尝试的下载落在 `downloads/request-{index:03}-attempt-{n:02}` 暂存目录中，
//! 批次开始前根目录与所有暂存目录都必须没有匹配的文件

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::{list_matching, list_subdirs, ArtifactRecord};
use crate::models::Diagnosis;
use crate::services::Humanizer;
use crate::utils::{poll_until, PollOutcome, PollSpec};

/// 暂存目录名前缀
pub const STAGING_PREFIX: &str = "request-";

/// 暂存目录路径
pub fn staging_dir(download_area: &Path, index: usize, sequence: usize) -> PathBuf {
    download_area.join(format!("{}{:03}-attempt-{:02}", STAGING_PREFIX, index, sequence))
}

/// 下载校验器
pub struct ArtifactValidator {
    humanizer: Arc<Humanizer>,
    extension: String,
    poll: PollSpec,
}

impl ArtifactValidator {
    pub fn new(humanizer: Arc<Humanizer>, extension: impl Into<String>) -> Self {
        Self {
            humanizer,
            extension: extension.into(),
            poll: PollSpec::new(1_000.0, 10.0, Duration::from_secs(10)),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// 输出文件路径
    pub fn output_path(&self, output_area: &Path, index: usize) -> PathBuf {
        output_area.join(format!("{}_image.{}", index, self.extension))
    }

    /// 批次开始前的检查：下载目录及其暂存子目录中不能已有匹配的文件
    pub fn ensure_empty(&self, download_area: &Path) -> AppResult<()> {
        let mut count = list_matching(download_area, &self.extension)?.len();
        for dir in list_subdirs(download_area, STAGING_PREFIX)? {
            let leftovers = list_matching(&dir, &self.extension)?.len();
            if leftovers > 0 {
                warn!("暂存目录 {} 中残留 {} 个文件", dir.display(), leftovers);
            }
            count += leftovers;
        }

        if count > 0 {
            return Err(AppError::DownloadAreaNotEmpty {
                dir: download_area.to_path_buf(),
                count,
                ext: self.extension.clone(),
            });
        }
        Ok(())
    }

    /// 尝试结束后删除暂存目录（尽力而为）
    pub fn discard_staging(&self, staging: &Path) {
        match std::fs::remove_dir_all(staging) {
            Ok(()) => debug!("已删除暂存目录: {}", staging.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("无法删除暂存目录 {}: {}", staging.display(), e),
        }
    }

    /// 等待并校验第 `expected_index` 张图片
    pub async fn validate(
        &self,
        expected_index: usize,
        download_area: &Path,
        output_area: &Path,
    ) -> AppResult<Diagnosis> {
        info!("[图片 {}] 正在校验下载...", expected_index);

        let outcome = poll_until(&self.humanizer, self.poll, || async move {
            let files = list_matching(download_area, &self.extension)?;
            match files.len() {
                0 => {
                    info!("[图片 {}] 下载目录中暂无图片，继续等待...", expected_index);
                    Ok(None)
                }
                1 => Ok(files.into_iter().next()),
                found => {
                    warn!(
                        "[图片 {}] ⚠️ 下载目录中的图片多于预期 ({})",
                        expected_index, found
                    );
                    Err(AppError::ArtifactCountMismatch {
                        dir: download_area.to_path_buf(),
                        found,
                    })
                }
            }
        })
        .await?;

        match outcome {
            PollOutcome::Ready(record) => {
                let target = self.output_path(output_area, expected_index);
                self.relocate(&record, &target)?;
                info!(
                    "[图片 {}] ✓ 图片已检测到并保存为 '{}'",
                    expected_index,
                    target.file_name().unwrap_or_default().to_string_lossy()
                );
                Ok(Diagnosis::None)
            }
            PollOutcome::Exhausted { waited } => {
                let found = list_matching(download_area, &self.extension)?.len();
                warn!(
                    "[图片 {}] ⚠️ 等待 {} 秒后仍只检测到 {}/{} 张图片",
                    expected_index,
                    waited.as_secs(),
                    found,
                    expected_index
                );
                Ok(Diagnosis::ArtifactShortfall {
                    found,
                    expected: expected_index,
                })
            }
        }
    }

    /// 移动文件；跨设备时退回到复制 + 删除
    fn relocate(&self, record: &ArtifactRecord, target: &Path) -> AppResult<()> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::file(parent, e))?;
        }
        if std::fs::rename(&record.path, target).is_ok() {
            return Ok(());
        }
        std::fs::copy(&record.path, target).map_err(|e| AppError::file(target, e))?;
        std::fs::remove_file(&record.path).map_err(|e| AppError::file(&record.path, e))?;
        Ok(())
    }
}
