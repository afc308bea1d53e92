//! 重试编排器 - 编排层
//!
//! ## 职责
//!
//! 顺序处理每个生成请求，是请求级别的编排器：
//!
//! 1. **提交与校验**：每次尝试先交给 `SubmissionDriver`，再交给 `ArtifactValidator`
//! 2. **失败处理**：违规时改写提示词，其余失败重置会话
//! 3. **指数退避**：第 n 次失败后等待 `5000 · ratio^(n-1)` 毫秒（带抖动）
//! 4. **次数上限**：单个请求最多 10 次尝试，耗尽后终止整个批次
//! 5. **防御性校验**：未分类的异常之后重新检查下载目录，图片已到则照常推进
//!
//! 请求状态：`Pending → Attempting → {Succeeded, Exhausted}`，批次可整体 `Aborted`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::browser::BrowserLauncher;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::list_matching;
use crate::models::{
    BatchReport, ContentType, Diagnosis, GenerationAttempt, GenerationRequest, RequestOutcome,
};
use crate::services::artifact::staging_dir;
use crate::services::{
    ArtifactValidator, FailureClassifier, Humanizer, SessionManager, SessionSettings,
    SubmissionDriver,
};
use crate::utils::logging::log_request_start;

/// 单个请求的最大尝试次数
pub const MAX_ATTEMPTS: u32 = 10;

/// 第一次退避的基准时长（毫秒）
pub const BASE_BACKOFF_MS: f64 = 5_000.0;

/// 第 10 次尝试对应的退避时长（毫秒）
pub const MAX_BACKOFF_MS: f64 = 1_800_000.0;

const BACKOFF_JITTER_MS: f64 = 500.0;

/// 提交完成到开始校验之间的停顿
const POST_SUBMIT_PAUSE_MS: f64 = 5_000.0;

/// 退避的公比：`(1 800 000 / 5000)^(1/9)`
pub fn backoff_ratio() -> f64 {
    (MAX_BACKOFF_MS / BASE_BACKOFF_MS).powf(1.0 / f64::from(MAX_ATTEMPTS - 1))
}

/// 第 `attempt` 次尝试失败后的退避时长（毫秒，未加抖动）
pub fn backoff_delay_ms(attempt: u32) -> f64 {
    let exponent = attempt.max(1) - 1;
    BASE_BACKOFF_MS * backoff_ratio().powi(exponent as i32)
}

/// 批次参数
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub content_type: ContentType,
    pub style: String,
}

/// 重试编排器
///
/// 独占会话；所有操作严格按顺序执行
pub struct RetryOrchestrator<L: BrowserLauncher> {
    session: SessionManager<L>,
    driver: SubmissionDriver,
    validator: ArtifactValidator,
    humanizer: Arc<Humanizer>,
    /// 当前尝试的下载暂存目录
    staging: Option<PathBuf>,
    /// 当前请求已使用的暂存目录数量（含防御性重试）
    staged: usize,
}

impl<L: BrowserLauncher> RetryOrchestrator<L> {
    pub fn new(launcher: L, config: &Config, humanizer: Arc<Humanizer>) -> AppResult<Self> {
        let classifier = FailureClassifier::new(humanizer.clone(), &config.selectors)?;
        let driver = SubmissionDriver::new(humanizer.clone(), classifier, config);
        let validator = ArtifactValidator::new(humanizer.clone(), config.artifact_extension.clone());
        let session = SessionManager::new(launcher, SessionSettings::from(config), humanizer.clone());

        Ok(Self {
            session,
            driver,
            validator,
            humanizer,
            staging: None,
            staged: 0,
        })
    }

    pub fn session(&self) -> &SessionManager<L> {
        &self.session
    }

    /// 处理整个批次
    ///
    /// 任意请求耗尽重试次数或遇到致命错误都会直接返回错误，
    /// 后续请求不再处理；调用方负责 `abort()`
    pub async fn run_batch(
        &mut self,
        requests: &[GenerationRequest],
        job: &BatchJob,
    ) -> AppResult<BatchReport> {
        let downloads_dir = self.session.settings().downloads_dir.clone();
        self.validator.ensure_empty(&downloads_dir)?;
        self.session.start().await?;

        let total = requests.len();
        let mut report = BatchReport::default();
        let mut position = 0;
        let mut history: Vec<GenerationAttempt> = Vec::new();
        let mut recoveries = 0u32;

        while let Some(request) = requests.get(position) {
            let prompt = request.render_prompt(job.content_type, &job.style);
            if history.is_empty() && recoveries == 0 {
                log_request_start(request.index, total, &prompt);
            }

            let outcome = match self.process_request(request, &prompt, &mut history).await {
                Ok(artifact) => Some(RequestOutcome {
                    index: request.index,
                    attempts: std::mem::take(&mut history),
                    artifact,
                    recovered_after_error: false,
                }),
                Err(e) if e.is_fatal() => {
                    report.session_resets = self.session.reset_count();
                    return Err(e);
                }
                Err(e) => {
                    error!("[图片 {}] ❌ 处理过程中出现意外错误: {}", request.index, e);
                    recoveries += 1;
                    self.recover(request, recoveries)
                        .await?
                        .map(|artifact| RequestOutcome {
                            index: request.index,
                            attempts: std::mem::take(&mut history),
                            artifact,
                            recovered_after_error: true,
                        })
                }
            };

            if let Some(outcome) = outcome {
                info!(
                    "[图片 {}] ✅ 完成（共 {} 次尝试）",
                    outcome.index,
                    outcome.attempt_count()
                );
                report.outcomes.push(outcome);
                recoveries = 0;
                self.staged = 0;
                position += 1;
            }
        }

        report.session_resets = self.session.reset_count();
        self.session.close().await;
        Ok(report)
    }

    /// 处理单个请求，直到成功或耗尽尝试次数
    ///
    /// 每次尝试都会追加到 `history`；返回输出文件路径
    async fn process_request(
        &mut self,
        request: &GenerationRequest,
        base_prompt: &str,
        history: &mut Vec<GenerationAttempt>,
    ) -> AppResult<PathBuf> {
        let mut attempt = 1u32;
        let mut prompt = base_prompt.to_string();
        let mut mismatches = 0u32;

        let mut diagnosis = self
            .attempt_once(request, attempt, &prompt, history, &mut mismatches)
            .await?;

        while !diagnosis.is_none() {
            warn!(
                "[图片 {}] ⚠️ 第 {} 次尝试失败: {}",
                request.index, attempt, diagnosis
            );

            if attempt >= MAX_ATTEMPTS {
                return Err(self.exhausted(request.index, attempt));
            }

            if diagnosis.cooldown_paid() {
                info!("[图片 {}] 冷却已完成，跳过退避", request.index);
            } else {
                let backoff = backoff_delay_ms(attempt);
                info!(
                    "[图片 {}] ⏳ 退避 {:.1} 秒后重试",
                    request.index,
                    backoff / 1000.0
                );
                self.humanizer.delay(backoff, BACKOFF_JITTER_MS).await?;
            }

            match &diagnosis {
                Diagnosis::PolicyViolation { remediation } => {
                    prompt = remediation.apply(base_prompt);
                    if remediation.requires_reset {
                        warn!(
                            "[图片 {}] 连续违规，重置会话后使用修正后的提示词",
                            request.index
                        );
                        self.session.reset().await?;
                    } else {
                        info!("[图片 {}] 在当前会话中使用修正后的提示词", request.index);
                    }
                }
                _ => self.session.reset().await?,
            }

            attempt += 1;
            diagnosis = self
                .attempt_once(request, attempt, &prompt, history, &mut mismatches)
                .await?;
        }

        Ok(self
            .validator
            .output_path(&self.session.settings().outputs_dir, request.index))
    }

    /// 一次完整的尝试：暂存下载目录 → 提交 → 停顿 → 校验
    async fn attempt_once(
        &mut self,
        request: &GenerationRequest,
        attempt: u32,
        prompt: &str,
        history: &mut Vec<GenerationAttempt>,
        mismatches: &mut u32,
    ) -> AppResult<Diagnosis> {
        info!("[图片 {}] 第 {} 次尝试", request.index, attempt);

        // 同一请求的每次尝试（包括防御性重试）使用不同的暂存目录
        self.staged += 1;
        let staging = staging_dir(
            &self.session.settings().downloads_dir,
            request.index,
            self.staged,
        );
        self.staging = Some(staging.clone());
        self.session.stage_downloads(&staging).await?;

        let handle = self.session.handle_mut()?;
        let submission = self.driver.submit(handle, prompt, attempt).await?;

        self.humanizer.delay(POST_SUBMIT_PAUSE_MS, 100.0).await?;

        let outputs_dir = self.session.settings().outputs_dir.clone();
        let validation = match self
            .validator
            .validate(request.index, &staging, &outputs_dir)
            .await
        {
            Ok(validation) => validation,
            Err(AppError::ArtifactCountMismatch { dir, found }) => {
                *mismatches += 1;
                if *mismatches > 1 {
                    return Err(AppError::ArtifactCountMismatch { dir, found });
                }
                Diagnosis::ArtifactCountMismatch
            }
            Err(e) => return Err(e),
        };

        let diagnosis = match validation {
            Diagnosis::ArtifactCountMismatch => validation,
            validation => submission.diagnosis.merge(validation),
        };

        // 失败尝试的迟到下载不能留给之后的尝试或下一次运行
        self.validator.discard_staging(&staging);

        history.push(GenerationAttempt {
            request_index: request.index,
            attempt_number: attempt,
            prompt_text: prompt.to_string(),
            diagnosis: diagnosis.clone(),
        });
        Ok(diagnosis)
    }

    /// 未分类异常之后的防御性校验
    ///
    /// 图片已到：返回输出路径并重置会话；否则重置会话，由调用方从原始提示词重试
    async fn recover(
        &mut self,
        request: &GenerationRequest,
        recoveries: u32,
    ) -> AppResult<Option<PathBuf>> {
        let settings = self.session.settings().clone();
        let staging = self
            .staging
            .clone()
            .unwrap_or_else(|| settings.downloads_dir.clone());

        info!("[图片 {}] 🔍 检查图片是否已经下载...", request.index);
        let diagnosis = self
            .validator
            .validate(request.index, &staging, &settings.outputs_dir)
            .await?;

        if staging != settings.downloads_dir {
            self.validator.discard_staging(&staging);
        }

        if diagnosis.is_none() {
            info!("[图片 {}] ✓ 尽管出现异常，图片已成功下载", request.index);
            self.session.reset().await?;
            return Ok(Some(
                self.validator
                    .output_path(&settings.outputs_dir, request.index),
            ));
        }

        if recoveries >= MAX_ATTEMPTS {
            return Err(self.exhausted(request.index, recoveries));
        }

        warn!(
            "[图片 {}] 图片未下载 ({})，重置会话后重新处理",
            request.index, diagnosis
        );
        self.session.reset().await?;
        Ok(None)
    }

    /// 批次终止：尽力截图并关闭会话
    pub async fn abort(&mut self, screenshot_path: &Path) {
        if self.session.is_open() {
            match self.session.screenshot(screenshot_path).await {
                Ok(()) => info!("📸 错误截图已保存: {}", screenshot_path.display()),
                Err(e) => warn!("⚠️ 无法保存错误截图: {}", e),
            }
        }
        self.session.close().await;
    }

    fn exhausted(&self, index: usize, attempts: u32) -> AppError {
        let delivered = list_matching(
            &self.session.settings().outputs_dir,
            self.validator.extension(),
        )
        .map(|files| files.len())
        .unwrap_or(0);

        error!(
            "[图片 {}] ❌ 已尝试 {} 次仍未成功，需要人工介入",
            index, attempts
        );
        AppError::RetryExhausted {
            index,
            attempts,
            delivered,
        }
    }
}
