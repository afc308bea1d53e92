//! 提交驱动 - 业务能力层
//!
//! 完成一次"填写提示词 → 发送 → 等待生成 → 点击下载"的往返：
//! - 所有鼠标与键盘操作都经过 `Humanizer`
//! - 往返中的错误都交给 `FailureClassifier`；页面已无法读取时错误向上传递
//! - 取消永远直接向上传递

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::browser::Key;
use crate::config::{Config, Selectors};
use crate::error::{AppError, AppResult};
use crate::models::Diagnosis;
use crate::services::humanizer::TypingSpeed;
use crate::services::session::SessionHandle;
use crate::services::{FailureClassifier, Humanizer};
use crate::utils::{poll_until, PollOutcome, PollSpec};

/// 提示词填写方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// 整段粘贴
    Paste,
    /// 逐字输入
    Type(TypingSpeed),
}

/// 一次提交的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResult {
    pub diagnosis: Diagnosis,
    /// 提交后的回复计数
    pub response_count: usize,
}

/// 提交驱动
pub struct SubmissionDriver {
    humanizer: Arc<Humanizer>,
    classifier: FailureClassifier,
    selectors: Selectors,
    fill_mode: FillMode,
    /// 等待下载按钮出现的轮询参数
    response_poll: PollSpec,
    /// 等待输入框出现的最长时间
    composer_timeout: Duration,
}

impl SubmissionDriver {
    pub fn new(humanizer: Arc<Humanizer>, classifier: FailureClassifier, config: &Config) -> Self {
        let fill_mode = if config.paste_prompts {
            FillMode::Paste
        } else {
            FillMode::Type(config.typing_speed)
        };
        Self {
            humanizer,
            classifier,
            selectors: config.selectors.clone(),
            fill_mode,
            response_poll: PollSpec::new(500.0, 1.0, Duration::from_secs(200)),
            composer_timeout: Duration::from_secs(60),
        }
    }

    /// 提交一次提示词
    ///
    /// 返回的回复计数是提交后页面上的下载按钮数量
    ///
    /// # 参数
    /// - `handle`: 当前会话（其回复计数即为提交前的计数）
    /// - `prompt`: 提示词
    /// - `attempt`: 当前请求的尝试序号
    pub async fn submit(
        &self,
        handle: &mut SessionHandle,
        prompt: &str,
        attempt: u32,
    ) -> AppResult<SubmissionResult> {
        let prior = handle.response_count;

        let (diagnosis, response_count) = match self.round_trip(handle, prompt, prior).await {
            Ok(count) => (Diagnosis::None, count),
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => {
                warn!("下载第 {} 张图片时出错: {}", prior + 1, e);
                let diagnosis = self.classifier.classify(handle.page(), &e, attempt).await?;
                // 以页面上实际的下载按钮数量为准，同会话重试才能检测到新回复
                let observed = handle
                    .page()
                    .count(&self.selectors.download_button)
                    .await
                    .unwrap_or(prior);
                (diagnosis, observed)
            }
        };

        handle.response_count = response_count;
        Ok(SubmissionResult {
            diagnosis,
            response_count,
        })
    }

    async fn round_trip(
        &self,
        handle: &mut SessionHandle,
        prompt: &str,
        prior: usize,
    ) -> AppResult<usize> {
        self.fill_composer(handle, prompt).await?;

        // 发送
        self.humanizer.delay(300.0, 20.0).await?;
        handle.page().key_press(Key::Enter).await?;
        self.humanizer.delay(500.0, 20.0).await?;

        // 等待下载按钮数量增加
        let page = handle.page();
        let selector = self.selectors.download_button.as_str();
        let outcome = poll_until(&self.humanizer, self.response_poll, || async move {
            let count = page.count(selector).await?;
            Ok((count > prior).then_some(count))
        })
        .await?;

        let count = match outcome {
            PollOutcome::Ready(count) => count,
            PollOutcome::Exhausted { waited } => {
                return Err(AppError::timeout("生成结果", waited.as_millis() as u64));
            }
        };
        info!("检测到新的回复，准备点击下载按钮...");

        self.retrieve(handle, count - 1).await?;

        // 等待下载落盘
        self.humanizer.delay(8_000.0, 1_000.0).await?;
        Ok(count)
    }

    /// 聚焦输入框、清空并填入提示词
    async fn fill_composer(&self, handle: &mut SessionHandle, prompt: &str) -> AppResult<()> {
        let selector = self.selectors.composer.as_str();
        handle
            .page()
            .wait_for(selector, self.composer_timeout)
            .await?;

        if let Some(bbox) = handle.page().bounding_box(selector, 0).await? {
            if bbox.is_valid() {
                handle.pointer = self
                    .humanizer
                    .move_to(handle.page(), handle.pointer, &bbox)
                    .await?;
            }
        }
        handle.page().click_element(selector, 0).await?;
        self.humanizer.delay(600.0, 200.0).await?;

        // 清空已有内容
        let page = handle.page();
        page.key_down(Key::Control).await?;
        page.key_press(Key::Letter('a')).await?;
        page.key_up(Key::Control).await?;
        self.humanizer.delay(50.0, 10.0).await?;
        page.key_press(Key::Delete).await?;
        self.humanizer.delay(100.0, 20.0).await?;

        match self.fill_mode {
            FillMode::Paste => {
                info!("通过粘贴填写提示词");
                self.humanizer.paste_text(page, prompt).await
            }
            FillMode::Type(speed) => {
                info!("逐字输入提示词 ({:?})", speed);
                self.humanizer.type_text(page, prompt, speed).await
            }
        }
    }

    /// 滚动到最新的下载按钮并点击
    async fn retrieve(&self, handle: &mut SessionHandle, index: usize) -> AppResult<()> {
        let selector = self.selectors.download_button.as_str();

        handle.page().mouse_wheel(handle.pointer, 600.0).await?;
        handle.page().scroll_into_view(selector, index).await?;

        let bbox = handle
            .page()
            .bounding_box(selector, index)
            .await?
            .filter(|b| b.is_valid())
            .ok_or_else(|| AppError::browser(format!("找不到下载按钮 {}[{}]", selector, index)))?;

        handle.pointer = self
            .humanizer
            .move_to(handle.page(), handle.pointer, &bbox)
            .await?;
        self.humanizer.click(handle.page(), handle.pointer).await
    }
}
