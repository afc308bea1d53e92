//! 失败分类 - 业务能力层
//!
//! 读取最近一条回复文本，按多语言关键词判断失败原因：
//! - 频率限制：若包含"N 分钟"，在此处直接等待冷却时间
//! - 内容政策违规：生成补救指令
//! - 其他：未知错误（按一般退避重试）
//! - 页面无法读取：错误原样返回，交给编排层的防御性校验

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::browser::BrowserPage;
use crate::config::Selectors;
use crate::error::{AppError, AppResult};
use crate::models::{Diagnosis, Remediation};
use crate::services::Humanizer;
use crate::utils::logging::truncate_text;

/// 频率限制相关词汇（英文 / 西班牙文 / 中文）
const RATE_LIMIT_KEYWORDS: &[&str] = &[
    "limit",
    "limite",
    "límite",
    "too many requests",
    "frequency",
    "frecuencia",
    "velocidad",
    "temporal",
    "minutes",
    "minutos",
    "请求过于频繁",
    "频率",
    "限制",
    "分钟",
];

/// 内容政策相关词汇
const POLICY_KEYWORDS: &[&str] = &[
    "violate",
    "violates",
    "violation",
    "policies",
    "policy",
    "políticas",
    "infringe",
    "infring",
    "infringir",
    "viola",
    "违反",
    "内容政策",
    "不符合",
];

/// 冷却等待的抖动（毫秒）
const COOLDOWN_JITTER_MS: f64 = 10.0;

/// 单次冷却的上限（毫秒），与退避上限一致
pub const MAX_COOLDOWN_MS: u64 = 1_800_000;

/// 把回复中的分钟数换算为冷却时长，不超过 `MAX_COOLDOWN_MS`
pub fn cooldown_ms(minutes: u64) -> u64 {
    minutes.saturating_mul(60_000).min(MAX_COOLDOWN_MS)
}

/// 文本判断结果（不含副作用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextVerdict {
    RateLimit { cooldown_minutes: Option<u64> },
    PolicyViolation,
    Unrecognized,
}

/// 失败分类器
pub struct FailureClassifier {
    humanizer: Arc<Humanizer>,
    block_selector: String,
    paragraph_selector: String,
    minutes_pattern: Regex,
}

impl FailureClassifier {
    pub fn new(humanizer: Arc<Humanizer>, selectors: &Selectors) -> AppResult<Self> {
        let minutes_pattern = Regex::new(r"(?i)(\d+)\s*(?:minutos?|minutes?|mins?\b|分钟)")
            .map_err(|e| AppError::browser(format!("正则表达式无效: {}", e)))?;
        Ok(Self {
            humanizer,
            block_selector: selectors.response_block.clone(),
            paragraph_selector: selectors.response_paragraph.clone(),
            minutes_pattern,
        })
    }

    /// 对一次失败的提交进行分类
    ///
    /// # 参数
    /// - `page`: 当前页面
    /// - `failure`: 触发分类的错误
    /// - `attempt`: 当前请求的尝试序号（1 起）
    pub async fn classify(
        &self,
        page: &dyn BrowserPage,
        failure: &AppError,
        attempt: u32,
    ) -> AppResult<Diagnosis> {
        let fallback = match failure {
            AppError::Timeout { .. } => Diagnosis::Timeout,
            _ => Diagnosis::Unknown,
        };

        let text = match page
            .last_response_text(&self.block_selector, &self.paragraph_selector)
            .await
        {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("没有可读的回复文本，诊断为: {}", fallback);
                return Ok(fallback);
            }
            Err(e) => {
                // 页面本身已无法读取，无法分类
                warn!("读取回复文本失败: {}", e);
                return Err(e);
            }
        };
        debug!("回复文本: {}", truncate_text(&text, 200));

        match self.judge_text(&text) {
            TextVerdict::PolicyViolation => {
                let remediation = Remediation::for_attempt(attempt);
                info!(
                    "内容政策违规（第 {} 次尝试），{}",
                    attempt,
                    if remediation.requires_reset {
                        "下次尝试将重置会话"
                    } else {
                        "将在当前会话内调整提示词"
                    }
                );
                Ok(Diagnosis::PolicyViolation { remediation })
            }
            TextVerdict::RateLimit {
                cooldown_minutes: Some(minutes),
            } => {
                let wait_ms = cooldown_ms(minutes);
                warn!(
                    "⏳ 频率限制（回复要求 {} 分钟）– 等待 {} ms 后再重试",
                    minutes, wait_ms
                );
                self.humanizer
                    .delay(wait_ms as f64, COOLDOWN_JITTER_MS)
                    .await?;
                Ok(Diagnosis::RateLimit {
                    cooldown_ms: Some(wait_ms),
                })
            }
            TextVerdict::RateLimit {
                cooldown_minutes: None,
            } => {
                warn!("⏳ 频率限制（未给出等待时间）");
                Ok(Diagnosis::RateLimit { cooldown_ms: None })
            }
            TextVerdict::Unrecognized => Ok(fallback),
        }
    }

    /// 纯文本判断，不区分大小写；政策违规优先于频率限制
    pub fn judge_text(&self, text: &str) -> TextVerdict {
        let lowered = text.to_lowercase();
        let contains_any = |words: &[&str]| words.iter().any(|w| lowered.contains(w));

        if contains_any(POLICY_KEYWORDS) {
            return TextVerdict::PolicyViolation;
        }
        if contains_any(RATE_LIMIT_KEYWORDS) {
            let cooldown_minutes = self
                .minutes_pattern
                .captures(&lowered)
                .and_then(|cap| cap.get(1))
                .map(|m| m.as_str().parse::<u64>().unwrap_or(u64::MAX));
            return TextVerdict::RateLimit { cooldown_minutes };
        }
        TextVerdict::Unrecognized
    }
}
