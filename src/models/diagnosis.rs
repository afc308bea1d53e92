//! 失败诊断
//!
//! 一次尝试失败后的类型化分类结果，由编排层据此决定恢复方式

use std::fmt;

/// 同一会话内允许重试的违规次数，超过后必须重置会话
pub const POLICY_SAME_SESSION_ATTEMPTS: u32 = 3;

/// 追加到提示词末尾的合规修正语
pub const POLICY_REMEDIATION_PHRASE: &str =
    "Adjust the prompt to comply with the content policy: create the closest possible image without prohibited elements.";

/// 违规后的补救指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remediation {
    /// 追加到提示词的修正语
    pub phrase: String,
    /// 下一次尝试前是否需要重置会话
    pub requires_reset: bool,
}

impl Remediation {
    /// 根据触发违规的尝试序号生成补救指令
    ///
    /// 第 1–3 次违规在原会话内重试，第 4 次尝试起重置会话
    pub fn for_attempt(attempt: u32) -> Self {
        Self {
            phrase: POLICY_REMEDIATION_PHRASE.to_string(),
            requires_reset: attempt >= POLICY_SAME_SESSION_ATTEMPTS,
        }
    }

    /// 基于原始提示词生成修正后的提示词（不会叠加多次修正语）
    pub fn apply(&self, original_prompt: &str) -> String {
        format!("{} {}", original_prompt, self.phrase)
    }
}

/// 诊断结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnosis {
    /// 无错误
    None,
    /// 频率限制；`cooldown_ms` 为已在分类器中等待过的冷却时间
    RateLimit { cooldown_ms: Option<u64> },
    /// 内容政策违规
    PolicyViolation { remediation: Remediation },
    /// 等待生成结果超时
    Timeout,
    /// 下载目录中文件数量多于预期
    ArtifactCountMismatch,
    /// 超时后下载文件仍不足
    ArtifactShortfall { found: usize, expected: usize },
    /// 无法识别的失败（按一般退避重试）
    Unknown,
}

impl Diagnosis {
    pub fn is_none(&self) -> bool {
        matches!(self, Diagnosis::None)
    }

    /// 冷却是否已经在分类阶段支付过
    pub fn cooldown_paid(&self) -> bool {
        matches!(
            self,
            Diagnosis::RateLimit {
                cooldown_ms: Some(_)
            }
        )
    }

    /// 合并提交阶段与校验阶段的诊断
    ///
    /// 校验阶段成功收取到图片时视为成功；否则优先保留提交阶段的诊断
    pub fn merge(self, validation: Diagnosis) -> Diagnosis {
        if validation.is_none() {
            return Diagnosis::None;
        }
        if self.is_none() {
            validation
        } else {
            self
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnosis::None => write!(f, "无错误"),
            Diagnosis::RateLimit {
                cooldown_ms: Some(ms),
            } => write!(f, "频率限制（已冷却 {} 秒）", ms / 1000),
            Diagnosis::RateLimit { cooldown_ms: None } => write!(f, "频率限制"),
            Diagnosis::PolicyViolation { remediation } => {
                write!(f, "内容政策违规: {}", remediation.phrase)
            }
            Diagnosis::Timeout => write!(f, "等待生成结果超时"),
            Diagnosis::ArtifactCountMismatch => write!(f, "下载文件数量异常"),
            Diagnosis::ArtifactShortfall { found, expected } => {
                write!(f, "图片缺失: 检测到 {}/{}", found, expected)
            }
            Diagnosis::Unknown => write!(f, "未知错误"),
        }
    }
}
