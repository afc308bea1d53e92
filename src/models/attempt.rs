use std::path::PathBuf;

use crate::models::diagnosis::Diagnosis;

/// 单次尝试记录（仅在本次运行中保留）
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub request_index: usize,
    /// 尝试序号，1..=10
    pub attempt_number: u32,
    pub prompt_text: String,
    pub diagnosis: Diagnosis,
}

/// 单个请求的最终结果
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub index: usize,
    pub attempts: Vec<GenerationAttempt>,
    /// 输出文件路径
    pub artifact: PathBuf,
    /// 是否经由未分类异常后的防御性校验完成
    pub recovered_after_error: bool,
}

impl RequestOutcome {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

/// 整个批次的统计
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<RequestOutcome>,
    /// 会话重置次数（不含批次开始时的首次打开）
    pub session_resets: usize,
}
