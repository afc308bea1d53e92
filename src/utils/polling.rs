//! 有界轮询
//!
//! 提交阶段等待下载按钮、校验阶段等待下载文件，都使用同一个原语：
//! 每隔 `interval`（带抖动）检查一次条件，直到条件满足或超过 `ceiling`

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::services::Humanizer;

/// 轮询参数
#[derive(Debug, Clone, Copy)]
pub struct PollSpec {
    /// 轮询间隔均值（毫秒）
    pub interval_ms: f64,
    /// 间隔抖动（毫秒）
    pub jitter_ms: f64,
    /// 最长等待时间
    pub ceiling: Duration,
}

impl PollSpec {
    pub fn new(interval_ms: f64, jitter_ms: f64, ceiling: Duration) -> Self {
        Self {
            interval_ms,
            jitter_ms,
            ceiling,
        }
    }
}

/// 轮询结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// 条件满足
    Ready(T),
    /// 超过最长等待时间
    Exhausted { waited: Duration },
}

/// 可取消的等待：令牌已取消或等待期间被取消时返回 `Cancelled`
pub async fn cancellable_sleep(cancel: &CancellationToken, duration: Duration) -> AppResult<()> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        _ = sleep(duration) => Ok(()),
    }
}

/// 轮询直到 `predicate` 返回 `Some`
///
/// `predicate` 返回错误时立即结束轮询并向上传递
pub async fn poll_until<T, F, Fut>(
    humanizer: &Humanizer,
    spec: PollSpec,
    mut predicate: F,
) -> AppResult<PollOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<Option<T>>>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = predicate().await? {
            return Ok(PollOutcome::Ready(value));
        }

        let waited = started.elapsed();
        if waited >= spec.ceiling {
            return Ok(PollOutcome::Exhausted { waited });
        }

        humanizer.delay(spec.interval_ms, spec.jitter_ms).await?;
    }
}
