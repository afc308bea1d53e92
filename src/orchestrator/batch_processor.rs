//! 批处理应用 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责资源初始化和批次生命周期：
//!
//! 1. **应用初始化**：构建 Humanizer（持有取消令牌）与重试编排器
//! 2. **运行批次**：输出启动信息，委托 `RetryOrchestrator` 顺序处理所有请求
//! 3. **致命错误**：保存整页截图、关闭浏览器，把错误交还给调用方
//! 4. **全局统计**：汇总成功数量、尝试次数与会话重置次数

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::browser::{BrowserLauncher, ChromeLauncher};
use crate::config::Config;
use crate::error::AppResult;
use crate::models::{BatchReport, GenerationRequest};
use crate::orchestrator::retry::{BatchJob, RetryOrchestrator};
use crate::services::Humanizer;
use crate::utils::logging::{log_startup, print_final_stats};

/// 应用主结构
pub struct App<L: BrowserLauncher = ChromeLauncher> {
    config: Config,
    orchestrator: RetryOrchestrator<L>,
}

impl App<ChromeLauncher> {
    /// 使用本机 Chrome 初始化应用
    pub fn initialize(config: Config, cancel: CancellationToken) -> AppResult<Self> {
        let launcher = ChromeLauncher::new(&config, cancel.clone());
        Self::with_launcher(config, launcher, Arc::new(Humanizer::new(cancel)))
    }
}

impl<L: BrowserLauncher> App<L> {
    /// 使用指定的启动器初始化应用
    pub fn with_launcher(config: Config, launcher: L, humanizer: Arc<Humanizer>) -> AppResult<Self> {
        config.validate()?;
        let orchestrator = RetryOrchestrator::new(launcher, &config, humanizer)?;
        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub fn orchestrator(&self) -> &RetryOrchestrator<L> {
        &self.orchestrator
    }

    /// 运行整个批次
    ///
    /// 失败时已经完成截图与清理，返回的错误直接用于决定退出码
    pub async fn run(
        &mut self,
        requests: &[GenerationRequest],
        job: &BatchJob,
    ) -> AppResult<BatchReport> {
        if requests.is_empty() {
            warn!("⚠️ 没有待处理的提示词，程序结束");
            return Ok(BatchReport::default());
        }

        log_startup(requests.len(), job.content_type, &job.style);

        match self.orchestrator.run_batch(requests, job).await {
            Ok(report) => {
                print_final_stats(&report, requests.len());
                Ok(report)
            }
            Err(e) => {
                error!("❌ 批次已终止: {}", e);
                self.orchestrator.abort(&self.config.screenshot_path).await;
                Err(e)
            }
        }
    }
}
