use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::browser::{BrowserLauncher, BrowserPage};
use crate::config::Config;
use crate::error::{AppResult, LaunchError};
use crate::infrastructure::ChromePage;
use crate::utils::polling::cancellable_sleep;

/// 基于 chromiumoxide 的浏览器启动器
///
/// 使用用户的浏览器配置目录启动有界面的浏览器，每次 `launch` 都是一个全新的进程
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    executable_path: PathBuf,
    user_profile_dir: Option<PathBuf>,
    headless: bool,
    window: (u32, u32),
    cancel: CancellationToken,
}

impl ChromeLauncher {
    pub fn new(config: &Config, cancel: CancellationToken) -> Self {
        Self {
            executable_path: config.executable_path.clone(),
            user_profile_dir: config.user_profile_dir.clone(),
            headless: config.headless,
            window: (config.viewport_width, config.viewport_height),
            cancel,
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig, LaunchError> {
        let mut builder = BrowserConfig::builder();
        builder = if self.headless {
            builder.new_headless_mode()
        } else {
            builder.with_head()
        };

        builder = builder
            .chrome_executable(&self.executable_path)
            .window_size(self.window.0, self.window.1)
            .viewport(None)
            .args(vec![
                "--disable-blink-features=AutomationControlled", // 隐藏 navigator.webdriver
                "--remote-debugging-port=0",
                "--no-first-run",
            ]);

        if let Some(dir) = &self.user_profile_dir {
            builder = builder.user_data_dir(dir);
        }

        builder
            .build()
            .map_err(|reason| LaunchError::ConfigurationFailed { reason })
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> AppResult<Box<dyn BrowserPage>> {
        info!("🚀 启动浏览器...");
        debug!("可执行文件: {}", self.executable_path.display());

        if !self.executable_path.exists() {
            error!("浏览器可执行文件不存在: {}", self.executable_path.display());
            return Err(LaunchError::ExecutableNotFound {
                path: self.executable_path.clone(),
            }
            .into());
        }

        let config = self.browser_config()?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            error!("启动浏览器失败: {}", e);
            LaunchError::ProcessFailed {
                reason: e.to_string(),
            }
        })?;
        debug!("浏览器启动成功");

        // 在后台处理浏览器事件
        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        // 添加短暂延迟以等待浏览器状态同步
        if let Err(e) = cancellable_sleep(&self.cancel, Duration::from_millis(300)).await {
            handler_task.abort();
            return Err(e);
        }

        let existing = browser.pages().await.map_err(|e| LaunchError::ProcessFailed {
            reason: e.to_string(),
        })?;
        let page = match existing.into_iter().next() {
            Some(page) => page,
            None => browser
                .new_page("about:blank")
                .await
                .map_err(|e| LaunchError::ProcessFailed {
                    reason: e.to_string(),
                })?,
        };

        info!("✅ 浏览器已就绪");
        Ok(Box::new(ChromePage::new(
            browser,
            page,
            handler_task,
            self.cancel.clone(),
        )))
    }
}
