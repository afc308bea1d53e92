//! 会话管理 - 业务能力层
//!
//! 持有唯一的浏览器会话，显式状态机：`Closed → Open → Closed`
//!
//! - `reset()` 统一完成"关闭旧会话 + 打开新会话 + 重新进入聊天页"
//! - 鼠标位置与回复计数都属于 `SessionHandle`，重置后随旧句柄一起销毁

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::browser::{BrowserLauncher, BrowserPage, Point, Viewport};
use crate::config::Config;
use crate::error::{AppError, AppResult, LaunchError};
use crate::services::Humanizer;

/// 会话参数
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub downloads_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub target_url: String,
    pub viewport: Viewport,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            downloads_dir: config.downloads_dir.clone(),
            outputs_dir: config.outputs_dir.clone(),
            target_url: config.target_url.clone(),
            viewport: Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
            },
        }
    }
}

/// 当前存活的会话
pub struct SessionHandle {
    page: Box<dyn BrowserPage>,
    /// 当前鼠标位置，在同一会话的所有操作间连续传递
    pub pointer: Point,
    /// 本会话中已提交的回复数量
    pub response_count: usize,
}

impl SessionHandle {
    pub fn page(&self) -> &dyn BrowserPage {
        self.page.as_ref()
    }
}

enum SessionState {
    Closed,
    Open(SessionHandle),
}

/// 会话管理器
pub struct SessionManager<L: BrowserLauncher> {
    launcher: L,
    settings: SessionSettings,
    humanizer: Arc<Humanizer>,
    state: SessionState,
    resets: usize,
}

impl<L: BrowserLauncher> SessionManager<L> {
    pub fn new(launcher: L, settings: SessionSettings, humanizer: Arc<Humanizer>) -> Self {
        Self {
            launcher,
            settings,
            humanizer,
            state: SessionState::Closed,
            resets: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open(_))
    }

    /// 重置次数（不含首次打开）
    pub fn reset_count(&self) -> usize {
        self.resets
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// 当前会话句柄
    pub fn handle_mut(&mut self) -> AppResult<&mut SessionHandle> {
        match &mut self.state {
            SessionState::Open(handle) => Ok(handle),
            SessionState::Closed => Err(AppError::browser("会话未打开")),
        }
    }

    /// 打开会话：启动浏览器、启用下载、设置视口、随机放置鼠标
    ///
    /// 已打开时不做任何事
    pub async fn open(&mut self) -> AppResult<()> {
        if self.is_open() {
            return Ok(());
        }

        for dir in [&self.settings.downloads_dir, &self.settings.outputs_dir] {
            std::fs::create_dir_all(dir).map_err(|source| LaunchError::DirectoryUnavailable {
                path: dir.clone(),
                source,
            })?;
        }

        let mut page = self.launcher.launch().await?;

        // 下载目录设置失败属于致命错误，先关闭半初始化的页面
        if let Err(e) = page.set_download_dir(&self.settings.downloads_dir).await {
            let _ = page.close().await;
            return Err(LaunchError::ConfigurationFailed {
                reason: format!("无法启用下载: {}", e),
            }
            .into());
        }

        let pointer = match self.place_pointer(page.as_ref()).await {
            Ok(point) => {
                info!("初始鼠标位置: ({:.2}, {:.2})", point.x, point.y);
                point
            }
            Err(AppError::Cancelled) => {
                let _ = page.close().await;
                return Err(AppError::Cancelled);
            }
            Err(e) => {
                warn!("⚠️ 无法设置初始鼠标位置: {}，使用 (0,0)", e);
                Point::default()
            }
        };

        self.state = SessionState::Open(SessionHandle {
            page,
            pointer,
            response_count: 0,
        });
        info!("✅ 浏览器会话已打开");
        Ok(())
    }

    async fn place_pointer(&self, page: &dyn BrowserPage) -> AppResult<Point> {
        page.set_viewport(self.settings.viewport).await?;
        let viewport = page.viewport().await?;
        let point = self.humanizer.initial_pointer(viewport);
        page.mouse_move(point).await?;
        Ok(point)
    }

    /// 批次开始：打开会话并进入聊天页
    pub async fn start(&mut self) -> AppResult<()> {
        self.open().await?;
        self.enter_chat().await
    }

    /// 重置会话：关闭当前会话（如果有）、打开新会话、重新进入聊天页
    ///
    /// 新句柄的回复计数为 0，旧句柄不会再被使用
    pub async fn reset(&mut self) -> AppResult<()> {
        info!("♻️ 正在重置浏览器会话...");
        self.close().await;
        self.open().await?;
        self.resets += 1;
        self.enter_chat().await
    }

    /// 进入聊天页；导航失败只记录警告，后续尝试会失败并被分类
    async fn enter_chat(&mut self) -> AppResult<()> {
        self.humanizer.delay(600.0, 100.0).await?;
        let url = self.settings.target_url.clone();
        let handle = self.handle_mut()?;
        match handle.page().navigate(&url).await {
            Ok(()) => info!("✓ 已进入聊天页: {}", url),
            Err(e) => warn!("⚠️ 进入聊天页失败: {}", e),
        }
        self.humanizer.delay(600.0, 100.0).await
    }

    /// 把本次尝试的下载重定向到独立的暂存目录
    pub async fn stage_downloads(&mut self, dir: &Path) -> AppResult<()> {
        std::fs::create_dir_all(dir).map_err(|e| AppError::file(dir, e))?;
        let handle = self.handle_mut()?;
        handle.page().set_download_dir(dir).await?;
        debug!("下载暂存目录: {}", dir.display());
        Ok(())
    }

    /// 整页截图（尽力而为）
    pub async fn screenshot(&mut self, path: &Path) -> AppResult<()> {
        let handle = self.handle_mut()?;
        handle.page().screenshot(path).await
    }

    /// 关闭会话；可重复调用
    pub async fn close(&mut self) {
        if let SessionState::Open(mut handle) = std::mem::replace(&mut self.state, SessionState::Closed)
        {
            if let Err(e) = handle.page.close().await {
                warn!("关闭浏览器会话失败: {}", e);
            }
            info!("浏览器会话已关闭");
        }
    }
}
