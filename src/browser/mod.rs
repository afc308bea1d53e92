//! 浏览器接口
//!
//! 核心逻辑只依赖这里定义的两个 trait：
//! - `BrowserLauncher` 负责启动一个新的浏览器页面
//! - `BrowserPage` 暴露页面能力（导航、元素查询、鼠标、键盘、下载设置、截图）
//!
//! chromiumoxide 的实现位于 `launcher` 与 `infrastructure::chrome_page`

pub mod launcher;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppResult;

pub use launcher::ChromeLauncher;

/// 页面坐标
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// 元素包围盒
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    /// 把坐标限制在包围盒内
    pub fn clamp(&self, point: Point) -> Point {
        Point::new(
            point.x.clamp(self.x, self.x + self.width),
            point.y.clamp(self.y, self.y + self.height),
        )
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
    }
}

/// 视口尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// 键盘按键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Control,
    Enter,
    Delete,
    /// 字母键（用于 Ctrl+A / Ctrl+V 之类的组合键）
    Letter(char),
}

/// 浏览器页面能力
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// 导航到指定 URL
    async fn navigate(&self, url: &str) -> AppResult<()>;

    /// 等待元素出现
    async fn wait_for(&self, selector: &str, timeout: Duration) -> AppResult<()>;

    /// 统计匹配选择器的元素数量
    async fn count(&self, selector: &str) -> AppResult<usize>;

    /// 第 `index` 个匹配元素的包围盒；元素不存在时返回 `None`
    async fn bounding_box(&self, selector: &str, index: usize) -> AppResult<Option<BoundingBox>>;

    /// 通过脚本点击第 `index` 个匹配元素
    async fn click_element(&self, selector: &str, index: usize) -> AppResult<()>;

    /// 把元素滚动到可见区域
    async fn scroll_into_view(&self, selector: &str, index: usize) -> AppResult<()>;

    async fn mouse_move(&self, to: Point) -> AppResult<()>;

    /// 在指定位置按下并松开左键，中间保持 `hold`
    async fn mouse_click(&self, at: Point, hold: Duration) -> AppResult<()>;

    async fn mouse_wheel(&self, at: Point, delta_y: f64) -> AppResult<()>;

    async fn key_down(&self, key: Key) -> AppResult<()>;

    async fn key_up(&self, key: Key) -> AppResult<()>;

    async fn key_press(&self, key: Key) -> AppResult<()> {
        self.key_down(key).await?;
        self.key_up(key).await
    }

    /// 输入单个字符
    async fn type_char(&self, ch: char) -> AppResult<()>;

    /// 一次性插入整段文本（等同于粘贴）
    async fn insert_text(&self, text: &str) -> AppResult<()>;

    /// 设置浏览器下载目录
    async fn set_download_dir(&self, dir: &Path) -> AppResult<()>;

    async fn set_viewport(&self, viewport: Viewport) -> AppResult<()>;

    async fn viewport(&self) -> AppResult<Viewport>;

    /// 读取最近一条回复的文本；没有可读回复时返回 `None`
    async fn last_response_text(
        &self,
        block_selector: &str,
        paragraph_selector: &str,
    ) -> AppResult<Option<String>>;

    /// 整页截图
    async fn screenshot(&self, path: &Path) -> AppResult<()>;

    /// 关闭页面及其浏览器进程；重复调用应当无害
    async fn close(&mut self) -> AppResult<()>;
}

/// 浏览器启动器
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> AppResult<Box<dyn BrowserPage>>;
}
