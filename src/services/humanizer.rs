//! 交互模拟 - 业务能力层
//!
//! 生成类人的鼠标轨迹与按键节奏：
//! - 所有随机量都来自同一个可注入的随机源（测试时使用固定种子）
//! - 所有等待都是可取消的挂起点

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::browser::{BoundingBox, BrowserPage, Point, Viewport};
use crate::error::{AppError, AppResult};
use crate::utils::polling::cancellable_sleep;

/// 鼠标轨迹默认步数
pub const DEFAULT_PATH_STEPS: usize = 20;

/// 逐字输入速度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingSpeed {
    #[default]
    Fast,
    Slow,
}

impl TypingSpeed {
    /// 每个字符后的停顿 (均值, 标准差)，单位毫秒
    pub fn pause(self) -> (f64, f64) {
        match self {
            TypingSpeed::Fast => (20.0, 20.0),
            TypingSpeed::Slow => (100.0, 600.0),
        }
    }
}

/// 交互模拟器
pub struct Humanizer {
    rng: Mutex<StdRng>,
    cancel: CancellationToken,
}

impl Humanizer {
    /// 使用系统熵初始化随机源
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            cancel,
        }
    }

    /// 使用固定种子（可复现）
    pub fn seeded(seed: u64, cancel: CancellationToken) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Box–Muller 高斯采样，结果取绝对值
    ///
    /// 取绝对值会把负半轴折叠到正半轴，分布不再关于 `mean` 对称
    pub fn sample(&self, mean: f64, std_dev: f64) -> f64 {
        let (u, v) = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            (1.0 - rng.gen::<f64>(), 1.0 - rng.gen::<f64>())
        };
        let z = (-2.0 * u.ln()).sqrt() * (2.0 * std::f64::consts::PI * v).cos();
        (z * std_dev + mean).abs()
    }

    /// 可取消的等待
    pub async fn sleep(&self, duration: Duration) -> AppResult<()> {
        cancellable_sleep(&self.cancel, duration).await
    }

    /// 等待 `sample(base, deviation)` 毫秒
    pub async fn delay(&self, base_ms: f64, deviation_ms: f64) -> AppResult<()> {
        let ms = self.sample(base_ms, deviation_ms);
        self.sleep(Duration::from_millis(ms.round() as u64)).await
    }

    /// 会话打开时的初始鼠标位置：以视口中心为均值
    pub fn initial_pointer(&self, viewport: Viewport) -> Point {
        let w = viewport.width as f64;
        let h = viewport.height as f64;
        Point::new(self.sample(w / 2.0, w / 4.0), self.sample(h / 2.0, h / 4.0))
    }

    /// 从 `start` 到目标元素的二次贝塞尔轨迹，共 `steps + 1` 个点
    ///
    /// 终点在目标包围盒内随机抖动，控制点偏移与路径长度成正比
    pub fn pointer_path(&self, start: Point, target: &BoundingBox, steps: usize) -> Vec<Point> {
        let steps = steps.max(1);
        let start = if start.is_finite() {
            start
        } else {
            Point::default()
        };

        let center = target.center();
        let end = target.clamp(Point::new(
            center.x + self.sample(0.0, target.width / 4.0),
            center.y + self.sample(0.0, target.height / 4.0),
        ));

        let control = Point::new(
            (start.x + end.x) / 2.0 + self.sample(0.0, (end.x - start.x).abs() / 2.0),
            (start.y + end.y) / 2.0 + self.sample(0.0, (end.y - start.y).abs() / 2.0),
        );

        (0..=steps)
            .map(|i| {
                let t = i as f64 / steps as f64;
                let a = (1.0 - t) * (1.0 - t);
                let b = 2.0 * (1.0 - t) * t;
                let c = t * t;
                Point::new(
                    a * start.x + b * control.x + c * end.x,
                    a * start.y + b * control.y + c * end.y,
                )
            })
            .collect()
    }

    /// 沿轨迹移动鼠标到目标元素，返回新的鼠标位置
    pub async fn move_to(
        &self,
        page: &dyn BrowserPage,
        from: Point,
        target: &BoundingBox,
    ) -> AppResult<Point> {
        let path = self.pointer_path(from, target, DEFAULT_PATH_STEPS);
        for point in &path {
            page.mouse_move(*point).await?;
            self.delay(30.0, 10.0).await?;
        }
        self.delay(100.0, 10.0).await?;

        let end = path.last().copied().unwrap_or(from);
        debug!("鼠标移动到 ({:.1}, {:.1})", end.x, end.y);
        Ok(end)
    }

    /// 在当前位置点击，按键保持时间随机
    pub async fn click(&self, page: &dyn BrowserPage, at: Point) -> AppResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let hold = self.sample(70.0, 10.0);
        page.mouse_click(at, Duration::from_millis(hold.round() as u64))
            .await
    }

    /// 逐字输入，每个字符后随机停顿
    pub async fn type_text(
        &self,
        page: &dyn BrowserPage,
        text: &str,
        speed: TypingSpeed,
    ) -> AppResult<()> {
        let (base, deviation) = speed.pause();
        for ch in text.chars() {
            page.type_char(ch).await?;
            self.delay(base, deviation).await?;
        }
        Ok(())
    }

    /// 一次性粘贴整段文本，不产生逐字节奏
    pub async fn paste_text(&self, page: &dyn BrowserPage, text: &str) -> AppResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        page.insert_text(text).await
    }
}
