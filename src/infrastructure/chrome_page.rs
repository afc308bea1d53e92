//! chromiumoxide 页面 - 基础设施层
//!
//! 持有唯一的 Browser 与 Page 资源，只暴露 `BrowserPage` 能力：
//! - 鼠标、键盘通过 CDP `Input.*` 命令派发，行为与真实输入一致
//! - 元素查询通过页面脚本完成
//! - 不认识提示词、诊断或重试流程

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::browser::{BoundingBox, BrowserPage, Key, Point, Viewport};
use crate::error::{AppError, AppResult};
use crate::utils::polling::cancellable_sleep;

/// CDP 修饰键位：Ctrl
const MODIFIER_CTRL: i64 = 2;

/// chromiumoxide 页面
pub struct ChromePage {
    browser: Option<Browser>,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
    /// 当前按下的修饰键
    modifiers: AtomicI64,
    /// 页面内部的等待（元素轮询、按键保持）随批次一起取消
    cancel: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct JsRect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl ChromePage {
    pub fn new(
        browser: Browser,
        page: Page,
        handler_task: JoinHandle<()>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            browser: Some(browser),
            page,
            handler_task: Some(handler_task),
            modifiers: AtomicI64::new(0),
            cancel,
        }
    }

    /// 执行 JS 代码并返回 JSON 结果
    async fn eval(&self, js_code: impl Into<String>) -> AppResult<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        // undefined 没有 value 字段，按 null 处理
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    /// 执行 JS 代码并反序列化为指定类型
    async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> AppResult<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)
            .map_err(|e| AppError::browser(format!("脚本返回值无法解析: {}", e)))?;
        Ok(typed_value)
    }

    async fn dispatch_mouse(
        &self,
        kind: DispatchMouseEventType,
        at: Point,
        delta_y: Option<f64>,
    ) -> AppResult<()> {
        let mut builder = DispatchMouseEventParams::builder()
            .r#type(kind.clone())
            .x(at.x)
            .y(at.y);

        match kind {
            DispatchMouseEventType::MousePressed | DispatchMouseEventType::MouseReleased => {
                builder = builder.button(MouseButton::Left).click_count(1);
            }
            DispatchMouseEventType::MouseWheel => {
                builder = builder.delta_x(0.0).delta_y(delta_y.unwrap_or(0.0));
            }
            _ => {}
        }

        let params = builder.build().map_err(AppError::browser)?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn dispatch_key(&self, kind: DispatchKeyEventType, key: Key) -> AppResult<()> {
        let modifiers = self.modifiers.load(Ordering::SeqCst);
        let (name, code, key_code, text) = key_definition(key);

        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(name)
            .code(code)
            .windows_virtual_key_code(key_code)
            .native_virtual_key_code(key_code)
            .modifiers(modifiers);

        // 按住 Ctrl 时不产生文本输入
        if kind == DispatchKeyEventType::KeyDown && modifiers == 0 {
            if let Some(text) = text {
                builder = builder.text(text);
            }
        }

        let params = builder.build().map_err(AppError::browser)?;
        self.page.execute(params).await?;
        Ok(())
    }
}

/// 按键定义: (key, code, 虚拟键码, 文本)
fn key_definition(key: Key) -> (String, String, i64, Option<String>) {
    match key {
        Key::Control => ("Control".into(), "ControlLeft".into(), 17, None),
        Key::Enter => ("Enter".into(), "Enter".into(), 13, Some("\r".into())),
        Key::Delete => ("Delete".into(), "Delete".into(), 46, None),
        Key::Letter(ch) => {
            let upper = ch.to_ascii_uppercase();
            (
                ch.to_ascii_lowercase().to_string(),
                format!("Key{}", upper),
                upper as i64,
                Some(ch.to_string()),
            )
        }
    }
}

#[async_trait]
impl BrowserPage for ChromePage {
    async fn navigate(&self, url: &str) -> AppResult<()> {
        self.page.goto(url).await.map_err(|e| {
            AppError::browser(format!("导航到 {} 失败: {}", url, e))
        })?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> AppResult<()> {
        let started = Instant::now();
        loop {
            if self.count(selector).await? > 0 {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(AppError::timeout(
                    format!("元素 {}", selector),
                    timeout.as_millis() as u64,
                ));
            }
            cancellable_sleep(&self.cancel, Duration::from_millis(250)).await?;
        }
    }

    async fn count(&self, selector: &str) -> AppResult<usize> {
        let js_code = format!(
            "document.querySelectorAll({}).length",
            serde_json::to_string(selector)?
        );
        self.eval_as(js_code).await
    }

    async fn bounding_box(&self, selector: &str, index: usize) -> AppResult<Option<BoundingBox>> {
        let js_code = format!(
            r#"
            (() => {{
                const el = document.querySelectorAll({})[{}];
                if (!el) return null;
                const r = el.getBoundingClientRect();
                return {{ x: r.x, y: r.y, width: r.width, height: r.height }};
            }})()
            "#,
            serde_json::to_string(selector)?,
            index
        );
        let rect: Option<JsRect> = self.eval_as(js_code).await?;
        Ok(rect.map(|r| BoundingBox {
            x: r.x,
            y: r.y,
            width: r.width,
            height: r.height,
        }))
    }

    async fn click_element(&self, selector: &str, index: usize) -> AppResult<()> {
        let js_code = format!(
            r#"
            (() => {{
                const el = document.querySelectorAll({})[{}];
                if (!el) return false;
                el.click();
                return true;
            }})()
            "#,
            serde_json::to_string(selector)?,
            index
        );
        let clicked: bool = self.eval_as(js_code).await?;
        if !clicked {
            return Err(AppError::browser(format!("元素不存在: {}[{}]", selector, index)));
        }
        Ok(())
    }

    async fn scroll_into_view(&self, selector: &str, index: usize) -> AppResult<()> {
        let js_code = format!(
            r#"
            (() => {{
                const el = document.querySelectorAll({})[{}];
                if (el) el.scrollIntoView({{ block: 'center' }});
                return !!el;
            }})()
            "#,
            serde_json::to_string(selector)?,
            index
        );
        self.eval(js_code).await?;
        Ok(())
    }

    async fn mouse_move(&self, to: Point) -> AppResult<()> {
        self.dispatch_mouse(DispatchMouseEventType::MouseMoved, to, None)
            .await
    }

    async fn mouse_click(&self, at: Point, hold: Duration) -> AppResult<()> {
        self.dispatch_mouse(DispatchMouseEventType::MousePressed, at, None)
            .await?;
        if let Err(e) = cancellable_sleep(&self.cancel, hold).await {
            // 取消时也要松开按键
            let _ = self
                .dispatch_mouse(DispatchMouseEventType::MouseReleased, at, None)
                .await;
            return Err(e);
        }
        self.dispatch_mouse(DispatchMouseEventType::MouseReleased, at, None)
            .await
    }

    async fn mouse_wheel(&self, at: Point, delta_y: f64) -> AppResult<()> {
        self.dispatch_mouse(DispatchMouseEventType::MouseWheel, at, Some(delta_y))
            .await
    }

    async fn key_down(&self, key: Key) -> AppResult<()> {
        self.dispatch_key(DispatchKeyEventType::KeyDown, key).await?;
        if key == Key::Control {
            self.modifiers.fetch_or(MODIFIER_CTRL, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn key_up(&self, key: Key) -> AppResult<()> {
        if key == Key::Control {
            self.modifiers.fetch_and(!MODIFIER_CTRL, Ordering::SeqCst);
        }
        self.dispatch_key(DispatchKeyEventType::KeyUp, key).await
    }

    async fn type_char(&self, ch: char) -> AppResult<()> {
        if ch.is_ascii_alphabetic() {
            return self.key_press(Key::Letter(ch)).await;
        }
        // 非字母字符（空格、标点、非 ASCII）直接作为文本插入
        self.insert_text(&ch.to_string()).await
    }

    async fn insert_text(&self, text: &str) -> AppResult<()> {
        self.page.execute(InsertTextParams::new(text)).await?;
        Ok(())
    }

    async fn set_download_dir(&self, dir: &Path) -> AppResult<()> {
        let download_path = std::fs::canonicalize(dir).map_err(|e| AppError::file(dir, e))?;
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_path.to_string_lossy().to_string())
            .build()
            .map_err(AppError::browser)?;
        self.page.execute(params).await?;
        debug!("下载目录已设置为: {}", download_path.display());
        Ok(())
    }

    async fn set_viewport(&self, viewport: Viewport) -> AppResult<()> {
        let params = SetDeviceMetricsOverrideParams::new(
            viewport.width as i64,
            viewport.height as i64,
            1.0,
            false,
        );
        self.page.execute(params).await?;
        Ok(())
    }

    async fn viewport(&self) -> AppResult<Viewport> {
        #[derive(Deserialize)]
        struct JsViewport {
            width: u32,
            height: u32,
        }
        let vp: JsViewport = self
            .eval_as("({ width: window.innerWidth, height: window.innerHeight })")
            .await?;
        Ok(Viewport {
            width: vp.width,
            height: vp.height,
        })
    }

    async fn last_response_text(
        &self,
        block_selector: &str,
        paragraph_selector: &str,
    ) -> AppResult<Option<String>> {
        let js_code = format!(
            r#"
            (() => {{
                const blocks = document.querySelectorAll({});
                const last = blocks[blocks.length - 1];
                if (!last) return null;
                const paragraphs = last.querySelectorAll({});
                if (paragraphs.length === 0) return null;
                return Array.from(paragraphs).map(p => p.textContent).join('');
            }})()
            "#,
            serde_json::to_string(block_selector)?,
            serde_json::to_string(paragraph_selector)?
        );
        self.eval_as(js_code).await
    }

    async fn screenshot(&self, path: &Path) -> AppResult<()> {
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("关闭浏览器失败: {}", e);
            }
            if let Err(e) = browser.wait().await {
                debug!("等待浏览器进程退出失败: {}", e);
            }
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        Ok(())
    }
}
