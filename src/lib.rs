//! # Chat Image Batch
//!
//! 通过浏览器驱动聊天网页，批量生成并下载图片的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 浏览器与基础设施层（Browser / Infrastructure）
//! - `browser/` - `BrowserPage` / `BrowserLauncher` 两个 trait，核心逻辑只依赖它们
//! - `infrastructure/` - chromiumoxide 页面实现 `ChromePage`，下载目录文件列举
//!
//! ### ② 业务能力层（Services）
//! - `Humanizer` - 随机延迟、鼠标轨迹、逐字输入
//! - `SessionManager` - 浏览器会话的打开、重置、关闭
//! - `SubmissionDriver` - 填写提示词、发送、等待并点击下载按钮
//! - `FailureClassifier` - 根据回复文本判断失败原因
//! - `ArtifactValidator` - 校验下载目录并把图片移动到输出目录
//!
//! ### ③ 编排层（Orchestration）
//! - `orchestrator/retry` - 单个请求的重试、退避与恢复
//! - `orchestrator/batch_processor` - 批次生命周期，致命错误时截图并清理
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use browser::{BrowserLauncher, BrowserPage, ChromeLauncher};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{BatchReport, ContentType, Diagnosis, GenerationRequest};
pub use orchestrator::{App, BatchJob, RetryOrchestrator};
