//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批处理应用
//! - 管理应用生命周期（初始化、运行、致命错误时截图并清理）
//! - 输出启动信息与全局统计
//!
//! ### `retry` - 重试编排器
//! - 顺序处理每个请求
//! - 根据诊断结果改写提示词或重置会话
//! - 指数退避、次数上限、防御性校验
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<GenerationRequest>)
//!     ↓
//! retry::RetryOrchestrator (处理单个请求的所有尝试)
//!     ↓
//! services (能力层：session / submission / classifier / artifact / humanizer)
//!     ↓
//! browser + infrastructure (BrowserPage、文件列举)
//! ```

pub mod batch_processor;
pub mod retry;

pub use batch_processor::App;
pub use retry::{backoff_delay_ms, BatchJob, RetryOrchestrator, MAX_ATTEMPTS};
