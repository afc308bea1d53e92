//! 日志工具模块
//!
//! 提供进度与统计信息的输出辅助函数

use tracing::info;

use crate::models::{BatchReport, ContentType};

/// 记录程序启动信息
pub fn log_startup(total: usize, content_type: ContentType, style: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量图片生成模式");
    info!("📊 提示词数量: {}", total);
    info!("🖼️ 内容类型: {} ({})", content_type, content_type.aspect_ratio());
    info!("🎨 图片风格: {}", truncate_text(style, 60));
    info!("{}", "=".repeat(60));
}

/// 记录单张图片开始处理
pub fn log_request_start(index: usize, total: usize, prompt: &str) {
    info!("\n[图片 {}] {}", index, "─".repeat(30));
    info!("[图片 {}] 处理第 {}/{} 张图片", index, index, total);
    info!("[图片 {}] 提示词: {}", index, truncate_text(prompt, 80));
}

/// 打印最终统计信息
pub fn print_final_stats(report: &BatchReport, total: usize) {
    let attempts: usize = report.outcomes.iter().map(|o| o.attempt_count()).sum();
    let recovered = report
        .outcomes
        .iter()
        .filter(|o| o.recovered_after_error)
        .count();

    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", report.outcomes.len(), total);
    info!("🔁 总尝试次数: {}", attempts);
    info!("♻️ 会话重置次数: {}", report.session_resets);
    info!("🛟 异常后恢复: {}", recovered);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
