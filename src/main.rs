use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chat_image_batch::models::load_requests;
use chat_image_batch::{logger, App, BatchJob, Config, ContentType};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 通过聊天网页批量生成图片
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// 提示词 JSON 文件（`[{"positivePrompt": ..., "negativePrompt": ...}]`）
    prompts: PathBuf,

    /// 内容类型：video (16:9) | short (9:16)
    #[arg(default_value = "video")]
    content_type: ContentType,

    /// 附加在提示词后的风格描述
    #[arg(default_value = "Neutral style")]
    style: String,

    /// TOML 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 日志文件
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logger::init(cli.log_file.as_deref()) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // 加载配置与输入
    let config = Config::load(cli.config.as_deref())?;
    let requests = load_requests(&cli.prompts)?;
    info!("✓ 已读取 {} 条提示词", requests.len());

    // Ctrl-C 取消整个批次
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⚠️ 收到中断信号，正在停止...");
            signal_token.cancel();
        }
    });

    let job = BatchJob {
        content_type: cli.content_type,
        style: cli.style,
    };

    let mut app = App::initialize(config, cancel)?;
    app.run(&requests, &job).await?;

    if let Some(path) = &cli.log_file {
        info!("\n日志已保存至: {}", path.display());
    }
    Ok(())
}
