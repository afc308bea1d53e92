use std::path::PathBuf;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误（致命）
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 浏览器启动错误（致命）
    #[error("浏览器启动失败: {0}")]
    Launch(#[from] LaunchError),

    /// 浏览器交互错误（可恢复）
    #[error("浏览器操作失败: {0}")]
    Browser(String),

    /// 输入文件格式错误（致命）
    #[error("输入格式错误: {0}")]
    InvalidInput(String),

    /// 文件系统错误
    #[error("文件错误 ({path}): {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 轮询超时
    #[error("等待 {what} 超时 ({waited_ms} ms)")]
    Timeout { what: String, waited_ms: u64 },

    /// 批次开始前下载目录不为空（致命）
    #[error("下载目录 {dir} 中已有 {count} 个 .{ext} 文件，请先清空后再运行")]
    DownloadAreaNotEmpty {
        dir: PathBuf,
        count: usize,
        ext: String,
    },

    /// 下载目录中出现多于一个文件，需要人工检查
    #[error("下载目录 {dir} 中检测到 {found} 个文件（预期 1 个），需要人工检查")]
    ArtifactCountMismatch { dir: PathBuf, found: usize },

    /// 重试次数耗尽（致命，终止整个批次）
    #[error("图片 #{index} 在 {attempts} 次尝试后仍未下载成功，需要人工介入（目前已输出 {delivered} 张图片）")]
    RetryExhausted {
        index: usize,
        attempts: u32,
        delivered: usize,
    },

    /// 任务被取消
    #[error("任务已取消")]
    Cancelled,
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 必填项缺失
    #[error("{field} 未配置")]
    Missing { field: &'static str },

    /// 下载目录与输出目录相同
    #[error("downloads_dir 与 outputs_dir 不能是同一路径: {path}")]
    SameDirectories { path: PathBuf },

    /// 指定的配置文件不存在
    #[error("找不到配置文件: {path}")]
    NotFound { path: PathBuf },

    /// 配置文件解析失败
    #[error("无法解析配置文件 {path}: {reason}")]
    ParseFailed { path: PathBuf, reason: String },

    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
}

/// 浏览器启动错误
#[derive(Debug, Error)]
pub enum LaunchError {
    /// 浏览器可执行文件不存在
    #[error("找不到浏览器可执行文件: {path}")]
    ExecutableNotFound { path: PathBuf },

    /// 浏览器配置失败
    #[error("浏览器配置失败: {reason}")]
    ConfigurationFailed { reason: String },

    /// 浏览器进程启动失败
    #[error("浏览器进程启动失败: {reason}")]
    ProcessFailed { reason: String },

    /// 下载/输出目录无法创建
    #[error("无法创建目录 {path}: {source}")]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    /// 是否为不可恢复的错误
    ///
    /// 致命错误直接终止批次；其他错误交给编排层的防御性校验处理
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::Config(_)
            | AppError::Launch(_)
            | AppError::InvalidInput(_)
            | AppError::DownloadAreaNotEmpty { .. }
            | AppError::ArtifactCountMismatch { .. }
            | AppError::RetryExhausted { .. }
            | AppError::Cancelled => true,
            AppError::Browser(_) | AppError::File { .. } | AppError::Timeout { .. } => false,
        }
    }

    /// 创建浏览器交互错误
    pub fn browser(message: impl Into<String>) -> Self {
        AppError::Browser(message.into())
    }

    /// 创建文件错误
    pub fn file(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        AppError::File {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// 创建超时错误
    pub fn timeout(what: impl Into<String>, waited_ms: u64) -> Self {
        AppError::Timeout {
            what: what.into(),
            waited_ms,
        }
    }
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File {
            path: String::new(),
            source: err,
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
