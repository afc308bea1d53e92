use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AppError, AppResult, ConfigError};
use crate::services::TypingSpeed;

/// 页面元素选择器
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Selectors {
    /// 输入框
    pub composer: String,
    /// "下载图片"按钮（出现即代表生成完成）
    pub download_button: String,
    /// 回复内容容器
    pub response_block: String,
    /// 回复容器中的段落
    pub response_paragraph: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            composer: r#"div[id="prompt-textarea"]"#.to_string(),
            download_button: r#"button[aria-label="Download this image"]"#.to_string(),
            response_block: "div.markdown.prose".to_string(),
            response_paragraph: "p[data-start][data-end]".to_string(),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 浏览器可执行文件路径
    pub executable_path: PathBuf,
    /// 浏览器用户数据目录（保留登录状态）
    pub user_profile_dir: Option<PathBuf>,
    /// 浏览器下载目录
    pub downloads_dir: PathBuf,
    /// 图片输出目录
    pub outputs_dir: PathBuf,
    /// 目标聊天页面
    pub target_url: String,
    /// 图片扩展名（不含点）
    pub artifact_extension: String,
    /// 视口宽度
    pub viewport_width: u32,
    /// 视口高度
    pub viewport_height: u32,
    /// 是否以粘贴方式填写提示词（否则逐字输入）
    pub paste_prompts: bool,
    /// 逐字输入时的速度
    pub typing_speed: TypingSpeed,
    /// 是否无头模式
    pub headless: bool,
    /// 致命错误时截图保存路径
    pub screenshot_path: PathBuf,
    /// 页面选择器
    pub selectors: Selectors,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            executable_path: PathBuf::from("/usr/bin/google-chrome"),
            user_profile_dir: None,
            downloads_dir: PathBuf::from("downloads"),
            outputs_dir: PathBuf::from("outputs"),
            target_url: "https://chatgpt.com/?model=gpt-4o".to_string(),
            artifact_extension: "png".to_string(),
            viewport_width: 1280,
            viewport_height: 720,
            paste_prompts: true,
            typing_speed: TypingSpeed::Fast,
            headless: false,
            screenshot_path: PathBuf::from("error-screenshot.png"),
            selectors: Selectors::default(),
        }
    }
}

impl Config {
    /// 仅从环境变量读取（未设置的项使用默认值）
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_env_overrides()
    }

    /// 读取配置并校验
    ///
    /// 指定了 TOML 文件时先读取文件再用环境变量覆盖，文件不存在属于配置错误；
    /// 未指定时等同于 `from_env()`
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let config = match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::NotFound {
                        path: path.to_path_buf(),
                    }
                    .into());
                }
                let content =
                    std::fs::read_to_string(path).map_err(|e| AppError::file(path, e))?;
                toml::from_str::<Config>(&content)
                    .map_err(|e| ConfigError::ParseFailed {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?
                    .with_env_overrides()?
            }
            None => Self::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    fn with_env_overrides(self) -> AppResult<Self> {
        let env_path = |name: &str| std::env::var(name).ok().map(PathBuf::from);

        Ok(Self {
            executable_path: env_path("CHROME_EXECUTABLE_PATH").unwrap_or(self.executable_path),
            user_profile_dir: env_path("CHROME_USER_DATA_DIR").or(self.user_profile_dir),
            downloads_dir: env_path("DOWNLOADS_DIR").unwrap_or(self.downloads_dir),
            outputs_dir: env_path("OUTPUTS_DIR").unwrap_or(self.outputs_dir),
            target_url: std::env::var("TARGET_URL").unwrap_or(self.target_url),
            artifact_extension: std::env::var("ARTIFACT_EXTENSION")
                .map(|ext| ext.trim_start_matches('.').to_string())
                .unwrap_or(self.artifact_extension),
            paste_prompts: env_bool("PASTE_PROMPTS")?.unwrap_or(self.paste_prompts),
            typing_speed: env_typing_speed("TYPING_SPEED")?.unwrap_or(self.typing_speed),
            headless: env_bool("HEADLESS")?.unwrap_or(self.headless),
            screenshot_path: env_path("SCREENSHOT_PATH").unwrap_or(self.screenshot_path),
            ..self
        })
    }

    /// 校验目录配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.downloads_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing {
                field: "downloads_dir",
            });
        }
        if self.outputs_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing {
                field: "outputs_dir",
            });
        }
        if self.downloads_dir == self.outputs_dir {
            return Err(ConfigError::SameDirectories {
                path: self.downloads_dir.clone(),
            });
        }
        Ok(())
    }
}

fn env_bool(var_name: &str) -> Result<Option<bool>, ConfigError> {
    match std::env::var(var_name) {
        Ok(value) => value
            .parse::<bool>()
            .map(Some)
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: "bool".to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn env_typing_speed(var_name: &str) -> Result<Option<TypingSpeed>, ConfigError> {
    match std::env::var(var_name) {
        Ok(value) => match value.trim().to_lowercase().as_str() {
            "fast" => Ok(Some(TypingSpeed::Fast)),
            "slow" => Ok(Some(TypingSpeed::Slow)),
            _ => Err(ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: "fast | slow".to_string(),
            }),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_directories_rejected() {
        let config = Config {
            downloads_dir: PathBuf::from("shared"),
            outputs_dir: PathBuf::from("shared"),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SameDirectories { .. })
        ));
    }

    #[test]
    fn test_toml_file_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
downloads_dir = "/tmp/dl"
outputs_dir = "/tmp/out"

[selectors]
composer = "textarea"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.selectors.composer, "textarea");
        // 未写的选择器保持默认
        assert_eq!(
            config.selectors.download_button,
            Selectors::default().download_button
        );
        assert_eq!(config.viewport_width, 1280);
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "viewport_width = \"wide\"").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            crate::error::AppError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn test_missing_config_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            crate::error::AppError::Config(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn test_typing_speed_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
paste_prompts = false
typing_speed = "slow"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(!config.paste_prompts);
        assert_eq!(config.typing_speed, TypingSpeed::Slow);
        assert_eq!(Config::default().typing_speed, TypingSpeed::Fast);
    }
}
