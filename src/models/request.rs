//! 生成请求
//!
//! 输入文件是一个 JSON 数组，每个元素包含 `positivePrompt` 与 `negativePrompt`

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// 输入文件中的一条记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PromptRecord {
    pub positive_prompt: String,
    pub negative_prompt: String,
}

/// 内容类型，决定图片比例
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    /// 横屏视频 16:9
    #[default]
    Video,
    /// 竖屏短视频 9:16
    Short,
}

impl ContentType {
    /// 图片比例
    pub fn aspect_ratio(self) -> &'static str {
        match self {
            ContentType::Video => "16:9",
            ContentType::Short => "9:16",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ContentType::Video => "video",
            ContentType::Short => "short",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ContentType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "video" => Ok(ContentType::Video),
            "short" => Ok(ContentType::Short),
            other => Err(AppError::InvalidInput(format!(
                "未知的内容类型 '{}'，可选值: video | short",
                other
            ))),
        }
    }
}

/// 单张图片的生成请求（不可变）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub positive_prompt: String,
    pub negative_prompt: String,
    /// 序号，从 1 开始，同时决定输出文件名
    pub index: usize,
}

impl GenerationRequest {
    /// 拼接完整提示词：模板 + 正/负向提示 + 风格后缀
    pub fn render_prompt(&self, content_type: ContentType, style: &str) -> String {
        let ar = content_type.aspect_ratio();
        let kind = content_type.name();
        format!(
            "Create the following image in {ar} AR for a YouTube {kind}. Stick to the image. \
             You can put words in objects but DO NOT INCLUDE RAW TEXT (never include the title or any text \
             in the image beyond words on objects). Keep in mind that each of the following prompts \
             corresponds to a phrase from the {kind} script. Each image will be placed synchronously with \
             that phrase in the {kind} montage. Therefore, stick to the positive prompt and avoid the \
             negative. REMEMBER {ar}. Remember to include text if specific text is mentioned. \
             positive prompt: {positive}; negative prompt: {negative}. \
             Apply the following image style: {style}",
            positive = self.positive_prompt,
            negative = self.negative_prompt,
        )
    }
}

/// 把记录列表转换为带序号的请求
pub fn into_requests(records: Vec<PromptRecord>) -> Vec<GenerationRequest> {
    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| GenerationRequest {
            positive_prompt: record.positive_prompt,
            negative_prompt: record.negative_prompt,
            index: i + 1,
        })
        .collect()
}

/// 从 JSON 文件加载所有请求
pub fn load_requests(path: &Path) -> AppResult<Vec<GenerationRequest>> {
    let content = std::fs::read_to_string(path).map_err(|e| AppError::file(path, e))?;
    parse_requests(&content)
}

/// 解析 JSON 文本
pub fn parse_requests(content: &str) -> AppResult<Vec<GenerationRequest>> {
    let records: Vec<PromptRecord> = serde_json::from_str(content).map_err(|e| {
        AppError::InvalidInput(format!(
            "提示词文件必须是对象数组，每个对象恰好包含 'positivePrompt' 与 'negativePrompt': {}",
            e
        ))
    })?;
    Ok(into_requests(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assigns_one_based_index() {
        let json = r#"[
            {"positivePrompt": "a red fox", "negativePrompt": "blur"},
            {"positivePrompt": "a lighthouse", "negativePrompt": "people"}
        ]"#;
        let requests = parse_requests(json).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].index, 1);
        assert_eq!(requests[1].index, 2);
        assert_eq!(requests[1].positive_prompt, "a lighthouse");
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let json = r#"[{"positivePrompt": "a red fox"}]"#;
        let err = parse_requests(json).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_parse_rejects_non_array() {
        assert!(parse_requests(r#"{"positivePrompt": "x", "negativePrompt": "y"}"#).is_err());
    }

    #[test]
    fn test_render_prompt_uses_aspect_ratio_and_style() {
        let request = GenerationRequest {
            positive_prompt: "a red fox".to_string(),
            negative_prompt: "blur".to_string(),
            index: 1,
        };
        let prompt = request.render_prompt(ContentType::Short, "Watercolor");
        assert!(prompt.contains("9:16 AR"));
        assert!(prompt.contains("YouTube short"));
        assert!(prompt.contains("positive prompt: a red fox"));
        assert!(prompt.ends_with("Apply the following image style: Watercolor"));
    }

    #[test]
    fn test_content_type_parse() {
        assert_eq!("VIDEO".parse::<ContentType>().unwrap(), ContentType::Video);
        assert_eq!("short".parse::<ContentType>().unwrap(), ContentType::Short);
        assert!("reel".parse::<ContentType>().is_err());
    }
}
