//! Quote card helpers around the portrait pipeline: prompt text, content
//! validation, export file names and export-safe portrait references.

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime, macros::format_description};

use crate::auth::encode_rfc3986;
use crate::{PortraitError, Result};

pub const MAX_NAME_CHARS: usize = 60;
pub const MAX_QUOTE_CHARS: usize = 500;

/// Studio portrait prompt for a named person.
pub fn portrait_prompt(name: &str) -> String {
    let name = name.trim();
    format!(
        "一张高清晰度、逼真的{name}半身肖像，采用专业摄影棚人像风格。相机距离适中，头肩构图，脸部在画面中占比较大。相机角度：左15度侧面（拍摄对象向左转15度），自然四分之三视角，非正面。拍摄对象衣着完整，穿着与其公认的公众形象相匹配的服装（符合时代背景和职业特点），正装或经典服饰，衣物清晰可见。无裸露、无暴露、颈部以下无裸露皮肤。背景为纯黑色（#000000），干净简洁。灯光为电影级工作室灯光，伦勃朗式光线，高对比度。画面干净且具有精致美感。拍摄对象必须与{name}相符，不得是卡通、机器人、标识、海报或纯文字图像。"
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosterContent {
    pub name: String,
    pub quote: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

impl ContentErrors {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.quote.is_none()
    }
}

impl std::fmt::Display for ContentErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<&str> = [self.name.as_deref(), self.quote.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        f.write_str(&messages.join("; "))
    }
}

impl PosterContent {
    pub fn new(name: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quote: quote.into(),
            description: String::new(),
        }
    }

    pub fn normalized_quote(&self) -> String {
        self.quote.replace("\r\n", "\n").trim().to_string()
    }

    /// Lengths count characters, not bytes.
    pub fn validate(&self) -> std::result::Result<(), ContentErrors> {
        let name_chars = self.name.trim().chars().count();
        let quote_chars = self.normalized_quote().chars().count();

        let mut errors = ContentErrors::default();
        if name_chars == 0 {
            errors.name = Some("请输入名人".to_string());
        } else if name_chars > MAX_NAME_CHARS {
            errors.name = Some(format!("名人最长 {MAX_NAME_CHARS} 字"));
        }
        if quote_chars == 0 {
            errors.quote = Some("请输入名言".to_string());
        } else if quote_chars > MAX_QUOTE_CHARS {
            errors.quote = Some(format!("名言最长 {MAX_QUOTE_CHARS} 字"));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Jpeg,
    Jpg,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Jpg => "jpg",
        }
    }
}

/// `quote-YYYYMMDD-HHMMSS.<ext>` in the wall-clock time given.
pub fn poster_filename(format: ExportFormat, datetime: PrimitiveDateTime) -> Result<String> {
    let stamp = datetime
        .format(format_description!("[year][month][day]-[hour][minute][second]"))
        .map_err(|err| PortraitError::InvalidInput(format!("failed to format timestamp: {err}")))?;
    Ok(format!("quote-{stamp}.{}", format.extension()))
}

/// Filename stamped with the local wall clock (UTC when the offset is unknown).
pub fn poster_filename_now(format: ExportFormat) -> Result<String> {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    poster_filename(format, PrimitiveDateTime::new(now.date(), now.time()))
}

/// Rasterizers cannot read cross-origin images, so foreign portrait URLs are
/// routed through the local `/api/image` relay. Same-origin and inline
/// references pass through; unparsable ones yield `None`.
pub fn export_portrait_url(url: &str, origin: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    if url.starts_with("data:") || url.starts_with("blob:") {
        return Some(url.to_string());
    }
    let parsed = reqwest::Url::parse(url).ok()?;
    let own = reqwest::Url::parse(origin).ok()?;
    if parsed.origin() == own.origin() {
        return Some(url.to_string());
    }
    Some(format!("/api/image?url={}", encode_rfc3986(url)))
}
