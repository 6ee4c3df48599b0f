use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;

const MAX_THEME_CHARS: usize = 200;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum TemplateKind {
    #[default]
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "wechat", alias = "chat")]
    Chat,
}

impl TemplateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateKind::Normal => "normal",
            TemplateKind::Chat => "wechat",
        }
    }
}

/// Inbound body of the generation endpoints, before validation.
#[derive(Debug, Deserialize, Clone)]
pub struct GenerateRequest {
    #[serde(alias = "topic")]
    pub theme: String,
    #[serde(alias = "description")]
    pub content: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, rename = "templateType", alias = "templateKind")]
    pub template_type: TemplateKind,
}

impl GenerateRequest {
    pub fn validate(self) -> Result<GenerationRequest, AppError> {
        let topic = self.theme.trim();
        if topic.is_empty() {
            return Err(AppError::BadRequest("field `theme` must not be blank".into()));
        }
        if topic.chars().count() > MAX_THEME_CHARS {
            return Err(AppError::BadRequest(format!("field `theme` exceeds {MAX_THEME_CHARS} characters")));
        }
        let description = self.content.trim();
        if description.is_empty() {
            return Err(AppError::BadRequest("field `content` must not be blank".into()));
        }
        for (i, image) in self.images.iter().enumerate() {
            let valid = reqwest::Url::parse(image)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !valid {
                return Err(AppError::BadRequest(format!("field `images[{i}]` is not a valid URL")));
            }
        }
        Ok(GenerationRequest {
            topic: topic.to_string(),
            description: description.to_string(),
            images: self.images,
            template_kind: self.template_type,
        })
    }
}

/// A validated generation request. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub topic: String,
    pub description: String,
    pub images: Vec<String>,
    pub template_kind: TemplateKind,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OptimizeRequest {
    #[serde(default)]
    pub markdown: String,
    #[serde(default, rename = "type")]
    pub optimization: OptimizationKind,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationKind {
    #[default]
    Grammar,
    Seo,
    Readability,
    Engagement,
}

// --- Parsed model output ---

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedContent {
    Normal(NormalContent),
    Chat(ChatContent),
}

impl ParsedContent {
    pub fn kind(&self) -> TemplateKind {
        match self {
            ParsedContent::Normal(_) => TemplateKind::Normal,
            ParsedContent::Chat(_) => TemplateKind::Chat,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct NormalContent {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub intro: Option<String>,
    pub sections: Vec<Section>,
    #[serde(default)]
    pub footer: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct Section {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct ChatContent {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "chatHeader")]
    pub chat_header: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(from = "RawChatMessage")]
pub enum ChatMessage {
    TimeMarker { time: String },
    Bubble { nickname: String, text: String, align: Align, show_nickname: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    /// The counterpart speaker.
    Left,
    /// The requester.
    Right,
}

impl Align {
    pub fn as_str(self) -> &'static str {
        match self {
            Align::Left => "left",
            Align::Right => "right",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChatMessage {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default, alias = "sender")]
    nickname: Option<String>,
    #[serde(default, alias = "content")]
    text: Option<String>,
    #[serde(default)]
    align: Option<String>,
    #[serde(default)]
    show_nickname: Option<bool>,
}

impl From<RawChatMessage> for ChatMessage {
    fn from(raw: RawChatMessage) -> Self {
        if raw.kind.as_deref() == Some("time") {
            return ChatMessage::TimeMarker { time: raw.time.unwrap_or_default() };
        }
        let align = match raw.align.as_deref() {
            Some(a) if a.eq_ignore_ascii_case("right") => Align::Right,
            _ => Align::Left,
        };
        ChatMessage::Bubble {
            nickname: raw.nickname.unwrap_or_default(),
            text: raw.text.unwrap_or_default(),
            align,
            show_nickname: raw.show_nickname.unwrap_or(true),
        }
    }
}

// --- Outward events ---

/// One unit of the SSE stream sent back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutwardEvent {
    Data { payload: String },
    Done,
    Error { message: String },
}

impl OutwardEvent {
    pub fn data(payload: impl Into<String>) -> Self {
        OutwardEvent::Data { payload: payload.into() }
    }

    /// Wire form: one `data:` line followed by a blank line.
    pub fn encode(&self) -> String {
        match self {
            OutwardEvent::Data { payload } => format!("data: {}\n\n", json!({ "content": payload })),
            OutwardEvent::Done => "data: [DONE]\n\n".to_string(),
            OutwardEvent::Error { message } => format!("data: {}\n\n", json!({ "error": message })),
        }
    }
}
