pub mod conversation;
pub mod events;

pub mod settings {
    use serde::{Deserialize, Serialize};

    fn default_true() -> bool {
        true
    }

    fn default_timeout_secs() -> u64 {
        120
    }

    /// One OpenAI-compatible chat completions backend.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct BackendConfig {
        pub endpoint: String, // full URL, e.g. ".../v1/chat/completions"
        pub model: String,
        /// Inline key; takes precedence over `api_key_env`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub api_key: Option<String>,
        /// Environment variable consulted when `api_key` is unset
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub api_key_env: Option<String>,
        #[serde(default = "default_true")]
        pub stream: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub max_tokens: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub temperature: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub top_p: Option<f32>,
        #[serde(default = "default_timeout_secs")]
        pub timeout_secs: u64,
    }

    impl BackendConfig {
        pub fn resolve_api_key(&self) -> Option<String> {
            if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
                return Some(key.clone());
            }
            self.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|k| !k.trim().is_empty())
        }

        pub fn default_text() -> Self {
            Self {
                endpoint: "https://api.siliconflow.cn/v1/chat/completions".into(),
                model: "deepseek-ai/DeepSeek-R1-Distill-Qwen-7B".into(),
                api_key: None,
                api_key_env: Some("SILICONFLOW_API_KEY".into()),
                stream: true,
                max_tokens: Some(4096),
                temperature: Some(0.7),
                top_p: Some(0.7),
                timeout_secs: default_timeout_secs(),
            }
        }

        pub fn default_multimodal() -> Self {
            Self {
                endpoint: "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
                    .into(),
                model: "qwen2.5-vl-7b-instruct".into(),
                api_key: None,
                api_key_env: Some("DASHSCOPE_API_KEY".into()),
                stream: true,
                max_tokens: Some(4096),
                temperature: Some(0.7),
                top_p: Some(0.7),
                timeout_secs: default_timeout_secs(),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct StoreSettings {
        /// Retention cap applied on every save
        pub max_conversations: usize,
        /// How many conversations survive a quota-exceeded write
        pub quota_fallback: usize,
        pub title_max_chars: usize,
        /// Keep `data:` URLs in persisted attachment metadata
        pub persist_inline_data: bool,
        /// Open a fresh conversation on load unless the current one is empty
        pub new_conversation_on_start: bool,
    }

    impl Default for StoreSettings {
        fn default() -> Self {
            Self {
                max_conversations: 50,
                quota_fallback: 10,
                title_max_chars: 20,
                persist_inline_data: false,
                new_conversation_on_start: false,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct AttachmentSettings {
        pub pdf_zoom: f32,
        /// Longest side of a rasterized page, in pixels
        pub max_page_dimension: Option<u32>,
    }

    impl Default for AttachmentSettings {
        fn default() -> Self {
            Self {
                pdf_zoom: 2.0,
                max_page_dimension: None,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ChatSettings {
        pub text: BackendConfig,
        pub multimodal: BackendConfig,
        pub store: StoreSettings,
        pub attachments: AttachmentSettings,
        /// Prior messages sent along with each turn
        pub history_limit: usize,
    }

    impl Default for ChatSettings {
        fn default() -> Self {
            Self {
                text: BackendConfig::default_text(),
                multimodal: BackendConfig::default_multimodal(),
                store: StoreSettings::default(),
                attachments: AttachmentSettings::default(),
                history_limit: 20,
            }
        }
    }
}

pub mod agent_api {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        System,
        User,
        Assistant,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ImageUrl {
        pub url: String,
    }

    /// One element of a multi-part message content.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum ContentPart {
        Text { text: String },
        ImageUrl { image_url: ImageUrl },
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum MessageContent {
        Text(String),
        Parts(Vec<ContentPart>),
    }

    impl MessageContent {
        pub fn has_images(&self) -> bool {
            match self {
                MessageContent::Text(_) => false,
                MessageContent::Parts(parts) => parts
                    .iter()
                    .any(|p| matches!(p, ContentPart::ImageUrl { .. })),
            }
        }
    }

    /// A `{role, content}` entry of a chat completions request.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: Role,
        pub content: MessageContent,
    }

    impl ChatMessage {
        pub fn text(role: Role, text: impl Into<String>) -> Self {
            Self {
                role,
                content: MessageContent::Text(text.into()),
            }
        }

        /// A user entry carrying a single image.
        pub fn image(url: impl Into<String>) -> Self {
            Self {
                role: Role::User,
                content: MessageContent::Parts(vec![ContentPart::ImageUrl {
                    image_url: ImageUrl { url: url.into() },
                }]),
            }
        }
    }
}
