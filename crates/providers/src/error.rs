use thiserror::Error;

/// Errors produced by a chat backend call.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Non-2xx status; `detail` holds the start of the response body.
    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    /// The request never got a response.
    #[error("Network error: {0}")]
    Network(String),

    /// The connection broke while the body was being read.
    #[error("Stream read error: {0}")]
    Stream(String),

    /// A 2xx body carrying an `error` object.
    #[error("API error: {0}")]
    Api(String),

    #[error("Unrecognized response shape: {0}")]
    UnrecognizedShape(String),

    #[error("Empty response")]
    EmptyResponse,

    #[error("No API key configured for model {0}")]
    MissingApiKey(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn is_network(&self) -> bool {
        matches!(self, ProviderError::Network(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Chat-transcript text explaining the failure.
    pub fn user_message(&self) -> String {
        let lead = match self {
            ProviderError::Http { status: 401 | 403, .. } | ProviderError::MissingApiKey(_) => {
                "I couldn't connect to the AI service - there may be an issue with the API key."
            }
            ProviderError::Http { status: 429, .. } => {
                "The AI service is temporarily busy. Please wait a moment and try again."
            }
            ProviderError::Http { status: 402, .. } => {
                "The AI service quota may have been exceeded."
            }
            ProviderError::Http { detail, .. }
                if detail.to_lowercase().contains("quota")
                    || detail.to_lowercase().contains("insufficient") =>
            {
                "The AI service quota may have been exceeded."
            }
            ProviderError::Http { status, .. } if *status >= 500 => {
                "The AI service is having problems right now. Please try again later."
            }
            ProviderError::Network(_) | ProviderError::Stream(_) => {
                "I'm having trouble connecting to the AI service. Please check your network connection."
            }
            ProviderError::Api(_) => "The AI service rejected the request.",
            ProviderError::Http { .. }
            | ProviderError::UnrecognizedShape(_)
            | ProviderError::EmptyResponse => {
                "Sorry, I couldn't get a usable answer from the AI service."
            }
        };
        format!("{}\n\nError: {}", lead, self)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Network(e.to_string())
    }
}
