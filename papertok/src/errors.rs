use thiserror::Error;

/// User-facing error classes. Each maps to one actionable message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    NoNetwork,
    BadCredentials,
    RateLimited,
    ProviderError,
    MalformedData,
    Configuration,
    Cancelled,
}

impl ErrorClass {
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorClass::NoNetwork => "Network unavailable. Check your connection and try again.",
            ErrorClass::BadCredentials => {
                "The API key was rejected. Update it with `configure-llm`."
            }
            ErrorClass::RateLimited => "Rate limited by the remote service. Retry in a little while.",
            ErrorClass::ProviderError => "The remote service returned an error. Try again later.",
            ErrorClass::MalformedData => "Received data could not be read. Retry the request.",
            ErrorClass::Configuration => {
                "The language model is not configured. Run `configure-llm` first."
            }
            ErrorClass::Cancelled => "The request was cancelled.",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid query: at least one category is required")]
    InvalidQuery,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse arXiv response: {0}")]
    Parse(String),

    #[error("Rate limited by arXiv")]
    RateLimited,

    #[error("arXiv returned HTTP {0}")]
    Http(u16),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FeedError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FeedError::InvalidQuery => ErrorClass::Configuration,
            FeedError::Network(_) => ErrorClass::NoNetwork,
            FeedError::Parse(_) | FeedError::Store(_) => ErrorClass::MalformedData,
            FeedError::RateLimited => ErrorClass::RateLimited,
            FeedError::Http(_) => ErrorClass::ProviderError,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum LlmError {
    #[error("Invalid LLM configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LlmError::InvalidConfiguration(_) => ErrorClass::Configuration,
            LlmError::Network(_) | LlmError::Timeout => ErrorClass::NoNetwork,
            LlmError::Api { .. } | LlmError::InsufficientBalance => ErrorClass::ProviderError,
            LlmError::InvalidResponse(_) => ErrorClass::MalformedData,
            LlmError::RateLimitExceeded => ErrorClass::RateLimited,
            LlmError::AuthenticationFailed => ErrorClass::BadCredentials,
            LlmError::Cancelled => ErrorClass::Cancelled,
        }
    }
}

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SummaryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SummaryError::Llm(e) => e.class(),
            SummaryError::Store(_) => ErrorClass::MalformedData,
        }
    }
}

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("Secrets I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored LLM configuration is unreadable: {0}")]
    Corrupt(#[from] serde_json::Error),
}
