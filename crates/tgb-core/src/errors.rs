use serde::Deserialize;

/// Core error type for the client.
///
/// Adapter crates map their transport errors into this type so callers see one
/// taxonomy for outbound calls and for passive transport failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("fatal error: {message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("parse error: {message}")]
    Parse { message: String, body: String },

    #[error("http error: {status}: {body}")]
    Http { status: u16, body: String },

    #[error("telegram error: {0}")]
    Rejected(ApiRejection),

    #[error("{0}")]
    MutuallyExclusive(String),

    #[error("listener panicked: {0}")]
    Listener(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Remote rejection: the response envelope decoded with `ok: false`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRejection {
    pub error_code: i64,
    pub description: String,
    pub parameters: Option<ResponseParameters>,
}

impl std::fmt::Display for ApiRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.error_code, self.description)
    }
}

/// Extra hints attached to a rejection (`parameters` in the envelope).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
    pub migrate_to_chat_id: Option<i64>,
}

pub const CONFLICT: i64 = 409;
pub const TOO_MANY_REQUESTS: i64 = 429;

impl Error {
    pub fn fatal(message: impl Into<String>) -> Self {
        Error::Fatal {
            message: message.into(),
            source: None,
        }
    }

    pub fn fatal_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Fatal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn rejection(&self) -> Option<&ApiRejection> {
        match self {
            Error::Rejected(r) => Some(r),
            _ => None,
        }
    }

    /// Remote error code for rejections, HTTP status for undecodable non-2xx bodies.
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Error::Rejected(r) => Some(r.error_code),
            Error::Http { status, .. } => Some(i64::from(*status)),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        self.rejection()
            .and_then(|r| r.parameters.as_ref())
            .and_then(|p| p.retry_after)
    }

    /// Another webhook is registered with the remote service.
    pub fn is_conflict(&self) -> bool {
        self.error_code() == Some(CONFLICT)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.error_code() == Some(TOO_MANY_REQUESTS)
    }
}
