use crate::models::{Abandoned, InstallStatus, UsedSource};

pub type HubResult<T> = std::result::Result<T, HubError>;

/// Failure of a single ensure pipeline.
///
/// Every variant maps to one stable string code (see [`HubError::code`]) that
/// hosts match on; the `Display` text is the human message.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("{0}")]
    BadArgs(String),
    #[error("MODEL_MISSING_BUNDLED")]
    MissingBundled,
    #[error("MODEL_MISSING_REMOTE_URL")]
    MissingRemoteUrl,
    #[error("HTTP_{status}")]
    Http { status: u16 },
    #[error("SHA256_MISMATCH {origin} expected={expected} got={actual}")]
    Sha256Mismatch {
        origin: UsedSource,
        expected: String,
        actual: String,
    },
    #[error("UNPACK_INVALID:{status}")]
    UnpackInvalid { status: InstallStatus },
    #[error("download failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Abandoned(#[from] Abandoned),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HubError {
    pub fn bad_args(message: impl Into<String>) -> Self {
        Self::BadArgs(message.into())
    }

    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::BadArgs(_) => "BAD_ARGS".into(),
            Self::MissingBundled => "MODEL_MISSING_BUNDLED".into(),
            Self::MissingRemoteUrl => "MODEL_MISSING_REMOTE_URL".into(),
            Self::Http { status } => format!("HTTP_{status}"),
            Self::Sha256Mismatch { .. } => "SHA256_MISMATCH".into(),
            Self::UnpackInvalid { .. } => "UNPACK_INVALID".into(),
            Self::Transport(_) | Self::Abandoned(_) | Self::Other(_) => "ERROR".into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            // anyhow's alternate form keeps the context chain on one line
            Self::Other(error) => format!("{error:#}"),
            other => other.to_string(),
        }
    }
}
