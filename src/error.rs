use crate::services::docx::DocxError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failure of a single external API call. Callers decide whether it is
/// fatal to the command or only to the current item.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error while calling {provider}: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} API error: {status} - {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} response is missing {path}")]
    MissingField {
        provider: &'static str,
        path: &'static str,
    },
    #[error("could not extract JSON from {provider} response")]
    NoJson { provider: &'static str },
    #[error("invalid JSON in {provider} response: {source}")]
    InvalidJson {
        provider: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("no image returned by {provider}: {detail}")]
    NoImage {
        provider: &'static str,
        detail: String,
    },
    #[error("invalid image payload from {provider}: {source}")]
    ImageDecode {
        provider: &'static str,
        #[source]
        source: base64::DecodeError,
    },
}

impl ApiError {
    pub fn transport(provider: &'static str, source: reqwest::Error) -> Self {
        ApiError::Transport { provider, source }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("please enter your {0} API key")]
    MissingKey(&'static str),
    #[error("upload a course outline first")]
    NoSource,
    #[error("process the course outline first")]
    NoOutline,
    #[error("select at least one chapter")]
    NoSelection,
    #[error("chapter index {index} is out of range (outline has {len} chapters)")]
    InvalidSelection { index: usize, len: usize },
    #[error("unsupported upload '{0}': expected .docx, .txt or .json")]
    UnsupportedUpload(String),
    #[error("could not read upload: {0}")]
    Upload(String),
    #[error("invalid API keys file: {0}")]
    KeysFile(String),
    #[error("session {0} not found")]
    SessionNotFound(uuid::Uuid),
    #[error("no generated document for '{0}'")]
    DocumentNotFound(String),
    #[error("image prompt export is turned off")]
    PromptExportDisabled,
    #[error("nothing has been generated yet")]
    NothingGenerated,
    #[error("generation did not complete; run generate again")]
    GenerationIncomplete,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Document(#[from] DocxError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    pub fn status(&self) -> StatusCode {
        match self {
            SessionError::MissingKey(_)
            | SessionError::NoSource
            | SessionError::NoOutline
            | SessionError::NoSelection
            | SessionError::InvalidSelection { .. }
            | SessionError::UnsupportedUpload(_)
            | SessionError::Upload(_)
            | SessionError::KeysFile(_) => StatusCode::BAD_REQUEST,
            SessionError::SessionNotFound(_)
            | SessionError::DocumentNotFound(_)
            | SessionError::PromptExportDisabled
            | SessionError::NothingGenerated => StatusCode::NOT_FOUND,
            SessionError::GenerationIncomplete => StatusCode::CONFLICT,
            SessionError::Api(_) => StatusCode::BAD_GATEWAY,
            SessionError::Io(_) | SessionError::Document(_) | SessionError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("{}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
