//! Error types for each concern of the coach.
//!
//! Library code returns these typed errors; the binary wraps them with
//! `anyhow` context and the web layer maps them onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::constants::{
    BUSY_NOTICE, READ_FAILED_PREFIX, SERVICE_ERROR_NOTICE, UNSUPPORTED_FORMAT, UPLOAD_REQUIRED,
};

/// Startup configuration problems. Fatal: the process exits before serving.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "APIキーが設定されていません。\n\
         プロジェクトのルートディレクトリに`.env`ファイルを作成し、以下の形式でAPIキーを追加してください。\n\n\
         GOOGLE_API_KEY=\"YOUR_API_KEY_HERE\"\n\n\
         `YOUR_API_KEY_HERE`を実際のAPIキーに置き換えてください。\
         (環境変数 GOOGLE_API_KEY または --api-key でも指定できます)"
    )]
    MissingApiKey,

    #[error("directory not found: {0}")]
    MissingDirectory(String),
}

/// Failures turning an upload into plain text. No session state is touched.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {mime}")]
    UnsupportedFormat { mime: String },

    #[error("document is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error("unreadable word-processing document: {0}")]
    Docx(String),
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(e: zip::result::ZipError) -> Self {
        ExtractError::Docx(e.to_string())
    }
}

/// Failures talking to the hosted model.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("model API returned no text")]
    EmptyResponse,

    #[error("malformed model API payload: {0}")]
    Malformed(String),

    #[error("request cancelled before the model replied")]
    Cancelled,
}

/// Failures building the transcript document.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(String),
}

/// Reasons a session refuses a new user turn.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no document has been uploaded")]
    NoDocument,

    #[error("a reply is already being generated")]
    Busy,
}

/// Errors surfaced by the web shell. Input problems are shown to the user
/// as-is; internal failures are logged and replaced by a generic notice.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("the conversation has not reached its end yet")]
    NotExportable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Extract(ExtractError::UnsupportedFormat { .. }) => {
                (StatusCode::BAD_REQUEST, UNSUPPORTED_FORMAT.to_string())
            }
            AppError::Extract(e) => (StatusCode::BAD_REQUEST, format!("{READ_FAILED_PREFIX}: {e}")),
            AppError::Session(SessionError::NoDocument) => {
                (StatusCode::BAD_REQUEST, UPLOAD_REQUIRED.to_string())
            }
            AppError::Session(SessionError::Busy) => (StatusCode::CONFLICT, BUSY_NOTICE.to_string()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::NotExportable => (StatusCode::CONFLICT, self.to_string()),
            AppError::Export(_) | AppError::Template(_) | AppError::Internal(_) => {
                error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    SERVICE_ERROR_NOTICE.to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
