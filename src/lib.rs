//! Reflective coaching chat over a learning-journal entry.
//!
//! A user uploads a `.txt` or `.docx` journal entry; the hosted model opens
//! with a question about it and the conversation is capped at ten stored
//! messages, after which the transcript can be downloaded as a `.docx`.

pub mod chat;
pub mod config;
pub mod constants;
pub mod document;
pub mod error;
pub mod export;
pub mod gateway;
pub mod prompt;
pub mod session;
pub mod store;
pub mod turns;
pub mod web_server;

pub use config::Config;
pub use error::{AppError, ConfigError, ExportError, ExtractError, GatewayError, SessionError};
pub use gateway::{FragmentStream, GeminiGateway, ModelGateway};
pub use session::{Message, Phase, Role, SendOutcome, Session, TurnStart, UploadOutcome};
