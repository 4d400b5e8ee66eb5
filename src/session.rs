//! Per-session conversation state.
//!
//! A session moves through `NoDocument → DocumentLoaded → Conversing →
//! Closed`. The phase is derived from what is stored, so it cannot drift
//! from the transcript. At most one model request may be in flight per
//! session; a second turn is refused with [`SessionError::Busy`] until the
//! first one is finished.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::constants::FALLBACK_REPLY;
use crate::document::{extract_text, UploadedFile};
use crate::error::{ExtractError, GatewayError, SessionError};
use crate::gateway::ModelGateway;
use crate::prompt::{compose_context, compose_opening};
use crate::turns::{Admission, TurnLimiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NoDocument,
    /// Document cached, opening question not yet stored.
    DocumentLoaded,
    Conversing,
    /// Turn cap reached; only export remains.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Loaded { opening_failed: bool },
    /// A document is already cached for this session; the upload is ignored.
    AlreadyLoaded,
}

/// Everything the gateway needs for one reply, detached from the session so
/// the session lock is not held while the reply streams.
#[derive(Debug, Clone)]
pub struct PendingReply {
    pub context: String,
    pub history: Vec<Message>,
}

#[derive(Debug)]
pub enum TurnStart {
    Accepted(PendingReply),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Replied(Message),
    Closed,
}

#[derive(Debug, Default)]
pub struct Session {
    messages: Vec<Message>,
    document_text: Option<String>,
    in_flight: bool,
    limiter: TurnLimiter,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limiter(limiter: TurnLimiter) -> Self {
        Self {
            limiter,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn document_text(&self) -> Option<&str> {
        self.document_text.as_deref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn phase(&self) -> Phase {
        if self.document_text.is_none() {
            Phase::NoDocument
        } else if self.messages.is_empty() {
            Phase::DocumentLoaded
        } else if self.limiter.exportable(self.messages.len()) {
            Phase::Closed
        } else {
            Phase::Conversing
        }
    }

    pub fn exportable(&self) -> bool {
        self.limiter.exportable(self.messages.len())
    }

    /// Extracts the upload, caches its text and stores the opening question.
    ///
    /// The first successful upload is sticky: later uploads are ignored, even
    /// after the conversation has closed. Extraction errors leave the session
    /// untouched; a failed opening call stores the fallback reply instead.
    #[instrument(skip_all, fields(mime = %file.declared_mime))]
    pub async fn load_document(
        &mut self,
        file: UploadedFile,
        gateway: &dyn ModelGateway,
    ) -> Result<UploadOutcome, ExtractError> {
        if self.document_text.is_some() {
            info!("document already loaded; ignoring upload");
            return Ok(UploadOutcome::AlreadyLoaded);
        }

        let text = extract_text(file)?;
        let Some(opening) = self.begin_document(text) else {
            return Ok(UploadOutcome::AlreadyLoaded);
        };
        let mut guard = InFlight::new(self, Session::abandon_document);
        let reply = gateway.generate(&opening).await;
        let opening_failed = reply.is_err();
        guard.disarm().finish_document(reply);
        Ok(UploadOutcome::Loaded { opening_failed })
    }

    /// Caches `text` and clears the transcript. Returns the opening prompt,
    /// or `None` when a document is already cached.
    pub fn begin_document(&mut self, text: String) -> Option<String> {
        if self.document_text.is_some() {
            return None;
        }
        let opening = compose_opening(&text);
        info!(chars = text.chars().count(), "document loaded");
        self.document_text = Some(text);
        self.messages.clear();
        self.in_flight = true;
        Some(opening)
    }

    /// Stores the opening question, or the fallback if generation failed.
    pub fn finish_document(&mut self, reply: Result<String, GatewayError>) -> Message {
        self.push_reply(reply)
    }

    /// Forgets a document whose opening question never arrived, so the
    /// session can take a new upload.
    fn abandon_document(&mut self) {
        warn!("opening request cancelled; discarding the document");
        self.document_text = None;
        self.messages.clear();
        self.in_flight = false;
    }

    /// Accepts a user turn if the session can take one.
    ///
    /// The turn cap is checked before anything is stored: a closed session
    /// returns [`TurnStart::Closed`] and nothing changes.
    pub fn begin_turn(&mut self, input: &str) -> Result<TurnStart, SessionError> {
        let Some(document) = self.document_text.as_deref() else {
            return Err(SessionError::NoDocument);
        };
        if self.in_flight {
            return Err(SessionError::Busy);
        }
        if self.limiter.admit(self.messages.len()) == Admission::Closed {
            info!(messages = self.messages.len(), "turn limit reached");
            return Ok(TurnStart::Closed);
        }

        let context = compose_context(document);
        self.messages.push(Message::user(input));
        self.in_flight = true;
        Ok(TurnStart::Accepted(PendingReply {
            context,
            history: self.messages.clone(),
        }))
    }

    /// Stores the reply to the turn opened by [`Session::begin_turn`].
    /// A failed reply is logged and replaced by the fallback message so the
    /// transcript keeps its user/assistant pairing.
    pub fn finish_turn(&mut self, reply: Result<String, GatewayError>) -> Message {
        self.push_reply(reply)
    }

    fn push_reply(&mut self, reply: Result<String, GatewayError>) -> Message {
        self.in_flight = false;
        let content = match reply {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "reply generation failed");
                FALLBACK_REPLY.to_string()
            }
        };
        let message = Message::assistant(content);
        self.messages.push(message.clone());
        message
    }

    /// Runs a whole turn: admission, streamed reply, storage.
    /// `on_fragment` sees each piece of the reply as it arrives.
    pub async fn send(
        &mut self,
        input: &str,
        gateway: &dyn ModelGateway,
        on_fragment: impl FnMut(&str),
    ) -> Result<SendOutcome, SessionError> {
        let pending = match self.begin_turn(input)? {
            TurnStart::Accepted(pending) => pending,
            TurnStart::Closed => return Ok(SendOutcome::Closed),
        };
        let mut guard = InFlight::new(self, |session: &mut Session| {
            session.finish_turn(Err(GatewayError::Cancelled));
        });
        let reply = collect_reply(gateway, &pending, on_fragment).await;
        Ok(SendOutcome::Replied(guard.disarm().finish_turn(reply)))
    }
}

/// Settles an in-flight request if the future awaiting it is dropped, so a
/// cancelled call never leaves the session busy.
struct InFlight<'a> {
    session: &'a mut Session,
    on_cancel: fn(&mut Session),
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(session: &'a mut Session, on_cancel: fn(&mut Session)) -> Self {
        Self {
            session,
            on_cancel,
            armed: true,
        }
    }

    /// The request completed; hands the session back for normal storage.
    fn disarm(&mut self) -> &mut Session {
        self.armed = false;
        &mut *self.session
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            (self.on_cancel)(self.session);
        }
    }
}

/// Drains a reply stream into one string, reporting each fragment. A stream
/// that fails part-way or yields no text counts as a failed reply.
pub async fn collect_reply(
    gateway: &dyn ModelGateway,
    pending: &PendingReply,
    mut on_fragment: impl FnMut(&str),
) -> Result<String, GatewayError> {
    let mut stream = gateway
        .generate_stream(&pending.context, &pending.history)
        .await?;
    let mut full = String::new();
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        on_fragment(&fragment);
        full.push_str(&fragment);
    }
    if full.is_empty() {
        return Err(GatewayError::EmptyResponse);
    }
    Ok(full)
}
