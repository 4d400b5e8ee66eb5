// Terminal version of the coaching chat, driving the same session logic as
// the web UI over stdin/stdout.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::info;

use crate::constants::{
    CLOSING_NOTICE, EXPORT_ASSISTANT_LABEL, FALLBACK_REPLY, MIME_DOCX, MIME_TEXT,
    SERVICE_ERROR_NOTICE, UPLOAD_SUCCESS,
};
use crate::document::UploadedFile;
use crate::export::write_transcript;
use crate::gateway::ModelGateway;
use crate::session::{Message, SendOutcome, Session, UploadOutcome};

/// Declared MIME type for a local file, by extension. Unknown extensions are
/// left to the extractor to reject.
fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("txt") => MIME_TEXT,
        Some("docx") => MIME_DOCX,
        _ => "application/octet-stream",
    }
}

fn print_message(out: &mut impl Write, message: &Message) -> std::io::Result<()> {
    writeln!(out, "[{}] {}", crate::export::role_label(message.role), message.content)
}

/// Runs one reflection session: loads `document`, then alternates between
/// reading a line from `input` and streaming the reply to `out` until the
/// turn limit closes the conversation or input ends.
pub async fn run_chat(
    gateway: &dyn ModelGateway,
    document: &Path,
    export: Option<PathBuf>,
    input: impl AsyncBufRead + Unpin,
    out: &mut (impl Write + Send),
) -> Result<Session> {
    info!(document = %document.display(), "Starting terminal chat session...");
    let bytes = tokio::fs::read(document)
        .await
        .with_context(|| format!("Failed to read {}", document.display()))?;
    let file = UploadedFile::new(bytes, mime_for(document))
        .with_file_name(document.to_string_lossy());

    let mut session = Session::new();
    match session
        .load_document(file, gateway)
        .await
        .context("Failed to load the journal entry")?
    {
        UploadOutcome::Loaded { opening_failed } => {
            writeln!(out, "{UPLOAD_SUCCESS}")?;
            if opening_failed {
                writeln!(out, "{SERVICE_ERROR_NOTICE}")?;
            }
        }
        UploadOutcome::AlreadyLoaded => {}
    }
    for message in session.messages() {
        print_message(out, message)?;
    }

    let mut lines = input.lines();
    loop {
        if session.exportable() {
            writeln!(out, "{CLOSING_NOTICE}")?;
            break;
        }
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        write!(out, "[{EXPORT_ASSISTANT_LABEL}] ")?;
        let mut shown = false;
        let outcome = session
            .send(&line, gateway, |fragment| {
                shown = true;
                let _ = write!(out, "{fragment}");
                let _ = out.flush();
            })
            .await?;
        match outcome {
            SendOutcome::Replied(message) => {
                if message.content == FALLBACK_REPLY {
                    // Part of a broken reply may already be on screen.
                    if shown {
                        writeln!(out)?;
                        write!(out, "[{EXPORT_ASSISTANT_LABEL}] ")?;
                    }
                    write!(out, "{}", message.content)?;
                }
                writeln!(out)?;
            }
            SendOutcome::Closed => writeln!(out, "{CLOSING_NOTICE}")?,
        }
    }

    if let Some(path) = export {
        if session.exportable() {
            let bytes = write_transcript(session.messages())?;
            tokio::fs::write(&path, bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            writeln!(out, "{}", path.display())?;
            info!(path = %path.display(), "transcript exported");
        }
    }

    Ok(session)
}
