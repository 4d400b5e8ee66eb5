#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use tokio::sync::Notify;

use journal_coach::{FragmentStream, GatewayError, Message, ModelGateway};

/// How a scripted reply behaves.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Streamed as these fragments, in order.
    Fragments(Vec<String>),
    /// The request itself fails.
    Fail,
    /// Some fragments arrive, then the stream breaks.
    BreakAfter(Vec<String>),
    /// The model never answers.
    Hang,
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

/// A stream call as the gateway saw it.
#[derive(Debug, Clone)]
pub struct StreamCall {
    pub context: String,
    pub history: Vec<Message>,
}

/// In-process stand-in for the hosted model. Replies are taken from a queue;
/// once it is empty every call answers with a numbered default.
#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Reply>>,
    pub openings: Mutex<Vec<String>>,
    pub streams: Mutex<Vec<StreamCall>>,
    /// When set, streaming replies wait for a notification before starting.
    gate: Option<Arc<Notify>>,
    /// When set, opening questions wait for a notification before answering.
    opening_gate: Option<Arc<Notify>>,
}

impl ScriptedGateway {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn gated(replies: impl IntoIterator<Item = Reply>, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(replies)
        }
    }

    pub fn gated_openings(replies: impl IntoIterator<Item = Reply>, gate: Arc<Notify>) -> Self {
        Self {
            opening_gate: Some(gate),
            ..Self::new(replies)
        }
    }

    fn next_reply(&self) -> Reply {
        let calls = self.openings.lock().unwrap().len() + self.streams.lock().unwrap().len();
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Text(format!("reply {calls}")))
    }

    pub fn stream_calls(&self) -> Vec<StreamCall> {
        self.streams.lock().unwrap().clone()
    }

    pub fn opening_calls(&self) -> Vec<String> {
        self.openings.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.openings.lock().unwrap().len() + self.streams.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn generate(&self, content: &str) -> Result<String, GatewayError> {
        let reply = self.next_reply();
        self.openings.lock().unwrap().push(content.to_string());
        if let Some(gate) = &self.opening_gate {
            gate.notified().await;
        }
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fragments(parts) => Ok(parts.concat()),
            Reply::Fail | Reply::BreakAfter(_) => Err(GatewayError::EmptyResponse),
            Reply::Hang => futures::future::pending().await,
        }
    }

    async fn generate_stream(
        &self,
        context: &str,
        history: &[Message],
    ) -> Result<FragmentStream, GatewayError> {
        let reply = self.next_reply();
        self.streams.lock().unwrap().push(StreamCall {
            context: context.to_string(),
            history: history.to_vec(),
        });
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let items: Vec<Result<String, GatewayError>> = match reply {
            Reply::Text(text) => vec![Ok(text)],
            Reply::Fragments(parts) => parts.into_iter().map(Ok).collect(),
            Reply::Fail => return Err(GatewayError::Malformed("scripted failure".to_string())),
            Reply::Hang => return futures::future::pending().await,
            Reply::BreakAfter(parts) => parts
                .into_iter()
                .map(Ok)
                .chain([Err(GatewayError::Malformed("stream broke".to_string()))])
                .collect(),
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Minimal `.docx` holding one body paragraph per entry.
pub fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{p}</w:t></w:r></w:p>"))
        .collect();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}<w:sectPr/></w:body></w:document>"#
    );
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
        .unwrap();
    std::io::Write::write_all(&mut zip, xml.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}
