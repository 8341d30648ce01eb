//! Fakes and fixtures shared by the unit tests.
use crate::common::Paper;
use crate::errors::LlmError;
use crate::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::llm::{Completion, CompletionRequest, LlmBackend, TokenUsage};
use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn paper_published_days_ago(arxiv_id: &str, days: f64) -> Paper {
    Paper {
        arxiv_id: arxiv_id.to_string(),
        title: format!("Paper {}", arxiv_id),
        authors: vec!["Ada Lovelace".to_string(), "Alan Turing".to_string()],
        published_date: Utc::now() - Duration::milliseconds((days * 86_400_000.0) as i64),
        categories: ["cs.AI".to_string()].into_iter().collect(),
        abstract_text: format!("Abstract of {}.", arxiv_id),
        pdf_url: format!("https://arxiv.org/pdf/{}", arxiv_id),
    }
}

/// Builds an arXiv Atom document with one entry per `(id, days ago, categories)`.
pub fn atom_feed(entries: &[(&str, f64, &[&str])]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query</title>
"#,
    );
    for (id, days, categories) in entries {
        let published = Utc::now() - Duration::milliseconds((days * 86_400_000.0) as i64);
        xml.push_str("  <entry>\n");
        xml.push_str(&format!("    <id>http://arxiv.org/abs/{}v1</id>\n", id));
        xml.push_str(&format!(
            "    <published>{}</published>\n",
            published.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        xml.push_str(&format!("    <title>Paper {}</title>\n", id));
        xml.push_str(&format!("    <summary>Abstract of {}.</summary>\n", id));
        xml.push_str("    <author><name>Ada Lovelace</name></author>\n");
        xml.push_str(&format!(
            "    <link title=\"pdf\" href=\"http://arxiv.org/pdf/{}v1\" rel=\"related\"/>\n",
            id
        ));
        for category in categories.iter() {
            xml.push_str(&format!("    <category term=\"{}\"/>\n", category));
        }
        xml.push_str("  </entry>\n");
    }
    xml.push_str("</feed>\n");
    xml
}

enum Scripted {
    Reply(Result<HttpResponse, TransportError>),
    Hang,
}

/// `HttpTransport` that replays queued replies and records every request.
/// An exhausted queue answers with a network error.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: u16, body: &str) {
        self.push(Scripted::Reply(Ok(HttpResponse {
            status,
            body: body.to_string(),
        })));
    }

    pub fn push_error(&self, error: TransportError) {
        self.push(Scripted::Reply(Err(error)));
    }

    /// The next request never completes.
    pub fn push_hang(&self) {
        self.push(Scripted::Hang);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn push(&self, scripted: Scripted) {
        self.replies.lock().unwrap().push_back(scripted);
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(reply)) => reply,
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(TransportError::Network("no scripted reply".to_string())),
        }
    }
}

/// `LlmBackend` returning queued completions, optionally after a delay.
#[derive(Default)]
pub struct FakeLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
    delay: Option<std::time::Duration>,
    fallback: Option<String>,
}

impl FakeLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Answers `content` whenever the queue is empty.
    pub fn always(content: &str) -> Self {
        Self {
            fallback: Some(content.to_string()),
            ..Self::default()
        }
    }

    pub fn push_reply(&self, content: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(content.to_string()));
    }

    pub fn push_error(&self, error: LlmError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmBackend for FakeLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        let content = match (next, &self.fallback) {
            (Some(reply), _) => reply?,
            (None, Some(fallback)) => fallback.clone(),
            (None, None) => return Err(LlmError::Network("no scripted reply".into())),
        };
        Ok(Completion {
            content,
            model: "fake-model".to_string(),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
        })
    }
}
