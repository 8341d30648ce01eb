//! AI title translation and structured summaries, generated once per paper.
use crate::common::{Paper, PaperSummary, SummaryLength, SummaryState, TermGlossaryItem};
use crate::errors::{LlmError, StoreError, SummaryError};
use crate::llm::{CompletionRequest, LlmBackend};
use crate::store::PaperStore;
use crate::summary_parser::{parse_summary, ParsedTerm};
use crate::utils::s;
use chrono::Utc;
use fxhash::FxHashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const TITLE_TEMPERATURE: f64 = 0.1;
pub const TITLE_MAX_TOKENS: u32 = 200;
pub const SUMMARY_TEMPERATURE: f64 = 0.3;
pub const SUMMARY_MAX_TOKENS: u32 = 2000;

fn length_hint(length: SummaryLength) -> &'static str {
    match length {
        SummaryLength::Brief => "Keep every section to one short sentence.",
        SummaryLength::Standard => "Keep every section to two or three sentences.",
        SummaryLength::Detailed => {
            "Write a detailed paragraph of four to six sentences for every section."
        }
    }
}

fn paper_prompt(paper: &Paper) -> String {
    let mut prompt = s("Paper information:\n");
    prompt.push_str(&format!("Title: {}\n", paper.title));
    prompt.push_str(&format!("Authors: {}\n", paper.authors.join(", ")));
    prompt.push_str(&format!(
        "Categories: {}\n",
        paper.categories.iter().cloned().collect::<Vec<_>>().join(", ")
    ));
    prompt.push_str(&format!("Abstract: {}\n", paper.abstract_text));
    prompt
}

/// The i-th of n terms weighs `(n - i) / n`, so the first listed term ranks highest.
fn glossary(arxiv_id: &str, terms: Vec<ParsedTerm>) -> Vec<TermGlossaryItem> {
    let n = terms.len();
    terms
        .into_iter()
        .enumerate()
        .map(|(i, term)| TermGlossaryItem {
            arxiv_id: arxiv_id.to_string(),
            term_chinese: term.term_chinese,
            term_english: term.term_english,
            explanation: term.explanation,
            context_meaning: term.context_meaning,
            weight: (n - i) as f64 / n as f64,
        })
        .collect()
}

/// Marks a paper as being prefetched for as long as the guard lives.
struct InFlightGuard {
    in_flight: Arc<Mutex<FxHashSet<String>>>,
    arxiv_id: String,
}

impl InFlightGuard {
    fn acquire(in_flight: &Arc<Mutex<FxHashSet<String>>>, arxiv_id: &str) -> Option<Self> {
        let mut ids = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(arxiv_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: in_flight.clone(),
            arxiv_id: arxiv_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut ids = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        ids.remove(&self.arxiv_id);
    }
}

#[derive(Clone)]
pub struct SummaryPipeline {
    llm: Arc<dyn LlmBackend>,
    store: Arc<dyn PaperStore>,
    in_flight: Arc<Mutex<FxHashSet<String>>>,
}

impl SummaryPipeline {
    pub fn new(llm: Arc<dyn LlmBackend>, store: Arc<dyn PaperStore>) -> Self {
        SummaryPipeline {
            llm,
            store,
            in_flight: Arc::new(Mutex::new(FxHashSet::default())),
        }
    }

    pub fn state(&self, arxiv_id: &str) -> Result<SummaryState, StoreError> {
        Ok(SummaryState::of(self.store.summary(arxiv_id)?.as_ref()))
    }

    /// Stores a Chinese title for the paper unless it already has a summary record.
    pub async fn translate_title(&self, paper: &Paper) -> Result<PaperSummary, SummaryError> {
        if let Some(existing) = self.store.summary(&paper.arxiv_id)? {
            return Ok(existing);
        }

        let request = CompletionRequest::new(
            include_str!("instructions/translate_title.txt"),
            &paper.title,
            TITLE_TEMPERATURE,
            TITLE_MAX_TOKENS,
        );
        let completion = self.llm.complete(request).await?;
        let title = completion.content.trim();
        if title.is_empty() {
            return Err(LlmError::InvalidResponse("empty title translation".to_string()).into());
        }

        // a full summary may have landed while we were waiting
        let mut summary = match self.store.summary(&paper.arxiv_id)? {
            Some(current) if current.title_chinese.is_some() => return Ok(current),
            Some(current) => current,
            None => PaperSummary::new(&paper.arxiv_id, &completion.model),
        };
        summary.title_chinese = Some(title.to_string());
        summary.updated_at = Utc::now();
        self.store.save_summary(summary.clone(), None)?;
        debug!(arxiv_id = %paper.arxiv_id, "Stored translated title");
        Ok(summary)
    }

    /// Generates the full summary and its terms. A complete summary is returned as is.
    pub async fn generate_summary(&self, paper: &Paper) -> Result<PaperSummary, SummaryError> {
        if let Some(existing) = self.store.summary(&paper.arxiv_id)? {
            if existing.is_complete() {
                return Ok(existing);
            }
        }

        let length = self
            .store
            .preference()?
            .map(|p| p.summary_length)
            .unwrap_or_default();
        let system_prompt = format!(
            "{}\n{}",
            include_str!("instructions/summary.txt"),
            length_hint(length)
        );
        let request = CompletionRequest::new(
            &system_prompt,
            &paper_prompt(paper),
            SUMMARY_TEMPERATURE,
            SUMMARY_MAX_TOKENS,
        );
        let completion = self.llm.complete(request).await?;
        let parsed = parse_summary(&completion.content);

        let mut summary = self
            .store
            .summary(&paper.arxiv_id)?
            .unwrap_or_else(|| PaperSummary::new(&paper.arxiv_id, &completion.model));
        summary.model_name = completion.model.clone();
        if parsed.title_chinese.is_some() {
            summary.title_chinese = parsed.title_chinese;
        }
        summary.institutions = parsed.institutions;
        summary.problem = parsed.problem;
        summary.method = parsed.method;
        summary.result = parsed.result;
        summary.one_liner = parsed.one_liner;
        summary.summary_text = Some(completion.content.trim().to_string());
        summary.updated_at = Utc::now();
        if !summary.is_complete() {
            warn!(
                arxiv_id = %paper.arxiv_id,
                "Summary response had no problem section; the paper stays incomplete"
            );
        }

        let terms = glossary(&paper.arxiv_id, parsed.terms);
        info!(
            arxiv_id = %paper.arxiv_id,
            model = %summary.model_name,
            terms = terms.len(),
            "Stored paper summary"
        );
        self.store.save_summary(summary.clone(), Some(terms))?;
        Ok(summary)
    }

    /// Drops the stored summary and its terms, then generates them again.
    pub async fn regenerate_summary(&self, paper: &Paper) -> Result<PaperSummary, SummaryError> {
        self.store.delete_summary(&paper.arxiv_id)?;
        self.generate_summary(paper).await
    }

    /// Title then summary, at most one pass per paper at a time.
    /// Returns `false` without doing anything if a pass is already running.
    pub async fn prefetch(&self, paper: &Paper) -> Result<bool, SummaryError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &paper.arxiv_id) else {
            debug!(arxiv_id = %paper.arxiv_id, "Prefetch already in flight");
            return Ok(false);
        };
        self.translate_title(paper).await?;
        self.generate_summary(paper).await?;
        Ok(true)
    }

    pub fn is_prefetching(&self, arxiv_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(arxiv_id)
    }
}
