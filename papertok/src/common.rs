use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A paper as fetched from arXiv. Never mutated once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    /// arXiv identifier without the version suffix: "2401.12345"
    pub arxiv_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub published_date: DateTime<Utc>,
    pub categories: BTreeSet<String>,
    pub abstract_text: String,
    pub pdf_url: String,
}

impl Paper {
    pub fn first_author(&self) -> &str {
        self.authors.first().map(String::as_str).unwrap_or("Unknown")
    }
}

/// Per-paper interaction history. At most one per `arxiv_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserAction {
    pub arxiv_id: String,
    pub is_favorited: bool,
    pub is_read: bool,
    pub is_skipped: bool,
    pub dwell_time_seconds: f64,
    pub updated_at: DateTime<Utc>,
}

impl UserAction {
    pub fn new(arxiv_id: &str) -> Self {
        Self {
            arxiv_id: arxiv_id.to_string(),
            is_favorited: false,
            is_read: false,
            is_skipped: false,
            dwell_time_seconds: 0.0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    #[default]
    SubmittedDate,
    LastUpdatedDate,
    Relevance,
}

impl SortBy {
    /// Value of the arXiv `sortBy` query parameter.
    pub fn as_query_value(&self) -> &'static str {
        match self {
            SortBy::SubmittedDate => "submittedDate",
            SortBy::LastUpdatedDate => "lastUpdatedDate",
            SortBy::Relevance => "relevance",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    pub fn as_query_value(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum SummaryLength {
    Brief,
    #[default]
    Standard,
    Detailed,
}

/// Singleton ranking/feed preference. Absence means "no preference configured".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreference {
    pub selected_categories: BTreeSet<String>,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default)]
    pub summary_length: SummaryLength,
}

impl UserPreference {
    pub fn with_categories<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selected_categories: categories.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// AI summary of a paper. `problem` being set marks the summary as complete.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaperSummary {
    pub arxiv_id: String,
    pub model_name: String,
    pub title_chinese: Option<String>,
    pub institutions: Option<String>,
    pub problem: Option<String>,
    pub method: Option<String>,
    pub result: Option<String>,
    pub one_liner: Option<String>,
    pub summary_text: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PaperSummary {
    pub fn new(arxiv_id: &str, model_name: &str) -> Self {
        Self {
            arxiv_id: arxiv_id.to_string(),
            model_name: model_name.to_string(),
            title_chinese: None,
            institutions: None,
            problem: None,
            method: None,
            result: None,
            one_liner: None,
            summary_text: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.problem.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SummaryState {
    Absent,
    TitleOnly,
    Complete,
}

impl SummaryState {
    pub fn of(summary: Option<&PaperSummary>) -> Self {
        match summary {
            None => SummaryState::Absent,
            Some(summary) if summary.is_complete() => SummaryState::Complete,
            Some(_) => SummaryState::TitleOnly,
        }
    }
}

impl fmt::Display for SummaryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SummaryState::Absent => "absent",
            SummaryState::TitleOnly => "title-only",
            SummaryState::Complete => "complete",
        };
        f.write_str(label)
    }
}

/// One "Terms to Know" entry of a summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TermGlossaryItem {
    pub arxiv_id: String,
    pub term_chinese: String,
    pub term_english: String,
    pub explanation: String,
    pub context_meaning: String,
    pub weight: f64,
}

/// Per-component scores behind a ranking decision.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub freshness: f64,
    pub user_behavior: f64,
    pub category_relevance: f64,
    pub composite: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RankedPaper {
    pub arxiv_id: String,
    pub score: ScoreBreakdown,
}
