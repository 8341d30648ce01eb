use crate::common::{
    Paper, PaperSummary, RankedPaper, SummaryState, TermGlossaryItem, UserAction, UserPreference,
};
use crate::errors::ErrorClass;
use crate::utils::truncate_chars;
use indicatif::{ProgressBar, ProgressStyle};

const ABSTRACT_PREVIEW_CHARS: usize = 240;

/// Renders feed rows, summaries and errors for the terminal.
pub struct Reporter {}

impl Reporter {
    pub fn new() -> Reporter {
        Reporter {}
    }

    pub fn get_pbar(&self, total: u64, message: &str) -> ProgressBar {
        let pbar = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:60.blue/green}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");
        pbar.set_style(style);
        pbar.set_message(message.to_string());
        pbar
    }

    pub fn render_feed_row(
        &self,
        index: usize,
        paper: &Paper,
        summary: Option<&PaperSummary>,
        action: Option<&UserAction>,
        ranked: Option<&RankedPaper>,
    ) -> String {
        let mut flags = String::new();
        if let Some(action) = action {
            if action.is_favorited {
                flags.push('★');
            }
            if action.is_read {
                flags.push('✓');
            }
        }

        let mut row = format!(
            "{:>3}. [{}] {}{}\n",
            index + 1,
            paper.arxiv_id,
            paper.title,
            if flags.is_empty() { String::new() } else { format!(" {}", flags) }
        );
        if let Some(title) = summary.and_then(|s| s.title_chinese.as_deref()) {
            row.push_str(&format!("     {}\n", title));
        }
        row.push_str(&format!(
            "     {} et al. | {} | {} | summary: {}\n",
            paper.first_author(),
            paper.published_date.format("%Y-%m-%d"),
            paper.categories.iter().cloned().collect::<Vec<_>>().join(", "),
            SummaryState::of(summary)
        ));
        if let Some(ranked) = ranked {
            row.push_str(&format!(
                "     score {:.3} (freshness {:.2}, behavior {:.2}, category {:.2})\n",
                ranked.score.composite,
                ranked.score.freshness,
                ranked.score.user_behavior,
                ranked.score.category_relevance
            ));
        }
        match summary.and_then(|s| s.one_liner.as_deref()) {
            Some(one_liner) => row.push_str(&format!("     > {}\n", one_liner)),
            None => row.push_str(&format!(
                "     {}\n",
                truncate_chars(&paper.abstract_text, ABSTRACT_PREVIEW_CHARS)
            )),
        }
        row
    }

    pub fn render_summary(
        &self,
        paper: &Paper,
        summary: Option<&PaperSummary>,
        terms: &[TermGlossaryItem],
    ) -> String {
        let mut text = format!("{}\n{}\n", paper.title, paper.pdf_url);
        let Some(summary) = summary else {
            text.push_str("\nNo summary yet. Run `summarize` to generate one.\n");
            return text;
        };

        let sections = [
            ("中文标题", &summary.title_chinese),
            ("机构", &summary.institutions),
            ("问题", &summary.problem),
            ("方法", &summary.method),
            ("结果", &summary.result),
            ("一句话总结", &summary.one_liner),
        ];
        for (label, value) in sections {
            if let Some(value) = value {
                text.push_str(&format!("\n{}:\n{}\n", label, value));
            }
        }

        if !terms.is_empty() {
            text.push_str("\n术语:\n");
            for term in terms {
                text.push_str(&format!(
                    "- {} ({})\n  {}\n",
                    term.term_english, term.term_chinese, term.explanation
                ));
                if !term.context_meaning.is_empty() {
                    text.push_str(&format!("  本文: {}\n", term.context_meaning));
                }
            }
        }
        text.push_str(&format!(
            "\n[{} | {}]\n",
            summary.model_name,
            summary.updated_at.format("%Y-%m-%d %H:%M")
        ));
        text
    }

    pub fn render_preference(&self, preference: Option<&UserPreference>) -> String {
        match preference {
            None => "No preference configured. Select categories with `preferences --categories`.\n"
                .to_string(),
            Some(preference) => format!(
                "categories: {}\nsort: {} {}\nsummary length: {:?}\n",
                preference
                    .selected_categories
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
                preference.sort_by.as_query_value(),
                preference.sort_order.as_query_value(),
                preference.summary_length
            ),
        }
    }

    pub fn render_error(&self, class: ErrorClass, detail: &str) -> String {
        format!("ERROR: {}\n  ({})", class.user_message(), detail)
    }
}
