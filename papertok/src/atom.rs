//! Parser for the arXiv API's Atom responses.
use crate::common::Paper;
use crate::errors::FeedError;
use crate::utils::normalize_whitespace;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeSet;
use tracing::debug;

/// Extracts the arXiv id from an entry URL: the last path segment without its `vN` suffix.
/// Old-style ids keep their archive: `.../abs/hep-th/9901001v1` gives `hep-th/9901001`.
pub fn extract_arxiv_id(url: &str) -> Option<String> {
    let mut segments = url.trim().trim_end_matches('/').rsplit('/');
    let id = strip_version(segments.next()?);
    if id.is_empty() {
        return None;
    }
    match segments.next() {
        Some(archive) if is_old_style(archive, id) => Some(format!("{}/{}", archive, id)),
        _ => Some(id.to_string()),
    }
}

fn is_old_style(archive: &str, number: &str) -> bool {
    number.chars().all(|c| c.is_ascii_digit())
        && archive.starts_with(|c: char| c.is_ascii_alphabetic())
        && archive
            .chars()
            .all(|c| c.is_ascii_alphabetic() || c == '-' || c == '.')
        && !matches!(archive, "abs" | "pdf")
        && !archive.contains("arxiv")
}

fn strip_version(segment: &str) -> &str {
    if let Some(idx) = segment.rfind('v') {
        let digits = &segment[idx + 1..];
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return &segment[..idx];
        }
    }
    segment
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    None,
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

#[derive(Default)]
struct EntryAccum {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    categories: BTreeSet<String>,
    pdf_url: Option<String>,
}

impl EntryAccum {
    fn push_text(&mut self, field: Field, text: &str) {
        match field {
            Field::Id => self.id.push_str(text),
            Field::Title => self.title.push_str(text),
            Field::Summary => self.summary.push_str(text),
            Field::Published => self.published.push_str(text),
            Field::AuthorName => {
                if let Some(last) = self.authors.last_mut() {
                    last.push_str(text);
                }
            }
            Field::None => {}
        }
    }

    /// Entries without a resolvable id or a valid timestamp are dropped.
    fn into_paper(self) -> Option<Paper> {
        let arxiv_id = extract_arxiv_id(&self.id)?;
        let published_date = DateTime::parse_from_rfc3339(self.published.trim())
            .ok()?
            .with_timezone(&Utc);
        let pdf_url = self
            .pdf_url
            .unwrap_or_else(|| format!("https://arxiv.org/pdf/{}", arxiv_id));
        Some(Paper {
            arxiv_id,
            title: normalize_whitespace(&self.title),
            authors: self
                .authors
                .iter()
                .map(|a| normalize_whitespace(a))
                .filter(|a| !a.is_empty())
                .collect(),
            published_date,
            categories: self.categories,
            abstract_text: normalize_whitespace(&self.summary),
            pdf_url,
        })
    }
}

struct AtomParser {
    papers: Vec<Paper>,
    dropped: usize,
    accum: Option<EntryAccum>,
    field: Field,
    in_author: bool,
}

impl AtomParser {
    fn new() -> Self {
        Self {
            papers: Vec::new(),
            dropped: 0,
            accum: None,
            field: Field::None,
            in_author: false,
        }
    }

    fn handle_start(&mut self, e: &BytesStart<'_>) {
        let Some(accum) = self.accum.as_mut() else {
            if e.local_name().as_ref() == b"entry" {
                self.accum = Some(EntryAccum::default());
            }
            return;
        };
        self.field = match e.local_name().as_ref() {
            b"id" => Field::Id,
            b"title" => Field::Title,
            b"summary" => Field::Summary,
            b"published" => Field::Published,
            b"author" => {
                self.in_author = true;
                Field::None
            }
            b"name" if self.in_author => {
                accum.authors.push(String::new());
                Field::AuthorName
            }
            _ => {
                handle_attributes(accum, e);
                Field::None
            }
        };
    }

    fn handle_empty(&mut self, e: &BytesStart<'_>) {
        if let Some(accum) = self.accum.as_mut() {
            handle_attributes(accum, e);
        }
    }

    fn handle_text(&mut self, text: &str) {
        if let Some(accum) = self.accum.as_mut() {
            accum.push_text(self.field, text);
        }
    }

    fn handle_end(&mut self, local_name: &[u8]) {
        match local_name {
            b"entry" => {
                if let Some(accum) = self.accum.take() {
                    match accum.into_paper() {
                        Some(paper) => self.papers.push(paper),
                        None => self.dropped += 1,
                    }
                }
                self.in_author = false;
            }
            b"author" => self.in_author = false,
            _ => {}
        }
        self.field = Field::None;
    }
}

/// `<category term=.../>` and `<link title="pdf" href=.../>` carry their data in attributes.
fn handle_attributes(accum: &mut EntryAccum, e: &BytesStart<'_>) {
    match e.local_name().as_ref() {
        b"category" => {
            if let Some(term) = attribute(e, b"term") {
                if !term.is_empty() {
                    accum.categories.insert(term);
                }
            }
        }
        b"link" => {
            if attribute(e, b"title").as_deref() == Some("pdf") {
                if let Some(href) = attribute(e, b"href") {
                    accum.pdf_url = Some(href);
                }
            }
        }
        _ => {}
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

/// Parses an Atom document into papers. Malformed XML fails the whole document;
/// individual unusable entries are skipped.
pub fn parse_feed(xml: &str) -> Result<Vec<Paper>, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut parser = AtomParser::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => parser.handle_start(e),
            Ok(Event::Empty(ref e)) => parser.handle_empty(e),
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| FeedError::Parse(err.to_string()))?;
                parser.handle_text(&text);
            }
            Ok(Event::CData(ref e)) => {
                parser.handle_text(&String::from_utf8_lossy(&e.clone().into_inner()));
            }
            Ok(Event::End(ref e)) => parser.handle_end(e.local_name().as_ref()),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(FeedError::Parse(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    err
                )))
            }
        }
    }

    if parser.accum.is_some() {
        return Err(FeedError::Parse("unterminated <entry>".to_string()));
    }
    if parser.dropped > 0 {
        debug!(dropped = parser.dropped, "Skipped arXiv entries without id or date");
    }
    Ok(parser.papers)
}
