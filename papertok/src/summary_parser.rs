//! Line-scanning parser for the plain-text summary format.
//!
//! Best effort by construction: a section that cannot be found stays `None`
//! and malformed term blocks are dropped, never reported as errors.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Title,
    Institutions,
    Problem,
    Method,
    Result,
    OneLiner,
    Terms,
}

impl Section {
    fn from_number(n: u32) -> Option<Section> {
        match n {
            1 => Some(Section::Institutions),
            2 => Some(Section::Problem),
            3 => Some(Section::Method),
            4 => Some(Section::Result),
            5 => Some(Section::OneLiner),
            6 => Some(Section::Terms),
            _ => None,
        }
    }
}

/// Longer keywords come first so that prefixes of each other resolve correctly.
const KEYWORDS: &[(&str, Section)] = &[
    ("中文标题", Section::Title),
    ("标题翻译", Section::Title),
    ("chinese title", Section::Title),
    ("作者机构", Section::Institutions),
    ("机构", Section::Institutions),
    ("institutions", Section::Institutions),
    ("affiliations", Section::Institutions),
    ("研究问题", Section::Problem),
    ("问题", Section::Problem),
    ("problem", Section::Problem),
    ("方法", Section::Method),
    ("method", Section::Method),
    ("实验结果", Section::Result),
    ("结果", Section::Result),
    ("results", Section::Result),
    ("result", Section::Result),
    ("一句话总结", Section::OneLiner),
    ("一句话", Section::OneLiner),
    ("one-line summary", Section::OneLiner),
    ("one-liner", Section::OneLiner),
    ("one liner", Section::OneLiner),
    ("tl;dr", Section::OneLiner),
    ("关键术语", Section::Terms),
    ("术语", Section::Terms),
    ("terms to know", Section::Terms),
    ("key terms", Section::Terms),
    ("terms", Section::Terms),
];

const TERM_LABELS: &[&str] = &[
    "english term",
    "english",
    "term",
    "英文术语",
    "英文",
    "chinese",
    "中文翻译",
    "中文",
    "explanation",
    "definition",
    "解释",
    "释义",
    "context meaning",
    "in this paper",
    "context",
    "论文中含义",
    "本文含义",
    "上下文含义",
    "含义",
];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedTerm {
    pub term_english: String,
    pub term_chinese: String,
    pub explanation: String,
    pub context_meaning: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedSummary {
    pub title_chinese: Option<String>,
    pub institutions: Option<String>,
    pub problem: Option<String>,
    pub method: Option<String>,
    pub result: Option<String>,
    pub one_liner: Option<String>,
    pub terms: Vec<ParsedTerm>,
}

fn is_colon(c: char) -> bool {
    c == ':' || c == '：'
}

/// Returns the text after `prefix` when `line` starts with it, ignoring ASCII case.
fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

/// `keyword:` or `keyword :` at the start of the line.
fn keyword_marker(line: &str) -> Option<(Section, &str)> {
    KEYWORDS.iter().find_map(|(keyword, section)| {
        let rest = strip_prefix_ignore_case(line, keyword)?
            .trim_start_matches('*')
            .trim_start();
        let mut chars = rest.chars();
        match chars.next() {
            Some(c) if is_colon(c) => Some((*section, chars.as_str().trim())),
            _ => None,
        }
    })
}

/// `N)` or `N）` at the start of the line, optionally followed by `keyword:`.
fn numbered_marker(line: &str) -> Option<(Section, &str)> {
    let digits_end = line
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)?;
    if digits_end == 0 {
        return None;
    }
    let rest = &line[digits_end..];
    let rest = rest
        .strip_prefix(')')
        .or_else(|| rest.strip_prefix('）'))?
        .trim_start();
    let section = Section::from_number(line[..digits_end].parse().ok()?)?;
    let content = match keyword_marker(rest) {
        Some((_, after)) => after,
        None => rest.trim(),
    };
    Some((section, content))
}

fn section_marker(line: &str) -> Option<(Section, &str)> {
    let line = line.trim_start_matches(|c: char| c == '#' || c == '*' || c.is_whitespace());
    numbered_marker(line).or_else(|| keyword_marker(line))
}

fn strip_bullet(line: &str) -> &str {
    let line = line.trim();
    for bullet in ['-', '*', '•', '·'] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest.trim_start();
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix('.') {
            return rest.trim_start();
        }
    }
    line
}

fn strip_label(line: &str) -> &str {
    for label in TERM_LABELS {
        if let Some(rest) = strip_prefix_ignore_case(line, label) {
            let rest = rest.trim_start();
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                if is_colon(c) {
                    return chars.as_str().trim();
                }
            }
        }
    }
    line
}

/// Groups term lines in cycles of four: English, Chinese, explanation, context.
/// A trailing cycle of three is kept with an empty context.
pub fn parse_terms<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<ParsedTerm> {
    let mut terms = Vec::new();
    let mut cycle: Vec<String> = Vec::with_capacity(4);

    for line in lines {
        let text = strip_label(strip_bullet(line));
        if text.is_empty() {
            continue;
        }
        cycle.push(text.to_string());
        if cycle.len() == 4 {
            let mut parts = cycle.drain(..);
            terms.push(ParsedTerm {
                term_english: parts.next().unwrap_or_default(),
                term_chinese: parts.next().unwrap_or_default(),
                explanation: parts.next().unwrap_or_default(),
                context_meaning: parts.next().unwrap_or_default(),
            });
        }
    }

    if cycle.len() == 3 {
        let mut parts = cycle.into_iter();
        terms.push(ParsedTerm {
            term_english: parts.next().unwrap_or_default(),
            term_chinese: parts.next().unwrap_or_default(),
            explanation: parts.next().unwrap_or_default(),
            context_meaning: String::new(),
        });
    }
    terms
}

fn join(lines: &[&str]) -> Option<String> {
    let text = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn close_section(section: Option<Section>, buffer: &mut Vec<&str>, parsed: &mut ParsedSummary) {
    let value = join(buffer);
    buffer.clear();
    let slot = match section {
        Some(Section::Title) => &mut parsed.title_chinese,
        Some(Section::Institutions) => &mut parsed.institutions,
        Some(Section::Problem) => &mut parsed.problem,
        Some(Section::Method) => &mut parsed.method,
        Some(Section::Result) => &mut parsed.result,
        Some(Section::OneLiner) => &mut parsed.one_liner,
        // preamble before the first marker is dropped
        Some(Section::Terms) | None => return,
    };
    if value.is_some() {
        *slot = value;
    }
}

pub fn parse_summary(text: &str) -> ParsedSummary {
    let mut parsed = ParsedSummary::default();
    let mut open: Option<Section> = None;
    let mut buffer: Vec<&str> = Vec::new();
    let mut term_lines: Vec<&str> = Vec::new();

    let mut lines = text.lines();
    for line in lines.by_ref() {
        match section_marker(line) {
            Some((section, rest)) => {
                close_section(open, &mut buffer, &mut parsed);
                open = Some(section);
                if section == Section::Terms {
                    if !rest.is_empty() {
                        term_lines.push(rest);
                    }
                    break;
                }
                if !rest.is_empty() {
                    buffer.push(rest);
                }
            }
            None => buffer.push(line),
        }
    }

    if open == Some(Section::Terms) {
        term_lines.extend(lines);
        parsed.terms = parse_terms(term_lines);
    } else {
        close_section(open, &mut buffer, &mut parsed);
    }
    parsed
}
