use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Hard cap on one batch; extra lines are dropped with a warning.
pub const MAX_BATCH_ITEMS: usize = 100;

static DOI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^10\.\d{4,9}/[-._;()/:a-z0-9]+$").unwrap());

static ARXIV_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}\.\d{4,5}(v\d+)?$").unwrap());

static BIB_TITLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)title\s*=\s*[{"]([^}"]+)[}"]"#).unwrap());

/// Lexical shape of a single input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Title,
    Doi,
    Arxiv,
}

/// Category of a whole batch, from the share of lines matching each pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchCategory {
    Titles,
    Doi,
    MixedDoi,
    Arxiv,
    MixedArxiv,
}

/// One trimmed input line, classified once and then immutable.
#[derive(Debug, Clone, Serialize)]
pub struct InputItem {
    pub text: String,
    pub kind: InputKind,
}

impl InputItem {
    pub fn new(line: &str) -> Self {
        let text = line.trim().to_string();
        let kind = classify_line(&text);
        Self { text, kind }
    }
}

pub fn classify_line(line: &str) -> InputKind {
    if DOI_PATTERN.is_match(line) {
        InputKind::Doi
    } else if ARXIV_PATTERN.is_match(line) {
        InputKind::Arxiv
    } else {
        InputKind::Title
    }
}

/// Batch decision rule: all lines matching a pattern make the category
/// exact, more than half make it mixed, DOI checked before arXiv. An empty
/// line set falls back to `Titles`.
pub fn classify_batch(items: &[InputItem]) -> BatchCategory {
    if items.is_empty() {
        return BatchCategory::Titles;
    }
    let n = items.len();
    let doi = items.iter().filter(|i| i.kind == InputKind::Doi).count();
    if doi == n {
        return BatchCategory::Doi;
    }
    if doi > n / 2 {
        return BatchCategory::MixedDoi;
    }
    let arxiv = items.iter().filter(|i| i.kind == InputKind::Arxiv).count();
    if arxiv == n {
        return BatchCategory::Arxiv;
    }
    if arxiv > n / 2 {
        return BatchCategory::MixedArxiv;
    }
    BatchCategory::Titles
}

/// Split free text into classified items: one per non-blank trimmed line,
/// capped at [`MAX_BATCH_ITEMS`].
#[derive(Debug, Clone, Serialize)]
pub struct ParsedInput {
    pub items: Vec<InputItem>,
    pub category: BatchCategory,
    pub dropped: usize,
}

pub fn parse_input(text: &str) -> ParsedInput {
    let mut items: Vec<InputItem> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(InputItem::new)
        .collect();

    let dropped = items.len().saturating_sub(MAX_BATCH_ITEMS);
    if dropped > 0 {
        tracing::warn!(
            "Input capped at {} items, dropping {} extra lines",
            MAX_BATCH_ITEMS,
            dropped
        );
        items.truncate(MAX_BATCH_ITEMS);
    }

    let category = classify_batch(&items);
    ParsedInput {
        items,
        category,
        dropped,
    }
}

/// Pull citation titles out of BibTeX text, one line per `title` field.
pub fn titles_from_bibtex(content: &str) -> Vec<String> {
    BIB_TITLE_PATTERN
        .captures_iter(content)
        .map(|cap| cap[1].trim_matches(&['{', '}'][..]).trim().to_string())
        .filter(|title| !title.is_empty())
        .collect()
}
