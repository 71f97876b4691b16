//! Citation rendering: BibTeX, plain text, and the author-date styles.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::apis::PaperRecord;
use crate::batch::BatchStats;
use crate::config::Settings;
use crate::resolve::ResolutionResult;

/// Output style for a generated batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationStyle {
    #[default]
    Bibtex,
    Plain,
    Apa,
    Mla,
    Chicago,
    Harvard,
}

impl CitationStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            CitationStyle::Bibtex => "bibtex",
            CitationStyle::Plain => "plain",
            CitationStyle::Apa => "apa",
            CitationStyle::Mla => "mla",
            CitationStyle::Chicago => "chicago",
            CitationStyle::Harvard => "harvard",
        }
    }
}

impl std::fmt::Display for CitationStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unknown citation style: {0}")]
    UnknownStyle(String),
}

impl std::str::FromStr for CitationStyle {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bibtex" => Ok(CitationStyle::Bibtex),
            "plain" | "text" => Ok(CitationStyle::Plain),
            "apa" => Ok(CitationStyle::Apa),
            "mla" => Ok(CitationStyle::Mla),
            "chicago" => Ok(CitationStyle::Chicago),
            "harvard" => Ok(CitationStyle::Harvard),
            other => Err(FormatError::UnknownStyle(other.to_string())),
        }
    }
}

/// Citation key: first author's family name, year, first significant title
/// word, all lowercased with non-alphanumerics removed, capped at 50 chars.
pub fn bibtex_key(record: &PaperRecord) -> String {
    let author_part = record
        .authors
        .first()
        .and_then(|a| a.family_part())
        .map(alnum_lower)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let year_part = record.year.map(|y| y.to_string()).unwrap_or_default();
    let title_part = significant_title_word(&record.title);

    format!("{}{}{}", author_part, year_part, title_part)
        .chars()
        .take(50)
        .collect()
}

fn alnum_lower(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// First title word that is not a leading article and survives cleanup.
fn significant_title_word(title: &str) -> String {
    for word in title.split_whitespace() {
        let lower = word.to_lowercase();
        if matches!(lower.as_str(), "a" | "an" | "the") {
            continue;
        }
        let cleaned = alnum_lower(&lower);
        if !cleaned.is_empty() {
            return cleaned;
        }
    }
    String::new()
}

/// Generate a BibTeX entry: `@article` when the record carries a journal,
/// `@misc` otherwise.
/// Format: @article{key,
///   author = {Family, Given and Family, Given},
///   title = {{Title}},
///   journal = {Venue},
///   year = {Year},
///   ...optional fields...
/// }
pub fn format_bibtex(record: &PaperRecord, indent: bool) -> String {
    let pad = if indent { "  " } else { "" };
    let entry_type = if record.venue.is_some() {
        "article"
    } else {
        "misc"
    };
    let authors = if record.authors.is_empty() {
        "Unknown Author".to_string()
    } else {
        record
            .authors
            .iter()
            .map(|a| a.reversed())
            .collect::<Vec<_>>()
            .join(" and ")
    };
    let title = if record.title.is_empty() {
        "Unknown Title"
    } else {
        record.title.as_str()
    };

    let mut fields: Vec<String> = Vec::new();
    fields.push(format!("author = {{{}}}", authors));
    // Double braces preserve the title's capitalization
    fields.push(format!("title = {{{{{}}}}}", title));
    if let Some(venue) = &record.venue {
        fields.push(format!("journal = {{{}}}", venue));
    }
    if let Some(year) = record.year {
        fields.push(format!("year = {{{}}}", year));
    }
    if let Some(volume) = &record.volume {
        fields.push(format!("volume = {{{}}}", volume));
    }
    if let Some(issue) = &record.issue {
        fields.push(format!("number = {{{}}}", issue));
    }
    if let Some(pages) = &record.pages {
        fields.push(format!("pages = {{{}}}", pages));
    }
    if let Some(doi) = &record.doi {
        fields.push(format!("doi = {{{}}}", doi));
    }
    if let Some(arxiv_id) = &record.arxiv_id {
        fields.push(format!("note = {{arXiv:{}}}", arxiv_id));
    }
    if record.venue.is_none() {
        if let Some(publisher) = &record.publisher {
            fields.push(format!("publisher = {{{}}}", publisher));
        }
    }

    let body = fields
        .iter()
        .map(|field| format!("{}{}", pad, field))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("@{}{{{},\n{}\n}}", entry_type, bibtex_key(record), body)
}

/// Format: N. Authors (Year). Title. Venue
fn format_plain(record: &PaperRecord) -> String {
    let title = if record.title.is_empty() {
        "Unknown Title"
    } else {
        record.title.as_str()
    };
    let authors = if record.authors.is_empty() {
        "Unknown Authors".to_string()
    } else {
        record
            .authors
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let year = record.year.map(|y| y.to_string()).unwrap_or_default();
    let venue = record.venue.as_deref().unwrap_or("");

    format!("{} ({}). {}. {}", authors, year, title, venue)
        .trim()
        .to_string()
}

/// Format: Family, G., Family, G. (Year). Title. Venue, Volume(Issue), Pages. DOI
fn format_apa(record: &PaperRecord) -> String {
    let authors = record
        .authors
        .iter()
        .map(|a| {
            let family = a.family_part().unwrap_or("");
            let initial = a
                .given_part()
                .and_then(|g| g.chars().next())
                .map(String::from)
                .unwrap_or_default();
            format!("{}, {}.", family, initial)
        })
        .collect::<Vec<_>>()
        .join(", ");
    let year = record.year.map(|y| y.to_string()).unwrap_or_default();

    let mut citation = format!("{} ({}). {}.", authors, year, record.title);
    if let Some(venue) = &record.venue {
        citation.push_str(&format!(" {}", venue));
    }
    if let Some(volume) = &record.volume {
        citation.push_str(&format!(", {}", volume));
    }
    if let Some(issue) = &record.issue {
        citation.push_str(&format!("({})", issue));
    }
    if let Some(pages) = &record.pages {
        citation.push_str(&format!(", {}", pages));
    }
    if let Some(doi) = &record.doi {
        citation.push_str(&format!(". https://doi.org/{}", doi));
    }
    citation
}

/// Format: Family, Given, Family, Given. "Title." Venue, vol. V, no. I, Year, pp. P.
fn format_mla(record: &PaperRecord) -> String {
    let authors = record
        .authors
        .iter()
        .map(|a| {
            format!(
                "{}, {}",
                a.family_part().unwrap_or(""),
                a.given_part().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut citation = format!("{}. \"{}.\"", authors, record.title);
    if let Some(venue) = &record.venue {
        citation.push_str(&format!(" {}", venue));
    }
    if let Some(volume) = &record.volume {
        citation.push_str(&format!(", vol. {}", volume));
    }
    if let Some(issue) = &record.issue {
        citation.push_str(&format!(", no. {}", issue));
    }
    if let Some(year) = record.year {
        citation.push_str(&format!(", {}", year));
    }
    if let Some(pages) = &record.pages {
        citation.push_str(&format!(", pp. {}", pages));
    }
    citation.push('.');
    citation
}

/// Format: Given Family, Given Family. "Title." Venue V, no. I (Year): P. DOI
fn format_chicago(record: &PaperRecord) -> String {
    let authors = record
        .authors
        .iter()
        .map(|a| {
            format!(
                "{} {}",
                a.given_part().unwrap_or(""),
                a.family_part().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut citation = format!("{}. \"{}.\"", authors, record.title);
    if let Some(venue) = &record.venue {
        citation.push_str(&format!(" {}", venue));
    }
    if let Some(volume) = &record.volume {
        citation.push_str(&format!(" {}", volume));
    }
    if let Some(issue) = &record.issue {
        citation.push_str(&format!(", no. {}", issue));
    }
    if let Some(year) = record.year {
        citation.push_str(&format!(" ({})", year));
    }
    if let Some(pages) = &record.pages {
        citation.push_str(&format!(": {}", pages));
    }
    if let Some(doi) = &record.doi {
        citation.push_str(&format!(". https://doi.org/{}", doi));
    }
    citation
}

/// Format: Family, Family (Year) 'Title', Venue, V(I), pp. P.
/// Fields the record does not carry are left out along with their
/// punctuation rather than rendered as empty slots.
fn format_harvard(record: &PaperRecord) -> String {
    let authors = record
        .authors
        .iter()
        .map(|a| a.family_part().unwrap_or(""))
        .collect::<Vec<_>>()
        .join(", ");

    let mut citation = authors;
    if let Some(year) = record.year {
        citation.push_str(&format!(" ({})", year));
    }
    citation.push_str(&format!(" '{}'", record.title));
    if let Some(venue) = &record.venue {
        citation.push_str(&format!(", {}", venue));
    }
    match (&record.volume, &record.issue) {
        (Some(volume), Some(issue)) => citation.push_str(&format!(", {}({})", volume, issue)),
        (Some(volume), None) => citation.push_str(&format!(", {}", volume)),
        (None, Some(issue)) => citation.push_str(&format!(", ({})", issue)),
        (None, None) => {}
    }
    if let Some(pages) = &record.pages {
        citation.push_str(&format!(", pp. {}", pages));
    }
    citation.push('.');
    citation.trim_start().to_string()
}

pub fn failure_marker(input: &str) -> String {
    format!("% Failed to fetch citation for: {}", input)
}

fn is_empty_record(record: &PaperRecord) -> bool {
    record.title.is_empty() && record.authors.is_empty() && record.year.is_none()
}

fn styled_or_error(
    record: &PaperRecord,
    index: usize,
    format: fn(&PaperRecord) -> String,
) -> String {
    if is_empty_record(record) {
        format!("Error formatting citation {}", index + 1)
    } else {
        format(record)
    }
}

/// Render one resolution outcome. Failures become `%` marker lines in every
/// style so entry N always lines up with input line N.
pub fn render_result(
    result: &ResolutionResult,
    index: usize,
    style: CitationStyle,
    indent: bool,
) -> String {
    let record = match result {
        ResolutionResult::Resolved(record) => record,
        ResolutionResult::Failed { input, .. } => return failure_marker(input),
    };

    match style {
        CitationStyle::Bibtex => format_bibtex(record, indent),
        CitationStyle::Plain => format!("{}. {}", index + 1, format_plain(record)),
        CitationStyle::Apa => styled_or_error(record, index, format_apa),
        CitationStyle::Mla => styled_or_error(record, index, format_mla),
        CitationStyle::Chicago => styled_or_error(record, index, format_chicago),
        CitationStyle::Harvard => styled_or_error(record, index, format_harvard),
    }
}

/// The comment header prepended when `include_comments` is on.
pub fn header_block(stats: &BatchStats) -> String {
    [
        format!(
            "% Generated by {} v{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
        format!(
            "% Date: {}",
            stats.started_at.format("%B %-d, %Y, %I:%M %p")
        ),
        format!("% Total items: {}", stats.total),
        format!("% Successful: {}, Failed: {}", stats.success, stats.failed),
        format!("% Processing time: {:.1}s", stats.elapsed_seconds),
        format!(
            "% Sources: Crossref ({}), ArXiv ({}), Semantic Scholar ({})",
            stats.sources.crossref, stats.sources.arxiv, stats.sources.semantic
        ),
    ]
    .join("\n")
}

/// Render the whole batch in one string. Sorting reorders the rendered
/// entries only; the results slice keeps input order for index-based
/// operations like raw export.
pub fn render_batch(
    results: &[ResolutionResult],
    stats: &BatchStats,
    style: CitationStyle,
    settings: &Settings,
) -> String {
    let mut entries: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(index, result)| render_result(result, index, style, settings.format_indent))
        .collect();
    if settings.sort_alphabetically {
        entries.sort();
    }
    let body = entries.join("\n\n");

    if settings.include_comments {
        format!("{}\n\n{}", header_block(stats), body)
    } else {
        body
    }
}

/// Provider payloads exactly as received, one element per input line.
/// Failed lines carry the error and the original input instead.
pub fn raw_export(results: &[ResolutionResult]) -> Vec<serde_json::Value> {
    results
        .iter()
        .map(|result| match result {
            ResolutionResult::Resolved(record) => {
                serde_json::to_value(&record.raw).unwrap_or_default()
            }
            ResolutionResult::Failed { input, reason } => serde_json::json!({
                "error": reason,
                "input": input,
            }),
        })
        .collect()
}
