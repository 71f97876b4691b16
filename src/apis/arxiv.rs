use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use super::{
    check_status, Author, MetadataProvider, PaperRecord, Provider, ProviderError, RawPayload,
};
use crate::classify::{InputItem, InputKind};
use crate::retry::with_retry;

const BASE_URL: &str = "https://export.arxiv.org/api/query";

pub struct ArxivClient {
    client: reqwest::Client,
    base_url: String,
}

impl ArxivClient {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Constructor with an explicit endpoint, for testing.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!(
                    env!("CARGO_PKG_NAME"),
                    "/",
                    env!("CARGO_PKG_VERSION")
                ))
                .build()
                .unwrap(),
            base_url: base_url.into(),
        }
    }
}

/// One `<entry>` from the Atom response, kept verbatim for raw export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArxivEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub published: String,
    pub doi: Option<String>,
}

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_atom_feed(xml: &str) -> Result<Vec<ArxivEntry>, ProviderError> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut in_entry = false;
    let mut in_author = false;
    let mut current_tag = String::new();
    let mut id = String::new();
    let mut title = String::new();
    let mut summary = String::new();
    let mut published = String::new();
    let mut author_name = String::new();
    let mut authors: Vec<String> = Vec::new();
    let mut doi: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    in_entry = true;
                    id.clear();
                    title.clear();
                    summary.clear();
                    published.clear();
                    authors.clear();
                    doi = None;
                } else if in_entry {
                    current_tag = tag.clone();
                    if tag == "author" {
                        in_author = true;
                        author_name.clear();
                    }
                }
            }
            Ok(Event::Text(e)) if in_entry => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current_tag.as_str() {
                    "id" if id.is_empty() => id = text,
                    "title" => title.push_str(&text),
                    "summary" => summary.push_str(&text),
                    "published" => published.push_str(&text),
                    "name" if in_author => author_name.push_str(&text),
                    // Matches the namespaced arxiv:doi element
                    _ if current_tag.contains("doi") => doi = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" && in_entry {
                    in_entry = false;
                    if !id.is_empty() && !title.trim().is_empty() {
                        entries.push(ArxivEntry {
                            id: id.clone(),
                            title: normalize_ws(&title),
                            summary: normalize_ws(&summary),
                            authors: authors.clone(),
                            published: published.clone(),
                            doi: doi.clone(),
                        });
                    }
                } else if tag == "author" && in_author {
                    in_author = false;
                    if !author_name.trim().is_empty() {
                        authors.push(author_name.trim().to_string());
                    }
                }
                if tag == current_tag {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ProviderError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn entry_to_record(entry: ArxivEntry) -> PaperRecord {
    // The Atom id is a URL like http://arxiv.org/abs/1706.03762v7
    let arxiv_id = entry
        .id
        .split("/abs/")
        .nth(1)
        .unwrap_or(&entry.id)
        .to_string();
    let year = entry.published.get(..4).and_then(|y| y.parse().ok());
    let authors = entry
        .authors
        .iter()
        .map(|name| Author::from_name(name))
        .collect();

    PaperRecord {
        title: entry.title.clone(),
        authors,
        year,
        venue: Some("arXiv preprint".to_string()),
        volume: None,
        issue: None,
        pages: None,
        doi: entry.doi.clone(),
        publisher: None,
        abstract_text: (!entry.summary.is_empty()).then(|| entry.summary.clone()),
        arxiv_id: Some(arxiv_id),
        source: Provider::Arxiv,
        raw: RawPayload::Arxiv(entry),
    }
}

#[async_trait]
impl MetadataProvider for ArxivClient {
    fn id(&self) -> Provider {
        Provider::Arxiv
    }

    async fn resolve(
        &self,
        item: &InputItem,
        retry_attempts: u32,
    ) -> Result<Option<PaperRecord>, ProviderError> {
        let query: Vec<(&str, String)> = match item.kind {
            InputKind::Arxiv => vec![("id_list", item.text.clone())],
            _ => vec![
                ("search_query", format!("ti:\"{}\"", item.text)),
                ("max_results", "1".to_string()),
            ],
        };

        let resp = with_retry(retry_attempts, || async {
            let resp = self
                .client
                .get(&self.base_url)
                .query(&query)
                .send()
                .await?;
            check_status(resp)
        })
        .await?;

        let Some(resp) = resp else { return Ok(None) };
        let body = resp.text().await?;
        let entries = parse_atom_feed(&body)?;
        Ok(entries.into_iter().next().map(entry_to_record))
    }
}
