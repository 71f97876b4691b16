use async_trait::async_trait;
use chrono::Datelike;
use serde::{Deserialize, Serialize};

use super::{
    check_status, Author, MetadataProvider, PaperRecord, Provider, ProviderError, RawPayload,
};
use crate::classify::{InputItem, InputKind};
use crate::retry::with_retry;

const BASE_URL: &str = "https://api.crossref.org/works";
const DEFAULT_MAILTO: &str = "citation-fetcher@github.io";

pub struct CrossrefClient {
    client: reqwest::Client,
    base_url: String,
    mailto: String,
}

impl CrossrefClient {
    pub fn new(email: Option<String>) -> Self {
        Self::with_base_url(BASE_URL, email)
    }

    /// Constructor with an explicit endpoint, for testing.
    pub fn with_base_url(base_url: impl Into<String>, email: Option<String>) -> Self {
        let mailto = email
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MAILTO.to_string());
        Self {
            client: reqwest::Client::builder()
                .user_agent(format!(
                    "{}/{} (mailto:{})",
                    env!("CARGO_PKG_NAME"),
                    env!("CARGO_PKG_VERSION"),
                    mailto
                ))
                .build()
                .unwrap(),
            base_url: base_url.into(),
            mailto,
        }
    }

    async fn lookup_doi(
        &self,
        doi: &str,
        retry_attempts: u32,
    ) -> Result<Option<PaperRecord>, ProviderError> {
        let url = format!("{}/{}", self.base_url, clean_doi(doi));
        let resp = with_retry(retry_attempts, || async {
            let resp = self
                .client
                .get(&url)
                .query(&[("mailto", self.mailto.as_str())])
                .send()
                .await?;
            check_status(resp)
        })
        .await?;

        let Some(resp) = resp else { return Ok(None) };
        let reply: CrossrefReply = resp.json().await?;
        Ok(Some(work_to_record(reply.message.work)))
    }

    async fn search_title(
        &self,
        title: &str,
        retry_attempts: u32,
    ) -> Result<Option<PaperRecord>, ProviderError> {
        let resp = with_retry(retry_attempts, || async {
            let resp = self
                .client
                .get(&self.base_url)
                .query(&[
                    ("query.title", title),
                    ("rows", "1"),
                    ("mailto", self.mailto.as_str()),
                ])
                .send()
                .await?;
            check_status(resp)
        })
        .await?;

        let Some(resp) = resp else { return Ok(None) };
        let reply: CrossrefReply = resp.json().await?;
        Ok(reply
            .message
            .items
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(work_to_record))
    }
}

/// Strip scheme and resolver prefixes so pasted DOI URLs still resolve.
fn clean_doi(doi: &str) -> &str {
    let doi = doi.strip_prefix("https://").unwrap_or(doi);
    let doi = doi.strip_prefix("http://").unwrap_or(doi);
    doi.strip_prefix("doi.org/").unwrap_or(doi)
}

#[derive(Deserialize)]
struct CrossrefReply {
    message: CrossrefMessage,
}

/// A DOI lookup returns the work inline; a search wraps works in `items`.
#[derive(Deserialize)]
struct CrossrefMessage {
    items: Option<Vec<CrossrefWork>>,
    #[serde(flatten)]
    work: CrossrefWork,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossrefWork {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    pub title: Option<Vec<String>>,
    pub author: Option<Vec<CrossrefAuthor>>,
    #[serde(rename = "container-title")]
    pub container_title: Option<Vec<String>>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub page: Option<String>,
    pub publisher: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub published: Option<CrossrefDate>,
    #[serde(rename = "published-print")]
    pub published_print: Option<CrossrefDate>,
    #[serde(rename = "published-online")]
    pub published_online: Option<CrossrefDate>,
    pub created: Option<CrossrefDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossrefAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
    /// Literal name, used by organizational contributors.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossrefDate {
    #[serde(rename = "date-parts")]
    pub date_parts: Option<Vec<Vec<u32>>>,
}

fn date_year(date: &CrossrefDate) -> Option<u32> {
    date.date_parts.as_ref()?.first()?.first().copied()
}

/// Year from the most specific date field available, defaulting to the
/// current year when the record carries no usable date at all.
fn published_year(work: &CrossrefWork) -> u32 {
    [
        work.published.as_ref(),
        work.published_print.as_ref(),
        work.published_online.as_ref(),
        work.created.as_ref(),
    ]
    .into_iter()
    .flatten()
    .find_map(date_year)
    .unwrap_or_else(|| chrono::Utc::now().year() as u32)
}

fn author_from(author: &CrossrefAuthor) -> Author {
    let name = match (&author.given, &author.family) {
        (Some(given), Some(family)) => format!("{} {}", given, family).trim().to_string(),
        (None, Some(family)) => family.clone(),
        (Some(given), None) => given.clone(),
        (None, None) => author.name.clone().unwrap_or_default(),
    };
    Author {
        name,
        given: author.given.clone(),
        family: author.family.clone(),
    }
}

fn work_to_record(work: CrossrefWork) -> PaperRecord {
    let title = work
        .title
        .as_ref()
        .and_then(|t| t.first())
        .cloned()
        .unwrap_or_default();
    let authors = work
        .author
        .as_ref()
        .map(|list| list.iter().map(author_from).collect())
        .unwrap_or_default();
    let year = published_year(&work);
    let venue = work
        .container_title
        .as_ref()
        .and_then(|t| t.first())
        .filter(|v| !v.is_empty())
        .cloned();

    PaperRecord {
        title,
        authors,
        year: Some(year),
        venue,
        volume: work.volume.clone(),
        issue: work.issue.clone(),
        pages: work.page.clone(),
        doi: work.doi.clone(),
        publisher: work.publisher.clone(),
        abstract_text: work.abstract_text.clone(),
        arxiv_id: None,
        source: Provider::Crossref,
        raw: RawPayload::Crossref(work),
    }
}

#[async_trait]
impl MetadataProvider for CrossrefClient {
    fn id(&self) -> Provider {
        Provider::Crossref
    }

    async fn resolve(
        &self,
        item: &InputItem,
        retry_attempts: u32,
    ) -> Result<Option<PaperRecord>, ProviderError> {
        match item.kind {
            InputKind::Doi => self.lookup_doi(&item.text, retry_attempts).await,
            _ => self.search_title(&item.text, retry_attempts).await,
        }
    }
}
