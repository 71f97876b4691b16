use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    check_status, Author, MetadataProvider, PaperRecord, Provider, ProviderError, RawPayload,
};
use crate::classify::{InputItem, InputKind};
use crate::retry::with_retry;

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";

const FIELDS: &str = "title,authors,year,venue,abstract,externalIds,citationCount,referenceCount";

pub struct SemanticScholarClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(BASE_URL, api_key)
    }

    /// Constructor with an explicit endpoint, for testing.
    pub fn with_base_url(base_url: impl Into<String>, api_key: Option<String>) -> Self {
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
            api_key,
        }
    }

    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }

    async fn lookup_doi(
        &self,
        doi: &str,
        retry_attempts: u32,
    ) -> Result<Option<PaperRecord>, ProviderError> {
        let url = format!("{}/paper/DOI:{}", self.base_url, doi);
        let resp = with_retry(retry_attempts, || async {
            let resp = self
                .add_auth(self.client.get(&url).query(&[("fields", FIELDS)]))
                .send()
                .await?;
            check_status(resp)
        })
        .await?;

        let Some(resp) = resp else { return Ok(None) };
        let paper: SemanticPaper = resp.json().await?;
        Ok(Some(paper_to_record(paper)))
    }

    async fn search(
        &self,
        text: &str,
        retry_attempts: u32,
    ) -> Result<Option<PaperRecord>, ProviderError> {
        let url = format!("{}/paper/search", self.base_url);
        let resp = with_retry(retry_attempts, || async {
            let resp = self
                .add_auth(self.client.get(&url).query(&[
                    ("query", text),
                    ("limit", "1"),
                    ("fields", FIELDS),
                ]))
                .send()
                .await?;
            check_status(resp)
        })
        .await?;

        let Some(resp) = resp else { return Ok(None) };
        let reply: SearchReply = resp.json().await?;
        Ok(reply
            .data
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(paper_to_record))
    }
}

#[derive(Deserialize)]
struct SearchReply {
    data: Option<Vec<SemanticPaper>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticPaper {
    pub paper_id: Option<String>,
    pub title: Option<String>,
    pub authors: Option<Vec<SemanticAuthor>>,
    pub year: Option<u32>,
    pub venue: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub external_ids: Option<SemanticExternalIds>,
    pub citation_count: Option<u32>,
    pub reference_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticAuthor {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticExternalIds {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(rename = "ArXiv")]
    pub arxiv: Option<String>,
}

fn paper_to_record(paper: SemanticPaper) -> PaperRecord {
    let authors = paper
        .authors
        .as_ref()
        .map(|list| {
            list.iter()
                .filter_map(|a| a.name.clone())
                .map(Author::from_name)
                .collect()
        })
        .unwrap_or_default();

    PaperRecord {
        title: paper.title.clone().unwrap_or_default(),
        authors,
        year: paper.year,
        venue: paper.venue.clone().filter(|v| !v.is_empty()),
        volume: None,
        issue: None,
        pages: None,
        doi: paper.external_ids.as_ref().and_then(|e| e.doi.clone()),
        publisher: None,
        abstract_text: paper.abstract_text.clone(),
        // The ArXiv external id stays in the raw payload only
        arxiv_id: None,
        source: Provider::Semantic,
        raw: RawPayload::Semantic(paper),
    }
}

#[async_trait]
impl MetadataProvider for SemanticScholarClient {
    fn id(&self) -> Provider {
        Provider::Semantic
    }

    async fn resolve(
        &self,
        item: &InputItem,
        retry_attempts: u32,
    ) -> Result<Option<PaperRecord>, ProviderError> {
        match item.kind {
            InputKind::Doi => self.lookup_doi(&item.text, retry_attempts).await,
            _ => self.search(&item.text, retry_attempts).await,
        }
    }
}
