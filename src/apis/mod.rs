pub mod arxiv;
pub mod crossref;
pub mod semantic_scholar;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::InputItem;

/// The three metadata providers, in their canonical wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Crossref,
    Arxiv,
    Semantic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Crossref => "crossref",
            Provider::Arxiv => "arxiv",
            Provider::Semantic => "semantic",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One author. `given`/`family` are only present when the provider splits
/// names (Crossref); otherwise `name` is the display form as returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub given: Option<String>,
    pub family: Option<String>,
}

impl Author {
    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            given: None,
            family: None,
        }
    }

    /// Family name, falling back to the last token of the display name.
    pub fn family_part(&self) -> Option<&str> {
        self.family
            .as_deref()
            .or_else(|| self.name.split_whitespace().last())
    }

    /// Given name, falling back to the first token of the display name.
    pub fn given_part(&self) -> Option<&str> {
        self.given
            .as_deref()
            .or_else(|| self.name.split_whitespace().next())
    }

    /// `Family, Given` when the split form exists, else the display name.
    pub fn reversed(&self) -> String {
        match (&self.family, &self.given) {
            (Some(family), Some(given)) => format!("{}, {}", family, given).trim().to_string(),
            (Some(family), None) => family.clone(),
            _ => self.name.clone(),
        }
    }
}

/// Untouched provider response for one record, kept alongside the
/// normalized fields for the raw-data export view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", content = "data", rename_all = "lowercase")]
pub enum RawPayload {
    Crossref(crossref::CrossrefWork),
    Arxiv(arxiv::ArxivEntry),
    Semantic(semantic_scholar::SemanticPaper),
}

/// Normalized, provider-agnostic paper metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRecord {
    pub title: String,
    pub authors: Vec<Author>,
    pub year: Option<u32>,
    pub venue: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub doi: Option<String>,
    pub publisher: Option<String>,
    pub abstract_text: Option<String>,
    pub arxiv_id: Option<String>,
    pub source: Provider,
    pub raw: RawPayload,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("Parse error: {0}")]
    Parse(String),
}

impl ProviderError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited)
    }
}

/// Map a response status before the body is consumed. `Ok(None)` is a
/// definitive miss (404); 429 and other non-success statuses are errors
/// the retry policy may try again.
pub(crate) fn check_status(
    resp: reqwest::Response,
) -> Result<Option<reqwest::Response>, ProviderError> {
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited);
    }
    if !status.is_success() {
        return Err(ProviderError::Status(status));
    }
    Ok(Some(resp))
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn id(&self) -> Provider;

    /// Resolve one input line. The adapter issues an exact lookup when the
    /// item matches its specialty and a title search otherwise. `Ok(None)`
    /// means the provider answered with no matching record; `Err` means it
    /// could not answer even after retries.
    async fn resolve(
        &self,
        item: &InputItem,
        retry_attempts: u32,
    ) -> Result<Option<PaperRecord>, ProviderError>;
}
