use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::apis::{self, MetadataProvider};
use crate::resolve::ApiPriority;

/// Settings for one generation run. The config's copy provides the
/// defaults; tool parameters override them per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub delay_seconds: f64,
    pub email: String,
    pub api_priority: ApiPriority,
    pub format_indent: bool,
    pub sort_alphabetically: bool,
    pub include_comments: bool,
    pub retry_attempts: u32,
    pub save_history: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            delay_seconds: 1.0,
            email: String::new(),
            api_priority: ApiPriority::Auto,
            format_indent: true,
            sort_alphabetically: false,
            include_comments: true,
            retry_attempts: 1,
            save_history: true,
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub semantic_scholar_api_key: Option<String>,
    pub defaults: Settings,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("CITATION_FETCHER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs_or_default().join(".citation-fetcher"));

        let mut defaults = Settings::default();
        if let Ok(email) = std::env::var("CITATION_FETCHER_EMAIL") {
            defaults.email = email;
        }

        Self {
            data_dir,
            semantic_scholar_api_key: std::env::var("SEMANTIC_SCHOLAR_API_KEY").ok(),
            defaults,
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    /// Build the metadata providers, in default attempt order.
    pub fn build_providers(&self) -> Vec<Arc<dyn MetadataProvider>> {
        let email = (!self.defaults.email.is_empty()).then(|| self.defaults.email.clone());

        let mut providers: Vec<Arc<dyn MetadataProvider>> = Vec::new();
        providers.push(Arc::new(apis::crossref::CrossrefClient::new(email)));
        providers.push(Arc::new(apis::arxiv::ArxivClient::new()));
        providers.push(Arc::new(apis::semantic_scholar::SemanticScholarClient::new(
            self.semantic_scholar_api_key.clone(),
        )));
        providers
    }

    /// Return a list of source status descriptions.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        vec![
            SourceStatus {
                name: "crossref".into(),
                enabled: true,
                note: if self.defaults.email.is_empty() {
                    "Using default contact email; set CITATION_FETCHER_EMAIL to join the polite pool".into()
                } else {
                    "Contact email set".into()
                },
            },
            SourceStatus {
                name: "arxiv".into(),
                enabled: true,
                note: "No API key required".into(),
            },
            SourceStatus {
                name: "semantic".into(),
                enabled: true,
                note: if self.semantic_scholar_api_key.is_some() {
                    "API key set".into()
                } else {
                    "No API key (rate limited)".into()
                },
            },
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub enabled: bool,
    pub note: String,
}

fn dirs_or_default() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
