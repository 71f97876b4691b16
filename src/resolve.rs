use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::apis::{MetadataProvider, PaperRecord, Provider};
use crate::classify::{InputItem, InputKind};

/// Which source to ask first. `Auto` picks per item: exact identifiers go
/// to the source that owns them, titles go to Crossref.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiPriority {
    #[default]
    Auto,
    Crossref,
    Arxiv,
}

impl std::str::FromStr for ApiPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ApiPriority::Auto),
            "crossref" => Ok(ApiPriority::Crossref),
            "arxiv" => Ok(ApiPriority::Arxiv),
            other => Err(format!("unknown api priority: {}", other)),
        }
    }
}

/// The outcome for one input line. A failure keeps the line exactly as the
/// user wrote it so downstream output can echo it back.
#[derive(Debug, Clone)]
pub enum ResolutionResult {
    Resolved(PaperRecord),
    Failed { input: String, reason: String },
}

impl ResolutionResult {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolutionResult::Resolved(_))
    }
}

/// All three sources are always attempted, Semantic Scholar last.
pub fn attempt_order(priority: ApiPriority, kind: InputKind) -> [Provider; 3] {
    match priority {
        ApiPriority::Crossref => [Provider::Crossref, Provider::Arxiv, Provider::Semantic],
        ApiPriority::Arxiv => [Provider::Arxiv, Provider::Crossref, Provider::Semantic],
        ApiPriority::Auto => match kind {
            InputKind::Arxiv => [Provider::Arxiv, Provider::Crossref, Provider::Semantic],
            _ => [Provider::Crossref, Provider::Arxiv, Provider::Semantic],
        },
    }
}

/// Try each source in order until one returns a record. A source that
/// errors or has no match just moves the chain along; only after every
/// source has been tried does the item count as failed.
pub async fn resolve_item(
    providers: &[Arc<dyn MetadataProvider>],
    priority: ApiPriority,
    item: &InputItem,
    retry_attempts: u32,
) -> ResolutionResult {
    let mut last_error: Option<String> = None;

    for id in attempt_order(priority, item.kind) {
        let Some(provider) = providers.iter().find(|p| p.id() == id) else {
            continue;
        };
        match provider.resolve(item, retry_attempts).await {
            Ok(Some(record)) => {
                tracing::debug!("Source {} resolved '{}'", id, item.text);
                return ResolutionResult::Resolved(record);
            }
            Ok(None) => {
                tracing::debug!("Source {} had no match for '{}'", id, item.text);
            }
            Err(e) => {
                tracing::warn!("Source {} failed for '{}': {}", id, item.text, e);
                last_error = Some(e.to_string());
            }
        }
    }

    ResolutionResult::Failed {
        input: item.text.clone(),
        reason: last_error.unwrap_or_else(|| "not found in any source".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::{ProviderError, RawPayload};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    enum Answer {
        Hit(&'static str),
        Miss,
        Fail(u16),
    }

    struct Stub {
        id: Provider,
        answer: Answer,
        calls: AtomicU32,
    }

    impl Stub {
        fn new(id: Provider, answer: Answer) -> Arc<Self> {
            Arc::new(Self {
                id,
                answer,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn record_titled(title: &str, source: Provider) -> PaperRecord {
        PaperRecord {
            title: title.to_string(),
            authors: vec![],
            year: Some(2020),
            venue: None,
            volume: None,
            issue: None,
            pages: None,
            doi: None,
            publisher: None,
            abstract_text: None,
            arxiv_id: None,
            source,
            raw: RawPayload::Arxiv(crate::apis::arxiv::ArxivEntry::default()),
        }
    }

    #[async_trait]
    impl MetadataProvider for Stub {
        fn id(&self) -> Provider {
            self.id
        }

        async fn resolve(
            &self,
            _item: &InputItem,
            _retry_attempts: u32,
        ) -> Result<Option<PaperRecord>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answer {
                Answer::Hit(title) => Ok(Some(record_titled(title, self.id))),
                Answer::Miss => Ok(None),
                Answer::Fail(code) => Err(ProviderError::Status(
                    reqwest::StatusCode::from_u16(code).unwrap(),
                )),
            }
        }
    }

    #[test]
    fn test_auto_order_depends_on_input_kind() {
        assert_eq!(
            attempt_order(ApiPriority::Auto, InputKind::Doi),
            [Provider::Crossref, Provider::Arxiv, Provider::Semantic]
        );
        assert_eq!(
            attempt_order(ApiPriority::Auto, InputKind::Arxiv),
            [Provider::Arxiv, Provider::Crossref, Provider::Semantic]
        );
        assert_eq!(
            attempt_order(ApiPriority::Auto, InputKind::Title),
            [Provider::Crossref, Provider::Arxiv, Provider::Semantic]
        );
    }

    #[test]
    fn test_explicit_priority_overrides_kind() {
        assert_eq!(
            attempt_order(ApiPriority::Arxiv, InputKind::Doi)[0],
            Provider::Arxiv
        );
        assert_eq!(
            attempt_order(ApiPriority::Crossref, InputKind::Arxiv)[0],
            Provider::Crossref
        );
        // Semantic Scholar is never first
        for priority in [ApiPriority::Auto, ApiPriority::Crossref, ApiPriority::Arxiv] {
            for kind in [InputKind::Title, InputKind::Doi, InputKind::Arxiv] {
                assert_eq!(attempt_order(priority, kind)[2], Provider::Semantic);
            }
        }
    }

    #[tokio::test]
    async fn test_error_falls_through_to_next_source() {
        let crossref = Stub::new(Provider::Crossref, Answer::Fail(500));
        let arxiv = Stub::new(Provider::Arxiv, Answer::Hit("found on arxiv"));
        let semantic = Stub::new(Provider::Semantic, Answer::Hit("never reached"));
        let providers: Vec<Arc<dyn MetadataProvider>> =
            vec![crossref.clone(), arxiv.clone(), semantic.clone()];

        let item = InputItem::new("some paper title");
        let result = resolve_item(&providers, ApiPriority::Auto, &item, 0).await;

        match result {
            ResolutionResult::Resolved(record) => {
                assert_eq!(record.title, "found on arxiv");
                assert_eq!(record.source, Provider::Arxiv);
            }
            ResolutionResult::Failed { .. } => panic!("expected a hit"),
        }
        assert_eq!(crossref.calls(), 1);
        assert_eq!(arxiv.calls(), 1);
        assert_eq!(semantic.calls(), 0);
    }

    #[tokio::test]
    async fn test_misses_reach_the_last_source() {
        let crossref = Stub::new(Provider::Crossref, Answer::Miss);
        let arxiv = Stub::new(Provider::Arxiv, Answer::Miss);
        let semantic = Stub::new(Provider::Semantic, Answer::Hit("last resort"));
        let providers: Vec<Arc<dyn MetadataProvider>> =
            vec![crossref.clone(), arxiv.clone(), semantic.clone()];

        let item = InputItem::new("obscure workshop paper");
        let result = resolve_item(&providers, ApiPriority::Auto, &item, 0).await;

        assert!(result.is_resolved());
        assert_eq!(crossref.calls(), 1);
        assert_eq!(arxiv.calls(), 1);
        assert_eq!(semantic.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_input_and_last_error() {
        let providers: Vec<Arc<dyn MetadataProvider>> = vec![
            Stub::new(Provider::Crossref, Answer::Fail(500)),
            Stub::new(Provider::Arxiv, Answer::Fail(503)),
            Stub::new(Provider::Semantic, Answer::Fail(502)),
        ];

        let item = InputItem::new("Attention Is All You Need");
        let result = resolve_item(&providers, ApiPriority::Auto, &item, 0).await;

        match result {
            ResolutionResult::Failed { input, reason } => {
                assert_eq!(input, "Attention Is All You Need");
                // The last source attempted was Semantic Scholar
                assert!(reason.contains("502"));
            }
            ResolutionResult::Resolved(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_all_misses_report_not_found() {
        let providers: Vec<Arc<dyn MetadataProvider>> = vec![
            Stub::new(Provider::Crossref, Answer::Miss),
            Stub::new(Provider::Arxiv, Answer::Miss),
            Stub::new(Provider::Semantic, Answer::Miss),
        ];

        let item = InputItem::new("10.9999/does-not-exist");
        let result = resolve_item(&providers, ApiPriority::Auto, &item, 0).await;

        match result {
            ResolutionResult::Failed { reason, .. } => {
                assert_eq!(reason, "not found in any source");
            }
            ResolutionResult::Resolved(_) => panic!("expected failure"),
        }
    }
}
