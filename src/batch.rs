//! Sequential batch execution: one lookup at a time, paced by the
//! configured delay, with live stats and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::apis::{MetadataProvider, Provider};
use crate::cite;
use crate::classify::ParsedInput;
use crate::config::Settings;
use crate::history::{HistoryStore, NewEntry};
use crate::resolve::{resolve_item, ResolutionResult};

/// How many records each source contributed to a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SourceTally {
    pub crossref: u32,
    pub arxiv: u32,
    pub semantic: u32,
}

impl SourceTally {
    fn bump(&mut self, provider: Provider) {
        match provider {
            Provider::Crossref => self.crossref += 1,
            Provider::Arxiv => self.arxiv += 1,
            Provider::Semantic => self.semantic += 1,
        }
    }
}

/// Counters for one run, readable while the run is still going.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: u32,
    pub success: u32,
    pub failed: u32,
    pub sources: SourceTally,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
}

impl BatchStats {
    fn new(total: u32) -> Self {
        Self {
            total,
            success: 0,
            failed: 0,
            sources: SourceTally::default(),
            started_at: Utc::now(),
            elapsed_seconds: 0.0,
        }
    }

    fn record(&mut self, result: &ResolutionResult) {
        match result {
            ResolutionResult::Resolved(record) => {
                self.success += 1;
                self.sources.bump(record.source);
            }
            ResolutionResult::Failed { .. } => self.failed += 1,
        }
    }
}

/// Returned when a batch is started while another one is still active on
/// the same context.
#[derive(Debug, Error)]
#[error("a generation run is already active")]
pub struct RunBusy;

/// Shared handle for the active run. The status and cancel tools hold a
/// clone and observe the run without touching the executing task.
#[derive(Clone)]
pub struct RunContext {
    cancelled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    stats: Arc<tokio::sync::Mutex<BatchStats>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(tokio::sync::Mutex::new(BatchStats::new(0))),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the counters. While a run is active the elapsed time is
    /// computed from its start rather than the last finished run's value.
    pub async fn stats(&self) -> BatchStats {
        let mut stats = self.stats.lock().await.clone();
        if self.is_running() {
            let elapsed = Utc::now().signed_duration_since(stats.started_at);
            stats.elapsed_seconds = elapsed.num_milliseconds() as f64 / 1000.0;
        }
        stats
    }

    /// Claim the run slot. Fails when another run already holds it; on
    /// success the cancel flag and stats are reset for the new run.
    async fn try_begin(&self, total: u32) -> Result<(), RunBusy> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RunBusy);
        }
        self.cancelled.store(false, Ordering::SeqCst);
        *self.stats.lock().await = BatchStats::new(total);
        Ok(())
    }

    async fn record(&self, result: &ResolutionResult) {
        self.stats.lock().await.record(result);
    }

    async fn finish(&self) {
        let mut stats = self.stats.lock().await;
        let elapsed = Utc::now().signed_duration_since(stats.started_at);
        stats.elapsed_seconds = elapsed.num_milliseconds() as f64 / 1000.0;
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Everything one run produced.
pub struct BatchOutcome {
    pub results: Vec<ResolutionResult>,
    pub stats: BatchStats,
    pub dropped: usize,
    pub cancelled: bool,
}

/// Upper bound on the pacing sleep between items.
const MAX_ITEM_DELAY: Duration = Duration::from_secs(3600);

/// Work through the items strictly in order, one at a time. Only one run
/// may hold a context at a time; a second call while one is active returns
/// `RunBusy`. Cancellation is honored between items; the item in flight
/// always completes and is counted.
pub async fn run_batch(
    providers: &[Arc<dyn MetadataProvider>],
    input: ParsedInput,
    settings: &Settings,
    ctx: &RunContext,
    history: Option<&tokio::sync::Mutex<HistoryStore>>,
) -> Result<BatchOutcome, RunBusy> {
    ctx.try_begin(input.items.len() as u32).await?;

    let mut results = Vec::with_capacity(input.items.len());
    let mut cancelled = false;

    for (index, item) in input.items.iter().enumerate() {
        if index > 0 && settings.delay_seconds > 0.0 {
            let delay = Duration::try_from_secs_f64(settings.delay_seconds)
                .unwrap_or(MAX_ITEM_DELAY)
                .min(MAX_ITEM_DELAY);
            tokio::time::sleep(delay).await;
        }
        if ctx.is_cancelled() {
            tracing::info!("Run cancelled after {} of {} items", index, input.items.len());
            cancelled = true;
            break;
        }

        let result =
            resolve_item(providers, settings.api_priority, item, settings.retry_attempts).await;
        ctx.record(&result).await;

        if let Some(history) = history {
            let entry = match &result {
                ResolutionResult::Resolved(record) => NewEntry {
                    input: item.text.clone(),
                    citation: cite::format_bibtex(record, settings.format_indent),
                    raw: serde_json::to_value(&record.raw).unwrap_or_default(),
                    source: Some(record.source),
                    succeeded: true,
                },
                ResolutionResult::Failed { input, reason } => NewEntry {
                    input: input.clone(),
                    citation: cite::failure_marker(input),
                    raw: serde_json::json!({"error": reason, "input": input}),
                    source: None,
                    succeeded: false,
                },
            };
            if let Err(e) = history.lock().await.append(entry) {
                tracing::warn!("Failed to record history entry: {}", e);
            }
        }

        results.push(result);
    }

    ctx.finish().await;
    let stats = ctx.stats().await;

    Ok(BatchOutcome {
        results,
        stats,
        dropped: input.dropped,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::{Author, PaperRecord, ProviderError, RawPayload};
    use crate::classify::{parse_input, BatchCategory, InputItem};
    use crate::cite::CitationStyle;
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn record_for(title: &str, source: Provider) -> PaperRecord {
        PaperRecord {
            title: title.to_string(),
            authors: vec![Author::from_name("Jane Smith")],
            year: Some(2021),
            venue: Some("Journal of Tests".into()),
            volume: None,
            issue: None,
            pages: None,
            doi: None,
            publisher: None,
            abstract_text: None,
            arxiv_id: None,
            source,
            raw: RawPayload::Crossref(Default::default()),
        }
    }

    /// Answers every lookup except inputs containing "missing".
    struct Scripted {
        id: Provider,
    }

    #[async_trait]
    impl MetadataProvider for Scripted {
        fn id(&self) -> Provider {
            self.id
        }

        async fn resolve(
            &self,
            item: &InputItem,
            _retry_attempts: u32,
        ) -> Result<Option<PaperRecord>, ProviderError> {
            if item.text.contains("missing") {
                Ok(None)
            } else {
                Ok(Some(record_for(&item.text, self.id)))
            }
        }
    }

    fn scripted_providers() -> Vec<Arc<dyn MetadataProvider>> {
        vec![
            Arc::new(Scripted {
                id: Provider::Crossref,
            }),
            Arc::new(Scripted {
                id: Provider::Arxiv,
            }),
            Arc::new(Scripted {
                id: Provider::Semantic,
            }),
        ]
    }

    fn fast_settings() -> Settings {
        Settings {
            delay_seconds: 0.0,
            retry_attempts: 0,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_results_align_with_input_lines() {
        let input = parse_input(
            "Paper One\nPaper Two\nthe missing one\nPaper Four\nPaper Five",
        );
        let ctx = RunContext::new();
        let settings = fast_settings();

        let outcome = run_batch(&scripted_providers(), input, &settings, &ctx, None)
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 5);
        assert!(!outcome.cancelled);
        assert_eq!(outcome.stats.total, 5);
        assert_eq!(outcome.stats.success, 4);
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.stats.sources.crossref, 4);

        match &outcome.results[2] {
            ResolutionResult::Failed { input, reason } => {
                assert_eq!(input, "the missing one");
                assert_eq!(reason, "not found in any source");
            }
            ResolutionResult::Resolved(_) => panic!("third line should fail"),
        }

        let text = cite::render_batch(
            &outcome.results,
            &outcome.stats,
            CitationStyle::Bibtex,
            &settings,
        );
        assert!(text.contains("% Successful: 4, Failed: 1"));
        assert!(text.contains("% Failed to fetch citation for: the missing one"));
    }

    /// Echoes the looked-up identifier back as the record's DOI.
    struct DoiEcho;

    #[async_trait]
    impl MetadataProvider for DoiEcho {
        fn id(&self) -> Provider {
            Provider::Crossref
        }

        async fn resolve(
            &self,
            item: &InputItem,
            _retry_attempts: u32,
        ) -> Result<Option<PaperRecord>, ProviderError> {
            let mut record = record_for("An Indexed Paper", Provider::Crossref);
            record.doi = Some(item.text.clone());
            Ok(Some(record))
        }
    }

    #[tokio::test]
    async fn test_single_doi_renders_article_with_doi() {
        let providers: Vec<Arc<dyn MetadataProvider>> = vec![Arc::new(DoiEcho)];
        let input = parse_input("10.1000/xyz123");
        assert_eq!(input.category, BatchCategory::Doi);

        let ctx = RunContext::new();
        let outcome = run_batch(&providers, input, &fast_settings(), &ctx, None)
            .await
            .unwrap();

        let settings = Settings {
            include_comments: false,
            ..fast_settings()
        };
        let text = cite::render_batch(
            &outcome.results,
            &outcome.stats,
            CitationStyle::Bibtex,
            &settings,
        );
        assert!(text.starts_with("@article{"));
        assert!(text.contains("doi = {10.1000/xyz123}"));
    }

    /// Resolves its item, then flips the cancel flag.
    struct CancelAfterFirst {
        ctx: RunContext,
    }

    #[async_trait]
    impl MetadataProvider for CancelAfterFirst {
        fn id(&self) -> Provider {
            Provider::Crossref
        }

        async fn resolve(
            &self,
            item: &InputItem,
            _retry_attempts: u32,
        ) -> Result<Option<PaperRecord>, ProviderError> {
            self.ctx.cancel();
            Ok(Some(record_for(&item.text, Provider::Crossref)))
        }
    }

    #[tokio::test]
    async fn test_cancel_takes_effect_at_the_next_item() {
        let ctx = RunContext::new();
        let providers: Vec<Arc<dyn MetadataProvider>> =
            vec![Arc::new(CancelAfterFirst { ctx: ctx.clone() })];
        let input = parse_input("Paper One\nPaper Two\nPaper Three");

        let outcome = run_batch(&providers, input, &fast_settings(), &ctx, None)
            .await
            .unwrap();

        // The first item completed and was counted; the rest never ran
        assert!(outcome.cancelled);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.stats.success, 1);
        assert!(!ctx.is_running());
    }

    #[tokio::test]
    async fn test_delay_paces_between_items_only() {
        tokio::time::pause();
        let input = parse_input("Paper One\nPaper Two\nPaper Three");
        let ctx = RunContext::new();
        let settings = Settings {
            delay_seconds: 1.0,
            ..fast_settings()
        };

        let start = tokio::time::Instant::now();
        let outcome = run_batch(&scripted_providers(), input, &settings, &ctx, None)
            .await
            .unwrap();

        // Two gaps for three items, no delay before the first. The paused
        // clock rounds each sleep up to the next timer tick.
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2100),
            "unexpected pacing total: {:?}",
            elapsed
        );
        assert_eq!(outcome.results.len(), 3);
    }

    #[tokio::test]
    async fn test_oversized_delay_is_capped() {
        tokio::time::pause();
        let input = parse_input("Paper One\nPaper Two");
        let ctx = RunContext::new();
        let settings = Settings {
            delay_seconds: 1e20,
            ..fast_settings()
        };

        let start = tokio::time::Instant::now();
        let outcome = run_batch(&scripted_providers(), input, &settings, &ctx, None)
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 2);
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(3600) && elapsed < Duration::from_secs(3601),
            "unexpected capped delay: {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_history_gets_one_entry_per_item() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"));
        let history = tokio::sync::Mutex::new(store);

        let input = parse_input("Paper One\nthe missing one");
        let ctx = RunContext::new();
        run_batch(
            &scripted_providers(),
            input,
            &fast_settings(),
            &ctx,
            Some(&history),
        )
        .await
        .unwrap();

        let entries = history.lock().await.load_all().unwrap();
        assert_eq!(entries.len(), 2);
        // Newest first: the failed lookup is on top
        assert_eq!(entries[0].input, "the missing one");
        assert!(!entries[0].succeeded);
        assert!(entries[0].citation.starts_with("% Failed to fetch"));
        assert!(entries[0].raw.get("error").is_some());
        assert_eq!(entries[1].input, "Paper One");
        assert!(entries[1].succeeded);
        assert!(entries[1].citation.starts_with("@article{"));
    }

    #[tokio::test]
    async fn test_context_reports_live_progress() {
        let ctx = RunContext::new();
        assert!(!ctx.is_running());

        let input = parse_input("Paper One\nPaper Two");
        let outcome = run_batch(&scripted_providers(), input, &fast_settings(), &ctx, None)
            .await
            .unwrap();

        let stats = ctx.stats().await;
        assert_eq!(stats.success, 2);
        assert_eq!(stats.total, 2);
        assert!(stats.elapsed_seconds >= 0.0);
        assert_eq!(outcome.stats.success, stats.success);
    }

    /// Tries to start a second batch on the same context from inside a
    /// resolve call.
    struct Overlapper {
        ctx: RunContext,
    }

    #[async_trait]
    impl MetadataProvider for Overlapper {
        fn id(&self) -> Provider {
            Provider::Crossref
        }

        async fn resolve(
            &self,
            item: &InputItem,
            _retry_attempts: u32,
        ) -> Result<Option<PaperRecord>, ProviderError> {
            let nested = run_batch(
                &[],
                parse_input("Another Paper"),
                &fast_settings(),
                &self.ctx,
                None,
            )
            .await;
            assert!(nested.is_err(), "the run slot must be exclusive");
            Ok(Some(record_for(&item.text, Provider::Crossref)))
        }
    }

    #[tokio::test]
    async fn test_run_slot_is_exclusive_while_active() {
        let ctx = RunContext::new();
        let providers: Vec<Arc<dyn MetadataProvider>> =
            vec![Arc::new(Overlapper { ctx: ctx.clone() })];
        let input = parse_input("Paper One\nPaper Two");

        let outcome = run_batch(&providers, input, &fast_settings(), &ctx, None)
            .await
            .unwrap();

        // The overlapping attempts were rejected without corrupting the
        // counters of the run that held the slot
        assert_eq!(outcome.stats.total, 2);
        assert_eq!(outcome.stats.success, 2);
        assert!(!ctx.is_running());

        // Once the slot is free the context accepts a new run
        let input = parse_input("Paper Three");
        assert!(run_batch(&providers, input, &fast_settings(), &ctx, None)
            .await
            .is_ok());
    }

    /// Reads the shared snapshot mid-run after letting a little wall time
    /// pass.
    struct SlowResolver {
        ctx: RunContext,
    }

    #[async_trait]
    impl MetadataProvider for SlowResolver {
        fn id(&self) -> Provider {
            Provider::Crossref
        }

        async fn resolve(
            &self,
            item: &InputItem,
            _retry_attempts: u32,
        ) -> Result<Option<PaperRecord>, ProviderError> {
            std::thread::sleep(Duration::from_millis(15));
            let stats = self.ctx.stats().await;
            assert!(
                stats.elapsed_seconds > 0.0,
                "mid-run snapshot should report time since the run started"
            );
            Ok(Some(record_for(&item.text, Provider::Crossref)))
        }
    }

    #[tokio::test]
    async fn test_status_snapshot_reports_live_elapsed() {
        let ctx = RunContext::new();
        let providers: Vec<Arc<dyn MetadataProvider>> =
            vec![Arc::new(SlowResolver { ctx: ctx.clone() })];
        let input = parse_input("Paper One");

        let outcome = run_batch(&providers, input, &fast_settings(), &ctx, None)
            .await
            .unwrap();
        assert!(outcome.stats.elapsed_seconds > 0.0);
    }
}
