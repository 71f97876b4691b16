use std::sync::Arc;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters,
    model::*, tool, tool_handler, tool_router,
    transport::stdio, ErrorData as McpError, ServerHandler, ServiceExt,
};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod apis;
mod batch;
mod cite;
mod classify;
mod config;
mod history;
mod resolve;
mod retry;

use apis::MetadataProvider;
use batch::{BatchStats, RunContext};
use cite::CitationStyle;
use config::{Config, Settings};
use history::{HistoryEntry, HistoryStore};

// ── Parameter structs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct GenerateCitationsParams {
    #[schemars(description = "Paper titles, DOIs, or arXiv IDs, one per line (max 100 lines)")]
    input: String,
    #[schemars(description = "Citation style: 'bibtex' (default), 'plain', 'apa', 'mla', 'chicago', 'harvard'")]
    style: Option<String>,
    #[schemars(description = "Seconds to pause between items (default 1.0)")]
    delay_seconds: Option<f64>,
    #[schemars(description = "Source priority: 'auto' (default), 'crossref', 'arxiv'")]
    api_priority: Option<String>,
    #[schemars(description = "Indent BibTeX fields (default true)")]
    format_indent: Option<bool>,
    #[schemars(description = "Sort rendered entries alphabetically (default false)")]
    sort_alphabetically: Option<bool>,
    #[schemars(description = "Prepend the run summary comment block (default true)")]
    include_comments: Option<bool>,
    #[schemars(description = "Extra attempts per request after a failure (default 1)")]
    retry_attempts: Option<u32>,
    #[schemars(description = "Record each item in history (default true)")]
    save_history: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ResolvePaperParams {
    #[schemars(description = "A single paper title, DOI, or arXiv ID")]
    input: String,
    #[schemars(description = "Source priority: 'auto' (default), 'crossref', 'arxiv'")]
    api_priority: Option<String>,
    #[schemars(description = "Extra attempts per request after a failure (default 1)")]
    retry_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PreviewInputParams {
    #[schemars(description = "Paper titles, DOIs, or arXiv IDs, one per line")]
    input: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListHistoryParams {
    #[schemars(description = "Maximum entries to return (default all)")]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteHistoryEntryParams {
    #[schemars(description = "Id of the history entry to delete")]
    id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractBibTitlesParams {
    #[schemars(description = "Contents of a .bib file")]
    content: String,
}

// ── Reply shapes ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerationReply {
    citations: String,
    stats: BatchStats,
    dropped: usize,
    cancelled: bool,
    raw: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct PreviewReply {
    category: classify::BatchCategory,
    count: usize,
    dropped: usize,
    items: Vec<classify::InputItem>,
}

#[derive(Debug, Serialize)]
struct StatusReply {
    running: bool,
    stats: BatchStats,
}

#[derive(Debug, Serialize)]
struct HistoryListReply {
    count: usize,
    success_rate: Option<u32>,
    last_saved_at: Option<DateTime<Utc>>,
    entries: Vec<HistoryEntry>,
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CitationFetcherServer {
    tool_router: ToolRouter<Self>,
    config: Arc<Config>,
    providers: Arc<Vec<Arc<dyn MetadataProvider>>>,
    history: Arc<Mutex<HistoryStore>>,
    run: RunContext,
}

#[tool_router]
impl CitationFetcherServer {
    pub fn create() -> anyhow::Result<Self> {
        let config = Config::from_env();
        let providers = config.build_providers();
        std::fs::create_dir_all(&config.data_dir)?;
        let history = HistoryStore::new(config.history_path());

        tracing::info!(
            "Initialized {} metadata sources, data_dir={}",
            providers.len(),
            config.data_dir.display()
        );

        Ok(Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
            providers: Arc::new(providers),
            history: Arc::new(Mutex::new(history)),
            run: RunContext::new(),
        })
    }

    #[tool(description = "Resolve a batch of paper titles, DOIs, or arXiv IDs and render them as citations. Returns the citation block, run stats, and the raw provider payloads, one per input line.")]
    async fn generate_citations(
        &self,
        Parameters(params): Parameters<GenerateCitationsParams>,
    ) -> Result<CallToolResult, McpError> {
        let settings = self.merge_settings(&params)?;
        let style = Self::parse_style(params.style.as_deref())?;

        let parsed = classify::parse_input(&params.input);
        if parsed.items.is_empty() {
            return Err(McpError::invalid_params(
                "Input is empty; provide one title, DOI, or arXiv ID per line".to_string(),
                None,
            ));
        }
        let history = settings.save_history.then_some(&*self.history);
        let outcome = batch::run_batch(&self.providers, parsed, &settings, &self.run, history)
            .await
            .map_err(|_| {
                McpError::invalid_params(
                    "A generation run is already in progress; wait for it or call cancel_generation"
                        .to_string(),
                    None,
                )
            })?;

        let reply = GenerationReply {
            citations: cite::render_batch(&outcome.results, &outcome.stats, style, &settings),
            stats: outcome.stats,
            dropped: outcome.dropped,
            cancelled: outcome.cancelled,
            raw: cite::raw_export(&outcome.results),
        };
        let json = serde_json::to_string_pretty(&reply)
            .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Resolve a single title, DOI, or arXiv ID to its full metadata record, raw provider payload included")]
    async fn resolve_paper(
        &self,
        Parameters(params): Parameters<ResolvePaperParams>,
    ) -> Result<CallToolResult, McpError> {
        let line = params.input.trim();
        if line.is_empty() {
            return Err(McpError::invalid_params(
                "Input is empty; provide a title, DOI, or arXiv ID".to_string(),
                None,
            ));
        }
        if line.lines().nth(1).is_some() {
            return Err(McpError::invalid_params(
                "resolve_paper takes one item; use generate_citations for batches".to_string(),
                None,
            ));
        }

        let priority = match params.api_priority.as_deref() {
            Some(s) => s
                .parse()
                .map_err(|e: String| McpError::invalid_params(e, None))?,
            None => self.config.defaults.api_priority,
        };
        let retries = params
            .retry_attempts
            .unwrap_or(self.config.defaults.retry_attempts);

        let item = classify::InputItem::new(line);
        match resolve::resolve_item(&self.providers, priority, &item, retries).await {
            resolve::ResolutionResult::Resolved(record) => {
                let json = serde_json::to_string_pretty(&record)
                    .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
                Ok(CallToolResult::success(vec![Content::text(json)]))
            }
            resolve::ResolutionResult::Failed { input, reason } => {
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "Paper not found: {} ({})",
                    input, reason
                ))]))
            }
        }
    }

    #[tool(description = "Classify input lines without fetching anything: the detected kind of each line, the batch category, and how many lines the cap would drop")]
    async fn preview_input(
        &self,
        Parameters(params): Parameters<PreviewInputParams>,
    ) -> Result<CallToolResult, McpError> {
        let parsed = classify::parse_input(&params.input);
        let reply = PreviewReply {
            category: parsed.category,
            count: parsed.items.len(),
            dropped: parsed.dropped,
            items: parsed.items,
        };
        let json = serde_json::to_string_pretty(&reply)
            .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Report whether a generation run is active, with its live counters")]
    async fn generation_status(&self) -> Result<CallToolResult, McpError> {
        let reply = StatusReply {
            running: self.run.is_running(),
            stats: self.run.stats().await,
        };
        let json = serde_json::to_string_pretty(&reply)
            .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Stop the active generation run at the next item boundary")]
    async fn cancel_generation(&self) -> Result<CallToolResult, McpError> {
        if !self.run.is_running() {
            return Ok(CallToolResult::success(vec![Content::text(
                "No generation run is in progress".to_string(),
            )]));
        }
        self.run.cancel();
        Ok(CallToolResult::success(vec![Content::text(
            "Cancellation requested; the run stops after the current item".to_string(),
        )]))
    }

    #[tool(description = "List saved citations, newest first, with summary stats")]
    async fn list_history(
        &self,
        Parameters(params): Parameters<ListHistoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let store = self.history.lock().await;
        let mut entries = store
            .load_all()
            .map_err(|e| McpError::internal_error(format!("History error: {}", e), None))?;

        let count = entries.len();
        let succeeded = entries.iter().filter(|e| e.succeeded).count();
        let success_rate =
            (count > 0).then(|| ((succeeded as f64 / count as f64) * 100.0).round() as u32);
        let last_saved_at = entries.first().map(|e| e.timestamp);
        if let Some(limit) = params.limit {
            entries.truncate(limit as usize);
        }

        let reply = HistoryListReply {
            count,
            success_rate,
            last_saved_at,
            entries,
        };
        let json = serde_json::to_string_pretty(&reply)
            .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Delete one history entry by id")]
    async fn delete_history_entry(
        &self,
        Parameters(params): Parameters<DeleteHistoryEntryParams>,
    ) -> Result<CallToolResult, McpError> {
        let store = self.history.lock().await;
        let deleted = store
            .delete_by_id(params.id)
            .map_err(|e| McpError::internal_error(format!("History error: {}", e), None))?;
        if !deleted {
            return Err(McpError::invalid_params(
                format!("No history entry with id {}", params.id),
                None,
            ));
        }
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Deleted history entry {}",
            params.id
        ))]))
    }

    #[tool(description = "Delete all history entries")]
    async fn clear_history(&self) -> Result<CallToolResult, McpError> {
        let store = self.history.lock().await;
        store
            .clear()
            .map_err(|e| McpError::internal_error(format!("History error: {}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(
            "History cleared".to_string(),
        )]))
    }

    #[tool(description = "Export the full history as a JSON document with version and export date")]
    async fn export_history(&self) -> Result<CallToolResult, McpError> {
        let store = self.history.lock().await;
        let export = store
            .export()
            .map_err(|e| McpError::internal_error(format!("History error: {}", e), None))?;
        let json = serde_json::to_string_pretty(&export)
            .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Extract the title fields from BibTeX content, one per line, ready to feed generate_citations")]
    async fn extract_bib_titles(
        &self,
        Parameters(params): Parameters<ExtractBibTitlesParams>,
    ) -> Result<CallToolResult, McpError> {
        let titles = classify::titles_from_bibtex(&params.content);
        if titles.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(
                "No title fields found in the supplied BibTeX".to_string(),
            )]));
        }
        Ok(CallToolResult::success(vec![Content::text(titles.join("\n"))]))
    }

    #[tool(description = "List available metadata sources and their status")]
    async fn list_sources(&self) -> Result<CallToolResult, McpError> {
        let statuses = self.config.source_status();
        let json = serde_json::to_string_pretty(&statuses)
            .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

impl CitationFetcherServer {
    /// Per-call settings: the server defaults with the caller's overrides
    /// applied on top.
    fn merge_settings(&self, params: &GenerateCitationsParams) -> Result<Settings, McpError> {
        let mut settings = self.config.defaults.clone();
        if let Some(delay) = params.delay_seconds {
            if !delay.is_finite() || delay < 0.0 {
                return Err(McpError::invalid_params(
                    format!("delay_seconds must be a non-negative number, got {}", delay),
                    None,
                ));
            }
            settings.delay_seconds = delay;
        }
        if let Some(ref priority) = params.api_priority {
            settings.api_priority = priority
                .parse()
                .map_err(|e: String| McpError::invalid_params(e, None))?;
        }
        if let Some(indent) = params.format_indent {
            settings.format_indent = indent;
        }
        if let Some(sort) = params.sort_alphabetically {
            settings.sort_alphabetically = sort;
        }
        if let Some(comments) = params.include_comments {
            settings.include_comments = comments;
        }
        if let Some(retries) = params.retry_attempts {
            settings.retry_attempts = retries;
        }
        if let Some(save) = params.save_history {
            settings.save_history = save;
        }
        Ok(settings)
    }

    fn parse_style(style: Option<&str>) -> Result<CitationStyle, McpError> {
        match style {
            Some(s) => s
                .parse()
                .map_err(|e: cite::FormatError| McpError::invalid_params(e.to_string(), None)),
            None => Ok(CitationStyle::default()),
        }
    }
}

#[tool_handler]
impl ServerHandler for CitationFetcherServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Resolve paper titles, DOIs, and arXiv IDs into formatted citations. \
                 Metadata comes from CrossRef, arXiv, and Semantic Scholar with \
                 automatic fallback between them. Styles: BibTeX, plain text, APA, \
                 MLA, Chicago, Harvard. Batch runs are sequential and cancellable, \
                 and the last 100 items are kept in history."
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting citation-fetcher MCP server");

    let server = CitationFetcherServer::create()?;
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
