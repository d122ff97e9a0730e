//! Test utilities for scrollfeed integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::Level;

// Re-export useful types
pub use scrollfeed::{
    CachePolicy, Container, FeedConfig, FeedError, FetchError, Hooks, MemoryStore, Page,
    PageFetcher, PageRequest, Phase, ScrollFeed, ScrollOutcome, StateStore, StopReason,
    TemplateError, UrlBuilder, ViewportMetrics,
};

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        let level = level.parse::<Level>().unwrap_or(Level::INFO);
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_test_writer()
            .try_init();
    }
}

/// Page of `range` item strings ("item-7", ...), the shape the default
/// `items_returned` counts.
pub fn page_of(range: std::ops::Range<u64>) -> Page {
    json!(range.map(|i| format!("item-{i}")).collect::<Vec<_>>())
}

/// Template rendering each item string to an `<li>`.
pub fn li_template() -> impl FnMut(&Page) -> Result<String, TemplateError> + Send + 'static {
    |page: &Page| {
        let items = page
            .as_array()
            .ok_or_else(|| TemplateError::new("page is not an array"))?;
        Ok(items
            .iter()
            .map(|item| format!("<li>{}</li>", item.as_str().unwrap_or_default()))
            .collect::<String>())
    }
}

/// Standard offset/count URL builder.
pub fn feed_url() -> UrlBuilder {
    UrlBuilder::dynamic(|offset, count| format!("/feed?offset={offset}&count={count}"))
}

// ============================================================================
// MockFetcher
// ============================================================================

/// Scripted fetcher: pops results in order and logs every request. Once the
/// script runs dry it answers with empty pages, like a drained server.
pub struct MockFetcher {
    script: VecDeque<Result<Page, FetchError>>,
    log: Arc<Mutex<Vec<PageRequest>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self { script: VecDeque::new(), log: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Queue a successful page response.
    pub fn page(mut self, page: Page) -> Self {
        self.script.push_back(Ok(page));
        self
    }

    /// Queue a failed fetch.
    pub fn fail(mut self, error: FetchError) -> Self {
        self.script.push_back(Err(error));
        self
    }

    /// Handle on the request log; grab a clone before the fetcher moves
    /// into the feed.
    pub fn log(&self) -> Arc<Mutex<Vec<PageRequest>>> {
        self.log.clone()
    }
}

impl PageFetcher for MockFetcher {
    async fn fetch(&mut self, request: PageRequest) -> Result<Page, FetchError> {
        self.log.lock().unwrap().push(request);
        self.script.pop_front().unwrap_or_else(|| Ok(json!([])))
    }
}

/// Offsets extracted from logged `/feed?offset=N&count=M` URLs, in request
/// order.
pub fn requested_offsets(log: &Arc<Mutex<Vec<PageRequest>>>) -> Vec<u64> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|r| {
            let query = r.url.split_once("offset=")?.1;
            query.split('&').next()?.parse().ok()
        })
        .collect()
}

// ============================================================================
// MockContainer
// ============================================================================

/// Headless stand-in for the host scroll surface. Content height grows by
/// `item_height` per appended `<li>`, so the fill loop observes real growth
/// and terminates the way a DOM container would.
pub struct MockContainer {
    pub viewport_height: f64,
    pub item_height: f64,
    pub scroll_top: f64,
    pub items: usize,
    pub appended: Vec<String>,
    pub scrolled_to: Vec<f64>,
    pub loader_events: Vec<&'static str>,
}

impl MockContainer {
    pub fn new(viewport_height: f64, item_height: f64) -> Self {
        Self {
            viewport_height,
            item_height,
            scroll_top: 0.0,
            items: 0,
            appended: Vec::new(),
            scrolled_to: Vec::new(),
            loader_events: Vec::new(),
        }
    }

    pub fn content_height(&self) -> f64 {
        self.items as f64 * self.item_height
    }

    /// Scroll so the viewport bottom sits exactly at the container bottom.
    pub fn scroll_to_bottom(&mut self) {
        self.scroll_top = (self.content_height() - self.viewport_height).max(0.0);
    }
}

impl Container for MockContainer {
    fn metrics(&self) -> ViewportMetrics {
        ViewportMetrics {
            scroll_top: self.scroll_top,
            viewport_height: self.viewport_height,
            content_bottom: self.content_height(),
        }
    }

    fn append(&mut self, markup: &str) {
        self.items += markup.matches("<li>").count();
        self.appended.push(markup.to_owned());
    }

    fn scroll_to(&mut self, scroll_top: f64) {
        self.scroll_top = scroll_top;
        self.scrolled_to.push(scroll_top);
    }

    fn show_loader(&mut self, _markup: &str) {
        self.loader_events.push("show");
    }

    fn hide_loader(&mut self) {
        self.loader_events.push("hide");
    }
}

// ============================================================================
// HookLog
// ============================================================================

#[derive(Default)]
pub struct HookEvents {
    pub completed: Vec<(Page, String)>,
    pub finished: Vec<Option<Page>>,
    pub errors: Vec<String>,
}

/// Shared recorder wired into the `complete`/`finished`/`on_error` hooks.
#[derive(Clone, Default)]
pub struct HookLog(pub Arc<Mutex<HookEvents>>);

impl HookLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks with the `<li>` template plus recorders for the lifecycle
    /// callbacks. Chain `.with_*` on the result to override.
    pub fn hooks(&self) -> Hooks {
        let completed = self.0.clone();
        let finished = self.0.clone();
        let errors = self.0.clone();
        Hooks::new()
            .with_template(li_template())
            .with_complete(move |page, markup| {
                completed
                    .lock()
                    .unwrap()
                    .completed
                    .push((page.clone(), markup.to_owned()));
            })
            .with_finished(move |page| {
                finished.lock().unwrap().finished.push(page.cloned());
            })
            .with_on_error(move |error| {
                errors.lock().unwrap().errors.push(error.to_string());
            })
    }

    pub fn completed_count(&self) -> usize {
        self.0.lock().unwrap().completed.len()
    }

    pub fn finished_count(&self) -> usize {
        self.0.lock().unwrap().finished.len()
    }

    pub fn errors(&self) -> Vec<String> {
        self.0.lock().unwrap().errors.clone()
    }
}
