//! Scrollfeed - infinite scroll state machine with page fetching
//!
//! A growing container fills itself with pages fetched over HTTP as the user
//! scrolls near its bottom. The host supplies three capabilities — a
//! [`Container`] (viewport metrics + markup sink), a [`PageFetcher`] (HTTP
//! requester), and optionally a [`StateStore`] (persistence for stateful
//! resume) — so the sequencing logic runs and tests without a browser.

pub mod cache;
pub mod error;
pub mod fetch;
pub mod viewport;

use std::time::Instant;

use ankurah_signals::{Mut, Peek, Read};

use crate::viewport::WriteGate;

// Re-export key types
pub use crate::cache::{
    flush_namespace, CacheMirror, CachePolicy, MemoryStore, StateStore, StoreError,
};
pub use crate::error::{FeedError, TemplateError};
#[cfg(feature = "http")]
pub use crate::fetch::HttpFetcher;
pub use crate::fetch::{FetchError, Page, PageFetcher, PageRequest};
pub use crate::viewport::{near_bottom, Container, ViewportMetrics};
pub use ankurah_signals;

// ============================================================================
// Core Types
// ============================================================================

/// Where the feed is in its lifecycle. Exposed as a signal so a host can
/// toggle loader visibility or unbind its scroll listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the next scroll-threshold crossing
    Idle,
    /// Exactly one fetch is outstanding
    Loading,
    /// Terminal; no further fetches will happen
    Stopped,
}

/// Which terminal condition ended the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// A page reported zero items
    EndOfStream,
    /// The configured maximum total was reached or exceeded
    MaxReached,
    /// The caller's stop predicate returned true
    Predicate,
}

/// What one `attach`/`on_scroll` call accomplished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollOutcome {
    /// Below the trigger threshold, or a fetch was already in flight
    Idle,
    /// Pages were fetched and appended
    Appended { pages: usize, items: u64 },
    /// The fetch failed; the error hook has been invoked and the feed is
    /// idle again, so a later scroll retriggers
    Failed,
    /// A stop condition was hit (now, or on an earlier call)
    Stopped(StopReason),
}

/// Result of one fetch step inside the fill loop.
enum Step {
    Appended(u64),
    Failed,
    Stopped(StopReason),
}

// ============================================================================
// Configuration
// ============================================================================

/// Resolves the fetch target for a given offset and page-size hint.
pub enum UrlBuilder {
    /// Same URL for every page
    Fixed(String),
    /// Caller-computed URL from (offset, count)
    Dynamic(Box<dyn FnMut(u64, u64) -> String + Send>),
}

impl UrlBuilder {
    pub fn fixed(url: impl Into<String>) -> Self {
        Self::Fixed(url.into())
    }

    pub fn dynamic(f: impl FnMut(u64, u64) -> String + Send + 'static) -> Self {
        Self::Dynamic(Box::new(f))
    }

    fn resolve(&mut self, offset: u64, count: u64) -> String {
        match self {
            Self::Fixed(url) => url.clone(),
            Self::Dynamic(f) => f(offset, count),
        }
    }
}

impl From<&str> for UrlBuilder {
    fn from(url: &str) -> Self {
        Self::fixed(url)
    }
}

impl From<String> for UrlBuilder {
    fn from(url: String) -> Self {
        Self::Fixed(url)
    }
}

/// POST body source; its presence selects POST over GET.
pub enum PostBody {
    Static(Page),
    /// Consulted once per request
    Provider(Box<dyn FnMut() -> Page + Send>),
}

impl PostBody {
    fn resolve(&mut self) -> Page {
        match self {
            Self::Static(value) => value.clone(),
            Self::Provider(f) => f(),
        }
    }
}

/// Plain-data feed options.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Item offset of the first fetch, for pages that already render some
    /// items server-side
    pub offset: u64,
    /// Page-size hint passed through to the URL builder
    pub count: u64,
    /// Maximum total items; the stream stops once the offset reaches it
    pub max: Option<u64>,
    /// Pixels before the container bottom at which fetching starts
    pub sensitivity: f64,
    /// Markup routed to `Container::show_loader` while a fetch is outstanding
    pub loader: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { offset: 0, count: 0, max: None, sensitivity: 0.0, loader: None }
    }
}

/// Caller callbacks. Every hook has a neutral default so hosts only set what
/// they use.
pub struct Hooks {
    /// Render a page response to markup. Errors reach `on_error`; the page
    /// still counts toward the offset so the stream never wedges on one bad
    /// render.
    pub template: Box<dyn FnMut(&Page) -> Result<String, TemplateError> + Send>,
    /// Count the items in a page. Zero means end of stream.
    pub items_returned: Box<dyn FnMut(&Page) -> u64 + Send>,
    /// Runs after a page's markup has been appended, before it is cached.
    pub complete: Box<dyn FnMut(&Page, &str) + Send>,
    /// Runs once when a stop condition ends the stream. Receives the
    /// triggering page when the stop came from a response.
    pub finished: Box<dyn FnMut(Option<&Page>) + Send>,
    /// Extra stop predicate over each fresh response.
    pub stop_when: Box<dyn FnMut(&Page) -> bool + Send>,
    /// Observes every non-fatal failure: fetch, template, cache.
    pub on_error: Box<dyn FnMut(&FeedError) + Send>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            template: Box::new(|_| Ok(String::new())),
            items_returned: Box::new(|page| {
                page.as_array().map(|items| items.len() as u64).unwrap_or(0)
            }),
            complete: Box::new(|_, _| {}),
            finished: Box::new(|_| {}),
            stop_when: Box::new(|_| false),
            on_error: Box::new(|_| {}),
        }
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(
        mut self,
        f: impl FnMut(&Page) -> Result<String, TemplateError> + Send + 'static,
    ) -> Self {
        self.template = Box::new(f);
        self
    }

    pub fn with_items_returned(mut self, f: impl FnMut(&Page) -> u64 + Send + 'static) -> Self {
        self.items_returned = Box::new(f);
        self
    }

    pub fn with_complete(mut self, f: impl FnMut(&Page, &str) + Send + 'static) -> Self {
        self.complete = Box::new(f);
        self
    }

    pub fn with_finished(mut self, f: impl FnMut(Option<&Page>) + Send + 'static) -> Self {
        self.finished = Box::new(f);
        self
    }

    pub fn with_stop_when(mut self, f: impl FnMut(&Page) -> bool + Send + 'static) -> Self {
        self.stop_when = Box::new(f);
        self
    }

    pub fn with_on_error(mut self, f: impl FnMut(&FeedError) + Send + 'static) -> Self {
        self.on_error = Box::new(f);
        self
    }
}

// ============================================================================
// ScrollFeed
// ============================================================================

/// Infinite scroll engine: scroll monitor, page fetcher, renderer dispatch,
/// optional cache mirror, and stop controller for one container instance.
pub struct ScrollFeed<F, S = MemoryStore> {
    url: UrlBuilder,
    fetcher: F,
    config: FeedConfig,
    hooks: Hooks,
    post: Option<PostBody>,
    mirror: Option<CacheMirror<S>>,
    offset: Mut<u64>,
    phase: Mut<Phase>,
    stop_reason: Option<StopReason>,
    scroll_gate: WriteGate,
}

impl<F: PageFetcher> ScrollFeed<F> {
    /// Create a feed without persistence.
    pub fn new(url: impl Into<UrlBuilder>, fetcher: F, config: FeedConfig, hooks: Hooks) -> Self {
        Self::build(url.into(), fetcher, config, hooks, None)
    }
}

impl<F: PageFetcher, S: StateStore> ScrollFeed<F, S> {
    /// Create a feed that mirrors fetched pages into `store` and replays
    /// them on the next attach.
    pub fn with_cache(
        url: impl Into<UrlBuilder>,
        fetcher: F,
        config: FeedConfig,
        hooks: Hooks,
        store: S,
        policy: CachePolicy,
    ) -> Self {
        let mirror = CacheMirror::new(store, policy);
        Self::build(url.into(), fetcher, config, hooks, Some(mirror))
    }

    /// Send POST requests with this body instead of GETs.
    pub fn with_post_body(mut self, body: PostBody) -> Self {
        self.post = Some(body);
        self
    }

    fn build(
        url: UrlBuilder,
        fetcher: F,
        config: FeedConfig,
        hooks: Hooks,
        mirror: Option<CacheMirror<S>>,
    ) -> Self {
        let offset = Mut::new(config.offset);
        Self {
            url,
            fetcher,
            config,
            hooks,
            post: None,
            mirror,
            offset,
            phase: Mut::new(Phase::Idle),
            stop_reason: None,
            scroll_gate: WriteGate::default(),
        }
    }

    /// Start the feed: validate and replay any persisted pages, restore the
    /// persisted scroll position, then run an initial fill pass so a short
    /// page fills its viewport without waiting for a scroll event.
    pub async fn attach<C: Container>(&mut self, container: &mut C) -> ScrollOutcome {
        if self.mirror.is_some() {
            self.restore(container);
        }
        self.on_scroll(container).await
    }

    /// Scroll event entry point. Persists the scroll position (throttled),
    /// then fetches pages while the container bottom stays within
    /// `sensitivity` pixels of the viewport bottom. Metrics are re-read
    /// after every append, so the loop ends as soon as the container has
    /// outgrown the viewport.
    pub async fn on_scroll<C: Container>(&mut self, container: &mut C) -> ScrollOutcome {
        let metrics = container.metrics();
        self.persist_scroll(metrics.scroll_top);

        if let Some(reason) = self.stop_reason {
            return ScrollOutcome::Stopped(reason);
        }
        if self.phase.peek() == Phase::Loading {
            // Mutual exclusion on the outstanding fetch
            return ScrollOutcome::Idle;
        }

        let mut pages = 0usize;
        let mut items = 0u64;
        loop {
            let metrics = container.metrics();
            if !viewport::near_bottom(&metrics, self.config.sensitivity) {
                break;
            }
            if self.max_reached() {
                // A replayed cache can already sit at the cap; don't spend a
                // request discovering that.
                self.stop(StopReason::MaxReached, None);
                return ScrollOutcome::Stopped(StopReason::MaxReached);
            }
            match self.fetch_step(container).await {
                Step::Appended(n) => {
                    pages += 1;
                    items += n;
                }
                Step::Failed => return ScrollOutcome::Failed,
                Step::Stopped(reason) => return ScrollOutcome::Stopped(reason),
            }
        }

        if pages > 0 {
            ScrollOutcome::Appended { pages, items }
        } else {
            ScrollOutcome::Idle
        }
    }

    /// Clear all persisted state for this feed's namespace.
    pub fn flush(&mut self) {
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.flush();
        }
    }

    // Accessors
    pub fn phase(&self) -> Read<Phase> {
        self.phase.read()
    }

    pub fn current_phase(&self) -> Phase {
        self.phase.peek()
    }

    pub fn offset(&self) -> Read<u64> {
        self.offset.read()
    }

    pub fn current_offset(&self) -> u64 {
        self.offset.peek()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_reason.is_some()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn cache(&self) -> Option<&CacheMirror<S>> {
        self.mirror.as_ref()
    }

    /// Hand the store back, e.g. to rebuild a feed over the same storage.
    pub fn into_store(self) -> Option<S> {
        self.mirror.map(CacheMirror::into_store)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Validate persisted state and replay cached pages before the first
    /// network fetch: render, append, advance the offset, fire `complete`
    /// for each, exactly as the original fetch sequence did.
    fn restore<C: Container>(&mut self, container: &mut C) {
        let source = self.url.resolve(0, self.config.count);
        let now_ms = cache::unix_ms();
        let initial_offset = self.config.offset;
        let Some(mirror) = self.mirror.as_mut() else { return };

        let replay: Vec<Page> = mirror.open(&source, initial_offset, now_ms).to_vec();
        let stored_scroll = mirror.stored_scroll_top();
        if !replay.is_empty() {
            tracing::debug!("replaying {} cached pages", replay.len());
        }

        for page in &replay {
            let items = (self.hooks.items_returned)(page);
            let markup = self.render(page);
            if !markup.is_empty() {
                container.append(&markup);
            }
            (self.hooks.complete)(page, &markup);
            let next = self.offset.peek() + items;
            self.offset.set(next);
        }

        if let Some(scroll_top) = stored_scroll {
            if scroll_top > 0.0 {
                container.scroll_to(scroll_top);
            }
        }
    }

    /// Issue exactly one fetch for the current offset and process its
    /// response: render, append, mirror, advance, then evaluate the stop
    /// conditions.
    async fn fetch_step<C: Container>(&mut self, container: &mut C) -> Step {
        self.phase.set(Phase::Loading);
        if let Some(markup) = &self.config.loader {
            container.show_loader(markup);
        }

        let offset = self.offset.peek();
        let url = self.url.resolve(offset, self.config.count);
        let body = self.post.as_mut().map(PostBody::resolve);
        tracing::debug!("fetching page at offset {} from {}", offset, url);

        let fetched = self.fetcher.fetch(PageRequest { url, body }).await;
        if self.config.loader.is_some() {
            container.hide_loader();
        }

        let page = match fetched {
            Ok(page) => page,
            Err(e) => {
                // Release the loading flag without advancing or stopping;
                // the next scroll event retries.
                self.phase.set(Phase::Idle);
                let error = FeedError::Fetch(e);
                tracing::warn!("{}", error);
                (self.hooks.on_error)(&error);
                return Step::Failed;
            }
        };

        let items = (self.hooks.items_returned)(&page);
        if items > 0 {
            let markup = self.render(&page);
            if !markup.is_empty() {
                container.append(&markup);
            }
            (self.hooks.complete)(&page, &markup);

            self.mirror_page(&page);
            let next = offset + items;
            self.offset.set(next);
            if let Some(mirror) = self.mirror.as_mut() {
                mirror.persist_offset(next);
            }
        }

        if items == 0 {
            self.stop(StopReason::EndOfStream, Some(&page));
            return Step::Stopped(StopReason::EndOfStream);
        }
        if self.max_reached() {
            self.stop(StopReason::MaxReached, Some(&page));
            return Step::Stopped(StopReason::MaxReached);
        }
        if (self.hooks.stop_when)(&page) {
            self.stop(StopReason::Predicate, Some(&page));
            return Step::Stopped(StopReason::Predicate);
        }

        self.phase.set(Phase::Idle);
        Step::Appended(items)
    }

    /// Run the caller template; a failed render reaches the error hook and
    /// yields empty markup so the loop continues.
    fn render(&mut self, page: &Page) -> String {
        match (self.hooks.template)(page) {
            Ok(markup) => markup,
            Err(e) => {
                let error = FeedError::Template(e);
                tracing::warn!("{}", error);
                (self.hooks.on_error)(&error);
                String::new()
            }
        }
    }

    /// Mirror a fresh page into the cache, but only when the cached pages
    /// are contiguous with the current offset: the item total across cached
    /// pages plus the initial offset must equal the pre-advance offset.
    /// This also skips pages fetched while catching up past a replay gap.
    fn mirror_page(&mut self, page: &Page) {
        let Some(mirror) = self.mirror.as_mut() else { return };

        let items_returned = &mut self.hooks.items_returned;
        let cached: u64 = mirror.pages().iter().map(|p| items_returned(p)).sum();
        if cached + self.config.offset != self.offset.peek() {
            return;
        }

        if let Err(e) = mirror.append(page.clone()) {
            // Rolled back inside the mirror; the stream continues uncached.
            let error = FeedError::Cache(e);
            tracing::warn!("{}", error);
            (self.hooks.on_error)(&error);
        }
    }

    fn persist_scroll(&mut self, scroll_top: f64) {
        if self.mirror.is_none() {
            return;
        }
        if !self.scroll_gate.admit(Instant::now()) {
            return;
        }
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.persist_scroll_top(scroll_top);
        }
    }

    fn max_reached(&self) -> bool {
        self.config
            .max
            .is_some_and(|max| self.offset.peek() >= max)
    }

    fn stop(&mut self, reason: StopReason, page: Option<&Page>) {
        tracing::debug!("stream stopped: {:?}", reason);
        self.stop_reason = Some(reason);
        self.phase.set(Phase::Stopped);
        (self.hooks.finished)(page);
    }
}
