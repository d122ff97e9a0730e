//! Feed error types

use thiserror::Error;

use crate::cache::StoreError;
use crate::fetch::FetchError;

/// A caller template failed to render a page. Carried as a value so the
/// failure reaches the error hook instead of being swallowed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TemplateError(pub String);

impl TemplateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Everything the error hook can observe. None of these stop the stream:
/// fetch failures release the loading phase for a retry, template failures
/// skip rendering of one page, cache failures leave the page unmirrored.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Page fetch failed
    #[error("page fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Caller template failed to render a page
    #[error("template rendering failed: {0}")]
    Template(#[from] TemplateError),

    /// Persisting cache state failed
    #[error("cache persistence failed: {0}")]
    Cache(#[from] StoreError),
}
