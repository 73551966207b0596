//! Debounced, cancellable search suggestions.
//!
//! Every call to [`SuggestionFetcher::query`] supersedes the previous one.
//! A superseded query stops waiting (during the debounce window or the
//! upstream call) and resolves to [`SuggestionOutcome::Superseded`] without
//! delivering results.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::UpstreamError;

/// Parameters sent to the suggestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionRequest {
    pub query: String,
    pub limit: usize,
    pub fuzzy: bool,
}

/// The suggestion backend (`/api/search/suggestions` or the SDK directly).
pub trait SuggestionSource: Send + Sync + 'static {
    type Item: Clone + Send + 'static;

    fn suggest(
        &self,
        request: SuggestionRequest,
    ) -> BoxFuture<'static, Result<Vec<Self::Item>, UpstreamError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Shorter terms resolve to no suggestions without a fetch.
    pub min_chars: usize,
    pub debounce: Duration,
    pub max_suggestions: usize,
    pub fuzzy: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            min_chars: 1,
            debounce: Duration::from_millis(200),
            max_suggestions: 8,
            fuzzy: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuggestionOutcome<T> {
    Results(Vec<T>),
    /// A newer query (or [`SuggestionFetcher::cancel`]) took over.
    Superseded,
    Failed(UpstreamError),
}

pub struct SuggestionFetcher<S> {
    source: Arc<S>,
    options: SearchOptions,
    current: Mutex<CancellationToken>,
}

impl<S: SuggestionSource> SuggestionFetcher<S> {
    pub fn new(source: S, options: SearchOptions) -> Self {
        Self {
            source: Arc::new(source),
            options,
            current: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Abort whatever query is pending.
    pub fn cancel(&self) {
        self.current.lock().cancel();
    }

    /// Debounce, then fetch suggestions for `term`.
    pub async fn query(&self, term: &str) -> SuggestionOutcome<S::Item> {
        let token = {
            let mut current = self.current.lock();
            current.cancel();
            *current = CancellationToken::new();
            current.clone()
        };

        if term.chars().count() < self.options.min_chars {
            return SuggestionOutcome::Results(Vec::new());
        }

        tokio::select! {
            _ = token.cancelled() => return SuggestionOutcome::Superseded,
            _ = tokio::time::sleep(self.options.debounce) => {}
        }

        let request = SuggestionRequest {
            query: term.to_string(),
            limit: self.options.max_suggestions,
            fuzzy: self.options.fuzzy,
        };
        debug!(query = %request.query, limit = request.limit, "Fetching suggestions");

        let fetch = self.source.suggest(request);
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return SuggestionOutcome::Superseded,
            result = fetch => result,
        };

        match result {
            Ok(_) if token.is_cancelled() => SuggestionOutcome::Superseded,
            Ok(mut items) => {
                items.truncate(self.options.max_suggestions);
                SuggestionOutcome::Results(items)
            }
            Err(err) => {
                warn!(error = %err, "Suggestion fetch failed");
                SuggestionOutcome::Failed(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Recent searches
// ---------------------------------------------------------------------------

pub const RECENT_SEARCHES_CAPACITY: usize = 5;

/// Most-recent-first list of submitted terms, deduplicated ignoring case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentSearches {
    terms: Vec<String>,
}

impl RecentSearches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from stored terms, keeping the first few.
    pub fn from_stored(stored: Vec<String>) -> Self {
        let mut terms = stored;
        terms.truncate(RECENT_SEARCHES_CAPACITY);
        Self { terms }
    }

    pub fn record(&mut self, term: &str) {
        let term = term.trim();
        if term.is_empty() {
            return;
        }
        let lowered = term.to_lowercase();
        self.terms.retain(|t| t.to_lowercase() != lowered);
        self.terms.insert(0, term.to_string());
        self.terms.truncate(RECENT_SEARCHES_CAPACITY);
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_searches_dedupe_and_cap() {
        let mut recent = RecentSearches::new();
        for term in ["boots", "hats", "Boots", "a", "b", "c", "d"] {
            recent.record(term);
        }
        assert_eq!(recent.terms(), ["d", "c", "b", "a", "Boots"]);

        recent.record("   ");
        assert_eq!(recent.terms().len(), RECENT_SEARCHES_CAPACITY);
    }

    #[test]
    fn stored_terms_are_capped() {
        let stored = (0..9).map(|i| i.to_string()).collect();
        assert_eq!(RecentSearches::from_stored(stored).terms().len(), 5);
    }
}
