//! Adaptive pagination over `/search/issues`.
//!
//! The first page tells us how many results exist; only then do we know
//! how many more pages to fetch. One extra page is fetched inline, more
//! than one are fetched concurrently under the configured bound.

use futures::stream::{self, StreamExt};
use serde_json::Value;

use crate::error::ApiError;
use crate::github::{GitHubClient, MAX_PER_PAGE};

/// GitHub's search endpoint serves at most this many results per query.
pub const SEARCH_RESULT_LIMIT: usize = 1000;

#[derive(Clone, Debug)]
pub struct SearchOptions {
    pub sort: String,
    pub order: String,
    pub per_page: u32,
    /// Stop after this many results.
    pub max_results: Option<usize>,
    /// Maximum number of pages in flight at once.
    pub concurrency_limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            sort: "updated".to_string(),
            order: "desc".to_string(),
            per_page: MAX_PER_PAGE,
            max_results: None,
            concurrency_limit: 5,
        }
    }
}

impl GitHubClient {
    /// Fetches every result of `query`, truncated to `max_results` and to
    /// GitHub's search window.
    ///
    /// Items come back in API order. A failing page beyond the second is
    /// logged and contributes no items; a failing first or second page is
    /// returned as an error.
    pub async fn search_all_issues(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<Value>, ApiError> {
        let per_page = options.per_page.clamp(1, MAX_PER_PAGE);
        let page_size = per_page as usize;

        tracing::debug!(query, "Fetching first page of search results");
        let first = self
            .search_issues(query, &options.sort, &options.order, per_page, 1)
            .await?;

        if first.total_count < 0 {
            tracing::warn!(total_count = first.total_count, "Negative total_count, treating as 0");
        }
        let total_count = first.total_count.max(0) as usize;
        let mut target = options.max_results.map_or(total_count, |max| max.min(total_count));
        if target > SEARCH_RESULT_LIMIT {
            tracing::warn!(
                total_count,
                limit = SEARCH_RESULT_LIMIT,
                "Search matched more results than GitHub serves, truncating"
            );
            target = SEARCH_RESULT_LIMIT;
        }
        tracing::debug!(total_count, target, "Search result count");

        let mut items = first.items;
        if items.len() >= target {
            items.truncate(target);
            return Ok(items);
        }

        let total_pages = target.div_ceil(page_size) as u32;

        if total_pages <= 2 {
            let second = self
                .search_issues(query, &options.sort, &options.order, per_page, 2)
                .await?;
            items.extend(second.items);
            items.truncate(target);
            return Ok(items);
        }

        tracing::debug!(pages = total_pages - 1, "Fetching remaining pages concurrently");
        let pages: Vec<Vec<Value>> = stream::iter(2..=total_pages)
            .map(|page| async move {
                match self
                    .search_issues(query, &options.sort, &options.order, per_page, page)
                    .await
                {
                    Ok(result) => result.items,
                    Err(e) => {
                        tracing::error!(page, error = %e, "Error fetching search page");
                        Vec::new()
                    }
                }
            })
            .buffered(options.concurrency_limit.max(1))
            .collect()
            .await;

        items.extend(pages.into_iter().flatten());
        tracing::debug!(collected = items.len(), "Collected search results");
        items.truncate(target);
        Ok(items)
    }
}
