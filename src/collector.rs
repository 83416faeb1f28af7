//! Service layer for collecting a user's pull requests.
//!
//! This module implements `PullRequestCollector`, the single entry point of the
//! pipeline. It:
//! 1. Searches for the user's PRs updated within the window.
//! 2. Parses raw search items into `PullRequest` records, skipping plain issues
//!    and malformed entries.
//! 3. Enriches every PR with file statistics.
//! 4. Optionally attaches each repository's star increase over the window.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::enrich::PrEnricher;
use crate::error::ApiError;
use crate::github::GitHubClient;
use crate::search::SearchOptions;
use crate::stars::StarTracker;
use crate::types::{AuthorAssociation, CollectionStats, PrState, PullRequest};

/// GitHub logins are at most 39 characters.
const MAX_LOGIN_LEN: usize = 39;

/// Parameters of one collection run.
#[derive(Clone, Debug)]
pub struct CollectRequest {
    pub username: String,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub include_private: bool,
    pub include_star_increase: bool,
}

impl CollectRequest {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            since: None,
            until: None,
            include_private: false,
            include_star_increase: false,
        }
    }
}

/// Result of a collection run.
#[derive(Clone, Debug)]
pub enum Collection {
    Found {
        pull_requests: Vec<PullRequest>,
        stats: CollectionStats,
    },
    /// The search rejected the user (unknown login or unprocessable query).
    UserNotFound,
}

#[derive(Clone)]
pub struct PullRequestCollector {
    client: GitHubClient,
    enricher: PrEnricher,
    stars: StarTracker,
    search: SearchOptions,
}

impl PullRequestCollector {
    pub fn new(client: GitHubClient, cache: ResponseCache, config: &AppConfig) -> Self {
        let search = SearchOptions {
            per_page: config.search_per_page,
            concurrency_limit: config.search_concurrency_limit,
            ..SearchOptions::default()
        };

        Self {
            enricher: PrEnricher::new(client.clone(), cache.clone(), config),
            stars: StarTracker::new(client.clone(), cache, config),
            client,
            search,
        }
    }

    /// Collects and enriches the PRs `request.username` touched in the window.
    ///
    /// Only the search itself can fail; enrichment problems are recorded in
    /// the returned stats and logs.
    pub async fn collect_user_prs(&self, request: &CollectRequest) -> Result<Collection, ApiError> {
        if !is_valid_login(&request.username) {
            tracing::warn!(username = %request.username, "Invalid GitHub username");
            return Ok(Collection::UserNotFound);
        }

        let query = build_search_query(
            &request.username,
            request.since,
            request.until,
            request.include_private,
        );
        tracing::debug!(%query, "GitHub search query");

        let items = match self.client.search_all_issues(&query, &self.search).await {
            Ok(items) => items,
            Err(e) if matches!(e.status(), Some(404 | 422)) => {
                tracing::warn!(username = %request.username, error = %e, "User not found or query rejected");
                return Ok(Collection::UserNotFound);
            }
            Err(e) => {
                tracing::error!(username = %request.username, error = %e, "GitHub search failed");
                return Err(e);
            }
        };
        tracing::debug!(items = items.len(), "Search returned items");

        let mut pull_requests = parse_search_items(&items);
        tracing::info!(
            username = %request.username,
            count = pull_requests.len(),
            "Collected pull requests"
        );

        let stats = self.enricher.enrich(&mut pull_requests).await;

        if request.include_star_increase {
            if let (Some(since), Some(until)) = (request.since, request.until) {
                let repositories: Vec<String> = pull_requests
                    .iter()
                    .map(|pr| pr.repository.clone())
                    .collect();
                let increases = self
                    .stars
                    .collect_for_repositories(&repositories, since, until)
                    .await;
                for pr in &mut pull_requests {
                    pr.star_increase = increases.get(&pr.repository).copied().flatten();
                }
            }
        }

        Ok(Collection::Found {
            pull_requests,
            stats,
        })
    }
}

/// Alphanumerics and single inner hyphens, at most 39 characters.
pub fn is_valid_login(login: &str) -> bool {
    !login.is_empty()
        && login.len() <= MAX_LOGIN_LEN
        && !login.starts_with('-')
        && !login.ends_with('-')
        && !login.contains("--")
        && login.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Search query for the user's PRs, filtered on last activity.
///
/// Filtering on `updated` rather than `created` finds PRs opened before the
/// window but merged inside it.
pub fn build_search_query(
    username: &str,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    include_private: bool,
) -> String {
    let mut parts = vec!["is:pr".to_string(), format!("author:{username}")];
    if !include_private {
        parts.push("is:public".to_string());
    }

    let day = |d: DateTime<Utc>| d.format("%Y-%m-%d").to_string();
    match (since, until) {
        (Some(since), Some(until)) => parts.push(format!("updated:{}..{}", day(since), day(until))),
        (Some(since), None) => parts.push(format!("updated:>={}", day(since))),
        (None, Some(until)) => parts.push(format!("updated:<={}", day(until))),
        (None, None) => {}
    }

    parts.join(" ")
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    number: u64,
    title: String,
    html_url: String,
    state: PrState,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    user: SearchUser,
    author_association: Option<String>,
    repository_url: Option<String>,
    pull_request: Option<PullRequestLinks>,
}

#[derive(Debug, Deserialize)]
struct SearchUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestLinks {
    merged_at: Option<DateTime<Utc>>,
}

/// Converts search items into PRs, preserving order.
pub fn parse_search_items(items: &[Value]) -> Vec<PullRequest> {
    items
        .iter()
        .filter(|item| item.get("pull_request").is_some_and(|pr| !pr.is_null()))
        .filter_map(|item| match parse_search_item(item) {
            Ok(pr) => Some(pr),
            Err(reason) => {
                let number = item.get("number").and_then(Value::as_u64);
                tracing::warn!(?number, %reason, "Failed to parse PR data, skipping");
                None
            }
        })
        .collect()
}

fn parse_search_item(item: &Value) -> Result<PullRequest, String> {
    let item = SearchItem::deserialize(item).map_err(|e| e.to_string())?;

    let repository = item
        .repository_url
        .as_deref()
        .and_then(full_name_from_repository_url)
        .or_else(|| full_name_from_html_url(&item.html_url))
        .ok_or_else(|| format!("cannot determine repository of {}", item.html_url))?;
    let organization = repository
        .split_once('/')
        .map(|(owner, _)| owner.to_string())
        .unwrap_or_default();

    let merged_at = item.pull_request.and_then(|links| links.merged_at);
    let mut state = item.state;
    if merged_at.is_some() && state == PrState::Open {
        tracing::warn!(repository = %repository, number = item.number, "Merged PR reported as open");
        state = PrState::Closed;
    }

    Ok(PullRequest {
        number: item.number,
        title: item.title,
        organization,
        repository,
        url: item.html_url,
        state,
        created_at: item.created_at,
        closed_at: item.closed_at,
        merged_at,
        author: item.user.login,
        author_association: item
            .author_association
            .as_deref()
            .and_then(AuthorAssociation::parse),
        additions: None,
        deletions: None,
        changed_files: None,
        star_increase: None,
    })
}

/// `https://api.github.com/repos/acme/widget` → `acme/widget`.
fn full_name_from_repository_url(url: &str) -> Option<String> {
    let mut segments = url.trim_end_matches('/').rsplit('/');
    let repo = segments.next().filter(|s| !s.is_empty())?;
    let owner = segments.next().filter(|s| !s.is_empty())?;
    Some(format!("{owner}/{repo}"))
}

/// `https://github.com/acme/widget/pull/7` → `acme/widget`.
fn full_name_from_html_url(url: &str) -> Option<String> {
    let parts: Vec<&str> = url.split('/').collect();
    match (parts.get(3), parts.get(4)) {
        (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => {
            Some(format!("{owner}/{repo}"))
        }
        _ => None,
    }
}
