//! Stars gained by a repository inside a time window.
//!
//! Stargazers are paged newest-first through GraphQL, so the first star
//! older than `since` proves every remaining star is out of range and
//! paging stops there. Windows starting before GitHub existed use the
//! repository's total star count instead.

use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use crate::cache::ResponseCache;
use crate::config::{AppConfig, RepoId};
use crate::error::ApiError;
use crate::github::GitHubClient;
use crate::types::{STAR_COUNT_CAP, STAR_INCREASE_OVER_CAP};

/// 2008-01-01T00:00:00Z. Windows starting on or before this cover all time.
pub const GITHUB_LAUNCH_TIMESTAMP: i64 = 1_199_145_600;

pub const STARGAZERS_QUERY: &str = r#"
query($owner: String!, $name: String!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    stargazers(first: 100, after: $cursor, orderBy: {field: STARRED_AT, direction: DESC}) {
      pageInfo {
        endCursor
        hasNextPage
      }
      edges {
        starredAt
      }
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct StargazersData {
    repository: Option<RepositoryStargazers>,
}

#[derive(Debug, Deserialize)]
struct RepositoryStargazers {
    stargazers: StargazerConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StargazerConnection {
    page_info: PageInfo,
    #[serde(default)]
    edges: Vec<StargazerEdge>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    end_cursor: Option<String>,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StargazerEdge {
    starred_at: Option<DateTime<Utc>>,
}

pub fn star_increase_cache_key(
    owner: &str,
    repo: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> String {
    format!(
        "repo:{owner}/{repo}:star_increase:{}:{}",
        since.to_rfc3339_opts(SecondsFormat::Secs, true),
        until.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

#[derive(Clone)]
pub struct StarTracker {
    client: GitHubClient,
    cache: ResponseCache,
    ttl: Duration,
    concurrency_limit: usize,
}

impl StarTracker {
    pub fn new(client: GitHubClient, cache: ResponseCache, config: &AppConfig) -> Self {
        Self {
            client,
            cache,
            ttl: config.star_increase_cache_ttl(),
            concurrency_limit: config.star_concurrency_limit.max(1),
        }
    }

    /// Stars `owner/repo` gained within `[since, until]`.
    ///
    /// Returns `Some(-1)` when more than the cap were gained, and `None`
    /// when the count could not be determined. `None` is never cached.
    pub async fn star_increase(
        &self,
        owner: &str,
        repo: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Option<i64> {
        let key = star_increase_cache_key(owner, repo, since, until);
        if let Some(cached) = self.cache.get::<i64>(&key).await {
            tracing::debug!(owner, repo, cached, "Star increase cache hit");
            return Some(cached);
        }

        let result = if since.timestamp() <= GITHUB_LAUNCH_TIMESTAMP {
            tracing::debug!(owner, repo, "All-time window, using total stargazer count");
            self.client
                .get_repository(owner, repo)
                .await
                .map(|repository| Some(repository.stargazers_count.max(0)))
        } else {
            self.count_stars(owner, repo, since, until).await
        };

        match result {
            Ok(Some(count)) => {
                tracing::debug!(owner, repo, count, "Computed star increase");
                self.cache.set(&key, &count, self.ttl).await;
                Some(count)
            }
            Ok(None) => {
                tracing::warn!(owner, repo, "Repository not found or inaccessible");
                None
            }
            Err(e) if e.is_rate_limited() => {
                tracing::warn!(owner, repo, error = %e, "Rate limited fetching stars");
                None
            }
            Err(e) => {
                tracing::warn!(owner, repo, error = %e, "Failed to fetch stars");
                None
            }
        }
    }

    /// Pages stargazers newest-first. `Ok(None)` means the repository
    /// does not exist or is not visible to the token.
    async fn count_stars(
        &self,
        owner: &str,
        repo: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<i64>, ApiError> {
        let mut count: i64 = 0;
        let mut cursor: Option<String> = None;

        loop {
            let variables = json!({ "owner": owner, "name": repo, "cursor": cursor });
            let data = self
                .client
                .execute_graphql(STARGAZERS_QUERY, variables)
                .await?;
            let data: StargazersData = serde_json::from_value(data)?;
            let Some(repository) = data.repository else {
                return Ok(None);
            };
            let connection = repository.stargazers;

            for edge in connection.edges {
                let Some(starred_at) = edge.starred_at else {
                    continue;
                };
                if starred_at < since {
                    tracing::debug!(owner, repo, %starred_at, count, "Reached stars older than window");
                    return Ok(Some(count));
                }
                if starred_at <= until {
                    count += 1;
                    if count >= STAR_COUNT_CAP {
                        tracing::debug!(owner, repo, "Star count cap reached");
                        return Ok(Some(STAR_INCREASE_OVER_CAP));
                    }
                }
            }

            match connection.page_info {
                PageInfo {
                    has_next_page: true,
                    end_cursor: Some(next),
                } => cursor = Some(next),
                _ => break,
            }
        }

        Ok(Some(count))
    }

    /// Star increases for many `owner/name` repositories, each fetched once.
    ///
    /// Repositories that fail, or whose lookup panics, map to `None`.
    pub async fn collect_for_repositories(
        &self,
        repositories: &[String],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> HashMap<String, Option<i64>> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = repositories
            .iter()
            .filter(|full_name| seen.insert(full_name.as_str()))
            .cloned()
            .collect();

        tracing::debug!(
            repositories = unique.len(),
            max_concurrent = self.concurrency_limit,
            "Collecting star increases"
        );

        stream::iter(unique)
            .map(|full_name| async move {
                let Some(id) = RepoId::parse(&full_name) else {
                    tracing::warn!(repository = %full_name, "Invalid repository name");
                    return (full_name, None);
                };
                let value = AssertUnwindSafe(self.star_increase(&id.owner, &id.repo, since, until))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!(repository = %full_name, "Star increase lookup panicked");
                        None
                    });
                (full_name, value)
            })
            .buffer_unordered(self.concurrency_limit)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_github_launch_timestamp() {
        let launch = Utc.with_ymd_and_hms(2008, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(launch.timestamp(), GITHUB_LAUNCH_TIMESTAMP);
    }

    #[test]
    fn test_cache_key_is_window_specific() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let other_until = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();

        let key = star_increase_cache_key("acme", "widget", since, until);
        assert_eq!(
            key,
            "repo:acme/widget:star_increase:2024-01-01T00:00:00Z:2024-06-01T00:00:00Z"
        );
        assert_ne!(key, star_increase_cache_key("acme", "widget", since, other_until));
    }

    #[test]
    fn test_stargazer_page_decodes() {
        let data = json!({
            "repository": {
                "stargazers": {
                    "pageInfo": { "endCursor": "abc", "hasNextPage": true },
                    "edges": [ { "starredAt": "2024-03-01T12:00:00Z" }, { "starredAt": null } ]
                }
            }
        });
        let decoded: StargazersData = serde_json::from_value(data).unwrap();
        let connection = decoded.repository.unwrap().stargazers;
        assert!(connection.page_info.has_next_page);
        assert_eq!(connection.page_info.end_cursor.as_deref(), Some("abc"));
        assert_eq!(connection.edges.len(), 2);
        assert!(connection.edges[1].starred_at.is_none());
    }

    #[test]
    fn test_missing_repository_decodes_as_none() {
        let decoded: StargazersData = serde_json::from_value(json!({ "repository": null })).unwrap();
        assert!(decoded.repository.is_none());
    }
}
