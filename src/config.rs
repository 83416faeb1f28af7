//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! It defines the `AppConfig` struct which governs the GitHub client, retry policy,
//! per-site concurrency limits and cache TTLs. Every field has a default, so an
//! empty environment yields a working configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration as StdDuration;

use crate::retry::RetryPolicy;

/// A unique identifier for a GitHub repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    /// The owner of the repository (e.g., "facebook").
    pub owner: String,
    /// The name of the repository (e.g., "react").
    pub repo: String,
}

impl RepoId {
    /// Parses an `owner/name` full name.
    pub fn parse(full_name: &str) -> Option<Self> {
        let (owner, repo) = full_name.trim().split_once('/')?;
        let (owner, repo) = (owner.trim(), repo.trim());
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Optional GitHub Personal Access Token for higher rate limits.
    #[serde(default)]
    pub github_token: Option<String>,

    /// Base URL of the GitHub API (overridable for GitHub Enterprise or tests).
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    /// Connect and read timeout applied to every GitHub request, in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds; doubles per attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Page size for search requests (GitHub caps this at 100).
    #[serde(default = "default_search_per_page")]
    pub search_per_page: u32,

    /// Maximum number of search pages fetched concurrently.
    #[serde(default = "default_search_concurrency_limit")]
    pub search_concurrency_limit: usize,

    /// Maximum number of PR file listings fetched concurrently.
    #[serde(default = "default_pr_files_concurrency_limit")]
    pub pr_files_concurrency_limit: usize,

    /// Maximum number of repositories whose star history is fetched concurrently.
    #[serde(default = "default_star_concurrency_limit")]
    pub star_concurrency_limit: usize,

    /// Time to live for cached PR file summaries in seconds.
    #[serde(default = "default_pr_files_cache_ttl_seconds")]
    pub pr_files_cache_ttl_seconds: u64,

    /// Time to live for cached star increases in seconds.
    #[serde(default = "default_star_increase_cache_ttl_seconds")]
    pub star_increase_cache_ttl_seconds: u64,

    /// Time to live for generated reports in seconds.
    #[serde(default = "default_report_cache_ttl_seconds")]
    pub report_cache_ttl_seconds: u64,

    /// Maximum number of entries to keep in each cache.
    #[serde(default = "default_cache_max_capacity")]
    pub cache_max_capacity: u64,

    /// Port the HTTP server binds to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Emit logs as JSON lines instead of human-readable text.
    #[serde(default)]
    pub log_json: bool,
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_search_per_page() -> u32 {
    100
}

fn default_search_concurrency_limit() -> usize {
    5
}

fn default_pr_files_concurrency_limit() -> usize {
    5
}

fn default_star_concurrency_limit() -> usize {
    10
}

fn default_pr_files_cache_ttl_seconds() -> u64 {
    6 * 60 * 60
}

fn default_star_increase_cache_ttl_seconds() -> u64 {
    24 * 60 * 60
}

fn default_report_cache_ttl_seconds() -> u64 {
    60 * 60
}

fn default_cache_max_capacity() -> u64 {
    10_000
}

fn default_port() -> u16 {
    3000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            github_token: None,
            github_api_url: default_github_api_url(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            search_per_page: default_search_per_page(),
            search_concurrency_limit: default_search_concurrency_limit(),
            pr_files_concurrency_limit: default_pr_files_concurrency_limit(),
            star_concurrency_limit: default_star_concurrency_limit(),
            pr_files_cache_ttl_seconds: default_pr_files_cache_ttl_seconds(),
            star_increase_cache_ttl_seconds: default_star_increase_cache_ttl_seconds(),
            report_cache_ttl_seconds: default_report_cache_ttl_seconds(),
            cache_max_capacity: default_cache_max_capacity(),
            port: default_port(),
            log_json: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_seconds)
    }

    /// Retry policy for transport-level requests.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            StdDuration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn pr_files_cache_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.pr_files_cache_ttl_seconds)
    }

    pub fn star_increase_cache_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.star_increase_cache_ttl_seconds)
    }

    pub fn report_cache_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.report_cache_ttl_seconds)
    }
}
