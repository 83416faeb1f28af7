//! Domain records produced by the collection pipeline, and the raw API
//! payloads they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RepoId;

/// Star increase sentinel: more than [`STAR_COUNT_CAP`] stars were gained in
/// the window and the exact count was not computed.
pub const STAR_INCREASE_OVER_CAP: i64 = -1;

/// In-window star count at which counting stops.
pub const STAR_COUNT_CAP: i64 = 1000;

/// GitHub's raw two-value PR state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
}

/// State shown to users: closed PRs with a merge timestamp are merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayState {
    Open,
    Closed,
    Merged,
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisplayState::Open => "open",
            DisplayState::Closed => "closed",
            DisplayState::Merged => "merged",
        };
        f.write_str(s)
    }
}

/// The PR author's relationship to the repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorAssociation {
    Owner,
    Member,
    Contributor,
    Collaborator,
    FirstTimeContributor,
}

impl AuthorAssociation {
    /// Parses GitHub's association string. `NONE` and unknown values map to `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OWNER" => Some(Self::Owner),
            "MEMBER" => Some(Self::Member),
            "CONTRIBUTOR" => Some(Self::Contributor),
            "COLLABORATOR" => Some(Self::Collaborator),
            "FIRST_TIME_CONTRIBUTOR" => Some(Self::FirstTimeContributor),
            _ => None,
        }
    }
}

/// A pull request found by the user search, plus its enrichment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    /// Repository full name, `owner/name`.
    pub repository: String,
    /// First path segment of `repository`.
    pub organization: String,
    pub url: String,
    pub state: PrState,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub author: String,
    pub author_association: Option<AuthorAssociation>,
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
    pub changed_files: Option<u64>,
    /// Stars gained by the repository in the window; `-1` when over the cap.
    pub star_increase: Option<i64>,
}

impl PullRequest {
    pub fn display_state(&self) -> DisplayState {
        match (self.state, self.merged_at) {
            (PrState::Closed, Some(_)) => DisplayState::Merged,
            (PrState::Closed, None) => DisplayState::Closed,
            (PrState::Open, _) => DisplayState::Open,
        }
    }

    pub fn repo_id(&self) -> Option<RepoId> {
        RepoId::parse(&self.repository)
    }

    /// `owner/name#number`, as used in failure reports.
    pub fn identifier(&self) -> String {
        format!("{}#{}", self.repository, self.number)
    }
}

/// Counters for one enrichment batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub total_prs: usize,
    pub file_fetch_success: usize,
    pub file_fetch_failed: usize,
    pub file_fetch_cached: usize,
    /// `owner/name#number` of each PR whose files could not be fetched.
    pub failed_prs: Vec<String>,
}

impl CollectionStats {
    pub fn new(total_prs: usize) -> Self {
        Self {
            total_prs,
            ..Self::default()
        }
    }

    /// Fraction of fetch attempts that succeeded; 1.0 when nothing was fetched.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.file_fetch_success + self.file_fetch_failed;
        if attempts == 0 {
            return 1.0;
        }
        self.file_fetch_success as f64 / attempts as f64
    }
}

/// One page of `/search/issues`.
#[derive(Clone, Debug, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub total_count: i64,
    /// Items are kept raw so a single malformed entry cannot fail the page.
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

/// One entry of `/repos/{owner}/{repo}/pulls/{number}/files`.
#[derive(Clone, Debug, Deserialize)]
pub struct PrFile {
    pub filename: String,
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
}

/// The subset of `/repos/{owner}/{repo}` the pipeline reads.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Repository {
    pub full_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub stargazers_count: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub html_url: Option<String>,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub public_repos: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SocialAccount {
    pub provider: String,
    pub url: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RateLimitResource {
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
    #[serde(default)]
    pub used: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RateLimitResources {
    pub core: RateLimitResource,
    pub search: Option<RateLimitResource>,
    pub graphql: Option<RateLimitResource>,
}

/// Body of `/rate_limit`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RateLimitStatus {
    pub resources: RateLimitResources,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pr(state: PrState, merged: bool) -> PullRequest {
        let created_at = Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap();
        PullRequest {
            number: 7,
            title: "Add widget".to_string(),
            repository: "acme/widget".to_string(),
            organization: "acme".to_string(),
            url: "https://github.com/acme/widget/pull/7".to_string(),
            state,
            created_at,
            closed_at: merged.then_some(created_at),
            merged_at: merged.then_some(created_at),
            author: "octocat".to_string(),
            author_association: None,
            additions: None,
            deletions: None,
            changed_files: None,
            star_increase: None,
        }
    }

    #[test]
    fn test_display_state() {
        assert_eq!(pr(PrState::Closed, true).display_state(), DisplayState::Merged);
        assert_eq!(pr(PrState::Closed, false).display_state(), DisplayState::Closed);
        assert_eq!(pr(PrState::Open, false).display_state(), DisplayState::Open);
    }

    #[test]
    fn test_identifier() {
        assert_eq!(pr(PrState::Open, false).identifier(), "acme/widget#7");
    }

    #[test]
    fn test_success_rate() {
        let mut stats = CollectionStats::new(4);
        assert_eq!(stats.success_rate(), 1.0);

        stats.file_fetch_success = 3;
        stats.file_fetch_failed = 1;
        assert!((stats.success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_author_association_parse() {
        assert_eq!(
            AuthorAssociation::parse("FIRST_TIME_CONTRIBUTOR"),
            Some(AuthorAssociation::FirstTimeContributor)
        );
        assert_eq!(AuthorAssociation::parse("NONE"), None);
        assert_eq!(AuthorAssociation::parse("MANNEQUIN"), None);
    }
}
