//! Per-PR file statistics.
//!
//! Each PR's file list is read from the cache or fetched from GitHub,
//! summed into additions/deletions/changed files and written back onto the
//! PR. One bad PR never aborts the batch; it is counted and reported.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::ResponseCache;
use crate::config::{AppConfig, RepoId};
use crate::github::GitHubClient;
use crate::types::{CollectionStats, PrFile, PullRequest};

/// Schema version written with every cached file summary.
pub const PR_FILES_CACHE_VERSION: u32 = 1;

/// Failure rate above which the batch summary is logged as an error.
const FAILURE_RATE_ALERT: f64 = 0.10;

/// How many failed PR identifiers the batch summary lists.
const FAILED_PRS_LOGGED: usize = 5;

pub fn pr_files_cache_key(owner: &str, repo: &str, number: u64) -> String {
    format!("pr_files:{owner}:{repo}:{number}")
}

/// Aggregated file statistics of one PR.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrFileSummary {
    pub file_names: Vec<String>,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
}

impl PrFileSummary {
    /// Sums per-file stats, clamping negative values to zero.
    pub fn from_files(identifier: &str, files: &[PrFile]) -> Self {
        let mut summary = Self::default();
        for file in files {
            if file.additions < 0 || file.deletions < 0 {
                tracing::warn!(
                    pr = identifier,
                    file = %file.filename,
                    additions = file.additions,
                    deletions = file.deletions,
                    "Negative diff stats from GitHub, clamping to zero"
                );
            }
            summary.additions += file.additions.max(0) as u64;
            summary.deletions += file.deletions.max(0) as u64;
            summary.file_names.push(file.filename.clone());
        }
        summary.changed_files = summary.file_names.len() as u64;
        summary
    }
}

/// Cached file summary as stored. Entries written before the versioned
/// layout were plain `[file_names, additions, deletions, changed_files]`
/// arrays; both shapes are accepted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CachedPrFiles {
    Current {
        version: u32,
        file_names: Vec<String>,
        additions: i64,
        deletions: i64,
        changed_files: i64,
    },
    Legacy(Vec<String>, i64, i64, i64),
}

impl CachedPrFiles {
    /// The summary, unless any count is negative.
    pub fn into_summary(self) -> Option<PrFileSummary> {
        let (file_names, additions, deletions, changed_files) = match self {
            CachedPrFiles::Current {
                file_names,
                additions,
                deletions,
                changed_files,
                ..
            } => (file_names, additions, deletions, changed_files),
            CachedPrFiles::Legacy(file_names, additions, deletions, changed_files) => {
                (file_names, additions, deletions, changed_files)
            }
        };

        Some(PrFileSummary {
            file_names,
            additions: u64::try_from(additions).ok()?,
            deletions: u64::try_from(deletions).ok()?,
            changed_files: u64::try_from(changed_files).ok()?,
        })
    }
}

impl From<&PrFileSummary> for CachedPrFiles {
    fn from(summary: &PrFileSummary) -> Self {
        CachedPrFiles::Current {
            version: PR_FILES_CACHE_VERSION,
            file_names: summary.file_names.clone(),
            additions: summary.additions as i64,
            deletions: summary.deletions as i64,
            changed_files: summary.changed_files as i64,
        }
    }
}

enum FetchOutcome {
    Cached(PrFileSummary),
    Fetched(PrFileSummary),
    Failed,
}

#[derive(Clone)]
pub struct PrEnricher {
    client: GitHubClient,
    cache: ResponseCache,
    ttl: Duration,
    concurrency_limit: usize,
}

impl PrEnricher {
    pub fn new(client: GitHubClient, cache: ResponseCache, config: &AppConfig) -> Self {
        // Many PRs retry at once during a batch; jitter spreads them out.
        Self {
            client: client.with_retry_policy(config.retry_policy().with_jitter(true)),
            cache,
            ttl: config.pr_files_cache_ttl(),
            concurrency_limit: config.pr_files_concurrency_limit.max(1),
        }
    }

    /// Fills `additions`, `deletions` and `changed_files` on every PR.
    ///
    /// PRs whose files cannot be fetched get zeroed stats and are listed in
    /// the returned [`CollectionStats`]. This never fails.
    pub async fn enrich(&self, prs: &mut [PullRequest]) -> CollectionStats {
        let mut stats = CollectionStats::new(prs.len());

        let jobs: Vec<(String, Option<RepoId>, u64)> = prs
            .iter()
            .map(|pr| (pr.identifier(), pr.repo_id(), pr.number))
            .collect();

        let outcomes: Vec<FetchOutcome> = stream::iter(jobs)
            .map(|(identifier, repo_id, number)| async move {
                self.fetch_summary(&identifier, repo_id, number).await
            })
            .buffered(self.concurrency_limit)
            .collect()
            .await;

        for (pr, outcome) in prs.iter_mut().zip(outcomes) {
            let summary = match outcome {
                FetchOutcome::Cached(summary) => {
                    stats.file_fetch_cached += 1;
                    summary
                }
                FetchOutcome::Fetched(summary) => {
                    stats.file_fetch_success += 1;
                    summary
                }
                FetchOutcome::Failed => {
                    stats.file_fetch_failed += 1;
                    stats.failed_prs.push(pr.identifier());
                    PrFileSummary::default()
                }
            };
            pr.additions = Some(summary.additions);
            pr.deletions = Some(summary.deletions);
            pr.changed_files = Some(summary.changed_files);
        }

        log_stats(&stats);
        stats
    }

    async fn fetch_summary(
        &self,
        identifier: &str,
        repo_id: Option<RepoId>,
        number: u64,
    ) -> FetchOutcome {
        let Some(repo_id) = repo_id else {
            tracing::warn!(pr = %identifier, "Malformed repository name, skipping file fetch");
            return FetchOutcome::Failed;
        };
        let key = pr_files_cache_key(&repo_id.owner, &repo_id.repo, number);

        if let Some(cached) = self.cache.get::<CachedPrFiles>(&key).await {
            match cached.into_summary() {
                Some(summary) => {
                    tracing::debug!(pr = %identifier, "PR files cache hit");
                    return FetchOutcome::Cached(summary);
                }
                None => {
                    tracing::debug!(pr = %identifier, "Cached PR files hold negative counts, refetching");
                }
            }
        }

        match self
            .client
            .get_pr_files(&repo_id.owner, &repo_id.repo, number)
            .await
        {
            Ok(files) => {
                let summary = PrFileSummary::from_files(identifier, &files);
                self.cache
                    .set(&key, &CachedPrFiles::from(&summary), self.ttl)
                    .await;
                FetchOutcome::Fetched(summary)
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(pr = %identifier, "PR files no longer available");
                FetchOutcome::Failed
            }
            Err(e) => {
                tracing::warn!(pr = %identifier, error = %e, "Failed to fetch PR files");
                FetchOutcome::Failed
            }
        }
    }
}

fn log_stats(stats: &CollectionStats) {
    let success_rate = stats.success_rate();
    if stats.file_fetch_failed > 0 && 1.0 - success_rate > FAILURE_RATE_ALERT {
        let sample: Vec<&str> = stats
            .failed_prs
            .iter()
            .take(FAILED_PRS_LOGGED)
            .map(String::as_str)
            .collect();
        tracing::error!(
            total = stats.total_prs,
            fetched = stats.file_fetch_success,
            cached = stats.file_fetch_cached,
            failed = stats.file_fetch_failed,
            success_rate = %format!("{:.1}%", success_rate * 100.0),
            failed_prs = ?sample,
            "High failure rate fetching PR files"
        );
    } else {
        tracing::info!(
            total = stats.total_prs,
            fetched = stats.file_fetch_success,
            cached = stats.file_fetch_cached,
            failed = stats.file_fetch_failed,
            success_rate = %format!("{:.1}%", success_rate * 100.0),
            "PR file enrichment complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, additions: i64, deletions: i64) -> PrFile {
        PrFile {
            filename: name.to_string(),
            additions,
            deletions,
        }
    }

    #[test]
    fn test_summary_clamps_negative_stats() {
        let files = vec![
            file("src/lib.rs", 10, 2),
            file("logo.png", -5, -7),
            file("README.md", 3, -1),
        ];
        let summary = PrFileSummary::from_files("acme/widget#1", &files);

        assert_eq!(summary.additions, 13);
        assert_eq!(summary.deletions, 2);
        assert_eq!(summary.changed_files, 3);
        assert_eq!(summary.file_names, vec!["src/lib.rs", "logo.png", "README.md"]);
    }

    #[test]
    fn test_cached_round_trip_current_shape() {
        let summary = PrFileSummary {
            file_names: vec!["a.rs".to_string()],
            additions: 4,
            deletions: 1,
            changed_files: 1,
        };
        let json = serde_json::to_string(&CachedPrFiles::from(&summary)).unwrap();
        assert!(json.contains("\"version\":1"));

        let decoded: CachedPrFiles = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.into_summary(), Some(summary));
    }

    #[test]
    fn test_cached_legacy_tuple_shape() {
        let decoded: CachedPrFiles = serde_json::from_str(r#"[["a.py","b.py"],7,3,2]"#).unwrap();
        let summary = decoded.into_summary().unwrap();
        assert_eq!(summary.additions, 7);
        assert_eq!(summary.deletions, 3);
        assert_eq!(summary.changed_files, 2);
    }

    #[test]
    fn test_cached_negative_counts_are_rejected() {
        let decoded: CachedPrFiles = serde_json::from_str(r#"[["a.py"],-1,3,1]"#).unwrap();
        assert_eq!(decoded.into_summary(), None);
    }
}
