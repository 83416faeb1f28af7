//! Contribution reports built on top of a PR collection.
//!
//! A report covers a named period, drops PRs that were closed without being
//! merged, and groups what is left by repository. Generated reports are kept
//! in an in-process cache keyed by user, period and star flag.

use chrono::{DateTime, Duration, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::cache::ResponseCache;
use crate::collector::{CollectRequest, Collection, PullRequestCollector};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::language::language_breakdown;
use crate::stars::GITHUB_LAUNCH_TIMESTAMP;
use crate::types::{
    AuthorAssociation, CollectionStats, DisplayState, PullRequest, STAR_COUNT_CAP,
    STAR_INCREASE_OVER_CAP,
};

/// Languages listed in a report.
const TOP_LANGUAGES: usize = 10;

/// Reporting period, named as it appears in query strings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[default]
    #[serde(rename = "1_year")]
    OneYear,
    #[serde(rename = "2_years")]
    TwoYears,
    #[serde(rename = "5_years")]
    FiveYears,
    #[serde(rename = "all_time")]
    AllTime,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneYear => "1_year",
            Period::TwoYears => "2_years",
            Period::FiveYears => "5_years",
            Period::AllTime => "all_time",
        }
    }

    /// `(since, until)` of the period ending at `now`.
    pub fn date_range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let since = match self {
            Period::OneYear => now - Duration::days(365),
            Period::TwoYears => now - Duration::days(730),
            Period::FiveYears => now - Duration::days(1825),
            Period::AllTime => {
                DateTime::from_timestamp(GITHUB_LAUNCH_TIMESTAMP, 0).unwrap_or_default()
            }
        };
        (since, now)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a user-supplied period to a [`Period`], defaulting to one year.
pub fn normalize_period(period: Option<&str>) -> Period {
    match period.map(|p| p.trim().to_ascii_lowercase()).as_deref() {
        Some("1_year") => Period::OneYear,
        Some("2_years") => Period::TwoYears,
        Some("5_years") => Period::FiveYears,
        Some("all_time") => Period::AllTime,
        other => {
            if let Some(unknown) = other {
                tracing::debug!(period = unknown, "Unrecognised period, using 1_year");
            }
            Period::OneYear
        }
    }
}

/// PR size by total lines changed. Ordered smallest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SizeCategory {
    #[serde(rename = "One Liner")]
    OneLiner,
    Small,
    Medium,
    Large,
    Huge,
    Massive,
}

impl SizeCategory {
    /// `None` when either count is unknown.
    pub fn categorize(additions: Option<u64>, deletions: Option<u64>) -> Option<Self> {
        let total = additions?.saturating_add(deletions?);
        let category = match total {
            0..=1 => SizeCategory::OneLiner,
            2..=100 => SizeCategory::Small,
            101..=500 => SizeCategory::Medium,
            501..=1500 => SizeCategory::Large,
            1501..=5000 => SizeCategory::Huge,
            _ => SizeCategory::Massive,
        };
        Some(category)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ReportPullRequest {
    #[serde(flatten)]
    pub pull_request: PullRequest,
    pub display_state: DisplayState,
    pub size_category: Option<SizeCategory>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RepositoryReport {
    pub name: String,
    /// Author association on the most recently created PR in this repository.
    pub role: Option<AuthorAssociation>,
    pub star_increase: Option<i64>,
    pub pull_requests: Vec<ReportPullRequest>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LanguageShare {
    pub language: String,
    pub percentage: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SizeBucket {
    pub category: SizeCategory,
    pub count: usize,
}

/// The public response structure for a user's contribution report.
#[derive(Clone, Debug, Serialize)]
pub struct ReportResponse {
    pub username: String,
    pub period: Period,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub total_prs: usize,
    pub merged_count: usize,
    pub open_count: usize,
    pub repo_count: usize,
    /// Sum over repositories; `-1` if any repository gained more than the cap.
    /// Absent unless star increases were requested.
    pub total_star_increase: Option<i64>,
    pub total_additions: u64,
    pub total_deletions: u64,
    pub total_changed_files: u64,
    pub language_breakdown: Vec<LanguageShare>,
    /// Only categories with at least one PR, smallest first.
    pub size_distribution: Vec<SizeBucket>,
    pub repositories: Vec<RepositoryReport>,
    pub stats: CollectionStats,
}

/// Everything a report is assembled from.
pub struct ReportInput {
    pub username: String,
    pub period: Period,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub show_star_increase: bool,
    pub pull_requests: Vec<PullRequest>,
    pub stats: CollectionStats,
    pub language_breakdown: Vec<(String, f64)>,
}

/// Removes PRs that were closed without being merged.
pub fn drop_closed_unmerged(prs: &mut Vec<PullRequest>) {
    let original = prs.len();
    prs.retain(|pr| pr.display_state() != DisplayState::Closed);
    if prs.len() < original {
        tracing::info!(
            filtered = original - prs.len(),
            "Filtered out closed-but-not-merged PRs"
        );
    }
}

/// Assembles a report from collected PRs.
///
/// Expects `input.pull_requests` to have passed through
/// [`drop_closed_unmerged`] already, so the language breakdown and the
/// counts describe the same PRs.
pub fn build_report(input: ReportInput) -> ReportResponse {
    let prs = input.pull_requests;

    let merged_count = prs
        .iter()
        .filter(|pr| pr.display_state() == DisplayState::Merged)
        .count();
    let open_count = prs
        .iter()
        .filter(|pr| pr.display_state() == DisplayState::Open)
        .count();
    let total_additions: u64 = prs.iter().filter_map(|pr| pr.additions).sum();
    let total_deletions: u64 = prs.iter().filter_map(|pr| pr.deletions).sum();
    let total_changed_files: u64 = prs.iter().filter_map(|pr| pr.changed_files).sum();

    let mut sizes: BTreeMap<SizeCategory, usize> = BTreeMap::new();
    for pr in &prs {
        if let Some(category) = SizeCategory::categorize(pr.additions, pr.deletions) {
            *sizes.entry(category).or_default() += 1;
        }
    }
    let size_distribution = sizes
        .into_iter()
        .map(|(category, count)| SizeBucket { category, count })
        .collect();

    let total_prs = prs.len();
    let mut grouped: HashMap<String, Vec<PullRequest>> = HashMap::new();
    for pr in prs {
        grouped.entry(pr.repository.clone()).or_default().push(pr);
    }

    let mut repositories: Vec<RepositoryReport> = grouped
        .into_iter()
        .map(|(name, prs)| {
            let role = prs
                .iter()
                .max_by_key(|pr| pr.created_at)
                .and_then(|pr| pr.author_association);
            let star_increase = prs.first().and_then(|pr| pr.star_increase);
            let pull_requests = prs
                .into_iter()
                .map(|pr| ReportPullRequest {
                    display_state: pr.display_state(),
                    size_category: SizeCategory::categorize(pr.additions, pr.deletions),
                    pull_request: pr,
                })
                .collect();
            RepositoryReport {
                name,
                role,
                star_increase,
                pull_requests,
            }
        })
        .collect();
    sort_repositories(&mut repositories, input.period, input.show_star_increase);

    let total_star_increase = input
        .show_star_increase
        .then(|| total_star_increase(&repositories));

    ReportResponse {
        username: input.username,
        period: input.period,
        since: input.since,
        until: input.until,
        total_prs,
        merged_count,
        open_count,
        repo_count: repositories.len(),
        total_star_increase,
        total_additions,
        total_deletions,
        total_changed_files,
        language_breakdown: input
            .language_breakdown
            .into_iter()
            .map(|(language, percentage)| LanguageShare {
                language,
                percentage,
            })
            .collect(),
        size_distribution,
        repositories,
        stats: input.stats,
    }
}

/// All-time reports rank by PR count, star reports by stars gained (the
/// over-cap sentinel ranks above any exact count), anything else by name.
fn sort_repositories(repositories: &mut [RepositoryReport], period: Period, by_stars: bool) {
    if period == Period::AllTime {
        repositories.sort_by(|a, b| {
            b.pull_requests
                .len()
                .cmp(&a.pull_requests.len())
                .then_with(|| a.name.cmp(&b.name))
        });
    } else if by_stars {
        let rank = |repo: &RepositoryReport| match repo.star_increase {
            Some(STAR_INCREASE_OVER_CAP) => STAR_COUNT_CAP + 1,
            Some(stars) => stars,
            None => 0,
        };
        repositories.sort_by(|a, b| rank(b).cmp(&rank(a)).then_with(|| a.name.cmp(&b.name)));
    } else {
        repositories.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

fn total_star_increase(repositories: &[RepositoryReport]) -> i64 {
    if repositories
        .iter()
        .any(|repo| repo.star_increase == Some(STAR_INCREASE_OVER_CAP))
    {
        return STAR_INCREASE_OVER_CAP;
    }
    repositories
        .iter()
        .filter_map(|repo| repo.star_increase)
        .sum()
}

fn report_cache_key(username: &str, period: Period, show_star_increase: bool) -> String {
    format!(
        "report:{}:{}:{}",
        username.to_lowercase(),
        period,
        if show_star_increase { "stars" } else { "plain" }
    )
}

/// Generates reports and caches them (read-through).
#[derive(Clone)]
pub struct ReportService {
    collector: PullRequestCollector,
    cache: ResponseCache,
    reports: Cache<String, ReportResponse>,
}

impl ReportService {
    pub fn new(collector: PullRequestCollector, cache: ResponseCache, config: &AppConfig) -> Self {
        let reports = Cache::builder()
            .max_capacity(config.cache_max_capacity)
            .time_to_live(config.report_cache_ttl())
            .build();

        Self {
            collector,
            cache,
            reports,
        }
    }

    /// The report for `username` over `period`, or `None` for an unknown user.
    pub async fn generate_report(
        &self,
        username: &str,
        period: Period,
        show_star_increase: bool,
    ) -> Result<Option<ReportResponse>, ApiError> {
        let key = report_cache_key(username, period, show_star_increase);
        if let Some(report) = self.reports.get(&key).await {
            tracing::debug!(%key, "Report cache hit");
            return Ok(Some(report));
        }

        let (since, until) = period.date_range(Utc::now());
        tracing::info!(
            username,
            %period,
            since = %since.date_naive(),
            until = %until.date_naive(),
            "Generating report"
        );

        let request = CollectRequest {
            since: Some(since),
            until: Some(until),
            include_private: false,
            include_star_increase: show_star_increase,
            ..CollectRequest::new(username)
        };
        let (mut pull_requests, stats) = match self.collector.collect_user_prs(&request).await? {
            Collection::Found {
                pull_requests,
                stats,
            } => (pull_requests, stats),
            Collection::UserNotFound => return Ok(None),
        };

        drop_closed_unmerged(&mut pull_requests);
        let languages = language_breakdown(&pull_requests, &self.cache, TOP_LANGUAGES).await;
        let report = build_report(ReportInput {
            username: username.to_string(),
            period,
            since,
            until,
            show_star_increase,
            pull_requests,
            stats,
            language_breakdown: languages,
        });

        self.reports.insert(key, report.clone()).await;
        Ok(Some(report))
    }
}
