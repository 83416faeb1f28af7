pub mod cache;
pub mod collector;
pub mod config;
pub mod enrich;
pub mod error;
pub mod github;
pub mod language;
pub mod report;
pub mod retry;
pub mod search;
pub mod stars;
pub mod types;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use cache::ResponseCache;
use chrono::{DateTime, NaiveDate, Utc};
use collector::{is_valid_login, CollectRequest, Collection, PullRequestCollector};
use config::AppConfig;
use error::ApiError;
use github::GitHubClient;
use report::{normalize_period, ReportResponse, ReportService};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use types::{CollectionStats, PullRequest, RateLimitStatus, SocialAccount, User};

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Shared application state accessible to all request handlers.
pub struct AppState {
    pub client: GitHubClient,
    pub collector: PullRequestCollector,
    pub reports: ReportService,
}

impl AppState {
    /// Wires the GitHub client, the shared response cache and the services
    /// built on them.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let client = GitHubClient::new(&config)?;
        let cache = ResponseCache::from_config(&config);
        let collector = PullRequestCollector::new(client.clone(), cache.clone(), &config);
        let reports = ReportService::new(collector.clone(), cache, &config);

        Ok(Self {
            client,
            collector,
            reports,
        })
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/rate_limit", get(get_rate_limit))
        .route("/api/users/{username}/pulls", get(get_user_pulls))
        .route("/api/users/{username}/report", get(get_user_report))
        .route("/api/users/{username}/profile", get(get_user_profile))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Maps a GitHub failure onto the status returned to our own callers.
fn error_response(e: &ApiError) -> (StatusCode, String) {
    if e.is_rate_limited() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            "GitHub Rate Limit Exceeded".to_string(),
        );
    }
    match e {
        ApiError::Status { status: 404, .. } => (StatusCode::NOT_FOUND, "Not Found".to_string()),
        ApiError::Status { status: 401, .. } => (
            StatusCode::BAD_GATEWAY,
            "GitHub rejected the configured credentials".to_string(),
        ),
        ApiError::Transport(_) | ApiError::Status { .. } => {
            (StatusCode::BAD_GATEWAY, "GitHub API Error".to_string())
        }
        ApiError::GraphQl(_) | ApiError::Decode(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        ),
    }
}

fn user_not_found(username: &str) -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        format!("GitHub user '{username}' not found"),
    )
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates. A plain `until`
/// date covers the whole day.
fn parse_date_param(
    name: &str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, (StatusCode, String)> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| {
            if name == "until" {
                date.and_hms_opt(23, 59, 59)
            } else {
                date.and_hms_opt(0, 0, 0)
            }
        })
        .map(|naive| Some(naive.and_utc()))
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("Invalid '{name}' date: {value}"),
            )
        })
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "gitbrag",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct PullsQuery {
    pub since: Option<String>,
    pub until: Option<String>,
    #[serde(default)]
    pub include_star_increase: bool,
    #[serde(default)]
    pub include_private: bool,
}

#[derive(Serialize)]
pub struct PullsResponse {
    pub pull_requests: Vec<PullRequest>,
    pub stats: CollectionStats,
}

pub async fn get_user_pulls(
    Path(username): Path<String>,
    Query(query): Query<PullsQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<PullsResponse> {
    let since = parse_date_param("since", query.since.as_deref())?;
    let until = parse_date_param("until", query.until.as_deref())?;
    if let (Some(since), Some(until)) = (since, until) {
        if since > until {
            return Err((
                StatusCode::BAD_REQUEST,
                "'since' must not be after 'until'".to_string(),
            ));
        }
    }

    let request = CollectRequest {
        since,
        until,
        include_private: query.include_private,
        include_star_increase: query.include_star_increase,
        ..CollectRequest::new(username.as_str())
    };

    match state.collector.collect_user_prs(&request).await {
        Ok(Collection::Found {
            pull_requests,
            stats,
        }) => {
            tracing::debug!(%username, count = pull_requests.len(), "Returning pull requests");
            Ok(Json(PullsResponse {
                pull_requests,
                stats,
            }))
        }
        Ok(Collection::UserNotFound) => Err(user_not_found(&username)),
        Err(e) => {
            tracing::error!(%username, error = %e, "Failed to collect pull requests");
            Err(error_response(&e))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    pub period: Option<String>,
    #[serde(default)]
    pub show_star_increase: bool,
}

pub async fn get_user_report(
    Path(username): Path<String>,
    Query(query): Query<ReportQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<ReportResponse> {
    let period = normalize_period(query.period.as_deref());

    match state
        .reports
        .generate_report(&username, period, query.show_star_increase)
        .await
    {
        Ok(Some(report)) => Ok(Json(report)),
        Ok(None) => Err(user_not_found(&username)),
        Err(e) => {
            tracing::error!(%username, %period, error = %e, "Failed to generate report");
            Err(error_response(&e))
        }
    }
}

#[derive(Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub user: User,
    pub social_accounts: Vec<SocialAccount>,
}

pub async fn get_user_profile(
    Path(username): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<ProfileResponse> {
    if !is_valid_login(&username) {
        tracing::debug!(%username, "Rejecting invalid login");
        return Err(user_not_found(&username));
    }

    let user = match state.client.get_user(&username).await {
        Ok(user) => user,
        Err(e) if e.is_not_found() => return Err(user_not_found(&username)),
        Err(e) => {
            tracing::error!(%username, error = %e, "Failed to fetch user profile");
            return Err(error_response(&e));
        }
    };

    // A profile without social accounts is still a profile.
    let social_accounts = state
        .client
        .get_user_social_accounts(&username)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(%username, error = %e, "Failed to fetch social accounts");
            Vec::new()
        });

    Ok(Json(ProfileResponse {
        user,
        social_accounts,
    }))
}

pub async fn get_rate_limit(State(state): State<Arc<AppState>>) -> ApiResult<RateLimitStatus> {
    state.client.get_rate_limit().await.map(Json).map_err(|e| {
        tracing::error!(error = %e, "Failed to fetch rate limit");
        error_response(&e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_date_param() {
        assert_eq!(parse_date_param("since", None).unwrap(), None);
        assert_eq!(parse_date_param("since", Some("")).unwrap(), None);
        assert_eq!(
            parse_date_param("since", Some("2024-01-15")).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_date_param("until", Some("2024-01-15")).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 23, 59, 59).unwrap())
        );
        assert_eq!(
            parse_date_param("until", Some("2024-01-15T08:30:00+02:00")).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 6, 30, 0).unwrap())
        );
        let (status, _) = parse_date_param("since", Some("last tuesday")).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_response_uses_typed_status() {
        let rate_limited = ApiError::Status {
            status: 403,
            message: "API rate limit exceeded".to_string(),
            rate_limit: error::RateLimitInfo {
                remaining: Some(0),
                reset: None,
            },
        };
        assert_eq!(error_response(&rate_limited).0, StatusCode::TOO_MANY_REQUESTS);

        let not_found = ApiError::Status {
            status: 404,
            message: "Not Found".to_string(),
            rate_limit: Default::default(),
        };
        assert_eq!(error_response(&not_found).0, StatusCode::NOT_FOUND);

        let server = ApiError::Status {
            status: 503,
            message: "unavailable".to_string(),
            rate_limit: Default::default(),
        };
        assert_eq!(error_response(&server).0, StatusCode::BAD_GATEWAY);
        assert_eq!(
            error_response(&ApiError::GraphQl("boom".to_string())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
