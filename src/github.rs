//! Thin authenticated GitHub client.
//!
//! Every endpoint goes through one retrying request primitive built on
//! octocrab's raw `_get`/`_post`, so status codes and rate-limit headers
//! stay visible to the error classifier.

use octocrab::service::middleware::retry::RetryConfig;
use octocrab::Octocrab;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use url::form_urlencoded;
use urlencoding::encode;

use crate::config::AppConfig;
use crate::error::{ApiError, RateLimitInfo};
use crate::retry::{with_retry, RetryPolicy};
use crate::types::{PrFile, RateLimitStatus, Repository, SearchPage, SocialAccount, User};

/// GitHub caps list endpoints at 100 items per page.
pub const MAX_PER_PAGE: u32 = 100;

/// Longest error body excerpt kept in an [`ApiError::Status`] message.
const MAX_ERROR_MESSAGE_LEN: usize = 200;

#[derive(Clone)]
pub struct GitHubClient {
    octocrab: Octocrab,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new(config: &AppConfig) -> Result<Self, ApiError> {
        let mut builder = Octocrab::builder()
            .base_uri(config.github_api_url.as_str())?
            .set_connect_timeout(Some(config.request_timeout()))
            .set_read_timeout(Some(config.request_timeout()))
            .add_retry_config(RetryConfig::None);
        if let Some(token) = &config.github_token {
            builder = builder.personal_token(token.clone());
        }

        Ok(Self {
            octocrab: builder.build()?,
            retry: config.retry_policy(),
        })
    }

    /// A client sharing this connection pool but retrying under `retry`.
    pub fn with_retry_policy(&self, retry: RetryPolicy) -> Self {
        Self {
            octocrab: self.octocrab.clone(),
            retry,
        }
    }

    /// Issues one request and returns the body of a 2xx response.
    async fn execute(&self, route: &str, body: Option<&Value>) -> Result<String, ApiError> {
        let response = match body {
            Some(body) => self.octocrab._post(route, Some(body)).await?,
            None => self.octocrab._get(route).await?,
        };

        let status = response.status().as_u16();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };
        let rate_limit = RateLimitInfo {
            remaining: header("x-ratelimit-remaining").and_then(|v| v.parse().ok()),
            reset: header("x-ratelimit-reset").and_then(|v| v.parse().ok()),
        };

        let text = self.octocrab.body_to_string(response).await?;
        if !(200..300).contains(&status) {
            return Err(ApiError::Status {
                status,
                message: error_message(&text),
                rate_limit,
            });
        }
        Ok(text)
    }

    /// GET `route` with retries and decode the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, route: &str) -> Result<T, ApiError> {
        with_retry(&self.retry, route, || async {
            let text = self.execute(route, None).await?;
            Ok(serde_json::from_str(&text)?)
        })
        .await
    }

    /// POST `body` to `route` with retries and decode the JSON response.
    async fn post_json<T: DeserializeOwned>(&self, route: &str, body: &Value) -> Result<T, ApiError> {
        with_retry(&self.retry, route, || async {
            let text = self.execute(route, Some(body)).await?;
            Ok(serde_json::from_str(&text)?)
        })
        .await
    }

    /// One page of `GET /search/issues`.
    pub async fn search_issues(
        &self,
        query: &str,
        sort: &str,
        order: &str,
        per_page: u32,
        page: u32,
    ) -> Result<SearchPage, ApiError> {
        let params = form_urlencoded::Serializer::new(String::new())
            .append_pair("q", query)
            .append_pair("sort", sort)
            .append_pair("order", order)
            .append_pair("per_page", &per_page.clamp(1, MAX_PER_PAGE).to_string())
            .append_pair("page", &page.to_string())
            .finish();

        self.get_json(&format!("/search/issues?{params}")).await
    }

    /// Runs a GraphQL query and returns its `data` object.
    ///
    /// A response with a non-empty `errors` array fails with
    /// [`ApiError::GraphQl`] carrying every message.
    pub async fn execute_graphql(&self, query: &str, variables: Value) -> Result<Value, ApiError> {
        let body = json!({ "query": query, "variables": variables });
        let mut response: Value = self.post_json("/graphql", &body).await?;

        if let Some(errors) = response.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let messages: Vec<&str> = errors
                    .iter()
                    .map(|e| e.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
                    .collect();
                return Err(ApiError::GraphQl(messages.join("; ")));
            }
        }

        Ok(response
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// All changed files of a pull request, following pages until a short one.
    pub async fn get_pr_files(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<PrFile>, ApiError> {
        let mut files = Vec::new();
        let mut page = 1;
        loop {
            let route = format!(
                "/repos/{}/{}/pulls/{number}/files?per_page={MAX_PER_PAGE}&page={page}",
                encode(owner),
                encode(repo)
            );
            let batch: Vec<PrFile> = self.get_json(&route).await?;
            let count = batch.len();
            files.extend(batch);

            if count < MAX_PER_PAGE as usize {
                break;
            }
            page += 1;
        }

        tracing::debug!(owner, repo, number, files = files.len(), pages = page, "Fetched PR files");
        Ok(files)
    }

    pub async fn get_repository(&self, owner: &str, repo: &str) -> Result<Repository, ApiError> {
        self.get_json(&format!("/repos/{}/{}", encode(owner), encode(repo)))
            .await
    }

    pub async fn get_user(&self, username: &str) -> Result<User, ApiError> {
        self.get_json(&format!("/users/{}", encode(username))).await
    }

    /// Social accounts linked to a profile. A 404 means none are linked.
    pub async fn get_user_social_accounts(
        &self,
        username: &str,
    ) -> Result<Vec<SocialAccount>, ApiError> {
        match self
            .get_json(&format!("/users/{}/social_accounts", encode(username)))
            .await
        {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    pub async fn get_rate_limit(&self) -> Result<RateLimitStatus, ApiError> {
        self.get_json("/rate_limit").await
    }
}

/// Prefers the `message` field of a GitHub error body over the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_MESSAGE_LEN).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_message_field() {
        let body = r#"{"message":"Not Found","documentation_url":"https://docs.github.com"}"#;
        assert_eq!(error_message(body), "Not Found");
    }

    #[test]
    fn test_error_message_falls_back_to_truncated_body() {
        let body = "x".repeat(500);
        assert_eq!(error_message(&body).len(), MAX_ERROR_MESSAGE_LEN);
        assert_eq!(error_message("bad gateway"), "bad gateway");
    }
}
