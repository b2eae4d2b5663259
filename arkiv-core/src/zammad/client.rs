use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use serde_json::json;
use tracing::debug;

use super::models::{Article, TagList, Ticket};
use super::{TicketingClient, UpstreamError, UpstreamResult};

/// In-client retry for failures that usually clear on their own: timeouts,
/// transport errors, 5xx, and 429 (honoring `Retry-After`). 1 initial
/// attempt + `max_retries`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(retry)
    }
}

pub struct ZammadClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ZammadClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZammadClient")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl ZammadClient {
    pub fn new(
        base_url: &url::Url,
        api_token: &str,
        timeout: Duration,
        verify_tls: bool,
        trust_env: bool,
        retry: RetryPolicy,
    ) -> UpstreamResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Token token={api_token}"))
            .map_err(|_| UpstreamError::Client {
                status: None,
                message: "api token is not a valid header value".to_string(),
            })?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        // Bounded connect so unreachable upstreams fail fast.
        let connect = timeout.min(Duration::from_secs(5));
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(connect)
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(!verify_tls);
        if !trust_env {
            builder = builder.no_proxy();
        }

        let http = builder.build().map_err(|err| UpstreamError::Client {
            status: None,
            message: format!("failed to build HTTP client: {err}"),
        })?;

        // A trailing slash keeps URL joining unambiguous.
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        Ok(Self {
            http,
            base_url: reqwest::Url::parse(base.as_str()).map_err(|err| UpstreamError::Client {
                status: None,
                message: format!("invalid base url: {err}"),
            })?,
            retry,
        })
    }

    fn url(&self, path: &str) -> UpstreamResult<reqwest::Url> {
        self.base_url.join(path).map_err(|err| UpstreamError::Client {
            status: None,
            message: format!("invalid request path {path:?}: {err}"),
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, String)]>,
        body: Option<serde_json::Value>,
    ) -> UpstreamResult<Response> {
        let url = self.url(path)?;
        let max_attempts = self.retry.max_retries + 1;
        let mut retry_count = 0u32;

        loop {
            let mut request = self.http.request(method.clone(), url.clone());
            if let Some(query) = query {
                request = request.query(query);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) if err.is_timeout() => {
                    if retry_count >= self.retry.max_retries {
                        return Err(UpstreamError::Timeout {
                            attempts: max_attempts,
                        });
                    }
                    tokio::time::sleep(self.retry.backoff(retry_count)).await;
                    retry_count += 1;
                    continue;
                }
                Err(err) if err.is_connect() || err.is_request() => {
                    if retry_count >= self.retry.max_retries {
                        return Err(UpstreamError::Network {
                            message: format!("Network error after {max_attempts} attempts"),
                        });
                    }
                    tokio::time::sleep(self.retry.backoff(retry_count)).await;
                    retry_count += 1;
                    continue;
                }
                Err(err) => {
                    return Err(UpstreamError::Network {
                        message: format!("HTTP connection/request error: {err}"),
                    });
                }
            };

            let status = response.status();

            if status.is_server_error() {
                if retry_count >= self.retry.max_retries {
                    return Err(UpstreamError::Server {
                        status: Some(status.as_u16()),
                        message: format!(
                            "Zammad server error (status={}) after {max_attempts} attempts",
                            status.as_u16()
                        ),
                    });
                }
                tokio::time::sleep(self.retry.backoff(retry_count)).await;
                retry_count += 1;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = parse_retry_after(&response);
                if retry_count >= self.retry.max_retries {
                    return Err(UpstreamError::RateLimit { retry_after });
                }
                let delay = retry_after.unwrap_or_else(|| self.retry.backoff(retry_count));
                debug!(delay_ms = delay.as_millis() as u64, "rate limited by upstream, backing off");
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_success() {
                return Ok(response);
            }

            return Err(status_error(status, &url));
        }
    }

    async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, String)]>,
        body: Option<serde_json::Value>,
    ) -> UpstreamResult<T> {
        let response = self.request(method, path, query, body).await?;
        let status = response.status();
        let url = response.url().clone();
        response.json().await.map_err(|err| UpstreamError::Client {
            status: Some(status.as_u16()),
            message: format!("Invalid JSON from Zammad (status={status}) at {url}: {err}"),
        })
    }
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|seconds| *seconds >= 0.0)
        .map(Duration::from_secs_f64)
}

fn status_error(status: StatusCode, url: &reqwest::Url) -> UpstreamError {
    match status.as_u16() {
        401 | 403 => UpstreamError::Auth {
            status: status.as_u16(),
            url: url.to_string(),
        },
        404 => UpstreamError::NotFound {
            url: url.to_string(),
        },
        code => UpstreamError::Client {
            status: Some(code),
            message: format!("Zammad client error (status={code}) at {url}"),
        },
    }
}

#[async_trait]
impl TicketingClient for ZammadClient {
    async fn get_ticket(&self, ticket_id: u64) -> UpstreamResult<Ticket> {
        self.request_json(Method::GET, &format!("api/v1/tickets/{ticket_id}"), None, None)
            .await
    }

    async fn list_tags(&self, ticket_id: u64) -> UpstreamResult<Vec<String>> {
        let tags: TagList = self
            .request_json(
                Method::GET,
                "api/v1/tags",
                Some(&[
                    ("object", "Ticket".to_string()),
                    ("o_id", ticket_id.to_string()),
                ]),
                None,
            )
            .await?;
        Ok(tags.into_tags())
    }

    async fn list_articles(&self, ticket_id: u64) -> UpstreamResult<Vec<Article>> {
        self.request_json(
            Method::GET,
            &format!("api/v1/ticket_articles/by_ticket/{ticket_id}"),
            None,
            None,
        )
        .await
    }

    async fn get_attachment_content(
        &self,
        ticket_id: u64,
        article_id: u64,
        attachment_id: u64,
    ) -> UpstreamResult<Vec<u8>> {
        let response = self
            .request(
                Method::GET,
                &format!("api/v1/ticket_attachment/{ticket_id}/{article_id}/{attachment_id}"),
                None,
                None,
            )
            .await?;
        let bytes = response.bytes().await.map_err(|err| UpstreamError::Network {
            message: format!("failed to read attachment body: {err}"),
        })?;
        Ok(bytes.to_vec())
    }

    async fn add_tag(&self, ticket_id: u64, tag: &str) -> UpstreamResult<()> {
        self.request(
            Method::POST,
            "api/v1/tags/add",
            None,
            Some(json!({"object": "Ticket", "o_id": ticket_id, "item": tag})),
        )
        .await?;
        Ok(())
    }

    async fn remove_tag(&self, ticket_id: u64, tag: &str) -> UpstreamResult<()> {
        // POST keeps compatibility with deployments that are strict about
        // verb routing on the documented /tags/remove endpoint.
        self.request(
            Method::POST,
            "api/v1/tags/remove",
            None,
            Some(json!({"object": "Ticket", "o_id": ticket_id, "item": tag})),
        )
        .await?;
        Ok(())
    }

    async fn create_internal_article(
        &self,
        ticket_id: u64,
        subject: &str,
        body_html: &str,
    ) -> UpstreamResult<()> {
        self.request(
            Method::POST,
            "api/v1/ticket_articles",
            None,
            Some(json!({
                "ticket_id": ticket_id,
                "subject": subject,
                "body": body_html,
                "content_type": "text/html",
                "internal": true,
            })),
        )
        .await?;
        Ok(())
    }
}
