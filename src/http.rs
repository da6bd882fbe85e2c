//! Shared HTTP helpers: client construction and fixed-wait retries

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::warn;

pub const USER_AGENT: &str = concat!("scope-scout/", env!("CARGO_PKG_VERSION"));

/// Build a JSON API client with the given request timeout
pub fn json_client(timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .gzip(true)
        .build()
        .context("Failed to create HTTP client")
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Send a request, retrying transport errors and 5xx/429 responses
///
/// `build` is called once per attempt. After `retries` extra attempts the last
/// response is returned as-is, so callers still inspect the status.
pub async fn send_with_retry<F>(
    label: &str,
    retries: u32,
    wait: Duration,
    build: F,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;

    loop {
        match build().send().await {
            Ok(response) if is_transient(response.status()) && attempt < retries => {
                attempt += 1;
                warn!(
                    "{}: status {} (attempt {}/{}), retrying in {:?}",
                    label,
                    response.status(),
                    attempt,
                    retries,
                    wait
                );
            }
            Ok(response) => return Ok(response),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(
                    "{}: {} (attempt {}/{}), retrying in {:?}",
                    label, e, attempt, retries, wait
                );
            }
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("{label}: request failed after {} attempts", attempt + 1));
            }
        }

        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = json_client(Duration::from_secs(5)).unwrap();
        let url = format!("{}/flaky", server.uri());
        let response = send_with_retry("flaky", 3, Duration::from_millis(10), || client.get(&url))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = json_client(Duration::from_secs(5)).unwrap();
        let url = format!("{}/missing", server.uri());
        let response = send_with_retry("missing", 3, Duration::from_millis(10), || client.get(&url))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_transport_errors_surface_after_retries() {
        let client = json_client(Duration::from_secs(2)).unwrap();
        let result = send_with_retry("refused", 1, Duration::from_millis(10), || {
            client.get("http://127.0.0.1:1/")
        })
        .await;

        assert!(result.is_err());
    }
}
