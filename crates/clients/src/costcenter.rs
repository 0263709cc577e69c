use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use contoso_expenses_core::ports::CostCenterLookup;
use contoso_expenses_core::types::CostCenterRecord;

/// Client for the cost-center lookup API.
#[derive(Clone)]
pub struct CostCenterClient {
    http: Client,
    base_url: Url,
}

impl CostCenterClient {
    /// Creates a client rooted at `base_url` (which should end with `/`).
    pub fn new(base_url: Url, http: Client) -> Self {
        Self { http, base_url }
    }

    /// Issues `GET api/costcenter/{email}` and parses the record.
    pub async fn fetch(&self, submitter_email: &str) -> Result<CostCenterRecord, CostCenterError> {
        if submitter_email.trim().is_empty() {
            return Err(CostCenterError::EmptyEmail);
        }

        let mut url = self.base_url.join("api/costcenter")?;
        url.path_segments_mut()
            .map_err(|_| CostCenterError::InvalidBaseUrl(self.base_url.to_string()))?
            .push(submitter_email);

        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        parse_json(response).await
    }
}

#[async_trait]
impl CostCenterLookup for CostCenterClient {
    async fn lookup(&self, submitter_email: &str) -> Option<CostCenterRecord> {
        match self.fetch(submitter_email).await {
            Ok(record) => {
                info!(
                    stage = "lookup",
                    submitter_email,
                    approver_email = %record.approver_email,
                    cost_center = %record.cost_center_name,
                    "cost center resolved"
                );
                Some(record)
            }
            Err(err) => {
                warn!(stage = "lookup", submitter_email, error = %err, "cost center lookup failed");
                None
            }
        }
    }
}

/// Errors produced by the cost-center client.
#[derive(Debug, Error)]
pub enum CostCenterError {
    #[error("submitter email must not be empty")]
    EmptyEmail,
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url {0} cannot carry path segments")]
    InvalidBaseUrl(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

async fn parse_json<T>(response: Response) -> Result<T, CostCenterError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(CostCenterError::Status { status, body });
    }

    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(base_url: &Url) -> CostCenterClient {
        CostCenterClient::new(
            base_url.clone(),
            Client::builder().build().expect("client"),
        )
    }

    #[tokio::test]
    async fn fetch_parses_record() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/")).expect("url");

        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/costcenter/a@x.com")
                    .header("accept", "application/json");
                then.status(200).json_body(json!({
                    "submitterEmail": "a@x.com",
                    "approverEmail": "b@x.com",
                    "costCenterName": "Eng"
                }));
            })
            .await;

        let record = client(&base).fetch("a@x.com").await.expect("fetch");
        mock.assert_async().await;
        assert_eq!(record.approver_email, "b@x.com");
        assert_eq!(record.cost_center_name, "Eng");
    }

    #[tokio::test]
    async fn fetch_respects_base_path() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/lookup/")).expect("url");

        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lookup/api/costcenter/a@x.com");
                then.status(200).json_body(json!({
                    "submitterEmail": "a@x.com",
                    "approverEmail": "b@x.com",
                    "costCenterName": "Eng"
                }));
            })
            .await;

        client(&base).fetch("a@x.com").await.expect("fetch");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_returns_status_error() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/")).expect("url");

        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/costcenter/nobody@x.com");
                then.status(404).body("not found");
            })
            .await;

        let err = client(&base)
            .fetch("nobody@x.com")
            .await
            .expect_err("should error");
        match err {
            CostCenterError::Status { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn lookup_degrades_to_none_on_server_error() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/")).expect("url");

        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/costcenter/a@x.com");
                then.status(500).body("boom");
            })
            .await;

        assert!(client(&base).lookup("a@x.com").await.is_none());
    }

    #[tokio::test]
    async fn lookup_degrades_to_none_on_malformed_body() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/")).expect("url");

        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/costcenter/a@x.com");
                then.status(200).body("<html>oops</html>");
            })
            .await;

        assert!(client(&base).lookup("a@x.com").await.is_none());
    }

    #[tokio::test]
    async fn lookup_degrades_to_none_when_unreachable() {
        let base = Url::parse("http://127.0.0.1:9/").expect("url");
        assert!(client(&base).lookup("a@x.com").await.is_none());
    }

    #[tokio::test]
    async fn empty_email_is_rejected_without_request() {
        let base = Url::parse("http://127.0.0.1:9/").expect("url");
        let err = client(&base).fetch("  ").await.expect_err("empty");
        assert!(matches!(err, CostCenterError::EmptyEmail));
    }
}
