use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use contoso_expenses_core::email::OutboundEmail;
use contoso_expenses_core::ports::{BoxError, Mailer};

/// Minimal client for the SendGrid v3 mail API.
#[derive(Clone)]
pub struct SendGridClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl SendGridClient {
    pub fn new(api_key: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            api_key: api_key.into(),
        }
    }

    /// Submits an HTML email through `POST v3/mail/send`.
    pub async fn send_email(&self, email: &OutboundEmail) -> Result<(), MailError> {
        let url = self.base_url.join("v3/mail/send")?;
        let payload = MailSendRequest::from(email);

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unavailable>"));
            return Err(MailError::Status { status, body });
        }
        Ok(())
    }
}

#[async_trait]
impl Mailer for SendGridClient {
    async fn send(&self, email: &OutboundEmail) -> Result<(), BoxError> {
        self.send_email(email).await.map_err(BoxError::from)
    }
}

#[derive(Debug, Serialize)]
struct MailSendRequest<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    subject: &'a str,
    content: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

impl<'a> From<&'a OutboundEmail> for MailSendRequest<'a> {
    fn from(email: &'a OutboundEmail) -> Self {
        Self {
            personalizations: [Personalization {
                to: [Address { email: &email.to }],
            }],
            from: Address { email: &email.from },
            subject: &email.subject,
            content: [Content {
                content_type: "text/html",
                value: &email.html_body,
            }],
        }
    }
}

/// Errors produced while sending mail.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn email() -> OutboundEmail {
        OutboundEmail {
            to: "b@x.com".into(),
            from: "a@x.com".into(),
            subject: "New Expense for the amount of $42.50 submitted".into(),
            html_body: "Hello b@x.com".into(),
        }
    }

    fn client(server: &MockServer) -> SendGridClient {
        SendGridClient::new(
            "sg-key",
            Url::parse(&server.url("/")).expect("url"),
            Client::builder().build().expect("client"),
        )
    }

    #[tokio::test]
    async fn send_posts_mail_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v3/mail/send")
                    .header("Authorization", "Bearer sg-key")
                    .json_body(json!({
                        "personalizations": [{ "to": [{ "email": "b@x.com" }] }],
                        "from": { "email": "a@x.com" },
                        "subject": "New Expense for the amount of $42.50 submitted",
                        "content": [{ "type": "text/html", "value": "Hello b@x.com" }]
                    }));
                then.status(202);
            })
            .await;

        client(&server).send_email(&email()).await.expect("send");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_request_returns_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v3/mail/send");
                then.status(401).body("bad key");
            })
            .await;

        let err = client(&server)
            .send_email(&email())
            .await
            .expect_err("should error");
        match err {
            MailError::Status { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "bad key");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
