//! Gmail REST client used by the messages and send endpoints.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::types::{MessagePage, MessageSummary, SendReceipt};

/// Default `pageSize` for message listings.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Largest accepted `pageSize`.
pub const MAX_PAGE_SIZE: u32 = 100;

const METADATA_HEADERS: [&str; 3] = ["Subject", "From", "Date"];

/// Gmail API client. Every call takes the caller's access token; this type
/// holds no credentials.
#[derive(Debug, Clone)]
pub struct GmailApi {
    base_url: String,
    http: reqwest::Client,
}

impl Default for GmailApi {
    fn default() -> Self {
        Self::new(
            "https://gmail.googleapis.com/gmail/v1"
                .parse()
                .expect("valid default URL"),
        )
    }
}

impl GmailApi {
    /// Client for the API rooted at `base_url` (e.g. `https://gmail.googleapis.com/gmail/v1`).
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url: base_url.as_str().trim_end_matches('/').to_owned(),
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// List one page of the inbox with subject, sender, date and snippet.
    ///
    /// `page_size` is clamped to `1..=MAX_PAGE_SIZE`.
    ///
    /// # Errors
    ///
    /// - [`Error::GmailTokenExpired`] if Gmail rejects the access token.
    /// - [`Error::GmailScopeMissing`] if the token lacks the read scope.
    /// - [`Error::ProviderApiError`] for any other non-2xx answer.
    pub async fn list_messages(
        &self,
        access_token: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<MessagePage, Error> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let mut query = vec![
            ("maxResults", page_size.to_string()),
            ("labelIds", "INBOX".to_owned()),
        ];
        if let Some(token) = page_token.filter(|t| !t.is_empty()) {
            query.push(("pageToken", token.to_owned()));
        }

        let response = self
            .http
            .get(format!("{}/users/me/messages", self.base_url))
            .bearer_auth(access_token)
            .query(&query)
            .send()
            .await?;
        let list: ListMessagesResponse = check(response).await?.json().await?;

        let refs = list.messages.unwrap_or_default();
        let items = try_join_all(refs.iter().map(|r| self.message_summary(access_token, &r.id)))
            .await?;

        Ok(MessagePage {
            items,
            total_count: list.result_size_estimate.unwrap_or_default(),
            next_page: list.next_page_token,
            needs_reauth: false,
        })
    }

    async fn message_summary(&self, access_token: &str, id: &str) -> Result<MessageSummary, Error> {
        let mut query = vec![("format", "metadata")];
        query.extend(METADATA_HEADERS.iter().map(|h| ("metadataHeaders", *h)));

        let response = self
            .http
            .get(format!("{}/users/me/messages/{id}", self.base_url))
            .bearer_auth(access_token)
            .query(&query)
            .send()
            .await?;
        let message: GmailMessage = check(response).await?.json().await?;
        Ok(message.into_summary())
    }

    /// Send a message already encoded in Gmail's `raw` format.
    ///
    /// # Errors
    ///
    /// Same classification as [`list_messages`](Self::list_messages).
    pub async fn send_raw(&self, access_token: &str, raw: &str) -> Result<SendReceipt, Error> {
        let response = self
            .http
            .post(format!("{}/users/me/messages/send", self.base_url))
            .bearer_auth(access_token)
            .json(&RawMessage { raw })
            .send()
            .await?;
        let sent: SentMessage = check(response).await?.json().await?;
        tracing::info!(message_id = %sent.id, "Message sent through Gmail");
        Ok(SendReceipt {
            provider_message_id: sent.id,
            thread_id: sent.thread_id,
        })
    }
}

/// Map Gmail's status codes onto the crate taxonomy.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 => Err(Error::GmailTokenExpired),
        403 if is_scope_error(&body) => Err(Error::GmailScopeMissing),
        code => Err(Error::ProviderApiError {
            status: code,
            detail: body,
        }),
    }
}

fn is_scope_error(body: &str) -> bool {
    body.contains("ACCESS_TOKEN_SCOPE_INSUFFICIENT")
        || body.contains("insufficientPermissions")
        || body.contains("insufficient authentication scopes")
}

// ── Gmail wire types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesResponse {
    messages: Option<Vec<MessageRef>>,
    next_page_token: Option<String>,
    result_size_estimate: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

impl GmailMessage {
    fn into_summary(self) -> MessageSummary {
        let headers = self.payload.unwrap_or_default().headers;
        let header = |name: &str| {
            headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.clone())
        };
        MessageSummary {
            subject: header("Subject"),
            from: header("From"),
            date: header("Date"),
            unread: self.label_ids.iter().any(|l| l == "UNREAD"),
            id: self.id,
            thread_id: self.thread_id,
            snippet: self.snippet,
        }
    }
}

#[derive(Serialize)]
struct RawMessage<'a> {
    raw: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentMessage {
    id: String,
    thread_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn api(server: &MockServer) -> GmailApi {
        GmailApi::new(format!("{}/gmail/v1/", server.uri()).parse().unwrap())
    }

    fn metadata(id: &str, subject: &str, unread: bool) -> serde_json::Value {
        let labels = if unread { vec!["INBOX", "UNREAD"] } else { vec!["INBOX"] };
        serde_json::json!({
            "id": id,
            "threadId": format!("t-{id}"),
            "labelIds": labels,
            "snippet": format!("snippet of {id}"),
            "payload": {"headers": [
                {"name": "Subject", "value": subject},
                {"name": "From", "value": "Ada <ada@example.com>"},
                {"name": "Date", "value": "Mon, 5 Oct 2026 10:00:00 +0000"},
            ]},
        })
    }

    #[tokio::test]
    async fn lists_messages_with_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(header("authorization", "Bearer at-1"))
            .and(query_param("maxResults", "2"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "m1", "threadId": "t-m1"}, {"id": "m2", "threadId": "t-m2"}],
                "nextPageToken": "p3",
                "resultSizeEstimate": 57,
            })))
            .mount(&server)
            .await;
        for (id, subject, unread) in [("m1", "Hello", true), ("m2", "Invoice", false)] {
            Mock::given(method("GET"))
                .and(path(format!("/gmail/v1/users/me/messages/{id}")))
                .and(query_param("format", "metadata"))
                .respond_with(ResponseTemplate::new(200).set_body_json(metadata(id, subject, unread)))
                .mount(&server)
                .await;
        }

        let page = api(&server).await.list_messages("at-1", Some("p2"), 2).await.unwrap();
        assert_eq!(page.total_count, 57);
        assert_eq!(page.next_page.as_deref(), Some("p3"));
        assert!(!page.needs_reauth);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].subject.as_deref(), Some("Hello"));
        assert!(page.items[0].unread);
        assert_eq!(page.items[1].thread_id, "t-m2");
        assert!(!page.items[1].unread);
    }

    #[tokio::test]
    async fn empty_mailbox_has_no_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"resultSizeEstimate": 0})),
            )
            .mount(&server)
            .await;

        let page = api(&server).await.list_messages("at", None, 500).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_page, None);
    }

    #[tokio::test]
    async fn status_codes_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer expired"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer narrow"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"code": 403, "status": "PERMISSION_DENIED",
                          "details": [{"reason": "ACCESS_TOKEN_SCOPE_INSUFFICIENT"}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer busy"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let gmail = api(&server).await;
        assert!(matches!(
            gmail.list_messages("expired", None, 20).await,
            Err(Error::GmailTokenExpired)
        ));
        assert!(matches!(
            gmail.list_messages("narrow", None, 20).await,
            Err(Error::GmailScopeMissing)
        ));
        match gmail.list_messages("busy", None, 20).await {
            Err(Error::ProviderApiError { status, detail }) => {
                assert_eq!(status, 429);
                assert_eq!(detail, "rate limited");
            }
            other => panic!("expected ProviderApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sends_raw_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .and(body_json(serde_json::json!({"raw": "VG86IGJvYg"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "sent-1", "threadId": "thread-9", "labelIds": ["SENT"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = api(&server).await.send_raw("at", "VG86IGJvYg").await.unwrap();
        assert_eq!(receipt.provider_message_id, "sent-1");
        assert_eq!(receipt.thread_id, "thread-9");
    }
}
