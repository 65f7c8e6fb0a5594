use std::sync::Arc;

use super::session::SessionReconciler;
use super::transport::{ApiRequest, ApiResponse, Transport, TransportDyn};
use crate::error::Error;
use crate::mime::{ComposePayload, build_message};
use crate::types::{AuthUrlResponse, SendReceipt, SendRequest};

/// Gmail consent and send, for the signed-in user.
pub struct MailClient {
    transport: Arc<dyn TransportDyn>,
    reconciler: Arc<SessionReconciler>,
    gmail_path: String,
}

impl MailClient {
    pub fn new<T: Transport>(transport: T, reconciler: Arc<SessionReconciler>) -> Self {
        Self::from_parts(Arc::new(transport), reconciler)
    }

    pub(crate) fn from_parts(
        transport: Arc<dyn TransportDyn>,
        reconciler: Arc<SessionReconciler>,
    ) -> Self {
        Self {
            transport,
            reconciler,
            gmail_path: "/api/gmail".into(),
        }
    }

    #[must_use]
    pub fn with_gmail_path(mut self, path: impl Into<String>) -> Self {
        self.gmail_path = path.into();
        self
    }

    /// Consent-screen URL to send the browser to.
    ///
    /// The server sets the PKCE and state cookies on this response, so the
    /// same cookie jar must carry the callback.
    ///
    /// # Errors
    ///
    /// [`Error::SessionExpired`] without a session; the server's error otherwise.
    pub async fn authorization_url(&self) -> Result<String, Error> {
        let request = ApiRequest::get(format!("{}/auth-url", self.gmail_path));
        let response = self.transport.send_dyn(request).await?;
        let AuthUrlResponse { auth_url } = self.accept(response)?.parse()?;
        Ok(auth_url)
    }

    /// Encode and send one message. Never retried: a failed send may still
    /// have been delivered.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMessage`] / [`Error::AttachmentReadError`] before
    ///   anything is sent
    /// - [`Error::SessionExpired`], [`Error::GmailScopeMissing`]
    /// - [`Error::ProviderApiError`] with Gmail's status and message
    pub async fn send(&self, payload: &ComposePayload) -> Result<SendReceipt, Error> {
        let raw = build_message(payload)?.into_string();
        let request = ApiRequest::post(format!("{}/send", self.gmail_path))
            .with_json(&SendRequest { raw })?;
        let response = self.transport.send_dyn(request).await?;
        let receipt: SendReceipt = self.accept(response)?.parse()?;
        tracing::info!(message_id = %receipt.provider_message_id, "Message sent");
        Ok(receipt)
    }

    fn accept(&self, response: ApiResponse) -> Result<ApiResponse, Error> {
        if response.is_success() {
            return Ok(response);
        }
        let err = response.into_error();
        if matches!(err, Error::SessionExpired) {
            self.reconciler.protected_call_unauthorized();
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::cache::MemoryIdentityCache;
    use crate::client::session::AuthState;
    use crate::client::session::tests::RecordingNavigator;
    use crate::client::testing::ScriptedTransport;
    use crate::mime::AttachmentRef;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn client() -> (Arc<ScriptedTransport>, Arc<SessionReconciler>, MailClient) {
        let transport = Arc::new(ScriptedTransport::new());
        let reconciler = Arc::new(SessionReconciler::new(
            transport.clone(),
            MemoryIdentityCache::new(),
            RecordingNavigator::at("/compose"),
        ));
        let mail = MailClient::new(transport.clone(), reconciler.clone());
        (transport, reconciler, mail)
    }

    #[tokio::test]
    async fn sends_encoded_message() {
        let (transport, _, mail) = client();
        transport.reply(
            200,
            serde_json::json!({"providerMessageId": "m9", "threadId": "t9"}),
        );
        let payload = ComposePayload::new("bob@example.com", "Report", "See attached.")
            .with_attachment(AttachmentRef::from_bytes("r.txt", b"numbers".to_vec()));

        let receipt = mail.send(&payload).await.unwrap();
        assert_eq!(receipt.provider_message_id, "m9");

        let sent = &transport.requests()[0];
        assert_eq!(sent.path, "/api/gmail/send");
        let raw = sent.body.as_ref().unwrap()["raw"].as_str().unwrap().to_owned();
        let rfc822 = String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap();
        assert!(rfc822.contains("To: bob@example.com"));
        assert!(rfc822.contains("filename=\"r.txt\""));
    }

    #[tokio::test]
    async fn invalid_message_is_not_sent() {
        let (transport, _, mail) = client();
        let payload = ComposePayload::new("bob@example.com", "Hi\r\nBcc: eve@example.com", "x");
        let err = mail.send(&payload).await.unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn provider_failure_is_passed_through_once() {
        let (transport, _, mail) = client();
        transport.reply(
            429,
            serde_json::json!({"error": "Rate limit exceeded", "details": "quota"}),
        );
        let err = mail
            .send(&ComposePayload::new("bob@example.com", "Hi", "x"))
            .await
            .unwrap_err();
        match err {
            Error::ProviderApiError { status, detail } => {
                assert_eq!(status, 429);
                assert_eq!(detail, "quota");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn gmail_rejection_reason_reaches_the_caller() {
        let (transport, _, mail) = client();
        transport.reply(
            400,
            serde_json::json!({"error": "Gmail API error", "details": "Invalid To header"}),
        );
        let err = mail
            .send(&ComposePayload::new("bob@example.com", "Hi", "x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ProviderApiError { status: 400, ref detail } if detail == "Invalid To header"
        ));
    }

    #[tokio::test]
    async fn expired_session_demotes() {
        let (transport, reconciler, mail) = client();
        transport.reply(401, serde_json::json!({"error": "Not authenticated"}));
        let err = mail.authorization_url().await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired));
        assert_eq!(reconciler.snapshot().state, AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn fetches_consent_url() {
        let (transport, _, mail) = client();
        transport.reply(
            200,
            serde_json::json!({"authUrl": "https://accounts.google.com/o/oauth2/v2/auth?x=1"}),
        );
        let url = mail.authorization_url().await.unwrap();
        assert!(url.starts_with("https://accounts.google.com/"));
        assert_eq!(transport.requests()[0].path, "/api/gmail/auth-url");
    }
}
