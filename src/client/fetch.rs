//! Paged mailbox fetches with failure classification and backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::cache::PageCache;
use super::config::RetryPolicy;
use super::session::SessionReconciler;
use super::transport::{ApiRequest, Transport, TransportDyn};
use crate::error::Error;
use crate::types::MessagePage;

/// Retry bookkeeping for one in-flight fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchAttemptState {
    pub retry_count: u32,
    pub next_delay: Option<Duration>,
}

impl FetchAttemptState {
    /// Record a failed attempt and return the backoff before the next one,
    /// or `None` once the retry ceiling is reached.
    pub fn record_failure(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        if self.retry_count >= policy.max_retries {
            self.next_delay = None;
            return None;
        }
        let delay = policy.delay_for(self.retry_count);
        self.retry_count += 1;
        self.next_delay = Some(delay);
        Some(delay)
    }

    /// Requests issued so far, counting the first.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.retry_count + 1
    }
}

/// Fetches message pages for the signed-in user.
///
/// A 401 demotes the session through the [`SessionReconciler`] and is never
/// retried; a missing Gmail grant is reported as
/// [`Error::GmailScopeMissing`]; everything else is treated as transient and
/// retried with exponential backoff.
pub struct RetryingFetchOrchestrator {
    transport: Arc<dyn TransportDyn>,
    reconciler: Arc<SessionReconciler>,
    pages: Arc<PageCache>,
    policy: RetryPolicy,
    gmail_path: String,
    page_size: Option<u32>,
}

impl RetryingFetchOrchestrator {
    /// Pages are memoized in the reconciler's page cache so sign-out drops them.
    pub fn new<T: Transport>(transport: T, reconciler: Arc<SessionReconciler>) -> Self {
        Self::from_parts(Arc::new(transport), reconciler)
    }

    pub(crate) fn from_parts(
        transport: Arc<dyn TransportDyn>,
        reconciler: Arc<SessionReconciler>,
    ) -> Self {
        let pages = Arc::clone(reconciler.page_cache());
        Self {
            transport,
            reconciler,
            pages,
            policy: RetryPolicy::default(),
            gmail_path: "/api/gmail".into(),
            page_size: None,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_gmail_path(mut self, path: impl Into<String>) -> Self {
        self.gmail_path = path.into();
        self
    }

    /// Items per page; the server default applies when unset.
    #[must_use]
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Fetch the page at `cursor` (`None` for the first page).
    ///
    /// # Errors
    ///
    /// - [`Error::SessionExpired`] on 401, after demoting the session
    /// - [`Error::GmailScopeMissing`] on 403 `token_missing` or a page
    ///   flagged `needsReauth`
    /// - [`Error::TransientNetworkError`] once retries are exhausted
    /// - [`Error::Cancelled`] if `cancel` fires; no request is issued after that
    /// - [`Error::Decode`] if a successful response is malformed
    pub async fn fetch_page(
        &self,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MessagePage, Error> {
        if let Some(page) = self.pages.get(cursor.unwrap_or_default()) {
            return Ok(page);
        }
        self.fetch_from_server(cursor, cancel).await
    }

    /// Fetch `cursor` from the server even if it is cached, replacing the
    /// cached copy.
    ///
    /// Refreshing the first page also drops every later page, since new
    /// mail shifts what those cursors point at. On failure the cache is
    /// left empty for `cursor` rather than serving the stale page.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_page`](Self::fetch_page).
    pub async fn refresh_page(
        &self,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MessagePage, Error> {
        match cursor {
            None => self.pages.clear(),
            Some(cursor) => self.pages.remove(cursor),
        }
        self.fetch_from_server(cursor, cancel).await
    }

    async fn fetch_from_server(
        &self,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MessagePage, Error> {
        let key = cursor.unwrap_or_default();
        let mut attempt = FetchAttemptState::default();
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let settled = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                settled = self.transport.send_dyn(self.request(cursor)) => settled,
            };
            // The token may have fired while the response was being read
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let detail = match settled {
                Ok(response) if response.is_success() => {
                    let page: MessagePage = response.parse()?;
                    if page.needs_reauth {
                        tracing::info!("Gmail grant rejected; authorization required");
                        return Err(Error::GmailScopeMissing);
                    }
                    self.pages.insert(key, page.clone());
                    return Ok(page);
                }
                Ok(response) => match response.into_error() {
                    Error::SessionExpired => {
                        self.reconciler.protected_call_unauthorized();
                        return Err(Error::SessionExpired);
                    }
                    Error::GmailScopeMissing => return Err(Error::GmailScopeMissing),
                    other => other.to_string(),
                },
                Err(e) => e.to_string(),
            };

            let Some(delay) = attempt.record_failure(&self.policy) else {
                tracing::warn!(attempts = attempt.attempts(), error = %detail, "Giving up on page fetch");
                return Err(Error::TransientNetworkError {
                    attempts: attempt.attempts(),
                    detail,
                });
            };
            tracing::debug!(
                retry = attempt.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %detail,
                "Retrying page fetch"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn request(&self, cursor: Option<&str>) -> ApiRequest {
        let mut request = ApiRequest::get(format!("{}/messages", self.gmail_path));
        if let Some(cursor) = cursor {
            request = request.with_query("page", cursor);
        }
        if let Some(size) = self.page_size {
            request = request.with_query("pageSize", size.to_string());
        }
        request
    }
}
