use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::time::Instant;

use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::error::Error;

/// Transport answering from a queue and recording what was sent and when.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<ApiResponse, Error>>>,
    sent: Mutex<Vec<(Instant, ApiRequest)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(&self, status: u16, body: serde_json::Value) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(ApiResponse::json(status, &body)));
        self
    }

    pub(crate) fn fail(&self, detail: &str) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(Error::TransientNetworkError {
                attempts: 1,
                detail: detail.into(),
            }));
        self
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.sent.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Milliseconds between consecutive requests.
    pub(crate) fn gaps_ms(&self) -> Vec<u128> {
        let sent = self.sent.lock().unwrap();
        sent.windows(2)
            .map(|w| w[1].0.duration_since(w[0].0).as_millis())
            .collect()
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        self.sent.lock().unwrap().push((Instant::now(), request.clone()));
        let reply = self.replies.lock().unwrap().pop_front();
        reply.unwrap_or_else(|| panic!("no scripted reply for {} {:?}", request.path, request.method))
    }
}
