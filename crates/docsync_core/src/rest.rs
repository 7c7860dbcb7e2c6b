//! REST implementation of the sync adapter.
//!
//! Talks to `POST {base}/pull` and `POST {base}/push` with the JSON bodies
//! from [`crate::protocol`]. Authentication is the transport's concern: an
//! optional bearer token is attached to every request, anything richer
//! belongs in a custom adapter.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{DocsyncError, Result};
use crate::protocol::{
    PullRequestBody, PullRequestDoc, PullResponseBody, PushRequestBody, PushRequestDoc,
    PushResponseBody, decode_base64, encode_base64,
};
use crate::storage::BoxFuture;
use crate::sync::{PullRequest, PullResponse, PushRequest, PushResponse, SyncAdapter};

/// [`SyncAdapter`] over HTTP.
pub struct RestSyncAdapter {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl RestSyncAdapter {
    /// Create an adapter for the given base URL (without the trailing
    /// `/pull` / `/push`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            bearer_token: None,
        }
    }

    /// Attach a bearer token to every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Use a preconfigured client (timeouts, proxies, TLS settings).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = format!("{}/{path}", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DocsyncError::Transport(format!("{path} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DocsyncError::Transport(format!(
                "{path} failed with HTTP {status}"
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| DocsyncError::Decode(format!("malformed {path} response: {e}")))
    }
}

impl SyncAdapter for RestSyncAdapter {
    fn pull<'a>(&'a self, request: PullRequest) -> BoxFuture<'a, Result<PullResponse>> {
        Box::pin(async move {
            let body = PullRequestBody {
                documents: vec![PullRequestDoc {
                    id: request.doc_id.clone(),
                    last_synced: request.last_synced,
                    request_snapshot: request.request_snapshot,
                    state_vector: request.state_vector.as_deref().map(encode_base64),
                }],
            };

            let parsed: PullResponseBody = self.post_json("pull", &body).await?;
            let Some(doc) = parsed
                .documents
                .into_iter()
                .find(|d| d.id == request.doc_id)
            else {
                return Ok(PullResponse::default());
            };

            let mut payloads = Vec::new();
            if let Some(snapshot) = &doc.snapshot {
                payloads.push(decode_base64(snapshot)?);
            }
            for update in doc.updates.iter().flatten() {
                payloads.push(decode_base64(update)?);
            }

            Ok(PullResponse {
                payloads,
                last_synced: doc.date_last_synced,
            })
        })
    }

    fn push<'a>(&'a self, request: PushRequest) -> BoxFuture<'a, Result<PushResponse>> {
        Box::pin(async move {
            let body = PushRequestBody {
                documents: vec![PushRequestDoc {
                    id: request.doc_id.clone(),
                    update: encode_base64(&request.update),
                    is_snapshot: request.is_snapshot,
                    last_synced: request.last_synced,
                }],
            };

            let parsed: PushResponseBody = self.post_json("push", &body).await?;
            let last_synced = parsed
                .documents
                .into_iter()
                .find(|d| d.id == request.doc_id)
                .and_then(|d| d.date_last_synced);

            Ok(PushResponse { last_synced })
        })
    }
}

impl std::fmt::Debug for RestSyncAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestSyncAdapter")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.bearer_token.is_some())
            .finish_non_exhaustive()
    }
}
