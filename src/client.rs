//! Forwarding to a backend hosted by another `restora` process.
//!
//! Used when a backend's config carries a `url`. The remote side validates,
//! invokes and resolves on its own; we only translate transport failures
//! into `BackendUnavailable` and pass its envelope through untouched.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::envelope::{Diagnostics, Failure, ResponseEnvelope};
use crate::request::{BackendKind, RestorationRequest};
use crate::wire::{GenerateBody, GenerateResponse, RestoreBody, RestoreResponse};

/// Response bodies quoted in diagnostics are cut to this many characters.
const MAX_QUOTED_BODY: usize = 2_000;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("backend at {url} unavailable ({}): {source}", transport_reason(.source))]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {url} (HTTP {status}): {source}")]
    UnexpectedBody {
        url: String,
        status: reqwest::StatusCode,
        body: String,
        #[source]
        source: serde_json::Error,
    },
}

fn transport_reason(err: &reqwest::Error) -> &'static str {
    if err.is_connect() {
        "connection failed"
    } else if err.is_timeout() {
        "timed out"
    } else {
        "request failed"
    }
}

/// Anything that goes wrong on the way to a remote backend means the
/// backend is unavailable; its own failures arrive as envelopes instead.
impl From<RemoteError> for Failure {
    fn from(err: RemoteError) -> Self {
        let message = err.to_string();
        match err {
            RemoteError::UnexpectedBody { body, .. } => {
                let mut quoted: String = body.chars().take(MAX_QUOTED_BODY).collect();
                if quoted.len() < body.len() {
                    quoted.push_str("...");
                }
                Failure::unavailable(message).with_diagnostics(Diagnostics {
                    stdout: Some(quoted),
                    ..Diagnostics::default()
                })
            }
            RemoteError::Client(_) | RemoteError::Transport { .. } => {
                Failure::unavailable(message)
            }
        }
    }
}

pub struct RemoteBackend {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteBackend {
    /// `timeout` bounds the whole exchange, inference included.
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(RemoteError::Client)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a validated request to the remote service.
    pub async fn forward(&self, request: &RestorationRequest) -> ResponseEnvelope {
        let outcome = match request.kind() {
            BackendKind::RefLdm => self
                .post::<_, GenerateResponse>("/generate", &GenerateBody::from_request(request))
                .await
                .map(GenerateResponse::into_envelope),
            BackendKind::CodeFormer | BackendKind::Gfpgan => self
                .post::<_, RestoreResponse>("/restore", &RestoreBody::from_request(request))
                .await
                .map(RestoreResponse::into_envelope),
        };
        outcome.unwrap_or_else(|err| {
            warn!(url = %self.base_url, error = %err, "remote backend unavailable");
            Failure::from(err).into()
        })
    }

    /// Non-2xx responses still carry an envelope, so the body is parsed
    /// regardless of status.
    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, RemoteError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "forwarding request to remote backend");

        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| RemoteError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|source| RemoteError::Transport {
            url: url.clone(),
            source,
        })?;

        serde_json::from_str(&text).map_err(|source| RemoteError::UnexpectedBody {
            url,
            status,
            body: text,
            source,
        })
    }
}
