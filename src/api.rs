//! HTTP client for the debate backend's REST surface.

use std::time::Duration;

use tracing::debug;

use crate::protocol::{
    ChatMessage, CreateDebateRequest, Debate, DebateInfo, JurorVerdict, PostMessageRequest,
    RegisterUser, UserRecord,
};

/// Errors from backend requests.
///
/// Each variant carries enough context to diagnose the failure without
/// needing to inspect the originating error directly.
#[derive(Debug)]
pub enum ApiError {
    /// The backend replied with a non-2xx HTTP status code.
    Http { status: u16, url: String },
    /// Response body could not be parsed as the expected JSON structure.
    Json { context: String, detail: String },
    /// A TCP-level connection could not be established.
    Connect { url: String, detail: String },
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Http { status, url } => write!(f, "HTTP {status} from {url}"),
            ApiError::Json { context, detail } => {
                write!(f, "JSON parse error in {context}: {detail}")
            }
            ApiError::Connect { url, detail } => write!(f, "Connection failed to {url}: {detail}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Client for the debate backend.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
}

impl BackendClient {
    /// Start building a client aimed at `base_url`.
    pub fn builder(base_url: impl Into<String>) -> BackendClientBuilder {
        BackendClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Live-channel endpoint for a debate, derived from the HTTP base:
    /// `http` becomes `ws`, `https` becomes `wss`.
    pub fn ws_url(&self, debate_id: u64, client_id: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/ws/{debate_id}/{client_id}")
    }

    /// `POST /user`: upsert the display name for a wallet address.
    pub async fn register_user(
        &self,
        username: &str,
        user_address: &str,
    ) -> Result<UserRecord, ApiError> {
        let body = RegisterUser {
            username: username.to_string(),
            user_address: user_address.to_string(),
        };
        self.post_json("/user", &body, "user record").await
    }

    /// `POST /debate`: create a debate and its jurors.
    pub async fn create_debate(&self, req: &CreateDebateRequest) -> Result<Debate, ApiError> {
        self.post_json("/debate", req, "created debate").await
    }

    /// `GET /debate/{id}`: debate metadata plus juror personas.
    pub async fn fetch_debate(&self, discussion_id: u64) -> Result<DebateInfo, ApiError> {
        self.get_json(&format!("/debate/{discussion_id}"), "debate info")
            .await
    }

    /// `POST /msg`: submit a chat message; returns the stored row with its
    /// server-assigned id.
    pub async fn post_message(&self, req: &PostMessageRequest) -> Result<ChatMessage, ApiError> {
        self.post_json("/msg", req, "stored message").await
    }

    /// `GET /msg/{id}`: full message history for a debate.
    pub async fn fetch_messages(&self, discussion_id: u64) -> Result<Vec<ChatMessage>, ApiError> {
        self.get_json(&format!("/msg/{discussion_id}"), "message history")
            .await
    }

    /// `GET /juror_results/{id}`: historical verdicts, one inner list per
    /// juror.
    pub async fn fetch_juror_results(
        &self,
        discussion_id: u64,
    ) -> Result<Vec<Vec<JurorVerdict>>, ApiError> {
        self.get_json(&format!("/juror_results/{discussion_id}"), "juror results")
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn get_json<T>(&self, path: &str, context: &str) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%url, "GET");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;
        Self::parse_response(resp, url, context).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B, context: &str) -> Result<T, ApiError>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%url, "POST");
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;
        Self::parse_response(resp, url, context).await
    }

    async fn parse_response<T>(
        resp: reqwest::Response,
        url: String,
        context: &str,
    ) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
    {
        if !resp.status().is_success() {
            return Err(ApiError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }
        let bytes = resp.bytes().await.map_err(|e| ApiError::Json {
            context: context.to_string(),
            detail: e.to_string(),
        })?;
        serde_json::from_slice::<T>(&bytes).map_err(|e| ApiError::Json {
            context: context.to_string(),
            detail: e.to_string(),
        })
    }
}

/// Builder for [`BackendClient`].
pub struct BackendClientBuilder {
    base_url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl BackendClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        BackendClientBuilder {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Override the TCP connect timeout (default 3 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the per-request read timeout (default 10 s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Construct the client.
    pub fn build(self) -> BackendClient {
        // reqwest::Client::builder() can fail in extreme environments;
        // unwrap_or_default() falls back to a default client instead of
        // panicking.
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .unwrap_or_default();
        BackendClient {
            base_url: self.base_url,
            client,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
