//! Client for the remote commenting service (Disqus 1.1 style RPC API).
//!
//! Requests are a method name plus keyword arguments: `GET {base}{method}?args`
//! or `POST {base}{method}/` with a form body. Every response carries a
//! `succeeded` flag and, on success, a `message` payload.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::Disqus as DisqusConfig;
use crate::model::{RemotePostRef, RemoteThreadRef};

pub mod model;

pub use model::NewRemotePost;
use model::{Envelope, Forum, Identified, ThreadEnvelope};

pub const DISQUS_API_BASE: &str = "http://disqus.com/api/";
const API_VERSION: &str = "1.1";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{method}: HTTP {status}: {body}")]
    Status {
        method: String,
        status: StatusCode,
        body: String,
    },
    #[error("{method}: request did not succeed: {message}")]
    NotSucceeded { method: String, message: String },
    #[error("{method}: unexpected response: {detail}")]
    Malformed { method: String, detail: String },
    #[error("forum not found: {0}")]
    ForumNotFound(String),
}

/// Operations the comment migration needs from the remote service.
#[async_trait]
pub trait CommentService: Send + Sync {
    /// Resolve the per-forum API key from a user key and forum short name.
    async fn forum_api_key(&self, user_api_key: &str, forum_name: &str) -> Result<String>;

    /// Create or reuse the thread keyed by `identifier`.
    async fn thread_by_identifier(
        &self,
        forum_key: &str,
        identifier: &str,
        title: &str,
    ) -> Result<RemoteThreadRef>;

    async fn update_thread_url(
        &self,
        forum_key: &str,
        thread: &RemoteThreadRef,
        url: &str,
    ) -> Result<()>;

    async fn create_post(
        &self,
        forum_key: &str,
        thread: &RemoteThreadRef,
        post: &NewRemotePost,
        parent: Option<&RemotePostRef>,
    ) -> Result<RemotePostRef>;
}

#[derive(Clone)]
pub struct DisqusClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for DisqusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisqusClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl DisqusClient {
    pub fn new() -> Result<Self> {
        let base_url = Url::parse(DISQUS_API_BASE).context("invalid default Disqus URL")?;
        Self::with_base_url(base_url)
    }

    pub fn from_config(cfg: &DisqusConfig) -> Result<Self> {
        let mut base = cfg.api_base.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).context("invalid disqus.api_base")?;
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("pressline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    /// GET carries arguments in the query string; POST sends them form-encoded
    /// to `{method}/`.
    pub fn build_request(
        &self,
        verb: Method,
        method: &str,
        args: &[(&str, String)],
    ) -> Result<reqwest::Request> {
        let mut params: Vec<(&str, &str)> = args.iter().map(|(k, v)| (*k, v.as_str())).collect();
        params.push(("api_version", API_VERSION));

        let builder = if verb == Method::GET {
            let endpoint = self
                .base_url
                .join(method)
                .context("invalid Disqus base URL")?;
            self.http.get(endpoint).query(&params)
        } else {
            let endpoint = self
                .base_url
                .join(&format!("{method}/"))
                .context("invalid Disqus base URL")?;
            self.http.request(verb, endpoint).form(&params)
        };
        builder.build().context("failed to build Disqus request")
    }

    #[instrument(skip(self, args))]
    async fn call<T: DeserializeOwned>(
        &self,
        verb: Method,
        method: &str,
        args: &[(&str, String)],
    ) -> Result<T> {
        let request = self.build_request(verb, method, args)?;
        let res = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("failed to reach Disqus ({method})"))?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("rate limited by Disqus");
        }
        if status != StatusCode::OK {
            let body = res.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                method: method.to_string(),
                status,
                body,
            }
            .into());
        }

        let body = res.text().await.context("failed to read Disqus response")?;
        debug!(bytes = body.len(), "response received");
        decode_envelope(method, &body)
    }
}

/// Unwrap the `succeeded`/`message` envelope and decode the message as `T`.
pub fn decode_envelope<T: DeserializeOwned>(method: &str, body: &str) -> Result<T> {
    let envelope: Envelope = serde_json::from_str(body).map_err(|e| RemoteError::Malformed {
        method: method.to_string(),
        detail: e.to_string(),
    })?;
    if !envelope.succeeded {
        let message = match &envelope.message {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(RemoteError::NotSucceeded {
            method: method.to_string(),
            message,
        }
        .into());
    }
    serde_json::from_value(envelope.message).map_err(|e| {
        RemoteError::Malformed {
            method: method.to_string(),
            detail: e.to_string(),
        }
        .into()
    })
}

fn require_id(method: &str, id: Option<String>) -> Result<String> {
    id.ok_or_else(|| {
        RemoteError::Malformed {
            method: method.to_string(),
            detail: "missing id".into(),
        }
        .into()
    })
}

#[async_trait]
impl CommentService for DisqusClient {
    async fn forum_api_key(&self, user_api_key: &str, forum_name: &str) -> Result<String> {
        let forums: Vec<Forum> = self
            .call(
                Method::GET,
                "get_forum_list",
                &[("user_api_key", user_api_key.to_string())],
            )
            .await?;
        let forum = forums
            .iter()
            .find(|f| f.shortname == forum_name)
            .ok_or_else(|| RemoteError::ForumNotFound(forum_name.to_string()))?;
        let forum_id = require_id("get_forum_list", model::id_string(&forum.id))?;
        self.call(
            Method::GET,
            "get_forum_api_key",
            &[
                ("user_api_key", user_api_key.to_string()),
                ("forum_id", forum_id),
            ],
        )
        .await
    }

    async fn thread_by_identifier(
        &self,
        forum_key: &str,
        identifier: &str,
        title: &str,
    ) -> Result<RemoteThreadRef> {
        let res: ThreadEnvelope = self
            .call(
                Method::POST,
                "thread_by_identifier",
                &[
                    ("identifier", identifier.to_string()),
                    ("forum_api_key", forum_key.to_string()),
                    ("title", title.to_string()),
                ],
            )
            .await?;
        let id = require_id("thread_by_identifier", res.thread.id_string())?;
        Ok(RemoteThreadRef(id))
    }

    async fn update_thread_url(
        &self,
        forum_key: &str,
        thread: &RemoteThreadRef,
        url: &str,
    ) -> Result<()> {
        let _: Value = self
            .call(
                Method::POST,
                "update_thread",
                &[
                    ("forum_api_key", forum_key.to_string()),
                    ("thread_id", thread.0.clone()),
                    ("url", url.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn create_post(
        &self,
        forum_key: &str,
        thread: &RemoteThreadRef,
        post: &NewRemotePost,
        parent: Option<&RemotePostRef>,
    ) -> Result<RemotePostRef> {
        let args = create_post_args(forum_key, thread, post, parent);
        let created: Identified = self.call(Method::POST, "create_post", &args).await?;
        let id = require_id("create_post", created.id_string())?;
        Ok(RemotePostRef(id))
    }
}

pub fn create_post_args(
    forum_key: &str,
    thread: &RemoteThreadRef,
    post: &NewRemotePost,
    parent: Option<&RemotePostRef>,
) -> Vec<(&'static str, String)> {
    let mut args = vec![
        ("thread_id", thread.0.clone()),
        ("message", post.message.clone()),
        ("author_name", post.author_name.clone()),
        ("author_email", post.author_email.clone()),
        ("forum_api_key", forum_key.to_string()),
        ("created_at", post.created_at.clone()),
    ];
    if let Some(url) = &post.author_url {
        args.push(("author_url", url.clone()));
    }
    if let Some(parent) = parent {
        args.push(("parent_post", parent.0.clone()));
    }
    args
}
