//! Client side of the bridge.
//!
//! A [`BridgeClient`] talks to one host. It fetches that host's schema on
//! first use, compiles codec info per call path, and returns an
//! [`RpcHandle`] for every call.

mod handle;

pub use handle::RpcHandle;

use crate::bootstrap::{meta_path, meta_schema, SchemaCache};
use crate::codec::{CodecCache, CodecInfo, MessageCodec};
use crate::config::TransportConfig;
use crate::error::{BridgeError, Result};
use crate::schema::{CallPath, SchemaContract};
use crate::shape::MessageStream;
use crate::transport::{decode_frames, message_frame, response_messages};
use crate::value::Value;
use crate::walker::{path_of, AccessFrame, ApiProxy, CallHook};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub(crate) struct ClientInner {
    host: String,
    http: reqwest::Client,
    schemas: Arc<SchemaCache>,
    codecs: Arc<CodecCache>,
    meta: Arc<CodecInfo>,
}

/// Client for one bridge host. Cheap to clone.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("host", &self.inner.host)
            .finish()
    }
}

impl BridgeClient {
    /// Client with its own schema and codec caches.
    pub fn new(host: &str) -> Result<Self> {
        Self::with_caches(host, Arc::new(SchemaCache::new()), Arc::new(CodecCache::new()))
    }

    /// Client sharing caches with other clients.
    pub fn with_caches(host: &str, schemas: Arc<SchemaCache>, codecs: Arc<CodecCache>) -> Result<Self> {
        let url = Url::parse(host).map_err(|e| BridgeError::Transport {
            message: format!("invalid host '{}': {}", host, e),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BridgeError::Transport {
                message: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .connect_timeout(TransportConfig::CONNECT_TIMEOUT)
            .user_agent(TransportConfig::USER_AGENT)
            .build()?;
        let meta_codec = Arc::new(MessageCodec::new(Arc::new(meta_schema())));
        let meta = Arc::new(CodecInfo::build(meta_codec, &meta_path())?);

        Ok(Self {
            inner: Arc::new(ClientInner {
                host: host.trim_end_matches('/').to_string(),
                http,
                schemas,
                codecs,
                meta,
            }),
        })
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// The host's schema, fetched once and then served from the cache.
    pub async fn schema(&self) -> Result<Arc<SchemaContract>> {
        self.inner.schema().await
    }

    /// Start a call. Nothing is sent until the handle is awaited or polled.
    pub fn call(&self, path: &str, args: Vec<Value>) -> RpcHandle {
        RpcHandle::new(self.inner.clone(), CallPath::parse(path), args)
    }

    /// Root of a proxy whose calls go through this client.
    pub fn proxy(&self) -> ApiProxy<BridgeClient> {
        ApiProxy::new(Arc::new(self.clone()))
    }
}

impl CallHook for BridgeClient {
    type Output = RpcHandle;

    fn on_call(&self, stack: &[AccessFrame], args: Vec<Value>) -> RpcHandle {
        RpcHandle::new(self.inner.clone(), path_of(stack), args)
    }
}

impl ClientInner {
    async fn schema(self: &Arc<Self>) -> Result<Arc<SchemaContract>> {
        let inner = self.clone();
        self.schemas
            .get_or_fetch(&self.host, move || async move { inner.fetch_schema().await })
            .await
    }

    async fn fetch_schema(&self) -> Result<SchemaContract> {
        debug!("Requesting schema from {}", self.host);
        let request = self.meta.encode_args(vec![Value::from("")])?;
        let response = self.unary(self.meta.path(), request).await?;
        let result = self.meta.decode_result(&response)?;
        let json = result.as_str().ok_or_else(|| BridgeError::Malformed {
            message: format!("schema response is {}, not a string", result.kind()),
        })?;
        SchemaContract::from_json(json)
    }

    /// Codec info for `path`, fetching the schema first if needed.
    async fn prepare(self: &Arc<Self>, path: &CallPath) -> Result<Arc<CodecInfo>> {
        let schema = self.schema().await?;
        self.codecs.get_or_build(&self.host, &schema, path)
    }

    /// POST one request message and return the response message stream.
    async fn post(&self, path: &CallPath, request: Bytes) -> Result<MessageStream> {
        let url = path.endpoint(&self.host);
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, TransportConfig::CONTENT_TYPE)
            .body(message_frame(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Transport {
                message: format!("{} returned HTTP {}", url, status),
            });
        }
        Ok(response_messages(decode_frames(response.bytes_stream())))
    }

    /// Exactly one response message, with the trailer checked.
    async fn unary(&self, path: &CallPath, request: Bytes) -> Result<Bytes> {
        let mut messages = self.post(path, request).await?;
        let first = match messages.next().await {
            Some(message) => message?,
            None => {
                return Err(BridgeError::Malformed {
                    message: format!("{} returned no message", path),
                })
            }
        };
        while let Some(extra) = messages.next().await {
            extra?;
        }
        Ok(first)
    }
}
