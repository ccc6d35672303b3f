//! HTTP server exposing an [`ApiTree`] through its schema.
//!
//! Registration walks the tree once at startup. Every callable leaf must
//! appear in the schema with the call shape its handler implements, or
//! startup fails. The meta method is added automatically.

use crate::bootstrap::{meta_schema, meta_tree};
use crate::codec::{CodecInfo, MessageCodec};
use crate::config::{ServerConfig, TransportConfig};
use crate::error::{BridgeError, Result};
use crate::schema::{CallPath, SchemaContract};
use crate::shape::{serve_call, MessageStream};
use crate::transport::{decode_frames, encode_response, request_messages};
use crate::walker::{ApiTree, Handler, TreeVisitor};
use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::future::ready;
use futures::{stream, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// `(service, method)` as they appear in the request URL.
type EndpointKey = (String, String);

struct BoundMethod {
    info: Arc<CodecInfo>,
    handler: Handler,
}

/// Registration table shared by all requests.
pub struct BridgeServer {
    methods: Arc<HashMap<EndpointKey, BoundMethod>>,
}

struct Registrar<'a> {
    codec: Arc<MessageCodec>,
    methods: &'a mut HashMap<EndpointKey, BoundMethod>,
}

impl TreeVisitor for Registrar<'_> {
    fn visit_leaf(&mut self, path: &CallPath, handler: &Handler) -> Result<()> {
        let info = CodecInfo::build(self.codec.clone(), path)?;
        if info.shape() != handler.shape() {
            return Err(BridgeError::ShapeMismatch {
                path: path.to_string(),
                declared: info.shape().to_string(),
                bound: handler.shape().to_string(),
            });
        }

        let key = (path.service_name(), path.method_name().to_string());
        if self.methods.contains_key(&key) {
            return Err(BridgeError::InvalidSchema {
                message: format!("{} collides with an earlier path at /{}/{}", path, key.0, key.1),
            });
        }

        debug!("Registered {} at /{}/{} ({})", path, key.0, key.1, info.shape());
        self.methods.insert(
            key,
            BoundMethod {
                info: Arc::new(info),
                handler: handler.clone(),
            },
        );
        Ok(())
    }

    fn visit_static(&mut self, path: &CallPath, _value: &str) -> Result<()> {
        debug!("Skipping static entry {}", path);
        Ok(())
    }
}

impl BridgeServer {
    /// Bind every leaf of `tree` to its schema entry, plus the meta method.
    pub fn new(schema: SchemaContract, tree: &ApiTree) -> Result<Self> {
        schema.validate()?;
        let schema_json = schema.to_json()?;

        let mut methods = HashMap::new();
        tree.walk(&mut Registrar {
            codec: Arc::new(MessageCodec::new(Arc::new(schema))),
            methods: &mut methods,
        })?;
        meta_tree(schema_json).walk(&mut Registrar {
            codec: Arc::new(MessageCodec::new(Arc::new(meta_schema()))),
            methods: &mut methods,
        })?;

        info!("Bridge registered {} methods", methods.len());
        Ok(Self {
            methods: Arc::new(methods),
        })
    }

    /// Number of registered methods, the meta method included.
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Router serving the bridge. Useful for in-process testing.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route(ServerConfig::HEALTH_PATH, get(handle_health))
            .route("/:service/:method", post(handle_call))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.methods.clone())
    }

    /// Bind `host:port` and serve in a background task.
    ///
    /// Pass port 0 to let the OS choose; the handle reports the bound address.
    pub async fn start(&self, host: &str, port: u16) -> Result<ServerHandle> {
        let listener = TcpListener::bind((host, port)).await?;
        let addr = listener.local_addr()?;
        info!("Bridge listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = self.router();
        let task_handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
                info!("Bridge shutting down");
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Server error: {}", e);
            }
        });

        Ok(ServerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        })
    }
}

/// Register `tree` against `schema` and serve it on `host:port`.
pub async fn start_server(
    schema: SchemaContract,
    tree: &ApiTree,
    host: &str,
    port: u16,
) -> Result<ServerHandle> {
    BridgeServer::new(schema, tree)?.start(host, port).await
}

/// Handle to a running server. Dropping it stops the server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL clients should use as their host.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections. In-flight calls run to completion.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the server task to exit.
    pub async fn wait(mut self) {
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn handle_call(
    State(methods): State<Arc<HashMap<EndpointKey, BoundMethod>>>,
    Path(key): Path<EndpointKey>,
    body: Body,
) -> Response {
    let outbound: MessageStream = match methods.get(&key) {
        Some(bound) => {
            debug!("Call {} ({})", bound.info.path(), bound.info.shape());
            let inbound = request_messages(decode_frames(body.into_data_stream()));
            serve_call(bound.handler.clone(), bound.info.clone(), inbound)
        }
        None => {
            warn!("No method at /{}/{}", key.0, key.1);
            let err = BridgeError::UnknownPath {
                path: format!("{}/{}", key.0, key.1),
            };
            stream::once(ready(Err(err))).boxed()
        }
    };

    (
        [(header::CONTENT_TYPE, TransportConfig::CONTENT_TYPE)],
        Body::from_stream(encode_response(outbound)),
    )
        .into_response()
}
