//! Schema bootstrap.
//!
//! Every server answers one fixed method, `_q/_p`, whose request and response
//! types are known to both sides ahead of time. Its result is the server's
//! full schema as JSON. Clients fetch it once per host through
//! [`SchemaCache`]; concurrent first calls share one fetch.

use crate::config::MetaSchemaConfig;
use crate::error::Result;
use crate::schema::{CallPath, MessageDef, MethodDef, SchemaContract};
use crate::value::Value;
use crate::walker::{ApiTree, Handler};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Path of the meta method.
pub fn meta_path() -> CallPath {
    CallPath::from_static(&[MetaSchemaConfig::SERVICE, MetaSchemaConfig::METHOD])
}

/// The fixed schema describing only the meta method.
pub fn meta_schema() -> SchemaContract {
    SchemaContract::new()
        .with_message(
            MetaSchemaConfig::REQUEST_TYPE,
            MessageDef::new().required(MetaSchemaConfig::REQUEST_FIELD, 1, "string"),
        )
        .with_message(
            MetaSchemaConfig::RESPONSE_TYPE,
            MessageDef::new().required(MetaSchemaConfig::RESPONSE_FIELD, 1, "string"),
        )
        .with_method(
            &meta_path(),
            MethodDef::new(MetaSchemaConfig::REQUEST_TYPE, MetaSchemaConfig::RESPONSE_TYPE),
        )
}

/// Tree holding the meta method, answering with `schema_json`.
pub fn meta_tree(schema_json: String) -> ApiTree {
    let schema_json = Arc::new(schema_json);
    let handler = Handler::unary(move |_args| {
        let schema_json = schema_json.clone();
        async move { Ok(Value::String(schema_json.as_str().to_string())) }
    });
    ApiTree::new().subtree(
        MetaSchemaConfig::SERVICE,
        ApiTree::new().leaf(MetaSchemaConfig::METHOD, handler),
    )
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<SchemaContract>>>>;

enum Entry {
    Ready(Arc<SchemaContract>),
    Pending { generation: u64, fetch: SharedFetch },
}

/// Per-host memo of fetched schemas.
///
/// Successful fetches are kept for the life of the cache. A failed fetch is
/// reported to everyone waiting on it and then forgotten, so the next call
/// retries.
#[derive(Default)]
pub struct SchemaCache {
    entries: Mutex<HashMap<String, Entry>>,
    generation: AtomicU64,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached schema for `host`, or the result of `fetch`.
    ///
    /// `fetch` runs at most once per host while a fetch is in flight.
    pub async fn get_or_fetch<F, Fut>(&self, host: &str, fetch: F) -> Result<Arc<SchemaContract>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SchemaContract>> + Send + 'static,
    {
        let (generation, shared) = {
            let mut entries = self.entries.lock().await;
            match entries.get(host) {
                Some(Entry::Ready(schema)) => return Ok(schema.clone()),
                Some(Entry::Pending { generation, fetch: pending }) => (*generation, pending.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    debug!("Fetching schema for {}", host);
                    let shared = fetch().map(|r| r.map(Arc::new)).boxed().shared();
                    entries.insert(
                        host.to_string(),
                        Entry::Pending {
                            generation,
                            fetch: shared.clone(),
                        },
                    );
                    (generation, shared)
                }
            }
        };

        let result = shared.await;

        let mut entries = self.entries.lock().await;
        let current = matches!(
            entries.get(host),
            Some(Entry::Pending { generation: g, .. }) if *g == generation
        );
        if current {
            match &result {
                Ok(schema) => {
                    entries.insert(host.to_string(), Entry::Ready(schema.clone()));
                }
                Err(e) => {
                    warn!("Schema fetch for {} failed: {}", host, e);
                    entries.remove(host);
                }
            }
        }
        result
    }
}
