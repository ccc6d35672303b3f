//! treerpc - Call a nested tree of async functions across a network.
//!
//! The server side exposes an [`ApiTree`] of async functions. A JSON schema
//! describes every leaf's request and response messages, and a schema-driven
//! codec turns positional arguments into compact protobuf messages. The
//! client side needs no generated stubs: it fetches the schema from the
//! server on first use and calls any path through a recording proxy.
//!
//! Four call shapes are supported by the server: unary, client-streaming,
//! server-streaming and bidirectional. The client speaks unary and
//! server-streaming.
//!
//! # Example
//!
//! ```rust,ignore
//! use treerpc::{ApiTree, BridgeClient, BridgeServer, Handler, SchemaContract, Value};
//!
//! #[tokio::main]
//! async fn main() -> treerpc::Result<()> {
//!     let tree = ApiTree::new().subtree(
//!         "a",
//!         ApiTree::new().leaf("it", Handler::unary(|_| async { Ok(Value::from("ok")) })),
//!     );
//!     let schema = SchemaContract::from_json(include_str!("schema.json"))?;
//!     let server = BridgeServer::new(schema, &tree)?;
//!     let handle = server.start("127.0.0.1", 0).await?;
//!
//!     let client = BridgeClient::new(&handle.url())?;
//!     let result = client.proxy().get("a").get("it").call(vec![]).await?;
//!     assert_eq!(result.as_str(), Some("ok"));
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod schema;
pub mod server;
pub mod shape;
pub mod transport;
pub mod value;
pub mod walker;

// Re-export commonly used types
pub use bootstrap::{meta_path, meta_schema, SchemaCache};
pub use client::{BridgeClient, RpcHandle};
pub use codec::{CodecCache, CodecInfo, MessageCodec};
pub use error::{BridgeError, Result};
pub use schema::{CallPath, FieldDef, FieldRule, MessageDef, MethodDef, SchemaContract};
pub use server::{start_server, BridgeServer, ServerHandle};
pub use shape::RpcShape;
pub use value::{Fields, Value};
pub use walker::{AccessFrame, ApiNode, ApiProxy, ApiTree, CallHook, Handler, TreeVisitor, ValueStream};
