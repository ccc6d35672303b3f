//! RPC call shapes and the server-side adapter that runs a handler under
//! its shape.

use crate::codec::CodecInfo;
use crate::error::{BridgeError, Result};
use crate::walker::{Handler, ValueStream};
use crate::value::Value;
use bytes::Bytes;
use futures::future::ready;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt, TryStreamExt};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Encoded protobuf messages, one per item.
pub type MessageStream = BoxStream<'static, Result<Bytes>>;

/// The four combinations of request and response streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcShape {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidirectional,
}

impl RpcShape {
    pub fn from_flags(request_stream: bool, response_stream: bool) -> Self {
        match (request_stream, response_stream) {
            (false, false) => RpcShape::Unary,
            (true, false) => RpcShape::ClientStreaming,
            (false, true) => RpcShape::ServerStreaming,
            (true, true) => RpcShape::Bidirectional,
        }
    }

    /// `(request_stream, response_stream)`
    pub fn flags(self) -> (bool, bool) {
        match self {
            RpcShape::Unary => (false, false),
            RpcShape::ClientStreaming => (true, false),
            RpcShape::ServerStreaming => (false, true),
            RpcShape::Bidirectional => (true, true),
        }
    }

    pub fn request_stream(self) -> bool {
        self.flags().0
    }

    pub fn response_stream(self) -> bool {
        self.flags().1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RpcShape::Unary => "unary",
            RpcShape::ClientStreaming => "client-streaming",
            RpcShape::ServerStreaming => "server-streaming",
            RpcShape::Bidirectional => "bidirectional",
        }
    }
}

impl fmt::Display for RpcShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run `handler` against the inbound request messages and produce the
/// encoded outbound messages.
///
/// Unary and server-streaming calls read exactly one request message.
/// An `Err` item ends the outbound stream. Dropping the returned stream
/// drops the handler's producer with it.
///
/// A handler that panics fails the call with [`BridgeError::Invocation`];
/// items a producer yielded before panicking are still delivered.
pub fn serve_call(handler: Handler, info: Arc<CodecInfo>, inbound: MessageStream) -> MessageStream {
    match handler {
        Handler::Unary(f) => stream::once(async move {
            let request = first_message(inbound).await?;
            let args = info.decode_args(&request)?;
            let result = guarded(async move { f(args).await }).await?;
            info.encode_result(result)
        })
        .boxed(),
        Handler::ClientStreaming(f) => {
            let elements = decode_elements(inbound, info.clone());
            stream::once(async move {
                let result = guarded(async move { f(elements).await }).await?;
                info.encode_result(result)
            })
            .boxed()
        }
        Handler::ServerStreaming(f) => stream::once(async move {
            let request = first_message(inbound).await?;
            let args = info.decode_args(&request)?;
            Ok::<_, BridgeError>(encode_results(guarded_producer(|| f(args)), info))
        })
        .try_flatten()
        .boxed(),
        Handler::Bidirectional(f) => {
            let elements = decode_elements(inbound, info.clone());
            encode_results(guarded_producer(|| f(elements)), info)
        }
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> BridgeError {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    BridgeError::invocation(format!("handler panicked: {}", detail))
}

async fn guarded<F>(call: F) -> Result<Value>
where
    F: Future<Output = Result<Value>>,
{
    AssertUnwindSafe(call)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panic_error(payload)))
}

/// Build a producer and poll it, turning a panic at either step into a
/// final error item.
fn guarded_producer(produce: impl FnOnce() -> ValueStream) -> ValueStream {
    match std::panic::catch_unwind(AssertUnwindSafe(produce)) {
        Ok(producer) => AssertUnwindSafe(producer)
            .catch_unwind()
            .map(|item| item.unwrap_or_else(|payload| Err(panic_error(payload))))
            .boxed(),
        Err(payload) => stream::once(ready(Err(panic_error(payload)))).boxed(),
    }
}

async fn first_message(mut inbound: MessageStream) -> Result<Bytes> {
    match inbound.next().await {
        Some(message) => message,
        None => Err(BridgeError::Malformed {
            message: "request carried no message".to_string(),
        }),
    }
}

fn decode_elements(inbound: MessageStream, info: Arc<CodecInfo>) -> ValueStream {
    inbound
        .map(move |message| message.and_then(|bytes| info.decode_element(&bytes)))
        .boxed()
}

fn encode_results(outbound: ValueStream, info: Arc<CodecInfo>) -> MessageStream {
    outbound
        .map(move |item| item.and_then(|value| info.encode_result(value)))
        .boxed()
}
