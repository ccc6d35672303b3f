use super::ClientInner;
use crate::codec::CodecInfo;
use crate::error::{BridgeError, Result};
use crate::schema::CallPath;
use crate::shape::RpcShape;
use crate::value::Value;
use crate::walker::ValueStream;
use futures::future::BoxFuture;
use futures::stream::{self, Stream};
use futures::{FutureExt, StreamExt, TryStreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

/// Result of calling a remote path.
///
/// The handle is both a [`Future`] and a [`Stream`]; whichever is polled
/// first decides how the call runs.
///
/// - Awaited: resolves to the single result. A server-streaming call is
///   collected into a [`Value::List`].
/// - Iterated: yields each result. A unary call yields its one result.
///
/// Using the other facet afterwards reports [`BridgeError::HandleModeConflict`]
/// once. Dropping the handle cancels the call.
pub struct RpcHandle {
    state: State,
    conflict_reported: bool,
}

struct PendingCall {
    inner: Arc<ClientInner>,
    path: Result<CallPath>,
    args: Vec<Value>,
}

enum State {
    Idle(PendingCall),
    Awaiting(BoxFuture<'static, Result<Value>>),
    Iterating(ValueStream),
    Done(Mode),
}

#[derive(Clone, Copy)]
enum Mode {
    Future,
    Stream,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Future => "future",
            Mode::Stream => "stream",
        }
    }
}

impl RpcHandle {
    pub(crate) fn new(inner: Arc<ClientInner>, path: Result<CallPath>, args: Vec<Value>) -> Self {
        Self {
            state: State::Idle(PendingCall { inner, path, args }),
            conflict_reported: false,
        }
    }

    fn conflict(mode: Mode) -> BridgeError {
        BridgeError::HandleModeConflict {
            used: mode.as_str(),
        }
    }
}

impl PendingCall {
    /// Resolve the path and refuse shapes that send a request stream. Runs
    /// before any domain request leaves the client.
    async fn prepare(&self) -> Result<(CallPath, Arc<CodecInfo>)> {
        let path = self.path.clone()?;
        let info = self.inner.prepare(&path).await?;
        if info.shape().request_stream() {
            return Err(BridgeError::NotSupported {
                what: format!("request stream ({} call {})", info.shape(), path),
            });
        }
        Ok((path, info))
    }

    fn into_future(self) -> BoxFuture<'static, Result<Value>> {
        async move {
            let (path, info) = self.prepare().await?;
            let request = info.encode_args(self.args)?;
            match info.shape() {
                RpcShape::ServerStreaming => {
                    let messages = self.inner.post(&path, request).await?;
                    let values: Vec<Value> = messages
                        .and_then(|bytes| futures::future::ready(info.decode_result(&bytes)))
                        .try_collect()
                        .await?;
                    debug!("{} streamed {} results", path, values.len());
                    Ok(Value::List(values))
                }
                _ => {
                    let response = self.inner.unary(&path, request).await?;
                    info.decode_result(&response)
                }
            }
        }
        .boxed()
    }

    fn into_stream(self) -> ValueStream {
        stream::once(async move {
            let (path, info) = self.prepare().await?;
            let request = info.encode_args(self.args)?;
            let results: ValueStream = match info.shape() {
                RpcShape::ServerStreaming => {
                    let messages = self.inner.post(&path, request).await?;
                    messages
                        .map(move |message| message.and_then(|bytes| info.decode_result(&bytes)))
                        .boxed()
                }
                _ => {
                    let response = self.inner.unary(&path, request).await?;
                    stream::once(futures::future::ready(info.decode_result(&response))).boxed()
                }
            };
            Ok::<_, BridgeError>(results)
        })
        .try_flatten()
        .boxed()
    }
}

impl Future for RpcHandle {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.state, State::Done(Mode::Future)) {
                State::Idle(call) => this.state = State::Awaiting(call.into_future()),
                State::Awaiting(mut fut) => {
                    return match fut.poll_unpin(cx) {
                        Poll::Ready(out) => Poll::Ready(out),
                        Poll::Pending => {
                            this.state = State::Awaiting(fut);
                            Poll::Pending
                        }
                    };
                }
                State::Iterating(stream) => {
                    this.state = State::Iterating(stream);
                    return Poll::Ready(Err(Self::conflict(Mode::Stream)));
                }
                State::Done(mode) => {
                    this.state = State::Done(mode);
                    return Poll::Ready(Err(Self::conflict(mode)));
                }
            }
        }
    }
}

impl Stream for RpcHandle {
    type Item = Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.state, State::Done(Mode::Stream)) {
                State::Idle(call) => this.state = State::Iterating(call.into_stream()),
                State::Iterating(mut stream) => {
                    return match stream.poll_next_unpin(cx) {
                        Poll::Ready(Some(item)) => {
                            this.state = State::Iterating(stream);
                            Poll::Ready(Some(item))
                        }
                        Poll::Ready(None) => Poll::Ready(None),
                        Poll::Pending => {
                            this.state = State::Iterating(stream);
                            Poll::Pending
                        }
                    };
                }
                State::Done(Mode::Stream) => return Poll::Ready(None),
                awaited => {
                    this.state = awaited;
                    if this.conflict_reported {
                        return Poll::Ready(None);
                    }
                    this.conflict_reported = true;
                    return Poll::Ready(Some(Err(Self::conflict(Mode::Future))));
                }
            }
        }
    }
}

impl futures::stream::FusedStream for RpcHandle {
    fn is_terminated(&self) -> bool {
        matches!(self.state, State::Done(Mode::Stream))
    }
}
