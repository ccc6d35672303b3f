//! HTTP body framing shared by the server and client.
//!
//! A call is one POST to `{host}/{service}/{method}`. The request body holds
//! message frames; the response body holds message frames followed by
//! exactly one trailer frame.

pub mod frame;

pub use frame::{encode_frame, message_frame, trailer_frame, Frame, FrameDecoder, Status};

use crate::error::{BridgeError, Result};
use crate::shape::MessageStream;
use bytes::Bytes;
use futures::future::ready;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::fmt::Display;
use tracing::{debug, error, warn};

/// Decode a stream of body chunks into frames.
///
/// A body that ends inside a frame yields a `Malformed` error. Decoding stops
/// after the first error.
pub fn decode_frames<S, E>(chunks: S) -> BoxStream<'static, Result<Frame>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = (chunks.boxed(), FrameDecoder::default(), false);
    stream::unfold(state, |(mut chunks, mut decoder, done)| async move {
        if done {
            return None;
        }
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => return Some((Ok(frame), (chunks, decoder, false))),
                Ok(None) => {}
                Err(e) => return Some((Err(e), (chunks, decoder, true))),
            }
            match chunks.next().await {
                Some(Ok(chunk)) => decoder.push(&chunk),
                Some(Err(e)) => {
                    let err = BridgeError::Transport {
                        message: e.to_string(),
                    };
                    return Some((Err(err), (chunks, decoder, true)));
                }
                None if decoder.is_empty() => return None,
                None => {
                    let err = BridgeError::Malformed {
                        message: "body ended inside a frame".to_string(),
                    };
                    return Some((Err(err), (chunks, decoder, true)));
                }
            }
        }
    })
    .boxed()
}

/// Request body frames to request messages. A trailer ends the stream.
pub fn request_messages(frames: BoxStream<'static, Result<Frame>>) -> MessageStream {
    frames
        .take_while(|frame| ready(!matches!(frame, Ok(Frame::Trailer(_)))))
        .filter_map(|frame| {
            ready(match frame {
                Ok(Frame::Message(message)) => Some(Ok(message)),
                Ok(Frame::Trailer(_)) => None,
                Err(e) => Some(Err(e)),
            })
        })
        .boxed()
}

/// Response body frames to response messages.
///
/// An OK trailer ends the stream; an error trailer becomes a final `Remote`
/// error. A body that ends without any trailer yields `TruncatedStream`.
pub fn response_messages(frames: BoxStream<'static, Result<Frame>>) -> MessageStream {
    stream::unfold(Some(frames), |frames| async move {
        let mut frames = frames?;
        match frames.next().await {
            Some(Ok(Frame::Message(message))) => Some((Ok(message), Some(frames))),
            Some(Ok(Frame::Trailer(status))) => match status.into_result() {
                Ok(()) => None,
                Err(e) => Some((Err(e), None)),
            },
            Some(Err(e)) => Some((Err(e), None)),
            None => Some((Err(BridgeError::TruncatedStream), None)),
        }
    })
    .boxed()
}

/// Outbound messages to response body chunks: one message frame per item,
/// then a trailer. The first error becomes the trailer status.
pub fn encode_response(
    messages: MessageStream,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold(Some(messages), |messages| async move {
        let mut messages = messages?;
        let chunk = match messages.next().await {
            Some(Ok(message)) => {
                return Some((Ok::<_, Infallible>(message_frame(&message)), Some(messages)))
            }
            Some(Err(e)) => {
                if matches!(e, BridgeError::Invocation { .. }) {
                    error!("Call failed: {}", e);
                } else {
                    warn!("Call rejected: {}", e);
                }
                trailer_frame(&Status::from_error(&e))
            }
            None => {
                debug!("Call completed");
                trailer_frame(&Status::ok())
            }
        };
        Some((Ok(chunk), None))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn chunks(parts: Vec<Bytes>) -> BoxStream<'static, Result<Frame>> {
        decode_frames(stream::iter(
            parts.into_iter().map(Ok::<_, Infallible>),
        ))
    }

    #[tokio::test]
    async fn test_response_stops_at_ok_trailer() {
        let frames = chunks(vec![
            message_frame(b"a"),
            message_frame(b"b"),
            trailer_frame(&Status::ok()),
        ]);
        let messages: Vec<Bytes> = response_messages(frames).try_collect().await.unwrap();
        assert_eq!(messages, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }

    #[tokio::test]
    async fn test_response_without_trailer_is_truncated() {
        let frames = chunks(vec![message_frame(b"a")]);
        let items: Vec<Result<Bytes>> = response_messages(frames).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1], Err(BridgeError::TruncatedStream));
    }

    #[tokio::test]
    async fn test_error_trailer_becomes_remote_error() {
        let err = BridgeError::UnknownPath { path: "x/y".into() };
        let frames = chunks(vec![trailer_frame(&Status::from_error(&err))]);
        let items: Vec<Result<Bytes>> = response_messages(frames).collect().await;
        assert!(matches!(&items[..], [Err(BridgeError::Remote { code: 5, .. })]));
    }

    #[tokio::test]
    async fn test_partial_frame_is_malformed() {
        let mut partial = message_frame(b"abcdef").to_vec();
        partial.truncate(7);
        let items: Vec<Result<Frame>> = chunks(vec![Bytes::from(partial)]).collect().await;
        assert!(matches!(&items[..], [Err(BridgeError::Malformed { .. })]));
    }

    #[tokio::test]
    async fn test_encode_response_ends_with_error_trailer() {
        let messages = stream::iter(vec![
            Ok(Bytes::from_static(b"x")),
            Err(BridgeError::invocation("boom")),
            Ok(Bytes::from_static(b"never")),
        ])
        .boxed();
        let body: Vec<Bytes> = encode_response(messages).try_collect().await.unwrap();
        assert_eq!(body.len(), 2);

        let frames: Vec<Frame> = chunks(body).try_collect().await.unwrap();
        assert_eq!(frames[0], Frame::Message(Bytes::from_static(b"x")));
        assert_eq!(
            frames[1],
            Frame::Trailer(Status {
                code: 2,
                message: "boom".into()
            })
        );
    }

    #[tokio::test]
    async fn test_request_messages_ignore_trailer() {
        let frames = chunks(vec![message_frame(b"in"), trailer_frame(&Status::ok())]);
        let messages: Vec<Bytes> = request_messages(frames).try_collect().await.unwrap();
        assert_eq!(messages, vec![Bytes::from_static(b"in")]);
    }
}
