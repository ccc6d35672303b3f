//! Client-streaming and bidirectional calls, driven through the router
//! in-process since the client only initiates unary and server-streaming
//! calls.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use bytes::{Bytes, BytesMut};
use futures::channel::mpsc;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use treerpc::config::TransportConfig;
use treerpc::transport::{decode_frames, message_frame, trailer_frame, Frame, Status};
use treerpc::{
    ApiTree, BridgeError, BridgeServer, CallPath, CodecInfo, Handler, MessageCodec, MessageDef,
    MethodDef, RpcShape, SchemaContract, Value, ValueStream,
};

fn schema() -> SchemaContract {
    SchemaContract::new()
        .with_message("Num", MessageDef::new().field("value", 1, "int64"))
        .with_message("Total", MessageDef::new().field("result", 1, "int64"))
        .with_message("Line", MessageDef::new().field("text", 1, "string"))
        .with_message("Reply", MessageDef::new().field("result", 1, "string"))
        .with_method(
            &CallPath::parse("sum").unwrap(),
            MethodDef::new("Num", "Total").with_shape(RpcShape::ClientStreaming),
        )
        .with_method(
            &CallPath::parse("chat/echo").unwrap(),
            MethodDef::new("Line", "Reply").with_shape(RpcShape::Bidirectional),
        )
}

fn tree() -> ApiTree {
    ApiTree::new()
        .leaf(
            "sum",
            Handler::client_streaming(|inbound: ValueStream| async move {
                let values: Vec<Value> = inbound.try_collect().await?;
                let total = values
                    .iter()
                    .map(|v| v.as_i64().ok_or_else(|| BridgeError::invocation("not a number")))
                    .sum::<Result<i64, BridgeError>>()?;
                Ok(Value::I64(total))
            }),
        )
        .subtree(
            "chat",
            ApiTree::new().leaf(
                "echo",
                Handler::bidirectional(|inbound: ValueStream| {
                    inbound.map_ok(|line| {
                        Value::from(format!("echo: {}", line.as_str().unwrap_or_default()))
                    })
                }),
            ),
        )
}

fn info(path: &str) -> CodecInfo {
    let codec = Arc::new(MessageCodec::new(Arc::new(schema())));
    CodecInfo::build(codec, &CallPath::parse(path).unwrap()).unwrap()
}

async fn exchange(uri: &str, elements: Vec<Value>, info: &CodecInfo) -> Vec<Frame> {
    let server = BridgeServer::new(schema(), &tree()).unwrap();

    let mut body = BytesMut::new();
    for element in elements {
        body.extend_from_slice(&message_frame(&info.encode_element(element).unwrap()));
    }
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, TransportConfig::CONTENT_TYPE)
        .body(Body::from(body.freeze()))
        .unwrap();

    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    decode_frames(response.into_body().into_data_stream())
        .try_collect()
        .await
        .unwrap()
}

fn results(frames: &[Frame], info: &CodecInfo) -> Vec<Value> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            Frame::Message(payload) => Some(info.decode_result(payload).unwrap()),
            Frame::Trailer(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn test_client_streaming_sum() {
    let info = info("sum");
    let frames = exchange(
        "/srv/sum",
        vec![Value::I64(1), Value::I64(2), Value::I64(39)],
        &info,
    )
    .await;

    assert_eq!(results(&frames, &info), vec![Value::I64(42)]);
    assert_eq!(frames.last(), Some(&Frame::Trailer(Status::ok())));
}

#[tokio::test]
async fn test_client_streaming_empty_input() {
    let info = info("sum");
    let frames = exchange("/srv/sum", vec![], &info).await;
    assert_eq!(results(&frames, &info), vec![Value::I64(0)]);
}

#[tokio::test]
async fn test_bidirectional_echo_preserves_order() {
    let info = info("chat/echo");
    let lines = vec![Value::from("one"), Value::from("two"), Value::from("three")];
    let frames = exchange("/srv_chat/echo", lines, &info).await;

    assert_eq!(
        results(&frames, &info),
        vec![
            Value::from("echo: one"),
            Value::from("echo: two"),
            Value::from("echo: three"),
        ]
    );
    assert!(matches!(frames.last(), Some(Frame::Trailer(status)) if status.is_ok()));
}

#[tokio::test]
async fn test_bidirectional_replies_while_request_is_open() {
    let info = info("chat/echo");
    let server = BridgeServer::new(schema(), &tree()).unwrap();
    let (tx, rx) = mpsc::unbounded::<Result<Bytes, std::io::Error>>();
    let send = |text: &str| {
        let frame = message_frame(&info.encode_element(Value::from(text)).unwrap());
        tx.unbounded_send(Ok(frame)).unwrap();
    };

    let request = Request::post("/srv_chat/echo")
        .header(header::CONTENT_TYPE, TransportConfig::CONTENT_TYPE)
        .body(Body::from_stream(rx))
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();
    let mut frames = decode_frames(response.into_body().into_data_stream());

    for text in ["one", "two"] {
        send(text);
        let frame = tokio::time::timeout(Duration::from_secs(5), frames.next())
            .await
            .expect("reply should not wait for the request to finish")
            .unwrap()
            .unwrap();
        assert_eq!(results(&[frame], &info), vec![Value::from(format!("echo: {}", text))]);
    }

    drop(tx);
    let rest: Vec<Frame> = frames.try_collect().await.unwrap();
    assert!(matches!(&rest[..], [Frame::Trailer(status)] if status.is_ok()));
}

#[tokio::test]
async fn test_request_trailer_ends_inbound_stream() {
    let info = info("sum");
    let server = BridgeServer::new(schema(), &tree()).unwrap();

    let mut body = BytesMut::new();
    body.extend_from_slice(&message_frame(&info.encode_element(Value::I64(5)).unwrap()));
    body.extend_from_slice(&trailer_frame(&Status::ok()));
    body.extend_from_slice(&message_frame(&info.encode_element(Value::I64(100)).unwrap()));

    let request = Request::post("/srv/sum")
        .body(Body::from(body.freeze()))
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();
    let frames: Vec<Frame> = decode_frames(response.into_body().into_data_stream())
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results(&frames, &info), vec![Value::I64(5)]);
}

#[tokio::test]
async fn test_malformed_element_reports_invalid_argument() {
    let server = BridgeServer::new(schema(), &tree()).unwrap();
    // field 1 declared int64 but sent length-delimited
    let bad = message_frame(&[0x0a, 0x01, b'x']);
    let request = Request::post("/srv/sum").body(Body::from(bad)).unwrap();
    let response = server.router().oneshot(request).await.unwrap();

    let frames: Vec<_> = decode_frames(response.into_body().into_data_stream())
        .collect()
        .await;
    assert!(matches!(&frames[..], [Ok(Frame::Trailer(status))] if status.code == 3));
}
