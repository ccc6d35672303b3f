//! Demo business tree and its schema.

use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use std::time::Duration;
use treerpc::{ApiTree, BridgeError, Fields, Handler, Result, SchemaContract, Value, ValueStream};

const DEMO_SCHEMA: &str = include_str!("../schema/demo.schema.json");

/// Number of items `st` yields.
pub const STREAM_LEN: u32 = 20;

/// The bundled schema describing [`tree`].
pub fn schema() -> Result<SchemaContract> {
    SchemaContract::from_json(DEMO_SCHEMA)
}

/// Build the demo tree. `st` waits `stream_interval` after each item.
pub fn tree(stream_interval: Duration) -> ApiTree {
    ApiTree::new()
        .subtree(
            "a",
            ApiTree::new()
                .leaf("it", Handler::unary(|_| async { Ok(Value::from("ok")) }))
                .leaf("it2", Handler::unary(|_| async { Ok(Value::from("not ok")) })),
        )
        .leaf("it3", Handler::unary(|_| async { Ok(it3()) }))
        .leaf(
            "st",
            Handler::server_streaming(move |_| {
                stream::iter(0..STREAM_LEN).then(move |i| async move {
                    if i > 0 {
                        tokio::time::sleep(stream_interval).await;
                    }
                    Ok(Value::F32(i as f32))
                })
            }),
        )
        .leaf("sum", Handler::client_streaming(sum))
        .leaf(
            "echo",
            Handler::bidirectional(|inbound: ValueStream| inbound.map_ok(|line| line)),
        )
        .static_value("version", env!("CARGO_PKG_VERSION"))
}

fn it3() -> Value {
    let mut item = Fields::new();
    item.insert("a".into(), Value::from("maybe ok"));
    item.insert("b".into(), Value::from(vec![0.0f32, 1.0, 2.0]));
    item.insert("c".into(), Value::from(vec![true, false]));
    item.insert("d".into(), Value::from(vec!["a", "b", "c"]));
    item.insert(
        "e".into(),
        Value::from(vec![Bytes::from_static(b"A"), Bytes::from_static(b"B")]),
    );
    Value::List(vec![Value::Object(item)])
}

async fn sum(inbound: ValueStream) -> Result<Value> {
    let total = inbound
        .try_fold(0.0f64, |total, value| async move {
            value
                .as_f64()
                .map(|v| total + v)
                .ok_or_else(|| BridgeError::invocation(format!("cannot add {}", value.kind())))
        })
        .await?;
    Ok(Value::F32(total as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use treerpc::{ApiNode, BridgeServer, CallPath};

    #[test]
    fn test_bundled_schema_matches_tree() {
        let server = BridgeServer::new(schema().unwrap(), &tree(Duration::ZERO)).unwrap();
        // six demo methods plus the meta method
        assert_eq!(server.method_count(), 7);
    }

    #[test]
    fn test_version_is_static_leaf() {
        let tree = tree(Duration::ZERO);
        let path = CallPath::parse("version").unwrap();
        assert!(matches!(
            tree.resolve(&path),
            Some(ApiNode::Static(v)) if v == env!("CARGO_PKG_VERSION")
        ));
    }

    #[tokio::test]
    async fn test_sum_adds_numbers() {
        let inbound = stream::iter(vec![Ok(Value::F32(1.5)), Ok(Value::I32(2))]).boxed();
        assert_eq!(sum(inbound).await.unwrap(), Value::F32(3.5));

        let bad = stream::iter(vec![Ok(Value::from("x"))]).boxed();
        assert!(sum(bad).await.is_err());
    }

    #[test]
    fn test_it3_shape() {
        let value = it3();
        let item = &value.as_list().unwrap()[0];
        assert_eq!(item.get("a").and_then(Value::as_str), Some("maybe ok"));
        assert_eq!(item.get("e").and_then(Value::as_list).map(<[Value]>::len), Some(2));
    }
}
