//! Per-path codec info and its process-lifetime cache.
//!
//! A [`CodecInfo`] pairs the request and response plans of one method and
//! knows the call conventions: positional arguments fill request fields in
//! ascending id order, and results and stream elements ride in the lowest-id
//! field of their message.

use super::{MessageCodec, MessagePlan};
use crate::error::Result;
use crate::schema::{CallPath, MethodDef, SchemaContract};
use crate::shape::RpcShape;
use crate::value::{Fields, Value};
use bytes::Bytes;
use mini_moka::sync::Cache;
use std::sync::Arc;

/// Compiled encode/decode plan for one call path.
#[derive(Debug)]
pub struct CodecInfo {
    path: CallPath,
    method: MethodDef,
    codec: Arc<MessageCodec>,
    request: Arc<MessagePlan>,
    response: Arc<MessagePlan>,
}

impl CodecInfo {
    /// Resolve `path` in the codec's schema and compile both message plans.
    pub fn build(codec: Arc<MessageCodec>, path: &CallPath) -> Result<Self> {
        let method = codec.schema().method(path)?.clone();
        let request = codec.plan(&method.request_type)?;
        let response = codec.plan(&method.response_type)?;
        Ok(Self {
            path: path.clone(),
            method,
            codec,
            request,
            response,
        })
    }

    pub fn path(&self) -> &CallPath {
        &self.path
    }

    pub fn method(&self) -> &MethodDef {
        &self.method
    }

    pub fn shape(&self) -> RpcShape {
        self.method.shape()
    }

    /// Positional arguments to an encoded request message.
    pub fn encode_args(&self, args: Vec<Value>) -> Result<Bytes> {
        let fields: Fields = self
            .request
            .fields
            .iter()
            .zip(args)
            .filter(|(_, value)| !value.is_null())
            .map(|(field, value)| (field.name.clone(), value))
            .collect();
        self.codec.encode(&self.method.request_type, &fields)
    }

    /// Encoded request message to positional arguments. Absent fields become
    /// `Null` so argument positions never shift.
    pub fn decode_args(&self, bytes: &[u8]) -> Result<Vec<Value>> {
        let mut fields = self.codec.decode(&self.method.request_type, bytes)?;
        Ok(self
            .request
            .fields
            .iter()
            .map(|field| fields.remove(&field.name).unwrap_or_default())
            .collect())
    }

    pub fn encode_result(&self, value: Value) -> Result<Bytes> {
        encode_first(&self.codec, &self.response, value)
    }

    pub fn decode_result(&self, bytes: &[u8]) -> Result<Value> {
        decode_first(&self.codec, &self.response, bytes)
    }

    /// One inbound stream element to an encoded request message.
    pub fn encode_element(&self, value: Value) -> Result<Bytes> {
        encode_first(&self.codec, &self.request, value)
    }

    pub fn decode_element(&self, bytes: &[u8]) -> Result<Value> {
        decode_first(&self.codec, &self.request, bytes)
    }
}

fn encode_first(codec: &MessageCodec, plan: &MessagePlan, value: Value) -> Result<Bytes> {
    let mut fields = Fields::new();
    if let Some(field) = plan.first_field() {
        if !value.is_null() {
            fields.insert(field.name.clone(), value);
        }
    }
    codec.encode(&plan.name, &fields)
}

fn decode_first(codec: &MessageCodec, plan: &MessagePlan, bytes: &[u8]) -> Result<Value> {
    let mut fields = codec.decode(&plan.name, bytes)?;
    Ok(plan
        .first_field()
        .and_then(|field| fields.remove(&field.name))
        .unwrap_or_default())
}

/// Codec infos keyed by host and call path, plus one [`MessageCodec`] per
/// host. Entries are never evicted.
pub struct CodecCache {
    codecs: Cache<String, Arc<MessageCodec>>,
    infos: Cache<(String, String), Arc<CodecInfo>>,
}

impl Default for CodecCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecCache {
    pub fn new() -> Self {
        Self {
            codecs: Cache::builder().build(),
            infos: Cache::builder().build(),
        }
    }

    /// Codec info for `path` on `host`, compiled on first use.
    pub fn get_or_build(
        &self,
        host: &str,
        schema: &Arc<SchemaContract>,
        path: &CallPath,
    ) -> Result<Arc<CodecInfo>> {
        let key = (host.to_string(), path.to_string());
        if let Some(info) = self.infos.get(&key) {
            return Ok(info);
        }

        let codec = match self.codecs.get(&key.0) {
            Some(codec) => codec,
            None => {
                let codec = Arc::new(MessageCodec::new(schema.clone()));
                self.codecs.insert(key.0.clone(), codec.clone());
                codec
            }
        };

        let info = Arc::new(CodecInfo::build(codec, path)?);
        self.infos.insert(key, info.clone());
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MessageDef;

    fn schema() -> Arc<SchemaContract> {
        let path = CallPath::parse("math/add").unwrap();
        Arc::new(
            SchemaContract::new()
                .with_message(
                    "AddReq",
                    MessageDef::new()
                        .field("right", 2, "int32")
                        .field("left", 1, "int32")
                        .field("note", 3, "string"),
                )
                .with_message("AddRes", MessageDef::new().field("result", 1, "int32"))
                .with_method(&path, MethodDef::new("AddReq", "AddRes")),
        )
    }

    fn info() -> CodecInfo {
        let codec = Arc::new(MessageCodec::new(schema()));
        CodecInfo::build(codec, &CallPath::parse("math/add").unwrap()).unwrap()
    }

    #[test]
    fn test_args_follow_field_id_order() {
        let info = info();
        let bytes = info.encode_args(vec![1i32.into(), 2i32.into()]).unwrap();
        assert_eq!(
            info.decode_args(&bytes).unwrap(),
            vec![Value::I32(1), Value::I32(2), Value::Null]
        );
    }

    #[test]
    fn test_result_rides_in_first_field() {
        let info = info();
        let bytes = info.encode_result(Value::I32(3)).unwrap();
        assert_eq!(info.decode_result(&bytes).unwrap(), Value::I32(3));

        let empty = info.encode_result(Value::Null).unwrap();
        assert!(empty.is_empty());
        assert_eq!(info.decode_result(&empty).unwrap(), Value::Null);
    }

    #[test]
    fn test_cache_reuses_info() {
        let cache = CodecCache::new();
        let schema = schema();
        let path = CallPath::parse("math/add").unwrap();

        let first = cache.get_or_build("http://h", &schema, &path).unwrap();
        let second = cache.get_or_build("http://h", &schema, &path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let missing = CallPath::parse("math/sub").unwrap();
        assert!(cache.get_or_build("http://h", &schema, &missing).is_err());
    }
}
