//! Schema-driven binary codec.
//!
//! [`MessageCodec`] encodes a [`Fields`] map into protobuf-compatible bytes and
//! back, using nothing but a [`SchemaContract`]. Each message type is compiled
//! into a [`MessagePlan`] the first time it is used; plans are kept for the
//! lifetime of the codec.
//!
//! - Scalars: one tagged value per field, per the type table in [`plan`].
//! - Repeated: one tagged value per element, in order. Numeric and boolean
//!   elements are also accepted packed.
//! - Maps: one length-delimited `{k: 1 string, v: 2 value}` entry per key.
//! - Messages: recursively encoded as length-delimited submessages.
//!
//! Decoding is driven by field id. Unknown ids are skipped, an end-group
//! marker stops the message, and absent fields stay absent.

pub mod info;
pub mod plan;
pub mod wire;

pub use info::{CodecCache, CodecInfo};
pub use plan::{FieldKind, FieldPlan, MessagePlan, ScalarType};

use crate::error::{BridgeError, Result};
use crate::schema::SchemaContract;
use crate::value::{Fields, Value};
use bytes::{BufMut, Bytes, BytesMut};
use mini_moka::sync::Cache;
use std::sync::Arc;
use prost::encoding::{encode_key, encode_varint};
use wire::{put_length_delimited, WireReader, WireType};

/// Nesting limit for decoding untrusted input.
const MAX_DEPTH: usize = 64;

/// Encoder/decoder bound to one schema.
pub struct MessageCodec {
    schema: Arc<SchemaContract>,
    plans: Cache<String, Arc<MessagePlan>>,
}

impl std::fmt::Debug for MessageCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCodec")
            .field("plans", &self.plans.entry_count())
            .finish()
    }
}

impl MessageCodec {
    pub fn new(schema: Arc<SchemaContract>) -> Self {
        Self {
            schema,
            plans: Cache::builder().build(),
        }
    }

    pub fn schema(&self) -> &Arc<SchemaContract> {
        &self.schema
    }

    /// Compiled plan for a message type, built on first use.
    ///
    /// Two callers racing on the same type both compile the same plan; the
    /// later insert wins.
    pub fn plan(&self, message_name: &str) -> Result<Arc<MessagePlan>> {
        if let Some(plan) = self.plans.get(&message_name.to_string()) {
            return Ok(plan);
        }
        let plan = Arc::new(MessagePlan::compile(&self.schema, message_name)?);
        self.plans.insert(message_name.to_string(), plan.clone());
        Ok(plan)
    }

    pub fn encode(&self, message_name: &str, fields: &Fields) -> Result<Bytes> {
        let plan = self.plan(message_name)?;
        let mut buf = BytesMut::new();
        self.encode_message(&plan, fields, &mut buf)?;
        Ok(buf.freeze())
    }

    pub fn decode(&self, message_name: &str, bytes: &[u8]) -> Result<Fields> {
        let plan = self.plan(message_name)?;
        self.decode_message(&plan, bytes, 0)
    }

    fn encode_message(&self, plan: &MessagePlan, fields: &Fields, buf: &mut BytesMut) -> Result<()> {
        for field in &plan.fields {
            let value = match fields.get(&field.name) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };
            if field.kind == FieldKind::Scalar(ScalarType::Void) {
                continue;
            }

            match &field.kind {
                FieldKind::Map(value_kind) => {
                    let Value::Object(entries) = value else {
                        return Err(mismatch(field, "map", value));
                    };
                    for (key, entry_value) in entries {
                        let mut entry = BytesMut::new();
                        put_length_delimited(&mut entry, 1, key.as_bytes());
                        if !entry_value.is_null() {
                            self.encode_single(field, value_kind, 2, entry_value, &mut entry)?;
                        }
                        put_length_delimited(buf, field.id, &entry);
                    }
                }
                kind if field.repeated => {
                    let Value::List(items) = value else {
                        return Err(mismatch(field, "list", value));
                    };
                    for item in items {
                        self.encode_single(field, kind, field.id, item, buf)?;
                    }
                }
                kind => self.encode_single(field, kind, field.id, value, buf)?,
            }
        }
        Ok(())
    }

    fn encode_single(
        &self,
        field: &FieldPlan,
        kind: &FieldKind,
        id: u32,
        value: &Value,
        buf: &mut BytesMut,
    ) -> Result<()> {
        match kind {
            FieldKind::Scalar(scalar) => encode_scalar(field, *scalar, id, value, buf),
            FieldKind::Message(name) => {
                let Value::Object(nested) = value else {
                    return Err(mismatch(field, name, value));
                };
                let plan = self.plan(name)?;
                let mut sub = BytesMut::new();
                self.encode_message(&plan, nested, &mut sub)?;
                put_length_delimited(buf, id, &sub);
                Ok(())
            }
            FieldKind::Map(_) => Err(BridgeError::UnsupportedType {
                type_name: "map".into(),
                field: field.label.clone(),
            }),
        }
    }

    fn decode_message(&self, plan: &MessagePlan, bytes: &[u8], depth: usize) -> Result<Fields> {
        if depth > MAX_DEPTH {
            return Err(BridgeError::Malformed {
                message: format!("nesting deeper than {} in {}", MAX_DEPTH, plan.name),
            });
        }

        let mut reader = WireReader::new(bytes);
        let mut out = Fields::new();

        while let Some((id, wire_type)) = reader.read_key()? {
            if wire_type == WireType::EndGroup {
                break;
            }
            let Some(field) = plan.field_by_id(id) else {
                reader.skip(id, wire_type)?;
                continue;
            };

            match &field.kind {
                FieldKind::Scalar(ScalarType::Void) => reader.skip(id, wire_type)?,
                FieldKind::Map(value_kind) => {
                    expect_wire(field, WireType::LengthDelimited, wire_type)?;
                    let entry = reader.read_length_delimited()?;
                    let (key, value) = self.decode_map_entry(field, value_kind, entry, depth)?;
                    if let Value::Object(map) = out
                        .entry(field.name.clone())
                        .or_insert_with(|| Value::Object(Fields::new()))
                    {
                        map.insert(key, value);
                    }
                }
                FieldKind::Scalar(scalar)
                    if field.repeated
                        && scalar.is_packable()
                        && wire_type == WireType::LengthDelimited =>
                {
                    let mut packed = WireReader::new(reader.read_length_delimited()?);
                    let list = list_entry(&mut out, &field.name);
                    while !packed.is_empty() {
                        list.push(read_scalar(&mut packed, field, *scalar, scalar.wire_type())?);
                    }
                }
                kind => {
                    let value = self.decode_single(&mut reader, field, kind, wire_type, depth)?;
                    if field.repeated {
                        list_entry(&mut out, &field.name).push(value);
                    } else {
                        out.insert(field.name.clone(), value);
                    }
                }
            }
        }

        Ok(out)
    }

    fn decode_single(
        &self,
        reader: &mut WireReader<'_>,
        field: &FieldPlan,
        kind: &FieldKind,
        wire_type: WireType,
        depth: usize,
    ) -> Result<Value> {
        match kind {
            FieldKind::Scalar(scalar) => read_scalar(reader, field, *scalar, wire_type),
            FieldKind::Message(name) => {
                expect_wire(field, WireType::LengthDelimited, wire_type)?;
                let bytes = reader.read_length_delimited()?;
                let plan = self.plan(name)?;
                Ok(Value::Object(self.decode_message(&plan, bytes, depth + 1)?))
            }
            FieldKind::Map(_) => Err(BridgeError::UnsupportedType {
                type_name: "map".into(),
                field: field.label.clone(),
            }),
        }
    }

    fn decode_map_entry(
        &self,
        field: &FieldPlan,
        value_kind: &FieldKind,
        bytes: &[u8],
        depth: usize,
    ) -> Result<(String, Value)> {
        let mut reader = WireReader::new(bytes);
        let mut key = String::new();
        let mut value = None;

        while let Some((id, wire_type)) = reader.read_key()? {
            match id {
                1 => {
                    expect_wire(field, WireType::LengthDelimited, wire_type)?;
                    key = std::str::from_utf8(reader.read_length_delimited()?)?.to_string();
                }
                2 => {
                    value = Some(self.decode_single(&mut reader, field, value_kind, wire_type, depth + 1)?);
                }
                _ => reader.skip(id, wire_type)?,
            }
        }

        let value = value.unwrap_or_else(|| match value_kind {
            FieldKind::Scalar(scalar) => scalar.zero(),
            _ => Value::Object(Fields::new()),
        });
        Ok((key, value))
    }
}

fn list_entry<'a>(out: &'a mut Fields, name: &str) -> &'a mut Vec<Value> {
    let slot = out
        .entry(name.to_string())
        .or_insert_with(|| Value::List(Vec::new()));
    if !matches!(slot, Value::List(_)) {
        *slot = Value::List(Vec::new());
    }
    match slot {
        Value::List(items) => items,
        _ => unreachable!("slot was just set to a list"),
    }
}

fn mismatch(field: &FieldPlan, expected: &str, actual: &Value) -> BridgeError {
    BridgeError::TypeMismatch {
        field: field.label.clone(),
        expected: expected.to_string(),
        actual: actual.kind().to_string(),
    }
}

fn expect_wire(field: &FieldPlan, expected: WireType, actual: WireType) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(BridgeError::Malformed {
            message: format!(
                "{}: expected wire type {:?}, got {:?}",
                field.label, expected, actual
            ),
        })
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match *value {
        Value::U32(v) => Some(v as u64),
        Value::U64(v) => Some(v),
        Value::I32(v) => u64::try_from(v).ok(),
        Value::I64(v) => u64::try_from(v).ok(),
        _ => None,
    }
}

fn encode_scalar(
    field: &FieldPlan,
    scalar: ScalarType,
    id: u32,
    value: &Value,
    buf: &mut BytesMut,
) -> Result<()> {
    let bad = || mismatch(field, scalar.name(), value);
    match scalar {
        ScalarType::Double => {
            let v = value.as_f64().ok_or_else(bad)?;
            encode_key(id, WireType::SixtyFourBit, buf);
            buf.put_f64_le(v);
        }
        ScalarType::Float => {
            let v = value.as_f64().ok_or_else(bad)?;
            encode_key(id, WireType::ThirtyTwoBit, buf);
            buf.put_f32_le(v as f32);
        }
        ScalarType::Int32 => {
            let v = value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(bad)?;
            encode_key(id, WireType::Varint, buf);
            // negative int32 is sign-extended to ten bytes
            encode_varint(v as i64 as u64, buf);
        }
        ScalarType::Int64 => {
            let v = value.as_i64().ok_or_else(bad)?;
            encode_key(id, WireType::Varint, buf);
            encode_varint(v as u64, buf);
        }
        ScalarType::Uint32 => {
            let v = as_u64(value)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(bad)?;
            encode_key(id, WireType::Varint, buf);
            encode_varint(v as u64, buf);
        }
        ScalarType::Uint64 => {
            let v = as_u64(value).ok_or_else(bad)?;
            encode_key(id, WireType::Varint, buf);
            encode_varint(v, buf);
        }
        ScalarType::Bool => {
            let v = value.as_bool().ok_or_else(bad)?;
            encode_key(id, WireType::Varint, buf);
            encode_varint(v as u64, buf);
        }
        ScalarType::String => {
            let v = value.as_str().ok_or_else(bad)?;
            put_length_delimited(buf, id, v.as_bytes());
        }
        ScalarType::Bytes => match value {
            Value::Bytes(b) => put_length_delimited(buf, id, b),
            Value::String(s) => put_length_delimited(buf, id, s.as_bytes()),
            _ => return Err(bad()),
        },
        ScalarType::Void => {}
    }
    Ok(())
}

fn read_scalar(
    reader: &mut WireReader<'_>,
    field: &FieldPlan,
    scalar: ScalarType,
    wire_type: WireType,
) -> Result<Value> {
    expect_wire(field, scalar.wire_type(), wire_type)?;
    let value = match scalar {
        ScalarType::Double => Value::F64(f64::from_bits(reader.read_fixed64()?)),
        ScalarType::Float => Value::F32(f32::from_bits(reader.read_fixed32()?)),
        ScalarType::Int32 => Value::I32(reader.read_varint()? as i64 as i32),
        ScalarType::Int64 => Value::I64(reader.read_varint()? as i64),
        ScalarType::Uint32 => Value::U32(reader.read_varint()? as u32),
        ScalarType::Uint64 => Value::U64(reader.read_varint()?),
        ScalarType::Bool => Value::Bool(reader.read_varint()? != 0),
        ScalarType::String => {
            Value::String(std::str::from_utf8(reader.read_length_delimited()?)?.to_string())
        }
        ScalarType::Bytes => Value::Bytes(Bytes::copy_from_slice(reader.read_length_delimited()?)),
        ScalarType::Void => {
            reader.skip(field.id, wire_type)?;
            Value::Null
        }
    };
    Ok(value)
}
