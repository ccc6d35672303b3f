//! Compiled per-message plans.
//!
//! A plan resolves every field of one message type once: its scalar type,
//! nested message name or map value kind. Encoding and decoding then walk
//! the plan instead of the schema document.

use super::wire::WireType;
use crate::error::{BridgeError, Result};
use crate::schema::SchemaContract;
use crate::value::Value;
use std::collections::HashMap;

/// Scalar types the codec knows how to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Bool,
    String,
    Bytes,
    /// Never written; fields of this type are skipped.
    Void,
}

impl ScalarType {
    /// Resolve a schema type name, including the aliases a TypeScript-derived
    /// schema uses (`number`, `boolean`, `void`).
    pub fn parse(name: &str) -> Option<Self> {
        let scalar = match name {
            "double" => ScalarType::Double,
            "float" | "number" => ScalarType::Float,
            "int32" => ScalarType::Int32,
            "int64" => ScalarType::Int64,
            "uint32" => ScalarType::Uint32,
            "uint64" => ScalarType::Uint64,
            "bool" | "boolean" => ScalarType::Bool,
            "string" => ScalarType::String,
            "bytes" => ScalarType::Bytes,
            "void" | "undefined" | "null" => ScalarType::Void,
            _ => return None,
        };
        Some(scalar)
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Uint32 => "uint32",
            ScalarType::Uint64 => "uint64",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
            ScalarType::Void => "void",
        }
    }

    pub fn wire_type(self) -> WireType {
        match self {
            ScalarType::Double => WireType::SixtyFourBit,
            ScalarType::Float => WireType::ThirtyTwoBit,
            ScalarType::Int32
            | ScalarType::Int64
            | ScalarType::Uint32
            | ScalarType::Uint64
            | ScalarType::Bool
            | ScalarType::Void => WireType::Varint,
            ScalarType::String | ScalarType::Bytes => WireType::LengthDelimited,
        }
    }

    /// Numeric and boolean types may arrive packed.
    pub fn is_packable(self) -> bool {
        !matches!(
            self,
            ScalarType::String | ScalarType::Bytes | ScalarType::Void
        )
    }

    /// Value of an absent map entry value.
    pub fn zero(self) -> Value {
        match self {
            ScalarType::Double => Value::F64(0.0),
            ScalarType::Float => Value::F32(0.0),
            ScalarType::Int32 => Value::I32(0),
            ScalarType::Int64 => Value::I64(0),
            ScalarType::Uint32 => Value::U32(0),
            ScalarType::Uint64 => Value::U64(0),
            ScalarType::Bool => Value::Bool(false),
            ScalarType::String => Value::String(String::new()),
            ScalarType::Bytes => Value::Bytes(Default::default()),
            ScalarType::Void => Value::Null,
        }
    }
}

/// What one field holds.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarType),
    Message(String),
    /// String-keyed map; the box holds the value kind.
    Map(Box<FieldKind>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldPlan {
    pub name: String,
    pub id: u32,
    pub kind: FieldKind,
    pub repeated: bool,
    /// `Message.field`, for error messages.
    pub label: String,
}

/// Ordered field operations for one message type.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePlan {
    pub name: String,
    /// Sorted by ascending field id.
    pub fields: Vec<FieldPlan>,
    by_id: HashMap<u32, usize>,
}

impl MessagePlan {
    /// Resolve every field of `message_name` against the schema.
    pub fn compile(schema: &SchemaContract, message_name: &str) -> Result<Self> {
        let message = schema.message(message_name)?;

        let mut fields = Vec::with_capacity(message.fields.len());
        for (name, def) in &message.fields {
            let label = format!("{}.{}", message_name, name);
            let value_kind = resolve_kind(schema, &def.type_name, &label)?;
            let kind = match &def.key_type {
                Some(key_type) if key_type != "string" => {
                    return Err(BridgeError::UnsupportedKeyType {
                        key_type: key_type.clone(),
                        field: label,
                    });
                }
                Some(_) => {
                    if value_kind == FieldKind::Scalar(ScalarType::Void) {
                        return Err(BridgeError::UnsupportedType {
                            type_name: def.type_name.clone(),
                            field: label,
                        });
                    }
                    FieldKind::Map(Box::new(value_kind))
                }
                None => value_kind,
            };
            fields.push(FieldPlan {
                name: name.clone(),
                id: def.id,
                kind,
                repeated: def.rule.is_repeated(),
                label,
            });
        }
        fields.sort_by_key(|field| field.id);

        let by_id = fields
            .iter()
            .enumerate()
            .map(|(idx, field)| (field.id, idx))
            .collect();

        Ok(Self {
            name: message_name.to_string(),
            fields,
            by_id,
        })
    }

    pub fn field_by_id(&self, id: u32) -> Option<&FieldPlan> {
        self.by_id.get(&id).map(|idx| &self.fields[*idx])
    }

    /// Lowest-id field, which carries results and stream elements.
    pub fn first_field(&self) -> Option<&FieldPlan> {
        self.fields.first()
    }
}

fn resolve_kind(schema: &SchemaContract, type_name: &str, label: &str) -> Result<FieldKind> {
    if let Some(scalar) = ScalarType::parse(type_name) {
        return Ok(FieldKind::Scalar(scalar));
    }
    if schema.message(type_name).is_ok() {
        return Ok(FieldKind::Message(type_name.to_string()));
    }
    Err(BridgeError::UnsupportedType {
        type_name: type_name.to_string(),
        field: label.to_string(),
    })
}
