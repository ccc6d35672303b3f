//! Schema Contract: the JSON description of services and messages.
//!
//! The document is produced outside this crate (by a schema deriver that
//! reads the function tree's signatures) and is treated as immutable for the
//! lifetime of a process. Its shape follows the protobuf.js JSON layout:
//!
//! ```json
//! { "nested": {
//!     "srv_a": { "methods": { "it": { "requestType": "A", "responseType": "B" } } },
//!     "A": { "fields": { "entry": { "id": 1, "type": "string" } } }
//! } }
//! ```

use crate::error::{BridgeError, Result};
use crate::shape::RpcShape;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Top-level schema document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaContract {
    #[serde(default)]
    pub nested: BTreeMap<String, Namespace>,
}

/// One entry of the `nested` table: a service or a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Namespace {
    Service(ServiceDef),
    Message(MessageDef),
}

/// A service and its method table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDef {
    pub methods: BTreeMap<String, MethodDef>,
}

/// One method entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDef {
    pub request_type: String,
    pub response_type: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub request_stream: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub response_stream: bool,
}

impl MethodDef {
    pub fn new(request_type: impl Into<String>, response_type: impl Into<String>) -> Self {
        Self {
            request_type: request_type.into(),
            response_type: response_type.into(),
            request_stream: false,
            response_stream: false,
        }
    }

    pub fn with_shape(mut self, shape: RpcShape) -> Self {
        let (request_stream, response_stream) = shape.flags();
        self.request_stream = request_stream;
        self.response_stream = response_stream;
        self
    }

    pub fn shape(&self) -> RpcShape {
        RpcShape::from_flags(self.request_stream, self.response_stream)
    }
}

/// A message and its field table. Key order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDef {
    pub fields: BTreeMap<String, FieldDef>,
}

impl MessageDef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a singular field.
    pub fn field(mut self, name: impl Into<String>, id: u32, type_name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), FieldDef::new(id, type_name));
        self
    }

    /// Add a repeated field.
    pub fn repeated(mut self, name: impl Into<String>, id: u32, type_name: impl Into<String>) -> Self {
        let mut def = FieldDef::new(id, type_name);
        def.rule = FieldRule::Repeated;
        self.fields.insert(name.into(), def);
        self
    }

    /// Add a field the sender must always write.
    pub fn required(mut self, name: impl Into<String>, id: u32, type_name: impl Into<String>) -> Self {
        let mut def = FieldDef::new(id, type_name);
        def.rule = FieldRule::Required;
        self.fields.insert(name.into(), def);
        self
    }

    /// Add a map field with the given key and value types.
    pub fn map(
        mut self,
        name: impl Into<String>,
        id: u32,
        key_type: impl Into<String>,
        value_type: impl Into<String>,
    ) -> Self {
        let mut def = FieldDef::new(id, value_type);
        def.key_type = Some(key_type.into());
        self.fields.insert(name.into(), def);
        self
    }
}

/// Field descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub id: u32,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "FieldRule::is_singular")]
    pub rule: FieldRule,
    #[serde(rename = "keyType", default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
}

impl FieldDef {
    pub fn new(id: u32, type_name: impl Into<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            rule: FieldRule::Singular,
            key_type: None,
        }
    }
}

/// Field cardinality. `required` and `optional` both behave as singular.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldRule {
    #[default]
    #[serde(alias = "optional")]
    Singular,
    Required,
    Repeated,
}

impl FieldRule {
    pub fn is_singular(&self) -> bool {
        matches!(self, FieldRule::Singular)
    }

    pub fn is_repeated(&self) -> bool {
        matches!(self, FieldRule::Repeated)
    }
}

impl SchemaContract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a schema document.
    pub fn from_json(json: &str) -> Result<Self> {
        let schema: SchemaContract = serde_json::from_str(json)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn with_message(mut self, name: impl Into<String>, message: MessageDef) -> Self {
        self.nested.insert(name.into(), Namespace::Message(message));
        self
    }

    /// Add a method under the service derived from `path`.
    pub fn with_method(mut self, path: &CallPath, method: MethodDef) -> Self {
        let entry = self
            .nested
            .entry(path.service_name())
            .or_insert_with(|| Namespace::Service(ServiceDef::default()));
        if let Namespace::Service(service) = entry {
            service.methods.insert(path.method_name().to_string(), method);
        }
        self
    }

    /// Check the id invariants: positive and unique within each message.
    pub fn validate(&self) -> Result<()> {
        for (name, namespace) in &self.nested {
            let Namespace::Message(message) = namespace else {
                continue;
            };
            let mut seen = HashSet::new();
            for (field_name, field) in &message.fields {
                if field.id == 0 {
                    return Err(BridgeError::InvalidSchema {
                        message: format!("{}.{} has field id 0", name, field_name),
                    });
                }
                if !seen.insert(field.id) {
                    return Err(BridgeError::InvalidSchema {
                        message: format!("{} reuses field id {}", name, field.id),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn message(&self, name: &str) -> Result<&MessageDef> {
        match self.nested.get(name) {
            Some(Namespace::Message(message)) => Ok(message),
            _ => Err(BridgeError::UnknownMessage {
                name: name.to_string(),
            }),
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDef> {
        match self.nested.get(name) {
            Some(Namespace::Service(service)) => Some(service),
            _ => None,
        }
    }

    /// Resolve the method entry for a call path.
    pub fn method(&self, path: &CallPath) -> Result<&MethodDef> {
        self.service(&path.service_name())
            .and_then(|service| service.methods.get(path.method_name()))
            .ok_or_else(|| BridgeError::UnknownPath {
                path: path.to_string(),
            })
    }

    /// Resolve a method from its wire address.
    pub fn method_by_name(&self, service: &str, method: &str) -> Option<&MethodDef> {
        self.service(service)
            .and_then(|service| service.methods.get(method))
    }
}

/// A `/`-joined sequence of property names identifying one leaf function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallPath {
    segments: Vec<String>,
}

impl CallPath {
    /// Build a path from its segments, root first.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(BridgeError::UnknownPath {
                path: segments.join("/"),
            });
        }
        Ok(Self { segments })
    }

    /// Path built from compile-time names, which are never empty.
    pub(crate) fn from_static(segments: &[&'static str]) -> Self {
        Self {
            segments: segments.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn parse(path: &str) -> Result<Self> {
        Self::new(path.split('/'))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Final segment.
    pub fn method_name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// `srv` followed by every segment but the last, joined with `_`, with
    /// any non-word character replaced by `_`.
    pub fn service_name(&self) -> String {
        let prefix = &self.segments[..self.segments.len() - 1];
        std::iter::once("srv")
            .chain(prefix.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("/")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect()
    }

    /// Full wire endpoint `{host}/{service}/{method}`.
    pub fn endpoint(&self, host: &str) -> String {
        format!(
            "{}/{}/{}",
            host.trim_end_matches('/'),
            self.service_name(),
            self.method_name()
        )
    }
}

impl fmt::Display for CallPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
