use crate::args::json_kind;
use crate::descriptor::TypeDescriptor;
use crate::error::RpcError;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[async_trait]
pub trait Serializer: Send + Sync + fmt::Debug {
    /// Media type stamped on every context carrying this serializer's output.
    fn content_type(&self) -> &str;

    async fn serialize(&self, value: &Value) -> Result<Bytes, RpcError>;

    /// The deserializer that reads this serializer's output.
    fn deserializer(&self) -> Arc<dyn Deserializer>;
}

#[async_trait]
pub trait Deserializer: Send + Sync + fmt::Debug {
    async fn deserialize(&self, bytes: &[u8], target: &TypeDescriptor) -> Result<Value, RpcError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeserializer;

#[async_trait]
impl Serializer for JsonSerializer {
    fn content_type(&self) -> &str {
        JSON_CONTENT_TYPE
    }

    async fn serialize(&self, value: &Value) -> Result<Bytes, RpcError> {
        let json = serde_json::to_vec(value)?;
        Ok(Bytes::from(json))
    }

    fn deserializer(&self) -> Arc<dyn Deserializer> {
        Arc::new(JsonDeserializer)
    }
}

#[async_trait]
impl Deserializer for JsonDeserializer {
    async fn deserialize(&self, bytes: &[u8], target: &TypeDescriptor) -> Result<Value, RpcError> {
        let value: Value = serde_json::from_slice(bytes)?;
        if !target.accepts(&value) {
            return Err(RpcError::invocation(format!(
                "Expected {} but decoded {}",
                target,
                json_kind(&value)
            )));
        }
        Ok(value)
    }
}

/// Deserializers keyed by media type, with a fallback for unknown or missing
/// content types.
#[derive(Debug, Clone)]
pub struct DeserializerRegistry {
    by_type: HashMap<String, Arc<dyn Deserializer>>,
    fallback: Arc<dyn Deserializer>,
}

impl DeserializerRegistry {
    pub fn new(fallback: Arc<dyn Deserializer>) -> Self {
        DeserializerRegistry {
            by_type: HashMap::new(),
            fallback,
        }
    }

    /// Registry whose fallback is the serializer's own deserializer, also
    /// registered under the serializer's content type.
    pub fn for_serializer(serializer: &dyn Serializer) -> Self {
        let mut registry = Self::new(serializer.deserializer());
        registry.register(serializer.content_type(), serializer.deserializer());
        registry
    }

    pub fn register(&mut self, content_type: &str, deserializer: Arc<dyn Deserializer>) {
        self.by_type.insert(normalize(content_type), deserializer);
    }

    pub fn lookup(&self, content_type: Option<&str>) -> Arc<dyn Deserializer> {
        content_type
            .and_then(|ct| self.by_type.get(&normalize(ct)))
            .unwrap_or(&self.fallback)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

// "Application/JSON; charset=utf-8" -> "application/json"
fn normalize(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
