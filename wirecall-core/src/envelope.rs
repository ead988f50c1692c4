use crate::codec::{Deserializer, Serializer};
use crate::descriptor::TypeDescriptor;
use crate::error::RpcError;
use crate::exception::{from_holder, to_holder, ExceptionDataHolder};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire-level result of one call: a payload, or the projection of the error
/// that prevented one. A `null` payload is a successful void result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionDataHolder>,
}

impl Envelope {
    pub fn success(payload: Option<Value>) -> Self {
        Envelope {
            payload: payload.filter(|v| !v.is_null()),
            exception: None,
        }
    }

    pub fn failure(error: &RpcError) -> Self {
        Envelope {
            payload: None,
            exception: Some(to_holder(error)),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.exception.is_some()
    }

    /// The exception wins over the payload when both are populated.
    pub fn into_result(self) -> Result<Option<Value>, RpcError> {
        match self.exception {
            Some(holder) => Err(from_holder(holder)),
            None => Ok(self.payload),
        }
    }

    pub async fn encode(&self, serializer: &dyn Serializer) -> Result<Bytes, RpcError> {
        let value = serde_json::to_value(self)?;
        serializer.serialize(&value).await
    }

    pub async fn decode(deserializer: &dyn Deserializer, bytes: &[u8]) -> Result<Envelope, RpcError> {
        let value = deserializer
            .deserialize(bytes, &TypeDescriptor::envelope())
            .await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::invocation(format!("Malformed envelope: {}", e)))
    }
}
