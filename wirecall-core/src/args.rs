use crate::error::RpcError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Named call arguments, keyed by each parameter's declared name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Map<String, Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Serialize>(&mut self, name: impl Into<String>, value: T) -> Result<(), RpcError> {
        let name = name.into();
        let value = serde_json::to_value(value).map_err(|e| {
            RpcError::invocation(format!("Argument '{}' is not serializable: {}", name, e))
        })?;
        self.values.insert(name, value);
        Ok(())
    }

    pub fn insert_value(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Removes and decodes an argument. An absent argument decodes from `null`,
    /// so optional parameters may be omitted by the caller.
    pub fn take<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, RpcError> {
        let value = self.values.remove(name).unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            RpcError::invocation(format!("Argument '{}' could not be decoded: {}", name, e))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }

    /// Accepts a decoded object; `null` is an empty argument list.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        match value {
            Value::Object(values) => Ok(Arguments { values }),
            Value::Null => Ok(Arguments::new()),
            other => Err(RpcError::invocation(format!(
                "Expected a named-argument object but received {}",
                json_kind(&other)
            ))),
        }
    }
}

impl FromIterator<(String, Value)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Arguments {
            values: iter.into_iter().collect(),
        }
    }
}

/// Short description of a JSON value's shape, for error messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
