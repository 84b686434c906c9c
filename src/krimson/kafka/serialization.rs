use serde::{Deserialize, Serialize};

/// Serialization error type
#[derive(Debug)]
pub enum SerializationError {
    SerializationFailed(String),
    DeserializationFailed(String),
    InvalidUtf8(String),
    JsonError(Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Display for SerializationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializationError::SerializationFailed(msg) => {
                write!(f, "Serialization failed: {}", msg)
            }
            SerializationError::DeserializationFailed(msg) => {
                write!(f, "Deserialization failed: {}", msg)
            }
            SerializationError::InvalidUtf8(msg) => write!(f, "Invalid UTF-8: {}", msg),
            SerializationError::JsonError(err) => write!(f, "JSON error: {}", err),
        }
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::JsonError(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Trait for serializers that can convert between objects and bytes
pub trait Serializer<T>: Send + Sync {
    /// Serialize an object to bytes
    fn serialize(&self, value: &T) -> Result<Vec<u8>, SerializationError>;

    /// Deserialize bytes to an object
    fn deserialize(&self, bytes: &[u8]) -> Result<T, SerializationError>;
}

/// Serialize a struct to JSON bytes
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
    serde_json::to_vec(value).map_err(|e| SerializationError::JsonError(Box::new(e)))
}

/// Deserialize JSON bytes to a struct
pub fn from_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, SerializationError> {
    serde_json::from_slice(bytes).map_err(|e| SerializationError::JsonError(Box::new(e)))
}

/// JSON serializer implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T> Serializer<T> for JsonSerializer
where
    T: Serialize + for<'de> Deserialize<'de> + Send + Sync,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        to_json(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        from_json(bytes)
    }
}

/// Raw bytes serializer that performs no conversion
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer<Vec<u8>> for BytesSerializer {
    fn serialize(&self, value: &Vec<u8>) -> Result<Vec<u8>, SerializationError> {
        Ok(value.clone())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>, SerializationError> {
        Ok(bytes.to_vec())
    }
}

/// String serializer that converts strings to/from UTF-8 bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl Serializer<String> for StringSerializer {
    fn serialize(&self, value: &String) -> Result<Vec<u8>, SerializationError> {
        Ok(value.as_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String, SerializationError> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SerializationError::InvalidUtf8(e.to_string()))
    }
}
