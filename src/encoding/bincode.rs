use crate::error::Result;
use crate::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize a value using bincode
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Serialization(format!("encode: {}", e)))
}

/// Deserialize a value from a byte slice using bincode
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Serialization(format!("decode: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: u32,
        endpoint: String,
        body: Vec<u8>,
    }

    #[test]
    fn test_serialize_deserialize() {
        let original = Record {
            id: 42,
            endpoint: "/v1/metrics".to_string(),
            body: vec![1, 2, 3],
        };

        let bytes = serialize(&original).unwrap();
        let decoded: Record = deserialize(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_truncated_data() {
        let bytes = serialize(&"hello world".to_string()).unwrap();
        let result: Result<String> = deserialize(&bytes[..4]);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
