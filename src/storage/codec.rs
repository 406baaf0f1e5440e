//! Alarm `matching_metadata` wire encoding.
//!
//! Two shapes exist in stored alarms:
//! - flat document `{"key": value, ...}` (older writers)
//! - list of pairs `[{"key": k, "value": v}, ...]` (canonical, written today)
//!
//! Readers accept both; writers always emit the list of pairs.

use bson::{Bson, Document, doc};

use crate::storage::StorageError;
use crate::storage::types::Metadata;

/// Classified stored shape.
#[derive(Debug)]
enum StoredMetadata<'a> {
    Flat(&'a Document),
    Pairs(&'a [Bson]),
}

impl<'a> StoredMetadata<'a> {
    fn classify(value: &'a Bson) -> Result<Self, StorageError> {
        match value {
            Bson::Document(flat) => Ok(Self::Flat(flat)),
            Bson::Array(pairs) => Ok(Self::Pairs(pairs)),
            other => Err(StorageError::InvalidData(format!(
                "matching_metadata must be a document or a list of pairs, got {other}"
            ))),
        }
    }
}

/// Encode metadata in the canonical list-of-pairs shape.
///
/// An empty map is stored as an empty document.
pub fn encode_matching_metadata(metadata: &Metadata) -> Result<Bson, StorageError> {
    if metadata.is_empty() {
        return Ok(Bson::Document(Document::new()));
    }

    let mut pairs = Vec::with_capacity(metadata.len());
    for (key, value) in metadata {
        pairs.push(Bson::Document(
            doc! { "key": key.as_str(), "value": bson::to_bson(value)? },
        ));
    }
    Ok(Bson::Array(pairs))
}

/// Decode either stored shape into a flat map. Absent or null decodes empty.
pub fn decode_matching_metadata(stored: Option<&Bson>) -> Result<Metadata, StorageError> {
    let Some(value) = stored.filter(|v| !matches!(v, Bson::Null)) else {
        return Ok(Metadata::new());
    };

    match StoredMetadata::classify(value)? {
        StoredMetadata::Flat(flat) => Ok(bson::from_document(flat.clone())?),
        StoredMetadata::Pairs(pairs) => {
            let mut metadata = Metadata::new();
            for pair in pairs {
                let Bson::Document(pair) = pair else {
                    return Err(StorageError::InvalidData(format!(
                        "matching_metadata pair must be a document, got {pair}"
                    )));
                };
                let key = pair.get_str("key").map_err(|_| {
                    StorageError::InvalidData("matching_metadata pair without string key".into())
                })?;
                let value = pair.get("value").cloned().ok_or_else(|| {
                    StorageError::InvalidData(format!("matching_metadata pair '{key}' without value"))
                })?;
                metadata.insert(key.to_string(), bson::from_bson(value)?);
            }
            Ok(metadata)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: serde_json::Value) -> Metadata {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_encode_emits_pairs() {
        let encoded = encode_matching_metadata(&metadata(json!({"host": "h1"}))).unwrap();
        assert_eq!(
            encoded,
            Bson::Array(vec![Bson::Document(doc! { "key": "host", "value": "h1" })])
        );
    }

    #[test]
    fn test_encode_empty_passes_through() {
        let encoded = encode_matching_metadata(&Metadata::new()).unwrap();
        assert_eq!(encoded, Bson::Document(Document::new()));
        assert!(decode_matching_metadata(Some(&encoded)).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip() {
        let original = metadata(json!({
            "host": "h1",
            "size": 4,
            "ratio": 0.5,
            "tags": ["a", "b"],
            "nested": {"zone": "z"},
            "flag": true,
        }));
        let encoded = encode_matching_metadata(&original).unwrap();
        assert_eq!(decode_matching_metadata(Some(&encoded)).unwrap(), original);
    }

    #[test]
    fn test_decode_flat_shape() {
        let stored = Bson::Document(doc! { "host": "h1", "size": 4_i64 });
        let decoded = decode_matching_metadata(Some(&stored)).unwrap();
        assert_eq!(decoded, metadata(json!({"host": "h1", "size": 4})));
    }

    #[test]
    fn test_decode_absent_or_null() {
        assert!(decode_matching_metadata(None).unwrap().is_empty());
        assert!(decode_matching_metadata(Some(&Bson::Null)).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode_matching_metadata(Some(&Bson::String("x".into()))).is_err());
        let no_key = Bson::Array(vec![Bson::Document(doc! { "value": 1 })]);
        assert!(decode_matching_metadata(Some(&no_key)).is_err());
        let no_value = Bson::Array(vec![Bson::Document(doc! { "key": "k" })]);
        assert!(decode_matching_metadata(Some(&no_value)).is_err());
        let scalar_pair = Bson::Array(vec![Bson::Int32(1)]);
        assert!(decode_matching_metadata(Some(&scalar_pair)).is_err());
    }
}
