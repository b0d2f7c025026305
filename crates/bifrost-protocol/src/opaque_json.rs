use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;

/// A JSON value carried as an opaque, order-preserving blob.
///
/// spec.md §4.6/§9 requires that vendor-facing tool `parameters` (and sibling
/// payloads like `response_format.json_schema`) round-trip with their original
/// key order intact, at every nesting level. `serde_json`'s `preserve_order`
/// feature keeps order for values decoded straight into `serde_json::Value`,
/// but nothing stops a careless hop through a `HashMap`-backed DTO from losing
/// it. Wrapping the bytes in `RawValue` instead makes that hop a compile error:
/// there is no field to read out of an `OpaqueJson`, only the original bytes
/// to re-emit.
#[derive(Debug, Clone)]
pub struct OpaqueJson(Box<RawValue>);

impl OpaqueJson {
    pub fn from_raw(raw: Box<RawValue>) -> Self {
        Self(raw)
    }

    /// Parses `text` just enough to validate it is well-formed JSON, keeping
    /// the original bytes (and therefore key order) for re-serialization.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw = RawValue::from_string(text.to_string())?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    pub fn into_raw(self) -> Box<RawValue> {
        self.0
    }
}

impl Deref for OpaqueJson {
    type Target = RawValue;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for OpaqueJson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.get())
    }
}

impl Serialize for OpaqueJson {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OpaqueJson {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Ok(Self(raw))
    }
}

impl PartialEq for OpaqueJson {
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_key_order_through_round_trip() {
        let original = r#"{"summary":1,"reasoning":2,"tags":[3,2,1],"confidence":4}"#;
        let parsed: OpaqueJson = serde_json::from_str(original).unwrap();
        let re_encoded = serde_json::to_string(&parsed).unwrap();
        assert_eq!(re_encoded, original);
    }

    #[test]
    fn nested_objects_keep_order() {
        let original =
            r#"{"$defs":{"b":1,"a":2},"properties":{"z":1,"y":2,"x":3},"items":{"q":1,"p":2}}"#;
        let parsed: OpaqueJson = serde_json::from_str(original).unwrap();
        assert_eq!(serde_json::to_string(&parsed).unwrap(), original);
    }
}
