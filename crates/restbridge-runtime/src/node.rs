use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::error::{BridgeError, Result};

/// A JSON-like value manipulated by the VM through integer handles.
///
/// Composite nodes own their children by value. Object fields keep their
/// insertion order and may repeat a key; lookups return the first match.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Node>),
    Object(Vec<(String, Node)>),
}

impl Node {
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "bool",
            Node::Int(_) => "int",
            Node::Float(_) => "float",
            Node::String(_) => "string",
            Node::Array(_) => "array",
            Node::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    fn mismatch(&self, expected: &'static str) -> BridgeError {
        BridgeError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }

    /// First field named `key` of an object node.
    pub fn field(&self, key: &str) -> Result<&Node> {
        match self {
            Node::Object(fields) => fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v)
                .ok_or_else(|| BridgeError::MissingField(key.to_string())),
            other => Err(other.mismatch("object")),
        }
    }

    /// Element `index` of an array node.
    pub fn element(&self, index: i64) -> Result<&Node> {
        match self {
            Node::Array(items) => usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i))
                .ok_or(BridgeError::IndexOutOfRange {
                    index,
                    len: items.len(),
                }),
            other => Err(other.mismatch("array")),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Node::Int(n) => Ok(*n),
            other => Err(other.mismatch("int")),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Node::Float(n) => Ok(*n),
            other => Err(other.mismatch("float")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Node::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Node::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    /// Number of elements (array) or fields (object); zero for scalars.
    pub fn len(&self) -> usize {
        match self {
            Node::Array(items) => items.len(),
            Node::Object(fields) => fields.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compact JSON text.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse JSON text, preserving key order and duplicate keys.
    pub fn from_json_str(text: &str) -> Result<Node> {
        Ok(serde_json::from_str(text)?)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

// ============================================================================
// Serde
// ============================================================================

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Node::Null => serializer.serialize_unit(),
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Int(n) => serializer.serialize_i64(*n),
            Node::Float(n) => serializer.serialize_f64(*n),
            Node::String(s) => serializer.serialize_str(s),
            Node::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Node::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Node, E> {
        Ok(Node::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Node, E> {
        Ok(Node::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Node, D::Error> {
        Node::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Node, E> {
        Ok(Node::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Node, E> {
        Ok(Node::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Node, E> {
        // Values past i64::MAX degrade to floating point.
        Ok(i64::try_from(v).map_or(Node::Float(v as f64), Node::Int))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Node, E> {
        Ok(Node::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Node, E> {
        Ok(Node::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Node, E> {
        Ok(Node::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Node, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Node::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Node, A::Error> {
        let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, Node>()? {
            fields.push((key, value));
        }
        Ok(Node::Object(fields))
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Node, D::Error> {
        deserializer.deserialize_any(NodeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Node {
        Node::Object(vec![
            ("a".to_string(), Node::Int(1)),
            ("b".to_string(), Node::String("x".to_string())),
        ])
    }

    #[test]
    fn stringify_preserves_insertion_order() {
        let node = Node::Object(vec![
            ("z".to_string(), Node::Int(1)),
            ("a".to_string(), Node::Bool(false)),
        ]);
        assert_eq!(node.to_json_string().unwrap(), r#"{"z":1,"a":false}"#);
        assert_eq!(sample().to_string(), r#"{"a":1,"b":"x"}"#);
    }

    #[test]
    fn parse_keeps_duplicate_keys_and_first_match_wins() {
        let node = Node::from_json_str(r#"{"k": 1, "k": 2, "other": null}"#).unwrap();
        assert_eq!(node.len(), 3);
        assert_eq!(node.field("k").unwrap(), &Node::Int(1));
        assert!(node.field("other").unwrap().is_null());
    }

    #[test]
    fn parse_numbers() {
        let node = Node::from_json_str("[1, -2, 2.5, 18446744073709551615]").unwrap();
        assert_eq!(node.element(0).unwrap(), &Node::Int(1));
        assert_eq!(node.element(1).unwrap(), &Node::Int(-2));
        assert_eq!(node.element(2).unwrap(), &Node::Float(2.5));
        assert!(matches!(node.element(3).unwrap(), Node::Float(_)));
    }

    #[test]
    fn parse_malformed_is_json_error() {
        let err = Node::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, BridgeError::Json(_)));
    }

    #[test]
    fn field_on_non_object_is_type_mismatch() {
        let err = Node::Int(3).field("a").unwrap_err();
        assert!(matches!(
            err,
            BridgeError::TypeMismatch {
                expected: "object",
                found: "int"
            }
        ));
    }

    #[test]
    fn missing_field_and_bad_index() {
        assert!(matches!(
            sample().field("c"),
            Err(BridgeError::MissingField(_))
        ));
        let arr = Node::Array(vec![Node::Null]);
        assert!(matches!(
            arr.element(1),
            Err(BridgeError::IndexOutOfRange { index: 1, len: 1 })
        ));
        assert!(arr.element(-1).is_err());
    }

    #[test]
    fn scalar_accessors_are_strict() {
        assert_eq!(Node::Int(5).as_int().unwrap(), 5);
        assert!(Node::Int(5).as_float().is_err());
        assert!(Node::Float(5.0).as_int().is_err());
        assert!(Node::String("5".into()).as_int().is_err());
        assert!(Node::Bool(true).as_bool().unwrap());
        assert_eq!(Node::String("hi".into()).as_str().unwrap(), "hi");
    }

    #[test]
    fn nested_round_trip_through_text() {
        let text = r#"{"list":[1,{"deep":true}],"name":"n","none":null}"#;
        let node = Node::from_json_str(text).unwrap();
        assert_eq!(node.to_json_string().unwrap(), text);
    }
}
