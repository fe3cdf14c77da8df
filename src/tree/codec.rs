//! JSON wire form of a fact tree.
//!
//! Objects are branches, arrays are leaves (each element a tuple object),
//! scalars are attributes, and `null` members are dropped.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

use super::path::is_segment;
use super::{insert_tuple, FactTree, Node};
use crate::error::ValidationError;
use crate::tuple::Tuple;
use crate::value::Scalar;

impl FactTree {
    /// Decodes a snapshot from its JSON wire form.
    ///
    /// A leaf listing the same source twice keeps the later entry, so decoded
    /// trees hold at most one tuple per source like trees built with `put`.
    ///
    /// # Errors
    ///
    /// `MalformedSnapshot` when the root is not an object, a key is not a
    /// single path segment, or a leaf element is not a valid tuple.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let Value::Object(members) = value else {
            return Err(ValidationError::MalformedSnapshot {
                reason: format!("snapshot root must be an object, got {}", json_kind(value)),
            });
        };
        Ok(Self {
            root: decode_branch(members, "")?,
        })
    }

    /// Encodes the tree in its JSON wire form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        encode_branch(&self.root)
    }
}

fn decode_branch(members: &Map<String, Value>, prefix: &str) -> Result<BTreeMap<String, Node>, ValidationError> {
    let mut children = BTreeMap::new();
    for (key, value) in members {
        if !is_segment(key) {
            return Err(ValidationError::MalformedSnapshot {
                reason: format!("invalid key '{key}' under '{prefix}'"),
            });
        }
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let node = match value {
            Value::Null => continue,
            Value::Object(inner) => Node::Branch(decode_branch(inner, &path)?),
            Value::Array(items) => Node::Leaf(decode_leaf(items, &path)?),
            scalar => match Scalar::from_json(scalar) {
                Some(s) => Node::Attribute(s),
                None => {
                    return Err(ValidationError::MalformedSnapshot {
                        reason: format!("unsupported value at '{path}'"),
                    })
                }
            },
        };
        children.insert(key.clone(), node);
    }
    Ok(children)
}

fn decode_leaf(items: &[Value], path: &str) -> Result<Vec<Tuple>, ValidationError> {
    let mut tuples = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let tuple: Tuple = serde_json::from_value(item.clone()).map_err(|e| ValidationError::MalformedSnapshot {
            reason: format!("invalid tuple at '{path}'[{index}]: {e}"),
        })?;
        insert_tuple(&mut tuples, tuple);
    }
    Ok(tuples)
}

fn encode_branch(children: &BTreeMap<String, Node>) -> Value {
    let members = children
        .iter()
        .map(|(key, node)| {
            let value = match node {
                Node::Branch(inner) => encode_branch(inner),
                Node::Leaf(tuples) => Value::Array(tuples.iter().map(encode_tuple).collect()),
                Node::Attribute(scalar) => scalar.to_json(),
            };
            (key.clone(), value)
        })
        .collect();
    Value::Object(members)
}

fn encode_tuple(tuple: &Tuple) -> Value {
    let certainty = Number::from_f64(tuple.certainty.value()).map_or(Value::Null, Value::Number);
    let mut members = Map::new();
    members.insert("source".to_string(), Value::String(tuple.source.to_string()));
    members.insert("value".to_string(), tuple.value.to_json());
    members.insert("certainty".to_string(), certainty);
    members.insert("timestamp".to_string(), Value::from(tuple.timestamp.as_millis()));
    Value::Object(members)
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl Serialize for FactTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FactTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certainty::AgentId;
    use crate::time::Timestamp;
    use serde_json::json;

    #[test]
    fn decodes_branches_leaves_and_attributes() {
        let tree = FactTree::from_json(&json!({
            "xi": {
                "event": {
                    "id": "e-1",
                    "input": {
                        "text": [
                            {"source": "asr", "value": "hello", "certainty": 0.8, "timestamp": 5}
                        ]
                    }
                }
            }
        }))
        .unwrap();

        assert_eq!(tree.attribute("xi.event.id"), Some(&Scalar::from("e-1")));
        let leaf = tree.leaf("xi.event.input.text").unwrap();
        assert_eq!(leaf[0].source, AgentId::from("asr"));
        assert_eq!(leaf[0].timestamp, Timestamp::from_millis(5));
    }

    #[test]
    fn null_members_are_dropped() {
        let tree = FactTree::from_json(&json!({"a": null, "b": {"c": null}})).unwrap();
        assert!(tree.get("a").is_none());
        assert_eq!(tree.get("b"), Some(&Node::empty_branch()));
    }

    #[test]
    fn duplicate_sources_keep_the_last_entry() {
        let tree = FactTree::from_json(&json!({
            "a": [
                {"source": "s", "value": 1, "certainty": 1.0, "timestamp": 9},
                {"source": "s", "value": 2, "certainty": 1.0, "timestamp": 3}
            ]
        }))
        .unwrap();
        let leaf = tree.leaf("a").unwrap();
        assert_eq!(leaf.len(), 1);
        assert_eq!(leaf[0].value, Scalar::Int(2));
    }

    #[test]
    fn rejects_malformed_snapshots() {
        assert!(FactTree::from_json(&json!([1, 2])).is_err());
        assert!(FactTree::from_json(&json!({"a": [{"value": 1, "certainty": 1.0}]})).is_err());
        assert!(FactTree::from_json(&json!({"a": [{"source": "s", "value": 1, "certainty": 4.0}]})).is_err());
        assert!(FactTree::from_json(&json!({"a": [42]})).is_err());
    }

    #[test]
    fn rejects_keys_that_are_not_single_segments() {
        let tuple = json!([{"source": "s", "value": 1, "certainty": 1.0}]);
        for wire in [
            json!({"a.b": tuple.clone()}),
            json!({"": tuple.clone()}),
            json!({"a": {"b c": tuple.clone()}}),
            json!({"a": {"x.": {"y": tuple}}}),
        ] {
            let err = FactTree::from_json(&wire).unwrap_err();
            assert!(matches!(err, ValidationError::MalformedSnapshot { .. }), "{wire}");
        }
    }

    #[test]
    fn certainty_survives_a_round_trip() {
        let wire = json!({
            "a": [
                {"source": "s", "value": 1, "certainty": 0.1, "timestamp": 1},
                {"source": "t", "value": 2, "certainty": 0.7, "timestamp": 2}
            ]
        });
        let encoded = FactTree::from_json(&wire).unwrap().to_json();
        assert_eq!(encoded["a"][0]["certainty"], json!(0.1));
        assert_eq!(encoded["a"][1]["certainty"], json!(0.7));
    }

    #[test]
    fn encodes_back_to_the_wire_form() {
        let wire = json!({
            "xi": {
                "event": {"id": "e-1"},
                "flag": [{"source": "s", "value": true, "certainty": 1.0, "timestamp": 7}]
            }
        });
        let tree = FactTree::from_json(&wire).unwrap();
        assert_eq!(tree.to_json(), wire);
    }

    #[test]
    fn serde_goes_through_the_codec() {
        let tree: FactTree = serde_json::from_str(r#"{"a":{"b":[{"source":"s","value":"x","certainty":0.5}]}}"#).unwrap();
        assert_eq!(tree.leaf("a.b").unwrap()[0].timestamp, Timestamp::EPOCH);
        let text = serde_json::to_string(&tree).unwrap();
        assert!(text.contains("\"timestamp\":0"));
    }
}
