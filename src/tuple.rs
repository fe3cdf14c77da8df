//! Tuples: one source's claim about one leaf.
//!
//! A [`Fact`] is what callers hand to `FactTree::put`. It is either a plain
//! scalar (claimed by the writing agent with full certainty, stamped now) or
//! an explicit [`Claim`] that must carry its own value and certainty. The
//! [`Stamp`] supplies the writing agent and the current time for whatever the
//! fact leaves out.

use serde::{Deserialize, Serialize};

use crate::certainty::{AgentId, Certainty};
use crate::error::ValidationError;
use crate::time::Timestamp;
use crate::value::Scalar;

/// A single source's claimed value, certainty, and timestamp for a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    pub source: AgentId,
    pub value: Scalar,
    pub certainty: Certainty,
    /// Wire tuples without a timestamp are treated as the oldest possible claim.
    #[serde(default)]
    pub timestamp: Timestamp,
}

impl Tuple {
    #[must_use]
    pub fn new(
        source: impl Into<AgentId>,
        value: impl Into<Scalar>,
        certainty: Certainty,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            source: source.into(),
            value: value.into(),
            certainty,
            timestamp,
        }
    }

    /// True when this tuple should win over `other` for the same source.
    ///
    /// Strictly newer wins; an equal timestamp does not displace the holder.
    #[must_use]
    pub fn is_fresher_than(&self, other: &Self) -> bool {
        self.timestamp > other.timestamp
    }
}

/// Who is writing, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub source: AgentId,
    pub timestamp: Timestamp,
}

impl Stamp {
    #[must_use]
    pub fn new(source: impl Into<AgentId>, timestamp: Timestamp) -> Self {
        Self {
            source: source.into(),
            timestamp,
        }
    }
}

/// The object form of a put: explicit value and certainty, optional source and
/// timestamp.
///
/// Fields are optional so that a claim decoded from untrusted input can be
/// rejected with a precise [`ValidationError::MissingField`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certainty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

impl Claim {
    #[must_use]
    pub fn new(value: impl Into<Scalar>, certainty: f64) -> Self {
        Self {
            value: Some(value.into()),
            certainty: Some(certainty),
            source: None,
            timestamp: None,
        }
    }

    /// Attributes the claim to another source.
    #[must_use]
    pub fn from_source(mut self, source: impl Into<AgentId>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Input to `FactTree::put`.
#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    Scalar(Scalar),
    Claim(Claim),
}

impl Fact {
    /// Builds the tuple to store, filling gaps from `stamp`.
    ///
    /// # Errors
    ///
    /// `MissingField` when a claim lacks `value` or `certainty`,
    /// `CertaintyOutOfRange` when the certainty is outside [0, 1].
    pub fn into_tuple(self, stamp: &Stamp) -> Result<Tuple, ValidationError> {
        match self {
            Self::Scalar(value) => Ok(Tuple {
                source: stamp.source.clone(),
                value,
                certainty: Certainty::CERTAIN,
                timestamp: stamp.timestamp,
            }),
            Self::Claim(claim) => {
                let value = claim.value.ok_or_else(|| ValidationError::MissingField {
                    field: "value".to_string(),
                })?;
                let certainty = claim.certainty.ok_or_else(|| ValidationError::MissingField {
                    field: "certainty".to_string(),
                })?;
                Ok(Tuple {
                    source: claim.source.unwrap_or_else(|| stamp.source.clone()),
                    value,
                    certainty: Certainty::new(certainty)?,
                    timestamp: claim.timestamp.unwrap_or(stamp.timestamp),
                })
            }
        }
    }

    /// Reads a fact from JSON: scalars become `Fact::Scalar`, objects become
    /// `Fact::Claim`.
    ///
    /// # Errors
    ///
    /// `MalformedSnapshot` for arrays, `null`, or objects with mistyped fields.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ValidationError> {
        if let Some(scalar) = Scalar::from_json(value) {
            return Ok(Self::Scalar(scalar));
        }
        if value.is_object() {
            let claim: Claim = serde_json::from_value(value.clone()).map_err(|e| {
                ValidationError::MalformedSnapshot {
                    reason: format!("invalid claim: {e}"),
                }
            })?;
            return Ok(Self::Claim(claim));
        }
        Err(ValidationError::MalformedSnapshot {
            reason: format!("a fact must be a scalar or an object, got {value}"),
        })
    }
}

impl From<Claim> for Fact {
    fn from(v: Claim) -> Self {
        Self::Claim(v)
    }
}

impl From<Scalar> for Fact {
    fn from(v: Scalar) -> Self {
        Self::Scalar(v)
    }
}

impl From<bool> for Fact {
    fn from(v: bool) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<i32> for Fact {
    fn from(v: i32) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<i64> for Fact {
    fn from(v: i64) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<f64> for Fact {
    fn from(v: f64) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<&str> for Fact {
    fn from(v: &str) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<String> for Fact {
    fn from(v: String) -> Self {
        Self::Scalar(v.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp() -> Stamp {
        Stamp::new("me", Timestamp::from_millis(1_000))
    }

    #[test]
    fn scalar_fact_is_certain_and_stamped() {
        let tuple = Fact::from("hello").into_tuple(&stamp()).unwrap();
        assert_eq!(tuple.source, AgentId::from("me"));
        assert_eq!(tuple.value, Scalar::from("hello"));
        assert_eq!(tuple.certainty, Certainty::CERTAIN);
        assert_eq!(tuple.timestamp, Timestamp::from_millis(1_000));
    }

    #[test]
    fn claim_keeps_its_own_source_and_timestamp() {
        let claim = Claim::new(3, 0.4).from_source("other").at(Timestamp::from_millis(5));
        let tuple = Fact::from(claim).into_tuple(&stamp()).unwrap();
        assert_eq!(tuple.source, AgentId::from("other"));
        assert_eq!(tuple.timestamp, Timestamp::from_millis(5));
        assert!((tuple.certainty.value() - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn claim_defaults_source_and_timestamp_from_stamp() {
        let tuple = Fact::from(Claim::new(true, 0.9)).into_tuple(&stamp()).unwrap();
        assert_eq!(tuple.source, AgentId::from("me"));
        assert_eq!(tuple.timestamp, Timestamp::from_millis(1_000));
    }

    #[test]
    fn claim_without_certainty_is_rejected() {
        let claim = Claim {
            value: Some(Scalar::Int(1)),
            ..Claim::default()
        };
        let err = Fact::from(claim).into_tuple(&stamp()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                field: "certainty".to_string()
            }
        );
    }

    #[test]
    fn claim_without_value_is_rejected() {
        let claim = Claim {
            certainty: Some(1.0),
            ..Claim::default()
        };
        let err = Fact::from(claim).into_tuple(&stamp()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                field: "value".to_string()
            }
        );
    }

    #[test]
    fn claim_with_bad_certainty_is_rejected() {
        let err = Fact::from(Claim::new(1, 3.0)).into_tuple(&stamp()).unwrap_err();
        assert!(matches!(err, ValidationError::CertaintyOutOfRange { .. }));
    }

    #[test]
    fn fact_from_json() {
        let fact = Fact::from_json(&serde_json::json!({"value": "x", "certainty": 0.5})).unwrap();
        assert_eq!(fact, Fact::Claim(Claim::new("x", 0.5)));

        let fact = Fact::from_json(&serde_json::json!(12)).unwrap();
        assert_eq!(fact, Fact::Scalar(Scalar::Int(12)));

        assert!(Fact::from_json(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn wire_tuple_without_timestamp_is_epoch() {
        let tuple: Tuple =
            serde_json::from_value(serde_json::json!({"source": "s", "value": 1, "certainty": 1.0}))
                .unwrap();
        assert_eq!(tuple.timestamp, Timestamp::EPOCH);
    }

    #[test]
    fn freshness_is_strict() {
        let older = Tuple::new("s", 1, Certainty::CERTAIN, Timestamp::from_millis(1));
        let newer = Tuple::new("s", 2, Certainty::CERTAIN, Timestamp::from_millis(2));
        let tied = Tuple::new("s", 3, Certainty::CERTAIN, Timestamp::from_millis(2));
        assert!(newer.is_fresher_than(&older));
        assert!(!tied.is_fresher_than(&newer));
    }
}
