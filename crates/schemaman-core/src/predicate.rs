//! Field-equality predicates for `filter` and `delete_filter`.

use schemaman_state::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conjunction of `field == value` tests. The empty predicate matches every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Predicate(Record);

impl Predicate {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn from_record(fields: Record) -> Self {
        Self(fields)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every constrained field is present with an equal value.
    pub fn matches(&self, record: &Record) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn empty_matches_everything() {
        assert!(Predicate::all().matches(&Record::new()));
        assert!(Predicate::all().matches(&record(json!({"name": "web-1"}))));
    }

    #[test]
    fn every_field_must_match() {
        let p = Predicate::eq("role", "web").and("port", 80);
        assert!(p.matches(&record(json!({"role": "web", "port": 80, "name": "a"}))));
        assert!(!p.matches(&record(json!({"role": "web", "port": 443}))));
        assert!(!p.matches(&record(json!({"role": "web"}))));
    }

    #[test]
    fn deserializes_from_json_object() {
        let p: Predicate = serde_json::from_str(r#"{"role": "db"}"#).unwrap();
        assert_eq!(p, Predicate::eq("role", "db"));
    }
}
