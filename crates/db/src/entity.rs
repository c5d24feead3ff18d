use std::{cmp::Ordering, convert::Infallible, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

/// A document type stored in its own collection
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection name
    const NAME: &'static str;

    /// Ledger-style collections reject update and delete
    const APPEND_ONLY: bool = false;

    fn id(&self) -> Uuid;

    /// Bump `updated_at`
    fn touch(&mut self, now: DateTime<Utc>);

    /// Business-level validation, returning a human readable message
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Fields whose value must be unique within the collection
    fn unique_keys(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }
}

/// Conjunction of field equality conditions. Field names may use dots to
/// reach into nested objects (`recipient.email`).
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq<V: Serialize>(mut self, field: impl Into<String>, value: V) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.conditions.push((field.into(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| lookup(doc, field).unwrap_or(&Value::Null) == expected)
    }
}

/// `"field"` sorts ascending, `"-field"` descending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    pub field: String,
    pub descending: bool,
}

impl SortOrder {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ordering = compare_values(
            lookup(a, &self.field).unwrap_or(&Value::Null),
            lookup(b, &self.field).unwrap_or(&Value::Null),
        );
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

impl FromStr for SortOrder {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(s),
        })
    }
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, key| current.get(key))
}

/// Total order over JSON scalars. Timestamps compare chronologically since
/// serialized fractional seconds vary in length.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_filter_matches_nested_fields() {
        let doc = json!({"status": "active", "recipient": {"type": "user", "email": "a@b.vn"}});

        assert!(Filter::new().eq("status", "active").matches(&doc));
        assert!(
            Filter::new()
                .eq("recipient.type", "user")
                .eq("recipient.email", "a@b.vn")
                .matches(&doc)
        );
        assert!(!Filter::new().eq("status", "pending").matches(&doc));
        assert!(!Filter::new().eq("missing", "x").matches(&doc));
        assert!(Filter::new().eq("missing", Option::<String>::None).matches(&doc));
    }

    #[test]
    fn test_sort_order_parses_direction() {
        assert_eq!("-created_at".parse::<SortOrder>().unwrap(), SortOrder::desc("created_at"));
        assert_eq!("amount".parse::<SortOrder>().unwrap(), SortOrder::asc("amount"));
    }

    #[test]
    fn test_timestamps_compare_chronologically() {
        let sort = SortOrder::asc("t");
        let early = json!({"t": "2025-03-01T10:00:00.5Z"});
        let late = json!({"t": "2025-03-01T10:00:01Z"});
        assert_eq!(sort.compare(&early, &late), Ordering::Less);
    }
}
