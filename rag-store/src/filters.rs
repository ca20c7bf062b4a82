//! Typed metadata filters and their conversion to Qdrant `Filter`.
//!
//! Scalars become exact keyword matches, lists become any-of matches, and
//! all keys are combined conjunctively (`must`).

use std::collections::BTreeMap;

use qdrant_client::qdrant::{Condition, Filter};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::RagError;

pub const MAX_FILTER_KEYS: usize = 16;
pub const MAX_KEY_LEN: usize = 64;
pub const MAX_VALUE_LEN: usize = 256;
pub const MAX_LIST_LEN: usize = 32;

/// Value of one filter key: a single string or a list of alternatives.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    One(String),
    Many(Vec<String>),
}

/// Bounded `key -> value` filter map. Keys are kept sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilters(pub BTreeMap<String, FilterValue>);

impl MetadataFilters {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilterValue)> {
        self.0.iter()
    }

    /// Checks every bound.
    ///
    /// # Errors
    /// [`RagError::InvalidFilter`] naming the first violation.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.0.len() > MAX_FILTER_KEYS {
            return Err(RagError::InvalidFilter(format!(
                "at most {MAX_FILTER_KEYS} keys allowed, got {}",
                self.0.len()
            )));
        }
        for (key, value) in &self.0 {
            if !valid_key(key) {
                return Err(RagError::InvalidFilter(format!(
                    "key `{key}` must match [A-Za-z0-9_.-]{{1,{MAX_KEY_LEN}}}"
                )));
            }
            match value {
                FilterValue::One(v) => check_value(key, v)?,
                FilterValue::Many(list) => {
                    if list.is_empty() || list.len() > MAX_LIST_LEN {
                        return Err(RagError::InvalidFilter(format!(
                            "`{key}` needs 1..={MAX_LIST_LEN} values, got {}",
                            list.len()
                        )));
                    }
                    for v in list {
                        check_value(key, v)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds the Qdrant filter, or `None` when there are no keys.
    pub fn to_qdrant_filter(&self) -> Option<Filter> {
        if self.0.is_empty() {
            return None;
        }
        debug!(keys = self.0.len(), "filters::to_qdrant_filter");
        Some(Filter::must(self.conditions()))
    }

    /// One condition per key, in key order.
    pub fn conditions(&self) -> Vec<Condition> {
        self.0
            .iter()
            .map(|(key, value)| match value {
                FilterValue::One(v) => Condition::matches(key.clone(), v.clone()),
                FilterValue::Many(list) => Condition::matches(key.clone(), list.clone()),
            })
            .collect()
    }
}

impl<K: Into<String>> FromIterator<(K, FilterValue)> for MetadataFilters {
    fn from_iter<T: IntoIterator<Item = (K, FilterValue)>>(iter: T) -> Self {
        MetadataFilters(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn check_value(key: &str, value: &str) -> Result<(), RagError> {
    let n = value.chars().count();
    if n == 0 || n > MAX_VALUE_LEN {
        return Err(RagError::InvalidFilter(format!(
            "`{key}` values must be 1..={MAX_VALUE_LEN} chars, got {n}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(v: &str) -> FilterValue {
        FilterValue::One(v.to_string())
    }

    #[test]
    fn deserializes_scalars_and_lists() {
        let f: MetadataFilters =
            serde_json::from_str(r#"{"product":"openshift","version":["4.14","4.15"]}"#).unwrap();
        assert_eq!(f.0["product"], one("openshift"));
        assert_eq!(
            f.0["version"],
            FilterValue::Many(vec!["4.14".into(), "4.15".into()])
        );
        assert!(f.validate().is_ok());
    }

    #[test]
    fn bounds_are_enforced() {
        let too_many: MetadataFilters = (0..17).map(|i| (format!("k{i}"), one("v"))).collect();
        assert!(too_many.validate().is_err());

        let bad_key: MetadataFilters = [("bad key", one("v"))].into_iter().collect();
        assert!(bad_key.validate().is_err());

        let long_key: MetadataFilters = [("k".repeat(65), one("v"))].into_iter().collect();
        assert!(long_key.validate().is_err());

        let empty_value: MetadataFilters = [("k", one(""))].into_iter().collect();
        assert!(empty_value.validate().is_err());

        let long_value: MetadataFilters = [("k", one(&"x".repeat(257)))].into_iter().collect();
        assert!(long_value.validate().is_err());

        let empty_list: MetadataFilters =
            [("k", FilterValue::Many(vec![]))].into_iter().collect();
        assert!(empty_list.validate().is_err());

        let long_list: MetadataFilters = [("k", FilterValue::Many(vec!["v".into(); 33]))]
            .into_iter()
            .collect();
        assert!(long_list.validate().is_err());

        let list_with_blank: MetadataFilters =
            [("k", FilterValue::Many(vec!["a".into(), String::new()]))]
                .into_iter()
                .collect();
        assert!(list_with_blank.validate().is_err());
    }

    #[test]
    fn every_key_becomes_a_must_condition() {
        let f: MetadataFilters = [
            ("source", one("a.md")),
            ("tag", FilterValue::Many(vec!["x".into(), "y".into()])),
        ]
        .into_iter()
        .collect();

        let q = f.to_qdrant_filter().unwrap();
        assert_eq!(q.must.len(), 2);
        assert!(q.should.is_empty());
        assert!(MetadataFilters::default().to_qdrant_filter().is_none());
    }
}
