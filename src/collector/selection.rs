//! Container selection rules.
//!
//! An input's `detail` may carry `IncludeEnv`, `IncludeLabel`, `ExcludeEnv`
//! and `ExcludeLabel` maps of `name -> regex`. A container matches when every
//! include pattern matches the observed value and no exclude pattern does.

use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("{field} must be an object of name -> pattern")]
    InvalidShape { field: &'static str },
    #[error("{field}.{key} pattern must be a string")]
    NonStringPattern { field: &'static str, key: String },
    #[error("{field}.{key} has invalid pattern: {source}")]
    InvalidPattern {
        field: &'static str,
        key: String,
        #[source]
        source: regex::Error,
    },
}

const INCLUDE_ENV: &str = "IncludeEnv";
const INCLUDE_LABEL: &str = "IncludeLabel";
const EXCLUDE_ENV: &str = "ExcludeEnv";
const EXCLUDE_LABEL: &str = "ExcludeLabel";

#[derive(Debug, Clone, Default)]
pub struct SelectionRule {
    include_env: Vec<(String, Regex)>,
    include_label: Vec<(String, Regex)>,
    exclude_env: Vec<(String, Regex)>,
    exclude_label: Vec<(String, Regex)>,
}

impl SelectionRule {
    /// Compiles the rule embedded in a plugin detail. Returns `None` when the
    /// detail carries no selection fields at all.
    pub fn from_detail(detail: &Value) -> Result<Option<Self>, SelectionError> {
        let Some(object) = detail.as_object() else {
            return Ok(None);
        };

        if ![INCLUDE_ENV, INCLUDE_LABEL, EXCLUDE_ENV, EXCLUDE_LABEL]
            .iter()
            .any(|field| object.contains_key(*field))
        {
            return Ok(None);
        }

        Ok(Some(Self {
            include_env: compile_patterns(object.get(INCLUDE_ENV), INCLUDE_ENV)?,
            include_label: compile_patterns(object.get(INCLUDE_LABEL), INCLUDE_LABEL)?,
            exclude_env: compile_patterns(object.get(EXCLUDE_ENV), EXCLUDE_ENV)?,
            exclude_label: compile_patterns(object.get(EXCLUDE_LABEL), EXCLUDE_LABEL)?,
        }))
    }

    pub fn matches(&self, env: &HashMap<String, String>, labels: &HashMap<String, String>) -> bool {
        let included = |patterns: &[(String, Regex)], values: &HashMap<String, String>| {
            patterns.iter().all(|(key, pattern)| {
                values
                    .get(key)
                    .is_some_and(|value| pattern.is_match(value))
            })
        };
        let excluded = |patterns: &[(String, Regex)], values: &HashMap<String, String>| {
            patterns.iter().any(|(key, pattern)| {
                values
                    .get(key)
                    .is_some_and(|value| pattern.is_match(value))
            })
        };

        included(&self.include_env, env)
            && included(&self.include_label, labels)
            && !excluded(&self.exclude_env, env)
            && !excluded(&self.exclude_label, labels)
    }

    pub fn env_keys(&self) -> impl Iterator<Item = &str> {
        self.include_env
            .iter()
            .chain(self.exclude_env.iter())
            .map(|(key, _)| key.as_str())
    }

    pub fn label_keys(&self) -> impl Iterator<Item = &str> {
        self.include_label
            .iter()
            .chain(self.exclude_label.iter())
            .map(|(key, _)| key.as_str())
    }

    /// True when any of the given changed keys is referenced by this rule.
    pub fn references(&self, env_keys: &BTreeSet<String>, label_keys: &BTreeSet<String>) -> bool {
        self.env_keys().any(|key| env_keys.contains(key))
            || self.label_keys().any(|key| label_keys.contains(key))
    }
}

fn compile_patterns(
    value: Option<&Value>,
    field: &'static str,
) -> Result<Vec<(String, Regex)>, SelectionError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    if value.is_null() {
        return Ok(Vec::new());
    }
    let object = value
        .as_object()
        .ok_or(SelectionError::InvalidShape { field })?;

    // Sorted for stable iteration order in diagnostics.
    let sorted: BTreeMap<_, _> = object.iter().collect();
    sorted
        .into_iter()
        .map(|(key, pattern)| {
            let pattern = pattern
                .as_str()
                .ok_or_else(|| SelectionError::NonStringPattern {
                    field,
                    key: key.clone(),
                })?;
            let regex = Regex::new(pattern).map_err(|source| SelectionError::InvalidPattern {
                field,
                key: key.clone(),
                source,
            })?;
            Ok((key.clone(), regex))
        })
        .collect()
}

/// Distinct env and label names referenced by the selection rules of the
/// loaded configs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionKeys {
    pub env: HashSet<String>,
    pub label: HashSet<String>,
}

impl SelectionKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb_rule(&mut self, rule: &SelectionRule) {
        self.env.extend(rule.env_keys().map(str::to_string));
        self.label.extend(rule.label_keys().map(str::to_string));
    }

    pub fn is_empty(&self) -> bool {
        self.env.is_empty() && self.label.is_empty()
    }
}
