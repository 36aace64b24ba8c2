//! Kubernetes-style label selector parser: `a=b,c!=d,e in (x,y),!f` (§6.1).
//!
//! `!=` desugars to a `NotIn` requirement; multiple `!=` clauses on the same key collapse
//! into one `NotIn` with the combined value set (§8 boundary behaviors). Equality clauses
//! (`=`/`==`) on the same key must agree on the value, or the selector is rejected
//! (`a=1,a=1` accepted, `a=1,a=2` rejected).

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::model::Labels;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("malformed selector expression {0:?}")]
    Malformed(String),
    #[error("conflicting values for key {0:?}")]
    Conflict(String),
    #[error("empty label key in expression {0:?}")]
    EmptyKey(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    Exists(String),
    DoesNotExist(String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|req| match req {
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
            Requirement::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(key, values) => {
                labels.get(key).map_or(true, |v| !values.contains(v))
            }
        })
    }

    pub fn unparse(&self) -> String {
        let mut parts = Vec::with_capacity(self.requirements.len());
        for req in &self.requirements {
            let part = match req {
                Requirement::Exists(key) => key.clone(),
                Requirement::DoesNotExist(key) => format!("!{key}"),
                Requirement::In(key, values) if values.len() == 1 => {
                    format!("{key}={}", values.iter().next().unwrap())
                }
                Requirement::In(key, values) => {
                    format!("{key} in ({})", join_sorted(values))
                }
                Requirement::NotIn(key, values) => {
                    format!("{key} notin ({})", join_sorted(values))
                }
            };
            parts.push(part);
        }
        parts.join(",")
    }
}

fn join_sorted(values: &BTreeSet<String>) -> String {
    values.iter().cloned().collect::<Vec<_>>().join(",")
}

pub fn parse_selector(raw: &str) -> Result<Selector, SelectorError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Selector::default());
    }

    let mut equalities: BTreeMap<String, String> = BTreeMap::new();
    let mut not_ins: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut others: Vec<Requirement> = Vec::new();

    for expr in split_top_level_commas(raw) {
        let expr = expr.trim();
        if expr.is_empty() {
            continue;
        }

        if let Some(key) = expr.strip_prefix('!') {
            let key = key.trim();
            if key.is_empty() {
                return Err(SelectorError::EmptyKey(expr.to_string()));
            }
            others.push(Requirement::DoesNotExist(key.to_string()));
            continue;
        }

        if let Some((key, value)) = expr.split_once("!=") {
            let key = key.trim();
            if key.is_empty() {
                return Err(SelectorError::EmptyKey(expr.to_string()));
            }
            not_ins
                .entry(key.to_string())
                .or_default()
                .insert(value.trim().to_string());
            continue;
        }

        if let Some((key, value)) = expr.split_once("==") {
            let key = key.trim();
            if key.is_empty() {
                return Err(SelectorError::EmptyKey(expr.to_string()));
            }
            insert_equality(&mut equalities, key, value.trim())?;
            continue;
        }

        if let Some((key, value)) = expr.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                return Err(SelectorError::EmptyKey(expr.to_string()));
            }
            insert_equality(&mut equalities, key, value.trim())?;
            continue;
        }

        if let Some(req) = parse_set_based(expr)? {
            others.push(req);
            continue;
        }

        // Bare key: Exists.
        others.push(Requirement::Exists(expr.to_string()));
    }

    let mut requirements: Vec<Requirement> = equalities
        .into_iter()
        .map(|(k, v)| Requirement::In(k, BTreeSet::from([v])))
        .collect();
    requirements.extend(not_ins.into_iter().map(|(k, v)| Requirement::NotIn(k, v)));
    requirements.extend(others);

    Ok(Selector { requirements })
}

fn insert_equality(
    equalities: &mut BTreeMap<String, String>,
    key: &str,
    value: &str,
) -> Result<(), SelectorError> {
    match equalities.get(key) {
        Some(existing) if existing != value => Err(SelectorError::Conflict(key.to_string())),
        _ => {
            equalities.insert(key.to_string(), value.to_string());
            Ok(())
        }
    }
}

/// Parses `key in (v1,v2)` / `key notin (v1,v2)`.
fn parse_set_based(expr: &str) -> Result<Option<Requirement>, SelectorError> {
    let open = match expr.find('(') {
        Some(idx) => idx,
        None => return Ok(None),
    };
    if !expr.ends_with(')') {
        return Err(SelectorError::Malformed(expr.to_string()));
    }
    let head = expr[..open].trim();
    let (key, op) = if let Some(key) = head.strip_suffix("notin") {
        (key.trim(), "notin")
    } else if let Some(key) = head.strip_suffix("in") {
        (key.trim(), "in")
    } else {
        return Err(SelectorError::Malformed(expr.to_string()));
    };
    if key.is_empty() {
        return Err(SelectorError::EmptyKey(expr.to_string()));
    }
    let inner = &expr[open + 1..expr.len() - 1];
    let values: BTreeSet<String> = inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();

    Ok(Some(if op == "in" {
        Requirement::In(key.to_string(), values)
    } else {
        Requirement::NotIn(key.to_string(), values)
    }))
}

/// Splits on top-level commas only, ignoring commas nested inside `(...)`.
fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (idx, ch) in s.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}
