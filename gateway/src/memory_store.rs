//! In-process document store.
//!
//! Backs development setups and the test suite. Filters are equality matches
//! on top-level or dotted field paths; query operators (`$gt`, `$in`, ...) are
//! rejected rather than silently ignored.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::errors::StoreError;
use crate::request::{Document, FindOptions};
use crate::store::{FindResult, Store};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
        projection: &[String],
    ) -> Result<FindResult, StoreError> {
        validate_filter(filter)?;
        let sort = sort_keys(options.sort.as_ref())?;

        let mut matched: Vec<Document> = self
            .collections
            .read()
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|document| matches(document, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let count = matched.len() as u64;

        if !sort.is_empty() {
            matched.sort_by(|a, b| {
                sort.iter()
                    .map(|(field, descending)| {
                        let ordering = compare_values(lookup(a, field), lookup(b, field));
                        if *descending { ordering.reverse() } else { ordering }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }

        let skip = options.skip.unwrap_or(0) as usize;
        // A zero limit means no limit
        let limit = match options.limit {
            None | Some(0) => usize::MAX,
            Some(limit) => limit as usize,
        };

        let result = matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|document| project(document, projection))
            .collect();

        Ok(FindResult { result, count })
    }

    async fn insert(&self, collection: &str, document: &Document) -> Result<(), StoreError> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(document.clone());
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> Result<(), StoreError> {
        validate_filter(filter)?;

        let mut collections = self.collections.write();
        if let Some(documents) = collections.get_mut(collection) {
            for document in documents.iter_mut().filter(|d| matches(d, filter)) {
                for (field, value) in set {
                    document.insert(field.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, collection: &str, filter: &Document) -> Result<(), StoreError> {
        validate_filter(filter)?;

        let mut collections = self.collections.write();
        if let Some(documents) = collections.get_mut(collection) {
            documents.retain(|document| !matches(document, filter));
        }
        Ok(())
    }
}

fn validate_filter(filter: &Document) -> Result<(), StoreError> {
    for (field, expected) in filter {
        if field.starts_with('$') {
            return Err(StoreError::UnsupportedOperator(field.clone()));
        }
        if let Value::Object(inner) = expected
            && let Some(operator) = inner.keys().find(|key| key.starts_with('$'))
        {
            return Err(StoreError::UnsupportedOperator(operator.clone()));
        }
    }
    Ok(())
}

fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(field, expected)| lookup(document, field) == Some(expected))
}

/// Resolves `a.b.c` style paths through nested documents.
fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    if let Some(value) = document.get(path) {
        return Some(value);
    }

    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn sort_keys(sort: Option<&Document>) -> Result<Vec<(String, bool)>, StoreError> {
    let Some(sort) = sort else {
        return Ok(Vec::new());
    };

    sort.iter()
        .map(|(field, direction)| match direction.as_i64() {
            Some(1) => Ok((field.clone(), false)),
            Some(-1) => Ok((field.clone(), true)),
            _ => Err(StoreError::InvalidSort(field.clone())),
        })
        .collect()
}

// Missing and null sort first, then numbers, strings, documents, arrays, booleans.
fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn project(document: Document, projection: &[String]) -> Document {
    if projection.is_empty() {
        return document;
    }
    document
        .into_iter()
        .filter(|(field, _)| projection.iter().any(|p| p == field))
        .collect()
}
