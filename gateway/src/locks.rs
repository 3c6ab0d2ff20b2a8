//! Per-filter serialization of find-then-act writes.
//!
//! Update, upsert and remove first read the documents matching `select` and
//! then write to them. The store gives no atomicity across those calls, so two
//! upserts with the same filter could both see "no match" and both insert.
//! `WriteLocks` hands out one async mutex per `(collection, select)` pair so
//! such requests run one after another inside this process.
//!
//! Requests with different filters that happen to match the same documents,
//! and requests served by other gateway processes, are not serialized.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::request::Document;

type Table = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

#[derive(Clone)]
pub struct WriteLocks {
    table: Option<Arc<Table>>,
}

impl WriteLocks {
    pub fn new(enabled: bool) -> Self {
        Self {
            table: enabled.then(|| Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// Waits until no other request holds the lock for this filter. Returns
    /// `None` when serialization is disabled.
    pub async fn acquire(&self, collection: &str, select: &Document) -> Option<WriteGuard> {
        let table = self.table.as_ref()?;
        let key = lock_key(collection, select);

        let lock = table.lock().entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;

        Some(WriteGuard {
            key,
            table: table.clone(),
            guard: Some(guard),
        })
    }

    /// Number of filters with a holder or waiter.
    pub fn active(&self) -> usize {
        self.table.as_ref().map(|t| t.lock().len()).unwrap_or(0)
    }
}

// Documents keep the caller's key order, so keys are sorted before rendering.
fn lock_key(collection: &str, select: &Document) -> String {
    format!("{collection}\u{0}{}", canonical(select))
}

fn canonical(document: &Document) -> Value {
    let mut fields: Vec<_> = document.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    Value::Object(
        fields
            .into_iter()
            .map(|(field, value)| (field.clone(), canonical_value(value)))
            .collect(),
    )
}

fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Object(document) => canonical(document),
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        other => other.clone(),
    }
}

pub struct WriteGuard {
    key: String,
    table: Arc<Table>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        // Release first so the strong count only reflects the table and waiters.
        drop(self.guard.take());

        let mut table = self.table.lock();
        if let Some(lock) = table.get(&self.key)
            && Arc::strong_count(lock) == 1
        {
            table.remove(&self.key);
        }
    }
}
