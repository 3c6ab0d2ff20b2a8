//! The document store the gateway writes through.
//!
//! The gateway only needs four primitives from a backend. None of them is
//! atomic with respect to another, so the find-then-act sequences of update,
//! upsert and remove can interleave with concurrent writers; see
//! [`crate::locks`] for the in-process mitigation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::request::{Document, FindOptions};

/// Result envelope of a find, returned verbatim to read callers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FindResult {
    /// Matching documents after skip, limit and projection.
    pub result: Vec<Document>,
    /// Number of matches before skip and limit.
    pub count: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
        projection: &[String],
    ) -> Result<FindResult, StoreError>;

    async fn insert(&self, collection: &str, document: &Document) -> Result<(), StoreError>;

    /// Merges the fields of `set` into every document matching `filter`.
    async fn update(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> Result<(), StoreError>;

    async fn remove(&self, collection: &str, filter: &Document) -> Result<(), StoreError>;
}
