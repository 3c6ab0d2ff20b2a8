//! One handler per operation.
//!
//! Handlers talk to the store and fill `request.result` with what the store
//! returned; they never authorize or duplicate. The dispatcher runs the
//! permission gate before a handler and the duplication after it.

mod create;
mod read;
mod remove;
mod update;
mod upsert;

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::clock::Clock;
use crate::errors::StoreError;
use crate::locks::WriteLocks;
use crate::request::{Operation, StorageRequest};
use crate::store::{FindResult, Store};

pub use create::CreateHandler;
pub use read::ReadHandler;
pub use remove::RemoveHandler;
pub use update::UpdateHandler;
pub use upsert::UpsertHandler;

/// Everything a handler may touch.
pub struct Backend {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub locks: WriteLocks,
}

/// Successful outcome of an operation, as the caller sees it.
#[derive(Debug, PartialEq)]
pub enum Reply {
    /// The store's own result envelope.
    Documents(FindResult),
    /// `{"Status":"Ok","Result":"<internal_id>"}`
    Created(String),
    /// `{"Status":"Ok"}`
    Done,
}

impl Reply {
    pub fn to_json(&self) -> Value {
        match self {
            Reply::Documents(found) => json!(found),
            Reply::Created(id) => json!({"Status": "Ok", "Result": id}),
            Reply::Done => json!({"Status": "Ok"}),
        }
    }
}

#[async_trait]
pub trait OperationHandler: Send + Sync {
    fn operation(&self) -> Operation;

    async fn handle(
        &self,
        backend: &Backend,
        request: &mut StorageRequest,
    ) -> Result<Reply, StoreError>;
}

pub fn handler_for(operation: Operation) -> &'static dyn OperationHandler {
    match operation {
        Operation::Read => &ReadHandler,
        Operation::Create => &CreateHandler,
        Operation::Update => &UpdateHandler,
        Operation::Upsert => &UpsertHandler,
        Operation::Remove => &RemoveHandler,
    }
}

/// Inserts `request.data` as a new document and reads it back.
///
/// The read-back filters on the whole stamped document, which includes the
/// fresh `internal_id`, so it normally returns exactly the inserted document.
async fn insert_new(backend: &Backend, request: &mut StorageRequest) -> Result<String, StoreError> {
    let id = crate::request::new_internal_id();
    request.stamp_created(&id, backend.clock.now());

    backend
        .store
        .insert(&request.collection, &request.data)
        .await?;

    let stored = backend
        .store
        .find(
            &request.collection,
            &request.data,
            &request.options,
            &request.include_fields,
        )
        .await?;
    request.result = stored.result;

    Ok(id)
}

/// Set-merges `request.data` into the documents matching `select` and reads
/// them back.
async fn merge_existing(backend: &Backend, request: &mut StorageRequest) -> Result<(), StoreError> {
    request.stamp_changed(backend.clock.now());

    backend
        .store
        .update(&request.collection, &request.select, &request.data)
        .await?;

    let updated = backend
        .store
        .find(
            &request.collection,
            &request.select,
            &request.options,
            &request.include_fields,
        )
        .await?;
    request.result = updated.result;

    Ok(())
}
