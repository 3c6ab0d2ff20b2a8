use async_trait::async_trait;
use serde_json::Value;

use super::{Backend, OperationHandler, Reply, insert_new, merge_existing};
use crate::errors::StoreError;
use crate::request::{FindOptions, INTERNAL_ID, Operation, StorageRequest};

/// Find-or-create on `select`.
///
/// The existence check and the following write are separate store calls. With
/// write serialization enabled, upserts sharing a filter cannot interleave in
/// this process; otherwise two concurrent upserts may both insert.
pub struct UpsertHandler;

#[async_trait]
impl OperationHandler for UpsertHandler {
    fn operation(&self) -> Operation {
        Operation::Upsert
    }

    async fn handle(
        &self,
        backend: &Backend,
        request: &mut StorageRequest,
    ) -> Result<Reply, StoreError> {
        let _guard = backend
            .locks
            .acquire(&request.collection, &request.select)
            .await;

        // Only the first match matters; keep the caller's ordering, drop the
        // projection so internal_id is always present.
        let probe = FindOptions {
            limit: Some(1),
            skip: None,
            sort: request.options.sort.clone(),
        };
        let existing = backend
            .store
            .find(&request.collection, &request.select, &probe, &[])
            .await?;

        let id = match existing.result.first() {
            Some(document) => {
                let id = document
                    .get(INTERNAL_ID)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if id.is_empty() {
                    tracing::debug!(
                        collection = %request.collection,
                        "upsert matched a document without internal_id"
                    );
                }

                merge_existing(backend, request).await?;
                id
            }
            None => insert_new(backend, request).await?,
        };

        Ok(Reply::Created(id))
    }
}
