use async_trait::async_trait;

use super::{Backend, OperationHandler, Reply};
use crate::errors::StoreError;
use crate::request::{Operation, StorageRequest};

/// Removes every document matching `select`, keeping a snapshot of what was
/// there for the duplicated copy.
pub struct RemoveHandler;

#[async_trait]
impl OperationHandler for RemoveHandler {
    fn operation(&self) -> Operation {
        Operation::Remove
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

        let snapshot = backend
            .store
            .find(
                &request.collection,
                &request.select,
                &request.options,
                &request.include_fields,
            )
            .await?;

        backend
            .store
            .remove(&request.collection, &request.select)
            .await?;

        request.result = snapshot.result;
        Ok(Reply::Done)
    }
}
