use async_trait::async_trait;

use super::{Backend, OperationHandler, Reply, merge_existing};
use crate::errors::StoreError;
use crate::request::{Operation, StorageRequest};

/// Set-merges `data` into every document matching `select`.
pub struct UpdateHandler;

#[async_trait]
impl OperationHandler for UpdateHandler {
    fn operation(&self) -> Operation {
        Operation::Update
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

        merge_existing(backend, request).await?;
        Ok(Reply::Done)
    }
}
