use async_trait::async_trait;

use super::{Backend, OperationHandler, Reply};
use crate::errors::StoreError;
use crate::request::{Operation, StorageRequest};

/// Pass-through query.
pub struct ReadHandler;

#[async_trait]
impl OperationHandler for ReadHandler {
    fn operation(&self) -> Operation {
        Operation::Read
    }

    async fn handle(
        &self,
        backend: &Backend,
        request: &mut StorageRequest,
    ) -> Result<Reply, StoreError> {
        let found = backend
            .store
            .find(
                &request.collection,
                &request.select,
                &request.options,
                &request.include_fields,
            )
            .await?;

        request.result = found.result.clone();
        Ok(Reply::Documents(found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::testutils::{doc, test_backend};
    use serde_json::json;

    #[tokio::test]
    async fn test_read_returns_store_envelope() {
        let (backend, store, _clock) = test_backend();
        store.insert("c", &doc(json!({"name": "a", "n": 1}))).await.unwrap();
        store.insert("c", &doc(json!({"name": "b", "n": 2}))).await.unwrap();

        let mut request = StorageRequest {
            collection: "c".into(),
            select: doc(json!({"name": "b"})),
            include_fields: vec!["n".into()],
            ..Default::default()
        };
        let reply = ReadHandler.handle(&backend, &mut request).await.unwrap();

        let Reply::Documents(found) = reply else {
            panic!("read must answer with documents");
        };
        assert_eq!(found.count, 1);
        assert_eq!(found.result, vec![doc(json!({"n": 2}))]);
        assert_eq!(request.result, found.result);
    }
}
