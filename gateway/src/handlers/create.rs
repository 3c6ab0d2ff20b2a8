use async_trait::async_trait;

use super::{Backend, OperationHandler, Reply, insert_new};
use crate::errors::StoreError;
use crate::request::{Operation, StorageRequest};

/// Inserts `data` under a freshly generated `internal_id`.
pub struct CreateHandler;

#[async_trait]
impl OperationHandler for CreateHandler {
    fn operation(&self) -> Operation {
        Operation::Create
    }

    async fn handle(
        &self,
        backend: &Backend,
        request: &mut StorageRequest,
    ) -> Result<Reply, StoreError> {
        let id = insert_new(backend, request).await?;
        Ok(Reply::Created(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CHANGED_AT, CREATED_AT, INTERNAL_ID};
    use crate::store::Store;
    use crate::testutils::{doc, test_backend};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_stamps_and_stores_document() {
        let (backend, store, clock) = test_backend();
        clock.set(1_700_000_000_000);

        let mut request = StorageRequest {
            collection: "c".into(),
            data: doc(json!({"name": "a"})),
            ..Default::default()
        };
        let reply = CreateHandler.handle(&backend, &mut request).await.unwrap();

        let Reply::Created(id) = reply else {
            panic!("create must answer with the new id");
        };
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let stored = store
            .find("c", &doc(json!({"name": "a"})), &Default::default(), &[])
            .await
            .unwrap();
        assert_eq!(stored.count, 1);
        let document = &stored.result[0];
        assert_eq!(document[INTERNAL_ID], json!(id));
        assert_eq!(document[CREATED_AT], json!(1_700_000_000_000_i64));
        assert_eq!(document[CHANGED_AT], document[CREATED_AT]);

        // The duplicated copy carries the read-back document
        assert_eq!(request.result, stored.result);
        assert_eq!(request.data[INTERNAL_ID], json!(id));
    }

    #[tokio::test]
    async fn test_create_ignores_caller_identity() {
        let (backend, store, _clock) = test_backend();

        let mut request = StorageRequest {
            collection: "c".into(),
            data: doc(json!({"name": "a", "internal_id": "mine", "cr_time": 1})),
            ..Default::default()
        };
        let Reply::Created(id) = CreateHandler.handle(&backend, &mut request).await.unwrap()
        else {
            panic!("create must answer with the new id");
        };

        assert_ne!(id, "mine");
        let stored = store
            .find("c", &doc(json!({"internal_id": id})), &Default::default(), &[])
            .await
            .unwrap();
        assert_eq!(stored.count, 1);
        assert_ne!(stored.result[0][CREATED_AT], json!(1));
    }
}
