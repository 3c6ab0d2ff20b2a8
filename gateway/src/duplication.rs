//! Best-effort mirroring of processed requests to a secondary consumer.
//!
//! After an operation succeeds the dispatcher hands its request to
//! [`DuplicationSink::duplicate`]. The sink serializes and enqueues the copy on
//! a detached task, so the caller's response never waits on it and never sees
//! its failures. A small pool of forwarders drains the queue and POSTs every
//! envelope to the configured consumer.
//!
//! Delivery is at most once: envelopes that cannot be serialized, do not fit
//! in the queue under the `drop` policy, or are rejected by the consumer are
//! logged, counted and discarded. Envelopes are independent of each other and
//! may be delivered in any order.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use shared::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::{DuplicationConfig, OverflowPolicy};
use crate::errors::DuplicationError;
use crate::metrics_defs::{
    DUPLICATION_DROPPED, DUPLICATION_ENQUEUED, DUPLICATION_FORWARD_FAILED, DUPLICATION_FORWARDED,
};
use crate::request::{Operation, StorageRequest};

/// What the consumer receives: the processed request, serialized and
/// base64-encoded in `data`, and the configured duplication label in `method`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DuplicatedEnvelope {
    #[serde(with = "base64_payload")]
    pub data: Vec<u8>,
    pub method: String,
}

impl DuplicatedEnvelope {
    /// Tags the request with its operation and wraps it for the consumer.
    pub fn new(
        label: &str,
        operation: Operation,
        mut request: StorageRequest,
    ) -> Result<Self, DuplicationError> {
        request.method = Some(operation);
        Ok(Self {
            data: serde_json::to_vec(&request)?,
            method: label.to_string(),
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes, DuplicationError> {
        Ok(serde_json::to_vec(self).map(Bytes::from)?)
    }

    /// The duplicated request, as the consumer would decode it.
    pub fn request(&self) -> Result<StorageRequest, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }
}

mod base64_payload {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Producer side of the duplication queue. Cheap to clone.
#[derive(Clone)]
pub struct DuplicationSink {
    label: Arc<str>,
    overflow: OverflowPolicy,
    tx: mpsc::Sender<Bytes>,
}

impl DuplicationSink {
    /// Creates the sink and the queue its envelopes are written to.
    pub fn new(
        label: &str,
        queue_size: usize,
        overflow: OverflowPolicy,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(queue_size);
        let sink = Self {
            label: Arc::from(label),
            overflow,
            tx,
        };
        (sink, rx)
    }

    /// False once nothing drains the queue anymore.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Mirrors a processed request on a detached task.
    pub fn duplicate(&self, operation: Operation, request: StorageRequest) {
        let sink = self.clone();
        tokio::spawn(async move {
            if let Err(err) = sink.enqueue(operation, request).await {
                tracing::warn!(
                    %operation,
                    label = %sink.label,
                    error = %err,
                    "dropping duplicated request"
                );
                counter!(DUPLICATION_DROPPED, "reason" => err.reason()).increment(1);
            }
        });
    }

    pub(crate) async fn enqueue(
        &self,
        operation: Operation,
        request: StorageRequest,
    ) -> Result<(), DuplicationError> {
        let envelope = DuplicatedEnvelope::new(&self.label, operation, request)?.to_bytes()?;

        match self.overflow {
            OverflowPolicy::Drop => self.tx.try_send(envelope).map_err(|err| match err {
                TrySendError::Full(_) => DuplicationError::QueueFull,
                TrySendError::Closed(_) => DuplicationError::QueueClosed,
            })?,
            OverflowPolicy::Block => self
                .tx
                .send(envelope)
                .await
                .map_err(|_| DuplicationError::QueueClosed)?,
        }

        counter!(DUPLICATION_ENQUEUED).increment(1);
        Ok(())
    }
}

/// POSTs envelopes to the duplication consumer.
pub struct Forwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    target: Uri,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(config: &DuplicationConfig) -> Result<Self, DuplicationError> {
        let target = config
            .url
            .as_str()
            .parse::<Uri>()
            .map_err(|e| DuplicationError::InvalidTarget(e.to_string()))?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            client,
            target,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub async fn forward(&self, envelope: Bytes) -> Result<(), DuplicationError> {
        let target = self.target.to_string();
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.target.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(envelope))
            .map_err(|e| DuplicationError::InvalidTarget(e.to_string()))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| e.to_string())?;
            let status = response.status();
            // Read the body to the end so the connection goes back to the pool
            response
                .into_body()
                .collect()
                .await
                .map_err(|e| e.to_string())?;
            Ok::<_, String>(status)
        };

        let status = timeout(self.timeout, exchange)
            .await
            .map_err(|_| DuplicationError::ForwardTimeout(target.clone()))?
            .map_err(|reason| DuplicationError::ForwardFailed {
                target: target.clone(),
                reason,
            })?;

        if !status.is_success() {
            return Err(DuplicationError::ForwardFailed {
                target,
                reason: format!("consumer answered {status}"),
            });
        }
        Ok(())
    }
}

/// Starts `config.workers` tasks draining `receiver` into the consumer. They
/// stop once every sink handle has been dropped and the queue is empty.
pub fn spawn_forwarders(
    config: &DuplicationConfig,
    receiver: mpsc::Receiver<Bytes>,
) -> Result<Vec<JoinHandle<()>>, DuplicationError> {
    let forwarder = Arc::new(Forwarder::new(config)?);
    let receiver = Arc::new(Mutex::new(receiver));

    let workers = (0..config.workers)
        .map(|worker| {
            let forwarder = forwarder.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move { run_forwarder(worker, forwarder, receiver).await })
        })
        .collect();

    Ok(workers)
}

async fn run_forwarder(
    worker: usize,
    forwarder: Arc<Forwarder>,
    receiver: Arc<Mutex<mpsc::Receiver<Bytes>>>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(envelope) = next else {
            tracing::debug!(worker, "duplication queue closed, forwarder exiting");
            return;
        };

        match forwarder.forward(envelope).await {
            Ok(()) => counter!(DUPLICATION_FORWARDED).increment(1),
            Err(err) => {
                tracing::warn!(worker, error = %err, "failed to forward duplicated request");
                counter!(DUPLICATION_FORWARD_FAILED).increment(1);
            }
        }
    }
}
