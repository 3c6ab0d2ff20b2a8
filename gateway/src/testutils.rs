use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::auth::{Authorizer, RequestContext};
use crate::clock::Clock;
use crate::duplication::DuplicatedEnvelope;
use crate::errors::{AuthError, StoreError};
use crate::handlers::Backend;
use crate::locks::WriteLocks;
use crate::memory_store::MemoryStore;
use crate::request::{Document, FindOptions, Operation};
use crate::store::{FindResult, Store};

pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("not a document: {other}"),
    }
}

pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn test_backend() -> (Backend, Arc<MemoryStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let (backend, clock) = test_backend_with(store.clone());
    (backend, store, clock)
}

pub fn test_backend_with(store: Arc<dyn Store>) -> (Backend, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let backend = Backend {
        store,
        clock: clock.clone(),
        locks: WriteLocks::new(true),
    };
    (backend, clock)
}

#[derive(Clone, Copy, PartialEq)]
pub enum FailOn {
    Find,
    Insert,
    Update,
    Remove,
}

/// A memory store whose chosen primitive always fails.
pub struct FailingStore {
    inner: MemoryStore,
    fail_on: FailOn,
    pub mutations: AtomicUsize,
}

impl FailingStore {
    pub fn new(fail_on: FailOn) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_on,
            mutations: AtomicUsize::new(0),
        }
    }

    fn check(&self, op: FailOn) -> Result<(), StoreError> {
        if self.fail_on == op {
            return Err(StoreError::Backend("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
        projection: &[String],
    ) -> Result<FindResult, StoreError> {
        self.check(FailOn::Find)?;
        self.inner.find(collection, filter, options, projection).await
    }

    async fn insert(&self, collection: &str, document: &Document) -> Result<(), StoreError> {
        self.check(FailOn::Insert)?;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.insert(collection, document).await
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> Result<(), StoreError> {
        self.check(FailOn::Update)?;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.update(collection, filter, set).await
    }

    async fn remove(&self, collection: &str, filter: &Document) -> Result<(), StoreError> {
        self.check(FailOn::Remove)?;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(collection, filter).await
    }
}

/// A memory store whose reads take `delay`.
pub struct SlowStore {
    pub inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl Store for SlowStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
        projection: &[String],
    ) -> Result<FindResult, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find(collection, filter, options, projection).await
    }

    async fn insert(&self, collection: &str, document: &Document) -> Result<(), StoreError> {
        self.inner.insert(collection, document).await
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> Result<(), StoreError> {
        self.inner.update(collection, filter, set).await
    }

    async fn remove(&self, collection: &str, filter: &Document) -> Result<(), StoreError> {
        self.inner.remove(collection, filter).await
    }
}

/// Authorizer returning a fixed verdict and recording what it was asked.
pub struct ScriptedAuthorizer {
    verdict: Result<(), AuthError>,
    pub calls: parking_lot::Mutex<Vec<(Option<String>, String, Operation)>>,
}

impl ScriptedAuthorizer {
    pub fn allow() -> Self {
        Self::with_verdict(Ok(()))
    }

    pub fn deny(reason: &str) -> Self {
        Self::with_verdict(Err(AuthError::Denied(reason.to_string())))
    }

    pub fn with_verdict(verdict: Result<(), AuthError>) -> Self {
        Self {
            verdict,
            calls: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Authorizer for ScriptedAuthorizer {
    async fn check_permission(
        &self,
        context: &RequestContext,
        collection: &str,
        operation: Operation,
        _select: &Document,
    ) -> Result<(), AuthError> {
        self.calls
            .lock()
            .push((context.token.clone(), collection.to_string(), operation));
        self.verdict.clone()
    }
}

/// Serves every request with `handler(body)` on an ephemeral local port.
pub async fn spawn_test_server<F>(handler: F) -> u16
where
    F: Fn(Bytes) -> Response<Bytes> + Send + Sync + 'static,
{
    spawn_counting_test_server(handler).await.0
}

/// Like [`spawn_test_server`], also counting accepted connections.
pub async fn spawn_counting_test_server<F>(handler: F) -> (u16, Arc<AtomicUsize>)
where
    F: Fn(Bytes) -> Response<Bytes> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to address");
    let port = listener.local_addr().unwrap().port();
    let handler = Arc::new(handler);
    let connections = Arc::new(AtomicUsize::new(0));
    let accepted = connections.clone();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            accepted.fetch_add(1, Ordering::SeqCst);
            let io = TokioIo::new(stream);
            let handler = handler.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let handler = handler.clone();
                    async move {
                        let body = req
                            .into_body()
                            .collect()
                            .await
                            .map(|collected| collected.to_bytes())
                            .unwrap_or_default();
                        let (parts, body) = (*handler)(body).into_parts();
                        Ok::<_, Infallible>(Response::from_parts(parts, Full::new(body)))
                    }
                });
                if let Err(err) =
                    hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                {
                    eprintln!("Error serving connection: {:?}", err);
                }
            });
        }
    });

    (port, connections)
}

pub async fn recv_envelope(rx: &mut mpsc::Receiver<Bytes>) -> DuplicatedEnvelope {
    let bytes = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no envelope within 2s")
        .expect("duplication queue closed");
    serde_json::from_slice(&bytes).unwrap()
}
